// The whole eye rig behind one cooperative tick
//
// Rig owns every component and the collaborators they share (settings store,
// document source, RNG). Nothing here blocks; the runtime loop calls `tick`
// and feeds `apply` with decoded commands.

use std::time::Instant;

use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::config::{NUM_SERVOS, SERVO_NAMES};
use crate::eye::EyeController;
use crate::messages::{
    Command, EyeState, ImpulseState, ModeState, Reply, RigEvent, ServoState, StateSnapshot,
};
use crate::mode::{Mode, ModeContext, ModeManager, FOLLOW};
use crate::scheduler::Schedulers;
use crate::sequence::{validate_name, DocumentSource, ImpulsePlayer, SequenceKind, StepKind};
use crate::servo::{ServoController, ServoDriver};
use crate::store::{self, SettingsStore};

/// Clamp to 0-180 and force min < center < max
pub fn sanitize_calibration(min: i32, center: i32, max: i32) -> (u8, u8, u8) {
    let mut min = min.clamp(0, 180);
    let mut center = center.clamp(0, 180);
    let mut max = max.clamp(0, 180);

    if min >= center {
        min = (center - 1).max(0);
    }
    if max <= center {
        max = (center + 1).min(180);
    }
    if min >= center {
        center = min + 1;
    }
    if max <= center {
        center = max - 1;
    }
    (min as u8, center as u8, max as u8)
}

/// Last state seen by `observe`, for edge-triggered events
#[derive(Debug, Default)]
struct Observed {
    animating: bool,
    mode: Mode,
    impulse_playing: bool,
}

pub struct Rig {
    eye: EyeController,
    modes: ModeManager,
    impulses: ImpulsePlayer,
    schedulers: Schedulers,
    store: Box<dyn SettingsStore>,
    source: Box<dyn DocumentSource>,
    rng: StdRng,
    events: Vec<RigEvent>,
    observed: Observed,
}

impl Rig {
    pub fn new(
        driver: Box<dyn ServoDriver>,
        store: Box<dyn SettingsStore>,
        source: Box<dyn DocumentSource>,
        rng: StdRng,
    ) -> Self {
        let settings = store.settings().clone();
        Self {
            eye: EyeController::new(ServoController::new(settings.servos, driver)),
            modes: ModeManager::new(),
            impulses: ImpulsePlayer::new(),
            schedulers: Schedulers::new(&settings.mode, &settings.impulse),
            store,
            source,
            rng,
            events: Vec::new(),
            observed: Observed::default(),
        }
    }

    /// Attach hardware, arm the schedulers and enter the startup mode
    pub fn boot(&mut self, now: Instant) {
        self.eye.begin();
        self.schedulers.blink.begin(&mut self.rng, now);
        self.schedulers
            .impulse
            .begin(&mut self.impulses, self.source.as_ref(), &mut self.rng, now);

        let (modes, mut ctx, _) = self.mode_parts();
        modes.begin(&mut ctx);
        self.observe();
        info!("Rig ready in mode '{}'", self.modes.mode().name());
    }

    fn mode_parts(&mut self) -> (&mut ModeManager, ModeContext<'_>, &mut StdRng) {
        (
            &mut self.modes,
            ModeContext {
                eye: &mut self.eye,
                schedulers: &mut self.schedulers,
                store: self.store.as_mut(),
                source: self.source.as_ref(),
            },
            &mut self.rng,
        )
    }

    /// One pass of the cooperative loop
    pub fn tick(&mut self, now: Instant) {
        self.eye.tick(now);

        let (modes, mut ctx, rng) = self.mode_parts();
        let outcome = modes.tick(&mut ctx, rng, now);
        if outcome.executed == Some(StepKind::Blink) {
            self.schedulers.blink.reset_timer(&mut self.rng, now);
        }

        let impulse = self.impulses.tick(&mut self.eye, &mut self.rng, now);
        if impulse.outcome.executed == Some(StepKind::Blink) {
            self.schedulers.blink.reset_timer(&mut self.rng, now);
        }
        if impulse.finished {
            self.after_impulse(now);
        }

        let impulse_busy = self.impulses.is_busy();
        self.schedulers
            .blink
            .tick(&mut self.eye, impulse_busy, &mut self.rng, now);
        self.schedulers.impulse.tick(
            &mut self.impulses,
            &mut self.eye,
            self.source.as_ref(),
            &mut self.rng,
            now,
        );

        self.eye.servos_mut().tick(now);
        self.observe();
    }

    /// Quiet period after an impulse, then warm the next one
    fn after_impulse(&mut self, now: Instant) {
        self.schedulers.blink.reset_timer(&mut self.rng, now);
        self.schedulers
            .impulse
            .preload(&mut self.impulses, self.source.as_ref(), &mut self.rng);
    }

    fn observe(&mut self) {
        let animating = self.eye.is_animating();
        if animating != self.observed.animating {
            self.events.push(if animating {
                RigEvent::AnimationStarted
            } else {
                RigEvent::AnimationFinished
            });
            self.observed.animating = animating;
        }

        if self.modes.mode() != &self.observed.mode {
            self.observed.mode = self.modes.mode().clone();
            self.events.push(RigEvent::ModeChanged {
                mode: self.observed.mode.name().to_string(),
            });
        }

        let playing = self.impulses.is_playing();
        if playing != self.observed.impulse_playing {
            self.events.push(if playing {
                RigEvent::ImpulseStarted {
                    name: self.impulses.current().unwrap_or_default().to_string(),
                }
            } else {
                RigEvent::ImpulseFinished
            });
            self.observed.impulse_playing = playing;
        }
    }

    pub fn drain_events(&mut self) -> Vec<RigEvent> {
        std::mem::take(&mut self.events)
    }

    /// Handle one remote command; listing commands produce a reply
    pub fn apply(&mut self, cmd: Command, now: Instant) -> Option<Reply> {
        debug!("Command: {:?}", cmd);
        let reply = self.dispatch(cmd, now);
        self.observe();
        reply
    }

    fn dispatch(&mut self, cmd: Command, now: Instant) -> Option<Reply> {
        match cmd {
            Command::SetServo { index, position } => {
                self.eye.servos_mut().set_position(index, position);
            }
            Command::PreviewCalibration { index, position } => {
                self.eye.servos_mut().set_position_raw(index, position);
            }
            Command::SetCalibration {
                index,
                min,
                center,
                max,
            } => {
                let (min, center, max) = sanitize_calibration(min, center, max);
                self.eye
                    .servos_mut()
                    .set_calibration(index, min, center, max, self.store.as_mut());
            }
            Command::SetPin { index, pin } => {
                self.eye.servos_mut().set_pin(index, pin, self.store.as_mut());
            }
            Command::SetInvert { index, invert } => {
                self.eye
                    .servos_mut()
                    .set_invert(index, invert, self.store.as_mut());
            }
            Command::CenterAll => self.eye.servos_mut().request_center_all(),
            Command::ResetCalibration { index } => {
                self.eye
                    .servos_mut()
                    .reset_calibration(index, self.store.as_mut());
            }

            Command::SetGaze { x, y, z } => self.eye.set_gaze(x, y, z),
            Command::SetLids { left, right } => {
                self.eye.set_lids(left, right);
                self.schedulers.blink.reset_timer(&mut self.rng, now);
            }
            Command::Blink { eye, duration } => {
                self.eye.start_blink_eye(eye, duration, now);
                self.schedulers.blink.reset_timer(&mut self.rng, now);
            }
            Command::SetCoupling { value } => self.eye.set_coupling(value),
            Command::SetVergence { max } => self.eye.set_max_vergence(max),
            Command::CenterEyes => self.eye.center(),
            Command::ReapplyEyeState => self.eye.reapply(),

            Command::SetMode { mode } => {
                let (modes, mut ctx, _) = self.mode_parts();
                if let Err(e) = modes.set_by_name(&mode, &mut ctx) {
                    warn!("{}", e);
                }
            }
            Command::SetDefaultMode { mode } => {
                if mode != FOLLOW && validate_name(&mode).is_err() {
                    warn!("Rejected default mode {:?}", mode);
                } else {
                    info!("Default startup mode set to: {}", mode);
                    store::update(self.store.as_mut(), |s| s.mode.default_mode = mode);
                }
            }
            Command::SetRememberLastMode { enabled } => {
                let current = self.modes.mode().name().to_string();
                store::update(self.store.as_mut(), |s| {
                    s.mode.remember_last_mode = enabled;
                    if enabled {
                        s.mode.default_mode = current;
                    }
                });
                info!("Remember last mode {}", if enabled { "enabled" } else { "disabled" });
            }
            Command::SetAutoBlink { enabled } => {
                self.schedulers.blink.set_enabled(enabled, &mut self.rng, now);
                store::update(self.store.as_mut(), |s| s.mode.auto_blink = enabled);
                info!("Auto-blink {}", if enabled { "enabled" } else { "disabled" });
            }
            Command::SetBlinkInterval { min, max } => {
                self.schedulers.blink.set_interval(min, max);
                let (min, max) = self.schedulers.blink.interval();
                store::update(self.store.as_mut(), |s| {
                    s.mode.blink_interval_min = min;
                    s.mode.blink_interval_max = max;
                });
                info!("Blink interval set to {}-{} ms", min, max);
            }
            Command::SetAutoBlinkOverride { enabled } => {
                self.schedulers.blink.set_override(enabled);
            }
            Command::SetAutoImpulseOverride { enabled } => {
                self.schedulers.impulse.set_override(enabled);
            }
            Command::PauseAutomation { paused } => {
                if paused {
                    self.schedulers.blink.pause();
                    self.schedulers.impulse.pause();
                    self.modes.pause_player(now);
                    info!("Automation paused for calibration");
                } else {
                    self.schedulers.blink.resume(&mut self.rng, now);
                    self.schedulers.impulse.resume(&mut self.rng, now);
                    self.modes.resume_player(now);
                    info!("Automation resumed");
                }
            }
            Command::PauseModePlayer { paused } => {
                if paused {
                    self.modes.pause_player(now);
                } else {
                    self.modes.resume_player(now);
                }
            }
            Command::ListModes => {
                let mut modes = vec![FOLLOW.to_string()];
                modes.extend(self.source.list(SequenceKind::Mode));
                return Some(Reply::AvailableModes { modes });
            }

            Command::TriggerImpulse { name } => {
                let result = match name.as_deref().filter(|n| !n.is_empty()) {
                    Some(name) => {
                        self.impulses
                            .trigger_by_name(name, self.source.as_ref(), &mut self.eye)
                    }
                    None => self.impulses.trigger(&mut self.eye),
                };
                if let Err(e) = result {
                    warn!("Impulse trigger failed: {}", e);
                }
                self.schedulers.impulse.reset_timer(&mut self.rng, now);
            }
            Command::StopImpulse => {
                if self.impulses.stop(&mut self.eye) {
                    self.after_impulse(now);
                }
            }
            Command::SetAutoImpulse { enabled } => {
                self.schedulers.impulse.set_enabled(
                    enabled,
                    &mut self.impulses,
                    self.source.as_ref(),
                    &mut self.rng,
                    now,
                );
                store::update(self.store.as_mut(), |s| s.impulse.auto_impulse = enabled);
                info!("Auto-impulse {}", if enabled { "enabled" } else { "disabled" });
            }
            Command::SetImpulseInterval { min, max } => {
                self.schedulers.impulse.set_interval(min, max);
                let (min, max) = self.schedulers.impulse.interval();
                store::update(self.store.as_mut(), |s| {
                    s.impulse.impulse_interval_min = min;
                    s.impulse.impulse_interval_max = max;
                });
                info!("Impulse interval set to {}-{} ms", min, max);
            }
            Command::SetImpulseSelection { selection } => {
                self.schedulers.impulse.set_selection(
                    &selection,
                    &mut self.impulses,
                    self.source.as_ref(),
                    &mut self.rng,
                );
                let saved = self.schedulers.impulse.selection().as_str().to_string();
                info!("Impulse selection updated: {}", saved);
                store::update(self.store.as_mut(), |s| s.impulse.impulse_selection = saved);
            }
            Command::ListImpulses => {
                return Some(Reply::AvailableImpulses {
                    impulses: self.source.list(SequenceKind::Impulse),
                });
            }
        }
        None
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let servos = self.eye.servos();
        let settings = self.store.settings();
        let blink = &self.schedulers.blink;
        let auto_impulse = &self.schedulers.impulse;
        let (blink_min, blink_max) = blink.interval();
        let (impulse_min, impulse_max) = auto_impulse.interval();

        StateSnapshot {
            servos: (0..NUM_SERVOS)
                .filter_map(|index| {
                    Some(ServoState {
                        index,
                        name: SERVO_NAMES[index],
                        position: servos.position(index),
                        target: servos.target(index),
                        calibration: *servos.calibration(index)?,
                    })
                })
                .collect(),
            eye: EyeState {
                gaze_x: self.eye.gaze_x(),
                gaze_y: self.eye.gaze_y(),
                gaze_z: self.eye.gaze_z(),
                lid_left: self.eye.lid_left(),
                lid_right: self.eye.lid_right(),
                coupling: self.eye.coupling(),
                max_vergence: self.eye.max_vergence(),
                animation: self.eye.animation_state(),
            },
            mode: ModeState {
                current: self.modes.mode().name().to_string(),
                is_auto: self.modes.mode().is_auto(),
                error: self.modes.error().map(str::to_string),
                player_paused: self.modes.player().is_paused(),
                default_mode: settings.mode.default_mode.clone(),
                remember_last_mode: settings.mode.remember_last_mode,
                auto_blink_enabled: blink.is_enabled(),
                auto_blink_active: blink.is_active(),
                auto_blink_paused: blink.is_paused(),
                auto_blink_override: blink.runtime_override(),
                blink_interval_min: blink_min,
                blink_interval_max: blink_max,
            },
            impulse: ImpulseState {
                playing: self.impulses.is_playing(),
                pending: self.impulses.is_pending(),
                current: self.impulses.current().map(str::to_string),
                preloaded: self.impulses.preloaded().map(str::to_string),
                auto_impulse_enabled: auto_impulse.is_enabled(),
                auto_impulse_active: auto_impulse.is_active(),
                auto_impulse_override: auto_impulse.runtime_override(),
                impulse_interval_min: impulse_min,
                impulse_interval_max: impulse_max,
                selection: auto_impulse.selection().as_str().to_string(),
            },
        }
    }

    pub fn eye(&self) -> &EyeController {
        &self.eye
    }

    pub fn modes(&self) -> &ModeManager {
        &self.modes
    }

    pub fn impulses(&self) -> &ImpulsePlayer {
        &self.impulses
    }

    pub fn schedulers(&self) -> &Schedulers {
        &self.schedulers
    }

    pub fn settings(&self) -> &crate::store::Settings {
        self.store.settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::MemorySource;
    use crate::servo::SimDriver;
    use crate::store::{MemoryStore, Settings};
    use rand::SeedableRng;
    use std::time::Duration;

    fn rig(settings: Settings, source: MemorySource) -> Rig {
        Rig::new(
            Box::new(SimDriver::new()),
            Box::new(MemoryStore::new(settings)),
            Box::new(source),
            StdRng::seed_from_u64(11),
        )
    }

    fn quiet() -> Settings {
        let mut settings = Settings::default();
        settings.mode.auto_blink = false;
        settings.impulse.auto_impulse = false;
        settings
    }

    #[test]
    fn test_sanitize_calibration() {
        assert_eq!(sanitize_calibration(40, 90, 140), (40, 90, 140));
        assert_eq!(sanitize_calibration(95, 90, 140), (89, 90, 140));
        assert_eq!(sanitize_calibration(40, 90, 80), (40, 90, 91));
        assert_eq!(sanitize_calibration(-20, 0, 300), (0, 1, 180));
        assert_eq!(sanitize_calibration(0, 180, 180), (0, 179, 180));
    }

    #[test]
    fn test_boot_emits_mode_change() {
        let mut rig = rig(quiet(), MemorySource::new());
        rig.boot(Instant::now());
        assert_eq!(rig.drain_events(), vec![RigEvent::ModeChanged {
            mode: "follow".to_string()
        }]);
        assert!(rig.drain_events().is_empty());
    }

    #[test]
    fn test_manual_blink_events() {
        let mut rig = rig(quiet(), MemorySource::new());
        let t0 = Instant::now();
        rig.boot(t0);
        rig.drain_events();

        rig.apply(Command::Blink { eye: Default::default(), duration: 100 }, t0);
        assert_eq!(rig.drain_events(), vec![RigEvent::AnimationStarted]);
        rig.tick(t0 + Duration::from_millis(50));
        rig.tick(t0 + Duration::from_millis(100));
        assert_eq!(rig.drain_events(), vec![RigEvent::AnimationFinished]);
    }

    #[test]
    fn test_list_modes_includes_follow() {
        let source = MemorySource::new().with(SequenceKind::Mode, "natural", r#"{"sequence": [{"wait": 1}]}"#);
        let mut rig = rig(quiet(), source);
        let reply = rig.apply(Command::ListModes, Instant::now());
        assert_eq!(reply, Some(Reply::AvailableModes {
            modes: vec!["follow".to_string(), "natural".to_string()]
        }));
    }

    #[test]
    fn test_remember_last_mode_saves_current() {
        let source = MemorySource::new().with(SequenceKind::Mode, "natural", r#"{"sequence": [{"wait": 1}]}"#);
        let mut rig = rig(quiet(), source);
        let t0 = Instant::now();
        rig.boot(t0);
        rig.apply(Command::SetMode { mode: "natural".to_string() }, t0);
        assert_eq!(rig.settings().mode.default_mode, "follow");

        rig.apply(Command::SetRememberLastMode { enabled: true }, t0);
        assert_eq!(rig.settings().mode.default_mode, "natural");
        assert!(rig.settings().mode.remember_last_mode);
    }

    #[test]
    fn test_calibration_command_persists() {
        let mut rig = rig(quiet(), MemorySource::new());
        rig.apply(
            Command::SetCalibration { index: 2, min: 120, center: 100, max: 150 },
            Instant::now(),
        );
        let cal = rig.settings().servos[2];
        assert_eq!((cal.min, cal.center, cal.max), (99, 100, 150));
    }

    #[test]
    fn test_pause_automation_freezes_everything() {
        let mut settings = Settings::default();
        settings.mode.default_mode = "natural".to_string();
        let source = MemorySource::new().with(SequenceKind::Mode, "natural", r#"{"sequence": [{"wait": 1}]}"#);
        let mut rig = rig(settings, source);
        let t0 = Instant::now();
        rig.boot(t0);

        rig.apply(Command::PauseAutomation { paused: true }, t0);
        assert!(!rig.schedulers().blink.is_active());
        assert!(!rig.schedulers().impulse.is_active());
        assert!(rig.modes().player().is_paused());
        rig.tick(t0 + Duration::from_millis(10));
        assert!(rig.modes().mode().is_auto());

        rig.apply(Command::PauseAutomation { paused: false }, t0 + Duration::from_millis(20));
        assert!(rig.schedulers().blink.is_active());
        assert!(!rig.modes().player().is_paused());
    }
}
