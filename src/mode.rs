// Mode manager: decides whether manual commands or an auto mode own the eyes
//
// Every transition stops the mode player, fully resets the eye and clears
// the scheduler overrides. Entering AUTO parses the document first so a bad
// name leaves the current mode untouched.

use std::time::Instant;

use rand::Rng;
use tracing::{info, warn};

use crate::eye::EyeController;
use crate::scheduler::Schedulers;
use crate::sequence::{DocumentSource, LoadError, ModePlayer, SequenceKind, TickOutcome};
use crate::store::{self, SettingsStore};

pub const FOLLOW: &str = "follow";
pub const NONE: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Mode {
    /// Safe state: centered, nothing playing
    #[default]
    None,
    /// Manual control
    Follow,
    Auto(String),
}

impl Mode {
    pub fn name(&self) -> &str {
        match self {
            Mode::None => NONE,
            Mode::Follow => FOLLOW,
            Mode::Auto(name) => name,
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Mode::Auto(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModeError {
    #[error("Failed to load mode '{name}': {source}")]
    Load {
        name: String,
        #[source]
        source: LoadError,
    },

    #[error("'{0}' is not an auto mode")]
    Reserved(String),
}

/// Everything a transition touches besides the manager itself
pub struct ModeContext<'a> {
    pub eye: &'a mut EyeController,
    pub schedulers: &'a mut Schedulers,
    pub store: &'a mut dyn SettingsStore,
    pub source: &'a dyn DocumentSource,
}

#[derive(Debug, Default)]
pub struct ModeManager {
    mode: Mode,
    error: Option<String>,
    player: ModePlayer,
}

impl ModeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn player(&self) -> &ModePlayer {
        &self.player
    }

    /// Enter the persisted startup mode
    pub fn begin(&mut self, ctx: &mut ModeContext<'_>) {
        let default_mode = ctx.store.settings().mode.default_mode.clone();
        info!("Starting in mode: {}", default_mode);

        if default_mode == FOLLOW {
            self.set_follow(ctx);
            return;
        }
        if let Err(e) = self.set_auto(&default_mode, ctx) {
            warn!("{}, falling back to Follow", e);
            self.set_follow(ctx);
        }
    }

    /// Returns false when already in FOLLOW
    pub fn set_follow(&mut self, ctx: &mut ModeContext<'_>) -> bool {
        if self.mode == Mode::Follow {
            return false;
        }
        self.exit_current(ctx);
        self.mode = Mode::Follow;
        self.remember(ctx.store, FOLLOW);
        self.error = None;
        info!("Entered FOLLOW mode");
        true
    }

    /// Returns false when already in NONE
    pub fn set_none(&mut self, ctx: &mut ModeContext<'_>) -> bool {
        if self.mode == Mode::None {
            return false;
        }
        self.exit_current(ctx);
        self.mode = Mode::None;
        self.error = None;
        info!("Entered NONE mode (safe state)");
        true
    }

    /// Load and start an auto mode; on failure the current mode stays and the error is kept
    pub fn set_auto(&mut self, name: &str, ctx: &mut ModeContext<'_>) -> Result<(), ModeError> {
        if name == FOLLOW || name == NONE {
            let err = ModeError::Reserved(name.to_string());
            self.error = Some(err.to_string());
            return Err(err);
        }
        let document = match ctx.source.load(SequenceKind::Mode, name) {
            Ok(document) => document,
            Err(source) => {
                let err = ModeError::Load {
                    name: name.to_string(),
                    source,
                };
                self.error = Some(err.to_string());
                return Err(err);
            }
        };

        self.exit_current(ctx);
        self.player.install(name, document);
        self.mode = Mode::Auto(name.to_string());
        self.remember(ctx.store, name);
        self.player.start(ctx.eye);
        self.error = None;
        info!("Entered AUTO mode: {}", name);
        Ok(())
    }

    /// "follow", "none" or an auto mode name
    pub fn set_by_name(&mut self, name: &str, ctx: &mut ModeContext<'_>) -> Result<(), ModeError> {
        match name {
            FOLLOW => {
                self.set_follow(ctx);
                Ok(())
            }
            NONE => {
                self.set_none(ctx);
                Ok(())
            }
            _ => self.set_auto(name, ctx),
        }
    }

    fn exit_current(&mut self, ctx: &mut ModeContext<'_>) {
        if self.mode.is_auto() {
            self.player.stop(ctx.eye);
            self.player.unload();
        }
        ctx.eye.reset_all();
        ctx.schedulers.clear_overrides();
    }

    fn remember(&self, store: &mut dyn SettingsStore, name: &str) {
        if store.settings().mode.remember_last_mode {
            store::update(store, |s| s.mode.default_mode = name.to_string());
        }
    }

    pub fn pause_player(&mut self, now: Instant) {
        self.player.pause(now);
    }

    pub fn resume_player(&mut self, now: Instant) {
        self.player.resume(now);
    }

    /// Drive the mode player; a finished non-looping mode hands over to FOLLOW
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        ctx: &mut ModeContext<'_>,
        rng: &mut R,
        now: Instant,
    ) -> TickOutcome {
        if !self.mode.is_auto() {
            return TickOutcome::default();
        }
        let outcome = self.player.tick(ctx.eye, rng, now);
        // Paused still counts as playing
        if !self.player.is_playing() {
            info!("Auto mode '{}' finished, switching to Follow", self.mode.name());
            self.set_follow(ctx);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NUM_SERVOS;
    use crate::sequence::MemorySource;
    use crate::servo::{ServoController, SimDriver};
    use crate::store::{MemoryStore, ServoCalibration, Settings};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    struct Fixture {
        eye: EyeController,
        schedulers: Schedulers,
        store: MemoryStore,
        source: MemorySource,
    }

    impl Fixture {
        fn new() -> Self {
            let settings = Settings::default();
            let cals: [ServoCalibration; NUM_SERVOS] = std::array::from_fn(ServoCalibration::factory);
            Self {
                eye: EyeController::new(ServoController::new(cals, Box::new(SimDriver::new()))),
                schedulers: Schedulers::new(&settings.mode, &settings.impulse),
                store: MemoryStore::new(settings),
                source: MemorySource::new()
                    .with(SequenceKind::Mode, "natural", r#"{"sequence": [{"wait": 100}], "coupling": 0.5}"#)
                    .with(SequenceKind::Mode, "once", r#"{"sequence": [{"gaze": {"x": 30}}], "loop": false}"#)
                    .with(SequenceKind::Mode, "broken", r#"{"sequence": []}"#),
            }
        }

        fn ctx(&mut self) -> ModeContext<'_> {
            ModeContext {
                eye: &mut self.eye,
                schedulers: &mut self.schedulers,
                store: &mut self.store,
                source: &self.source,
            }
        }
    }

    #[test]
    fn test_boot_defaults_to_follow() {
        let mut fx = Fixture::new();
        let mut modes = ModeManager::new();
        modes.begin(&mut fx.ctx());
        assert_eq!(modes.mode(), &Mode::Follow);
    }

    #[test]
    fn test_boot_falls_back_to_follow() {
        let mut fx = Fixture::new();
        store::update(&mut fx.store, |s| s.mode.default_mode = "missing".to_string());
        let mut modes = ModeManager::new();
        modes.begin(&mut fx.ctx());
        assert_eq!(modes.mode(), &Mode::Follow);
        assert!(modes.error().is_none());
    }

    #[test]
    fn test_boot_into_auto() {
        let mut fx = Fixture::new();
        store::update(&mut fx.store, |s| s.mode.default_mode = "natural".to_string());
        let mut modes = ModeManager::new();
        modes.begin(&mut fx.ctx());
        assert_eq!(modes.mode(), &Mode::Auto("natural".to_string()));
        assert!(modes.player().is_playing());
        assert_eq!(fx.eye.coupling(), 0.5);
    }

    #[test]
    fn test_failed_auto_keeps_mode_and_records_error() {
        let mut fx = Fixture::new();
        let mut modes = ModeManager::new();
        modes.set_auto("natural", &mut fx.ctx()).unwrap();

        let err = modes.set_auto("broken", &mut fx.ctx()).unwrap_err();
        assert!(matches!(err, ModeError::Load { .. }));
        assert_eq!(modes.mode(), &Mode::Auto("natural".to_string()));
        assert!(modes.player().is_playing());
        assert!(modes.error().is_some());

        modes.set_follow(&mut fx.ctx());
        assert!(modes.error().is_none());
    }

    #[test]
    fn test_transition_resets_eye_and_overrides() {
        let mut fx = Fixture::new();
        let mut modes = ModeManager::new();
        modes.set_follow(&mut fx.ctx());
        fx.eye.set_gaze(40.0, 40.0, 40.0);
        fx.schedulers.blink.set_override(Some(false));

        modes.set_auto("natural", &mut fx.ctx()).unwrap();
        assert_eq!(fx.eye.gaze_x(), 0.0);
        assert_eq!(fx.eye.gaze_z(), 0.0);
        assert_eq!(fx.schedulers.blink.runtime_override(), None);
    }

    #[test]
    fn test_reselecting_follow_is_noop() {
        let mut fx = Fixture::new();
        let mut modes = ModeManager::new();
        assert!(modes.set_follow(&mut fx.ctx()));
        fx.eye.set_gaze(40.0, 0.0, 0.0);
        assert!(!modes.set_follow(&mut fx.ctx()));
        assert_eq!(fx.eye.gaze_x(), 40.0);
    }

    #[test]
    fn test_reselecting_auto_restarts_it() {
        let mut fx = Fixture::new();
        let mut rng = StdRng::seed_from_u64(8);
        let mut modes = ModeManager::new();
        let t0 = Instant::now();
        modes.set_auto("natural", &mut fx.ctx()).unwrap();
        let out = modes.tick(&mut fx.ctx(), &mut rng, t0);
        assert!(out.executed.is_some());
        // Suspended on the 100 ms wait
        assert!(modes.tick(&mut fx.ctx(), &mut rng, t0 + Duration::from_millis(5)).executed.is_none());

        fx.eye.set_gaze(40.0, 0.0, 0.0);
        modes.set_auto("natural", &mut fx.ctx()).unwrap();
        assert_eq!(modes.mode(), &Mode::Auto("natural".to_string()));
        assert_eq!(fx.eye.gaze_x(), 0.0);
        assert!(modes.player().is_playing());

        let out = modes.tick(&mut fx.ctx(), &mut rng, t0 + Duration::from_millis(10));
        assert_eq!(out.executed, Some(crate::sequence::StepKind::Wait));
    }

    #[test]
    fn test_remember_last_mode_persists_entries() {
        let mut fx = Fixture::new();
        store::update(&mut fx.store, |s| s.mode.remember_last_mode = true);
        let mut modes = ModeManager::new();

        modes.set_auto("natural", &mut fx.ctx()).unwrap();
        assert_eq!(fx.store.settings().mode.default_mode, "natural");
        modes.set_follow(&mut fx.ctx());
        assert_eq!(fx.store.settings().mode.default_mode, "follow");
        // NONE is never remembered
        modes.set_none(&mut fx.ctx());
        assert_eq!(fx.store.settings().mode.default_mode, "follow");
    }

    #[test]
    fn test_finished_mode_switches_to_follow() {
        let mut fx = Fixture::new();
        let mut rng = StdRng::seed_from_u64(8);
        let mut modes = ModeManager::new();
        let t0 = Instant::now();
        modes.set_auto("once", &mut fx.ctx()).unwrap();

        modes.tick(&mut fx.ctx(), &mut rng, t0);
        assert_eq!(modes.mode(), &Mode::Follow);
        assert_eq!(fx.eye.coupling(), 1.0);
    }

    #[test]
    fn test_paused_mode_stays_auto() {
        let mut fx = Fixture::new();
        let mut rng = StdRng::seed_from_u64(8);
        let mut modes = ModeManager::new();
        let t0 = Instant::now();
        modes.set_auto("natural", &mut fx.ctx()).unwrap();
        modes.pause_player(t0);
        modes.tick(&mut fx.ctx(), &mut rng, t0 + Duration::from_millis(500));
        assert!(modes.mode().is_auto());
    }

    #[test]
    fn test_reserved_names() {
        let mut fx = Fixture::new();
        let mut modes = ModeManager::new();
        assert!(matches!(
            modes.set_auto("follow", &mut fx.ctx()),
            Err(ModeError::Reserved(_))
        ));
        modes.set_by_name("follow", &mut fx.ctx()).unwrap();
        assert_eq!(modes.mode(), &Mode::Follow);
    }
}
