// Step interpreter shared by the mode and impulse players
//
// Unloaded -> Loaded -> Playing <-> Suspended(deadline | animation) -> Complete
//
// A tick either executes the step under the cursor or, when a suspension has
// just been satisfied, moves the cursor on. Never both, and never more than
// one step.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use super::document::{resolve_int, resolve_value, SequenceDocument, Step, StepKind};
use crate::config::{DEFAULT_BLINK_MS, MAX_WAIT_MS};
use crate::eye::EyeController;

/// How `lids` steps treat a running blink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LidPolicy {
    /// Leave the lids alone while the eye animates
    SkipWhileAnimating,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suspension {
    Deadline(Instant),
    Animation,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Step executed this tick, if any
    pub executed: Option<StepKind>,
    /// The cursor ran off the end and playback stopped
    pub completed: bool,
}

#[derive(Debug, Default)]
pub struct SequencePlayer {
    document: Option<SequenceDocument>,
    playing: bool,
    paused_at: Option<Instant>,
    step: usize,
    suspension: Option<Suspension>,
    rewind: bool,
}

impl SequencePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the document; stops any playback
    pub fn load(&mut self, document: SequenceDocument) {
        self.stop();
        self.document = Some(document);
    }

    pub fn unload(&mut self) {
        self.stop();
        self.document = None;
    }

    pub fn document(&self) -> Option<&SequenceDocument> {
        self.document.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.document.is_some()
    }

    /// Start from the first step; `rewind` loops instead of completing
    pub fn start(&mut self, rewind: bool) -> bool {
        if self.document.is_none() {
            return false;
        }
        self.step = 0;
        self.suspension = None;
        self.paused_at = None;
        self.playing = true;
        self.rewind = rewind;
        true
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.suspension = None;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Continue where pause left off; a pending deadline moves by the paused time
    pub fn resume(&mut self, now: Instant) {
        let Some(paused_at) = self.paused_at.take() else {
            return;
        };
        if let Some(Suspension::Deadline(deadline)) = self.suspension {
            let paused_for = now.saturating_duration_since(paused_at);
            let shifted = deadline.checked_add(paused_for).unwrap_or(deadline);
            self.suspension = Some(Suspension::Deadline(shifted));
        }
    }

    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        eye: &mut EyeController,
        lids: LidPolicy,
        rng: &mut R,
        now: Instant,
    ) -> TickOutcome {
        if !self.playing || self.paused_at.is_some() {
            return TickOutcome::default();
        }

        if let Some(suspension) = self.suspension {
            let satisfied = match suspension {
                Suspension::Deadline(deadline) => now >= deadline,
                Suspension::Animation => !eye.is_animating(),
            };
            if !satisfied {
                return TickOutcome::default();
            }
            self.suspension = None;
            return TickOutcome {
                executed: None,
                completed: self.advance(),
            };
        }

        let Some(step) = self
            .document
            .as_ref()
            .and_then(|doc| doc.steps.get(self.step))
            .cloned()
        else {
            self.playing = false;
            return TickOutcome::default();
        };

        self.suspension = execute_step(&step, eye, lids, rng, now);
        let completed = self.suspension.is_none() && self.advance();
        TickOutcome {
            executed: Some(step.kind()),
            completed,
        }
    }

    /// Returns true when playback completed
    fn advance(&mut self) -> bool {
        let len = self.document.as_ref().map_or(0, |doc| doc.steps.len());
        self.step += 1;
        if self.step < len {
            return false;
        }
        if self.rewind {
            self.step = 0;
            false
        } else {
            self.stop();
            true
        }
    }
}

fn execute_step<R: Rng + ?Sized>(
    step: &Step,
    eye: &mut EyeController,
    lids: LidPolicy,
    rng: &mut R,
    now: Instant,
) -> Option<Suspension> {
    match step {
        Step::Gaze { x, y, z } => {
            let x = resolve_value(x, eye.gaze_x(), rng);
            let y = resolve_value(y, eye.gaze_y(), rng);
            let z = resolve_value(z, eye.gaze_z(), rng);
            eye.set_gaze(x, y, z);
            None
        }
        Step::Lids { left, right } => {
            if lids == LidPolicy::SkipWhileAnimating && eye.is_animating() {
                debug!("Lids step skipped during animation");
                return None;
            }
            let left = resolve_value(left, eye.lid_left(), rng);
            let right = resolve_value(right, eye.lid_right(), rng);
            eye.set_lids(left, right);
            None
        }
        Step::Blink(duration) => {
            // Negative durations fall back to auto scaling
            let ms = resolve_int(duration, DEFAULT_BLINK_MS as i64, rng).clamp(0, u32::MAX as i64);
            eye.start_blink(ms as u32, now);
            Some(Suspension::Animation)
        }
        Step::Wait(ms) => {
            let ms = resolve_int(ms, 0, rng);
            if ms <= 0 {
                return None;
            }
            let wait = Duration::from_millis((ms as u64).min(MAX_WAIT_MS));
            match now.checked_add(wait) {
                Some(deadline) => Some(Suspension::Deadline(deadline)),
                None => {
                    warn!("Wait of {} ms out of range, skipped", ms);
                    None
                }
            }
        }
        Step::Unrecognized => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NUM_SERVOS;
    use crate::servo::{ServoController, SimDriver};
    use crate::store::ServoCalibration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn eye() -> EyeController {
        let cals: [ServoCalibration; NUM_SERVOS] = std::array::from_fn(ServoCalibration::factory);
        EyeController::new(ServoController::new(cals, Box::new(SimDriver::new())))
    }

    fn player(text: &str, rewind: bool) -> SequencePlayer {
        let mut player = SequencePlayer::new();
        player.load(SequenceDocument::parse(text).unwrap());
        assert!(player.start(rewind));
        player
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_looping_waits_cycle_without_completing() {
        let mut eye = eye();
        let mut rng = StdRng::seed_from_u64(1);
        let mut player = player(r#"{"sequence": [{"wait": 10}, {"wait": 20}]}"#, true);
        let t0 = Instant::now();

        let mut cursor = Vec::new();
        let mut t = t0;
        for _ in 0..200 {
            let out = player.tick(&mut eye, LidPolicy::Always, &mut rng, t);
            assert!(!out.completed);
            if out.executed.is_some() {
                cursor.push(player.current_step());
            }
            t += ms(1);
        }
        assert!(player.is_playing());
        assert_eq!(&cursor[..4], &[0, 1, 0, 1]);
    }

    #[test]
    fn test_non_looping_honors_final_wait() {
        let mut eye = eye();
        let mut rng = StdRng::seed_from_u64(1);
        let mut player = player(r#"{"sequence": [{"gaze": {"x": 40}}, {"wait": 50}]}"#, false);
        let t0 = Instant::now();

        let out = player.tick(&mut eye, LidPolicy::Always, &mut rng, t0);
        assert_eq!(out.executed, Some(StepKind::Gaze));
        assert_eq!(eye.gaze_x(), 40.0);

        let out = player.tick(&mut eye, LidPolicy::Always, &mut rng, t0);
        assert_eq!(out.executed, Some(StepKind::Wait));
        assert!(!out.completed);

        assert!(!player.tick(&mut eye, LidPolicy::Always, &mut rng, t0 + ms(49)).completed);
        assert!(player.tick(&mut eye, LidPolicy::Always, &mut rng, t0 + ms(50)).completed);
        assert!(!player.is_playing());
    }

    #[test]
    fn test_blink_step_suspends_until_animation_ends() {
        let mut eye = eye();
        let mut rng = StdRng::seed_from_u64(1);
        let mut player = player(r#"{"sequence": [{"blink": 100}, {"gaze": {"y": 10}}]}"#, false);
        let t0 = Instant::now();

        let out = player.tick(&mut eye, LidPolicy::Always, &mut rng, t0);
        assert_eq!(out.executed, Some(StepKind::Blink));
        assert!(eye.is_animating());

        eye.tick(t0 + ms(50));
        let out = player.tick(&mut eye, LidPolicy::Always, &mut rng, t0 + ms(60));
        assert_eq!(out.executed, None);
        assert_eq!(player.current_step(), 0);

        eye.tick(t0 + ms(100));
        assert!(!eye.is_animating());
        player.tick(&mut eye, LidPolicy::Always, &mut rng, t0 + ms(100));
        assert_eq!(player.current_step(), 1);
    }

    #[test]
    fn test_lid_policy() {
        let mut rng = StdRng::seed_from_u64(1);
        let t0 = Instant::now();
        let text = r#"{"sequence": [{"lids": {"left": 50, "right": 50}}]}"#;

        let mut eye_a = eye();
        eye_a.start_wait(1000, t0);
        let mut guarded = player(text, true);
        guarded.tick(&mut eye_a, LidPolicy::SkipWhileAnimating, &mut rng, t0);
        assert_eq!(eye_a.lid_left(), 0.0);

        let mut eye_b = eye();
        eye_b.start_wait(1000, t0);
        let mut forced = player(text, true);
        forced.tick(&mut eye_b, LidPolicy::Always, &mut rng, t0);
        assert_eq!(eye_b.lid_left(), 50.0);
    }

    #[test]
    fn test_pause_shifts_deadline() {
        let mut eye = eye();
        let mut rng = StdRng::seed_from_u64(1);
        let mut player = player(r#"{"sequence": [{"wait": 100}, {"gaze": {"x": 5}}]}"#, false);
        let t0 = Instant::now();

        player.tick(&mut eye, LidPolicy::Always, &mut rng, t0);
        player.pause(t0 + ms(40));
        // Frozen while paused, even past the original deadline
        player.tick(&mut eye, LidPolicy::Always, &mut rng, t0 + ms(200));
        assert_eq!(player.current_step(), 0);

        player.resume(t0 + ms(240));
        player.tick(&mut eye, LidPolicy::Always, &mut rng, t0 + ms(299));
        assert_eq!(player.current_step(), 0);
        player.tick(&mut eye, LidPolicy::Always, &mut rng, t0 + ms(300));
        assert_eq!(player.current_step(), 1);
    }

    #[test]
    fn test_unrecognized_step_advances() {
        let mut eye = eye();
        let mut rng = StdRng::seed_from_u64(1);
        let mut player = player(r#"{"sequence": [{"dance": true}, {"wait": 0}]}"#, false);
        let t0 = Instant::now();

        let out = player.tick(&mut eye, LidPolicy::Always, &mut rng, t0);
        assert_eq!(out.executed, Some(StepKind::Unrecognized));
        // Zero wait does not suspend
        let out = player.tick(&mut eye, LidPolicy::Always, &mut rng, t0);
        assert!(out.completed);
    }

    #[test]
    fn test_huge_wait_is_capped() {
        let mut eye = eye();
        let mut rng = StdRng::seed_from_u64(1);
        let mut player = player(r#"{"sequence": [{"wait": 1e30}, {"gaze": {"x": 5}}]}"#, false);
        let t0 = Instant::now();

        let out = player.tick(&mut eye, LidPolicy::Always, &mut rng, t0);
        assert_eq!(out.executed, Some(StepKind::Wait));
        player.tick(&mut eye, LidPolicy::Always, &mut rng, t0 + ms(MAX_WAIT_MS - 1));
        assert_eq!(player.current_step(), 0);
        player.tick(&mut eye, LidPolicy::Always, &mut rng, t0 + ms(MAX_WAIT_MS));
        assert_eq!(player.current_step(), 1);
    }

    #[test]
    fn test_start_requires_document() {
        let mut player = SequencePlayer::new();
        assert!(!player.start(true));
        assert!(!player.is_playing());
    }
}
