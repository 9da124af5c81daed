// Logical eye model: gaze, lids, vergence and the non-blocking blink/wait animation
//
// All values live in a -100..100 logical space. Every mutation is pushed
// straight through the calibration mapping into servo targets; the servo
// controller decides when they reach the hardware.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{
    DEFAULT_MAX_VERGENCE, MAX_VERTICAL_DIVERGENCE, SERVO_LEFT_EYE_X, SERVO_LEFT_EYE_Y,
    SERVO_LEFT_EYELID, SERVO_RIGHT_EYE_X, SERVO_RIGHT_EYE_Y, SERVO_RIGHT_EYELID,
};
use crate::servo::ServoController;
use crate::store::ServoCalibration;

const CLOSED: f32 = -100.0;

fn clamp_logical(v: f32) -> f32 {
    v.clamp(-100.0, 100.0)
}

/// Map a logical value onto a calibrated servo angle
///
/// Negative values interpolate min..center, the rest center..max.
pub fn logical_to_position(logical: f32, cal: &ServoCalibration) -> u8 {
    let (min, center, max) = (cal.min as f32, cal.center as f32, cal.max as f32);
    let position = if logical < 0.0 {
        (logical + 100.0) * (center - min) / 100.0 + min
    } else {
        logical * (max - center) / 100.0 + center
    };
    position.clamp(0.0, 180.0) as u8
}

/// Auto-scaled blink length: 100 ms plus 0.75 ms per unit of lid travel to closed
pub fn blink_duration(lid_left: f32, lid_right: f32) -> u32 {
    let travel = (lid_left - CLOSED).max(lid_right - CLOSED);
    (100.0 + travel * 0.75) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlinkEye {
    #[default]
    Both,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationState {
    Idle,
    BlinkClosing,
    BlinkOpening,
    /// Only entered through `start_wait`; the players keep their own deadlines
    Waiting,
}

/// Lids as they were before a blink closed them
#[derive(Debug, Clone, Copy)]
struct SavedLids {
    eye: BlinkEye,
    left: f32,
    right: f32,
}

#[derive(Debug, Clone, Copy)]
enum Animation {
    Idle,
    BlinkClosing {
        since: Instant,
        duration_ms: u32,
        saved: SavedLids,
    },
    BlinkOpening {
        since: Instant,
        duration_ms: u32,
        saved: SavedLids,
    },
    // Sequence waits use their own deadline; this is only reached via start_wait
    Waiting {
        since: Instant,
        duration_ms: u32,
    },
}

fn elapsed(since: Instant, now: Instant, ms: u32) -> bool {
    now.saturating_duration_since(since) >= Duration::from_millis(ms as u64)
}

/// Everything needed to put the eyes back after an impulse
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EyeSnapshot {
    pub gaze_x: f32,
    pub gaze_y: f32,
    pub gaze_z: f32,
    pub coupling: f32,
    pub lid_left: f32,
    pub lid_right: f32,
}

/// Per-eye logical outputs after vergence and divergence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeOutputs {
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
}

pub struct EyeController {
    servos: ServoController,
    gaze_x: f32,
    gaze_y: f32,
    gaze_z: f32,
    lid_left: f32,
    lid_right: f32,
    coupling: f32,
    max_vergence: f32,
    animation: Animation,
}

impl EyeController {
    pub fn new(servos: ServoController) -> Self {
        Self {
            servos,
            gaze_x: 0.0,
            gaze_y: 0.0,
            gaze_z: 0.0,
            lid_left: 0.0,
            lid_right: 0.0,
            coupling: 1.0,
            max_vergence: DEFAULT_MAX_VERGENCE,
            animation: Animation::Idle,
        }
    }

    /// Attach the servos and push the initial state
    pub fn begin(&mut self) {
        self.servos.begin();
        self.reapply();
    }

    pub fn servos(&self) -> &ServoController {
        &self.servos
    }

    pub fn servos_mut(&mut self) -> &mut ServoController {
        &mut self.servos
    }

    /// Advance the animation state machine
    pub fn tick(&mut self, now: Instant) {
        match self.animation {
            Animation::Idle => {}
            Animation::BlinkClosing {
                since,
                duration_ms,
                saved,
            } => {
                if elapsed(since, now, duration_ms / 2) {
                    self.restore_lids(saved);
                    self.animation = Animation::BlinkOpening {
                        since: now,
                        duration_ms,
                        saved,
                    };
                }
            }
            Animation::BlinkOpening { since, duration_ms, .. } => {
                if elapsed(since, now, duration_ms / 2) {
                    self.animation = Animation::Idle;
                }
            }
            Animation::Waiting { since, duration_ms } => {
                if elapsed(since, now, duration_ms) {
                    self.animation = Animation::Idle;
                }
            }
        }
    }

    // === Gaze ===

    pub fn set_gaze(&mut self, x: f32, y: f32, z: f32) {
        self.gaze_x = clamp_logical(x);
        self.gaze_y = clamp_logical(y);
        self.gaze_z = clamp_logical(z);
        self.apply_gaze();
    }

    pub fn set_gaze_x(&mut self, x: f32) {
        self.gaze_x = clamp_logical(x);
        self.apply_gaze();
    }

    pub fn set_gaze_y(&mut self, y: f32) {
        self.gaze_y = clamp_logical(y);
        self.apply_gaze();
    }

    pub fn set_gaze_z(&mut self, z: f32) {
        self.gaze_z = clamp_logical(z);
        self.apply_gaze();
    }

    // === Lids ===

    pub fn set_lids(&mut self, left: f32, right: f32) {
        self.lid_left = clamp_logical(left);
        self.lid_right = clamp_logical(right);
        self.apply_lids();
    }

    pub fn set_left_lid(&mut self, left: f32) {
        self.lid_left = clamp_logical(left);
        self.apply_lids();
    }

    pub fn set_right_lid(&mut self, right: f32) {
        self.lid_right = clamp_logical(right);
        self.apply_lids();
    }

    // === Parameters ===

    pub fn set_coupling(&mut self, coupling: f32) {
        self.coupling = coupling.clamp(-1.0, 1.0);
        self.apply_gaze();
    }

    pub fn set_max_vergence(&mut self, max_vergence: f32) {
        self.max_vergence = max_vergence.clamp(0.0, 100.0);
        self.apply_gaze();
    }

    pub fn gaze_x(&self) -> f32 {
        self.gaze_x
    }

    pub fn gaze_y(&self) -> f32 {
        self.gaze_y
    }

    pub fn gaze_z(&self) -> f32 {
        self.gaze_z
    }

    pub fn lid_left(&self) -> f32 {
        self.lid_left
    }

    pub fn lid_right(&self) -> f32 {
        self.lid_right
    }

    pub fn coupling(&self) -> f32 {
        self.coupling
    }

    pub fn max_vergence(&self) -> f32 {
        self.max_vergence
    }

    // === Animation ===

    /// Close both lids and reopen them to where they were; `0` auto-scales the duration
    pub fn start_blink(&mut self, duration_ms: u32, now: Instant) {
        self.start_blink_eye(BlinkEye::Both, duration_ms, now);
    }

    pub fn start_blink_left(&mut self, duration_ms: u32, now: Instant) {
        self.start_blink_eye(BlinkEye::Left, duration_ms, now);
    }

    pub fn start_blink_right(&mut self, duration_ms: u32, now: Instant) {
        self.start_blink_eye(BlinkEye::Right, duration_ms, now);
    }

    pub fn start_blink_eye(&mut self, eye: BlinkEye, duration_ms: u32, now: Instant) {
        if self.is_animating() {
            debug!("Blink refused, {:?} in progress", self.animation_state());
            return;
        }

        let saved = SavedLids {
            eye,
            left: self.lid_left,
            right: self.lid_right,
        };
        let (travel_left, travel_right) = match eye {
            BlinkEye::Both => (self.lid_left, self.lid_right),
            BlinkEye::Left => (self.lid_left, CLOSED),
            BlinkEye::Right => (CLOSED, self.lid_right),
        };
        let duration_ms = match duration_ms {
            0 => blink_duration(travel_left, travel_right),
            ms => ms,
        };

        self.animation = Animation::BlinkClosing {
            since: now,
            duration_ms,
            saved,
        };
        match eye {
            BlinkEye::Both => self.set_lids(CLOSED, CLOSED),
            BlinkEye::Left => self.set_left_lid(CLOSED),
            BlinkEye::Right => self.set_right_lid(CLOSED),
        }
    }

    /// Hold the animation slot for `duration_ms`
    pub fn start_wait(&mut self, duration_ms: u32, now: Instant) {
        if self.is_animating() {
            debug!("Wait refused, {:?} in progress", self.animation_state());
            return;
        }
        self.animation = Animation::Waiting {
            since: now,
            duration_ms,
        };
    }

    pub fn is_animating(&self) -> bool {
        !matches!(self.animation, Animation::Idle)
    }

    pub fn animation_state(&self) -> AnimationState {
        match self.animation {
            Animation::Idle => AnimationState::Idle,
            Animation::BlinkClosing { .. } => AnimationState::BlinkClosing,
            Animation::BlinkOpening { .. } => AnimationState::BlinkOpening,
            Animation::Waiting { .. } => AnimationState::Waiting,
        }
    }

    /// Stop any animation, reopening lids that a blink had closed
    pub fn cancel_animation(&mut self) {
        if let Animation::BlinkClosing { saved, .. } | Animation::BlinkOpening { saved, .. } =
            self.animation
        {
            self.restore_lids(saved);
        }
        self.animation = Animation::Idle;
    }

    fn restore_lids(&mut self, saved: SavedLids) {
        match saved.eye {
            BlinkEye::Both => self.set_lids(saved.left, saved.right),
            BlinkEye::Left => self.set_left_lid(saved.left),
            BlinkEye::Right => self.set_right_lid(saved.right),
        }
    }

    // === Whole-state operations ===

    /// Zero gaze X/Y and lids; depth and coupling stay
    pub fn center(&mut self) {
        self.gaze_x = 0.0;
        self.gaze_y = 0.0;
        self.lid_left = 0.0;
        self.lid_right = 0.0;
        self.reapply();
    }

    /// Full reset used on mode transitions; drops any animation without restoring lids
    pub fn reset_all(&mut self) {
        self.animation = Animation::Idle;
        self.gaze_x = 0.0;
        self.gaze_y = 0.0;
        self.gaze_z = 0.0;
        self.coupling = 1.0;
        self.lid_left = 0.0;
        self.lid_right = 0.0;
        self.reapply();
    }

    /// Push the current logical state to the servos again
    pub fn reapply(&mut self) {
        self.apply_gaze();
        self.apply_lids();
    }

    pub fn snapshot(&self) -> EyeSnapshot {
        EyeSnapshot {
            gaze_x: self.gaze_x,
            gaze_y: self.gaze_y,
            gaze_z: self.gaze_z,
            coupling: self.coupling,
            lid_left: self.lid_left,
            lid_right: self.lid_right,
        }
    }

    pub fn restore(&mut self, snapshot: &EyeSnapshot) {
        self.coupling = snapshot.coupling.clamp(-1.0, 1.0);
        self.set_gaze(snapshot.gaze_x, snapshot.gaze_y, snapshot.gaze_z);
        self.set_lids(snapshot.lid_left, snapshot.lid_right);
    }

    // === Mapping ===

    pub fn outputs(&self) -> EyeOutputs {
        let normalized_z = (100.0 - self.gaze_z) / 200.0;
        let vergence = self.max_vergence * normalized_z;
        let left_offset = vergence * self.coupling;
        let right_offset = -vergence * self.coupling;

        let divergence = if self.coupling < 0.0 {
            MAX_VERTICAL_DIVERGENCE * -self.coupling
        } else {
            0.0
        };

        EyeOutputs {
            left_x: clamp_logical(self.gaze_x + left_offset),
            left_y: clamp_logical(self.gaze_y + divergence),
            right_x: clamp_logical(self.gaze_x + right_offset),
            right_y: clamp_logical(self.gaze_y - divergence),
        }
    }

    fn set_servo_logical(&mut self, index: usize, logical: f32) {
        if let Some(cal) = self.servos.calibration(index).copied() {
            let position = logical_to_position(logical, &cal);
            self.servos.set_position(index, position);
        }
    }

    fn apply_gaze(&mut self) {
        let out = self.outputs();
        self.set_servo_logical(SERVO_LEFT_EYE_X, out.left_x);
        self.set_servo_logical(SERVO_LEFT_EYE_Y, out.left_y);
        self.set_servo_logical(SERVO_RIGHT_EYE_X, out.right_x);
        self.set_servo_logical(SERVO_RIGHT_EYE_Y, out.right_y);
    }

    fn apply_lids(&mut self) {
        self.set_servo_logical(SERVO_LEFT_EYELID, self.lid_left);
        self.set_servo_logical(SERVO_RIGHT_EYELID, self.lid_right);
    }
}
