// Message types exchanged with the control surface

use serde::{Deserialize, Serialize};

use crate::eye::{AnimationState, BlinkEye};
use crate::store::ServoCalibration;

fn far() -> f32 {
    100.0
}

fn open() -> f32 {
    100.0
}

fn one() -> f32 {
    1.0
}

fn default_vergence() -> f32 {
    30.0
}

fn enabled() -> bool {
    true
}

fn blink_min() -> u32 {
    crate::config::DEFAULT_BLINK_INTERVAL_MIN
}

fn blink_max() -> u32 {
    crate::config::DEFAULT_BLINK_INTERVAL_MAX
}

fn impulse_min() -> u32 {
    crate::config::DEFAULT_IMPULSE_INTERVAL_MIN
}

fn impulse_max() -> u32 {
    crate::config::DEFAULT_IMPULSE_INTERVAL_MAX
}

// Command from the control surface -> runtime
// Missing fields take the same defaults the web UI relies on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // Servo / calibration
    SetServo {
        index: usize,
        position: u8,
    },
    /// Move within the physical range only, for live calibration
    PreviewCalibration {
        index: usize,
        position: u8,
    },
    SetCalibration {
        index: usize,
        min: i32,
        center: i32,
        max: i32,
    },
    SetPin {
        index: usize,
        pin: u8,
    },
    SetInvert {
        index: usize,
        invert: bool,
    },
    CenterAll,
    ResetCalibration {
        index: usize,
    },

    // Eye
    SetGaze {
        #[serde(default)]
        x: f32,
        #[serde(default)]
        y: f32,
        #[serde(default = "far")]
        z: f32,
    },
    SetLids {
        #[serde(default = "open")]
        left: f32,
        #[serde(default = "open")]
        right: f32,
    },
    Blink {
        #[serde(default)]
        eye: BlinkEye,
        /// 0 scales with lid travel
        #[serde(default)]
        duration: u32,
    },
    SetCoupling {
        #[serde(default = "one")]
        value: f32,
    },
    SetVergence {
        #[serde(default = "default_vergence")]
        max: f32,
    },
    CenterEyes,
    ReapplyEyeState,

    // Modes
    SetMode {
        mode: String,
    },
    SetDefaultMode {
        mode: String,
    },
    SetRememberLastMode {
        #[serde(default)]
        enabled: bool,
    },
    SetAutoBlink {
        #[serde(default = "enabled")]
        enabled: bool,
    },
    SetBlinkInterval {
        #[serde(default = "blink_min")]
        min: u32,
        #[serde(default = "blink_max")]
        max: u32,
    },
    /// Absent `enabled` clears the override
    SetAutoBlinkOverride {
        #[serde(default)]
        enabled: Option<bool>,
    },
    SetAutoImpulseOverride {
        #[serde(default)]
        enabled: Option<bool>,
    },
    /// Calibration: freeze blink, impulse and mode player together
    PauseAutomation {
        #[serde(default)]
        paused: bool,
    },
    PauseModePlayer {
        #[serde(default)]
        paused: bool,
    },
    ListModes,

    // Impulses
    TriggerImpulse {
        #[serde(default)]
        name: Option<String>,
    },
    StopImpulse,
    SetAutoImpulse {
        #[serde(default = "enabled")]
        enabled: bool,
    },
    SetImpulseInterval {
        #[serde(default = "impulse_min")]
        min: u32,
        #[serde(default = "impulse_max")]
        max: u32,
    },
    SetImpulseSelection {
        selection: String,
    },
    ListImpulses,
}

// Reply to a listing command, published on the reply topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    AvailableModes { modes: Vec<String> },
    AvailableImpulses { impulses: Vec<String> },
}

// Lifecycle events for a status indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RigEvent {
    AnimationStarted,
    AnimationFinished,
    ModeChanged { mode: String },
    ImpulseStarted { name: String },
    ImpulseFinished,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServoState {
    pub index: usize,
    pub name: &'static str,
    pub position: u8,
    pub target: u8,
    pub calibration: ServoCalibration,
}

#[derive(Debug, Clone, Serialize)]
pub struct EyeState {
    pub gaze_x: f32,
    pub gaze_y: f32,
    pub gaze_z: f32,
    pub lid_left: f32,
    pub lid_right: f32,
    pub coupling: f32,
    pub max_vergence: f32,
    pub animation: AnimationState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeState {
    pub current: String,
    pub is_auto: bool,
    pub error: Option<String>,
    pub player_paused: bool,
    pub default_mode: String,
    pub remember_last_mode: bool,
    pub auto_blink_enabled: bool,
    pub auto_blink_active: bool,
    pub auto_blink_paused: bool,
    pub auto_blink_override: Option<bool>,
    pub blink_interval_min: u32,
    pub blink_interval_max: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpulseState {
    pub playing: bool,
    pub pending: bool,
    pub current: Option<String>,
    pub preloaded: Option<String>,
    pub auto_impulse_enabled: bool,
    pub auto_impulse_active: bool,
    pub auto_impulse_override: Option<bool>,
    pub impulse_interval_min: u32,
    pub impulse_interval_max: u32,
    pub selection: String,
}

// Periodic state published by the runtime
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub servos: Vec<ServoState>,
    pub eye: EyeState,
    pub mode: ModeState,
    pub impulse: ImpulseState,
}
