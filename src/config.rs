// Loop rates, topics, hardware defaults and scheduler defaults
use std::time::Duration;

// Control loop frequency
pub const LOOP_HZ: u64 = 200;

// Minimum time between physical servo writes (one pair per write)
pub const SERVO_UPDATE_INTERVAL: Duration = Duration::from_millis(20);

// How often the state snapshot is published
pub const STATE_INTERVAL: Duration = Duration::from_millis(100);

// Zenoh topics
pub const TOPIC_CMD: &str = "animeyes/cmd"; // commands
pub const TOPIC_STATE: &str = "animeyes/state"; // periodic snapshot
pub const TOPIC_EVENTS: &str = "animeyes/events"; // lifecycle events for the status indicator
pub const TOPIC_REPLY: &str = "animeyes/reply"; // replies to list commands

// Serial port for the Feetech servo bus
pub const SERVO_PORT: &str = "/dev/ttyUSB0";

// Servo layout
pub const NUM_SERVOS: usize = 6;

pub const SERVO_LEFT_EYE_X: usize = 0;
pub const SERVO_LEFT_EYE_Y: usize = 1;
pub const SERVO_LEFT_EYELID: usize = 2;
pub const SERVO_RIGHT_EYE_X: usize = 3;
pub const SERVO_RIGHT_EYE_Y: usize = 4;
pub const SERVO_RIGHT_EYELID: usize = 5;

pub const SERVO_NAMES: [&str; NUM_SERVOS] = [
    "Left Eye X",
    "Left Eye Y",
    "Left Eyelid",
    "Right Eye X",
    "Right Eye Y",
    "Right Eyelid",
];

// Bus IDs the servos ship with on a fresh rig
pub const DEFAULT_SERVO_PINS: [u8; NUM_SERVOS] = [1, 2, 3, 4, 5, 6];

// Deliberately narrow until the rig has been calibrated
pub const DEFAULT_SERVO_MIN: u8 = 89;
pub const DEFAULT_SERVO_CENTER: u8 = 90;
pub const DEFAULT_SERVO_MAX: u8 = 91;

// Eye model
pub const DEFAULT_MAX_VERGENCE: f32 = 50.0;
pub const MAX_VERTICAL_DIVERGENCE: f32 = 50.0;
pub const DEFAULT_BLINK_MS: u32 = 150;

// Longest wait step honored (about 49 days); longer waits are cut to this
pub const MAX_WAIT_MS: u64 = u32::MAX as u64;

// Mode system
pub const DEFAULT_MODE: &str = "follow";
pub const DEFAULT_AUTO_BLINK: bool = true;
pub const DEFAULT_BLINK_INTERVAL_MIN: u32 = 2000;
pub const DEFAULT_BLINK_INTERVAL_MAX: u32 = 6000;

// Impulse system
pub const DEFAULT_AUTO_IMPULSE: bool = true;
pub const DEFAULT_IMPULSE_INTERVAL_MIN: u32 = 15000;
pub const DEFAULT_IMPULSE_INTERVAL_MAX: u32 = 25000;
pub const DEFAULT_IMPULSE_SELECTION: &str = "startle,distraction";

// Parse-boundary limits
pub const MAX_IMPULSE_SELECTION: usize = 8;
pub const MAX_SELECTION_LEN: usize = 255;
pub const MAX_NAME_LEN: usize = 31;
