// Servo layer for the eye rig
//
// Provides:
// - Feetech STS serial protocol (position mode)
// - ServoDriver backends (bus hardware, simulation)
// - Calibrated, throttled actuator controller

mod controller;
pub mod driver;
pub mod feetech;

pub use controller::{apply_invert, ServoController, SERVO_PAIRS};
pub use driver::{FeetechDriver, ServoDriver, SimDriver, SimLog, SIM_LOG_CAPACITY};
pub use feetech::{FeetechBus, ServoError};
