// Physical output backends for the six eye channels
//
// The controller talks to a ServoDriver in 0-180° angles keyed by pin.
// FeetechDriver puts them on the serial bus; SimDriver just records them.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::feetech::{FeetechBus, ServoError};

/// Physical output for calibrated servo angles
pub trait ServoDriver: Send {
    /// Bring an output online (called at boot and after a pin change)
    fn attach(&mut self, pin: u8) -> Result<(), ServoError>;

    /// Release an output so it no longer holds position
    fn detach(&mut self, pin: u8) -> Result<(), ServoError>;

    /// Write `(pin, angle)` pairs together
    fn write_angles(&mut self, targets: &[(u8, u8)]) -> Result<(), ServoError>;
}

/// STS bus servos in position mode; `pin` is the servo bus ID
pub struct FeetechDriver {
    bus: FeetechBus,
}

impl FeetechDriver {
    pub fn open(port: &str) -> Result<Self, ServoError> {
        info!("Opening servo bus on {}", port);
        let bus = FeetechBus::open(port)?;
        Ok(Self { bus })
    }
}

impl ServoDriver for FeetechDriver {
    fn attach(&mut self, pin: u8) -> Result<(), ServoError> {
        if !self.bus.ping(pin)? {
            warn!("Servo {} not responding to ping", pin);
            return Err(ServoError::Timeout { id: pin });
        }
        // Mode changes need torque off
        self.bus.disable_torque(pin)?;
        self.bus.set_position_mode(pin)?;
        self.bus.enable_torque(pin)?;
        debug!("Servo {} attached", pin);
        Ok(())
    }

    fn detach(&mut self, pin: u8) -> Result<(), ServoError> {
        self.bus.disable_torque(pin)?;
        debug!("Servo {} detached", pin);
        Ok(())
    }

    fn write_angles(&mut self, targets: &[(u8, u8)]) -> Result<(), ServoError> {
        self.bus.sync_write_angles(targets)
    }
}

/// Writes kept by a SimDriver; older ones are dropped
pub const SIM_LOG_CAPACITY: usize = 64;

/// Everything a SimDriver has been asked to do
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SimLog {
    pub attached: BTreeSet<u8>,
    /// One entry per `write_angles` call, most recent last
    pub writes: VecDeque<Vec<(u8, u8)>>,
}

/// Records writes instead of moving hardware
///
/// The log is shared so tests and the simulator can inspect it after the
/// driver has been boxed into a controller.
#[derive(Debug, Default, Clone)]
pub struct SimDriver {
    log: Arc<Mutex<SimLog>>,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Arc<Mutex<SimLog>> {
        Arc::clone(&self.log)
    }

    fn with_log<R>(&self, f: impl FnOnce(&mut SimLog) -> R) -> R {
        // A poisoned log still holds valid data
        let mut guard = self.log.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }
}

impl ServoDriver for SimDriver {
    fn attach(&mut self, pin: u8) -> Result<(), ServoError> {
        self.with_log(|log| log.attached.insert(pin));
        Ok(())
    }

    fn detach(&mut self, pin: u8) -> Result<(), ServoError> {
        self.with_log(|log| log.attached.remove(&pin));
        Ok(())
    }

    fn write_angles(&mut self, targets: &[(u8, u8)]) -> Result<(), ServoError> {
        debug!("Sim write {:?}", targets);
        self.with_log(|log| {
            if log.writes.len() == SIM_LOG_CAPACITY {
                log.writes.pop_front();
            }
            log.writes.push_back(targets.to_vec());
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_driver_records_through_box() {
        let sim = SimDriver::new();
        let log = sim.log();
        let mut driver: Box<dyn ServoDriver> = Box::new(sim);

        driver.attach(3).unwrap();
        driver.attach(6).unwrap();
        driver.write_angles(&[(3, 90), (6, 120)]).unwrap();
        driver.detach(3).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.attached.iter().copied().collect::<Vec<_>>(), vec![6]);
        assert_eq!(log.writes, vec![vec![(3, 90), (6, 120)]]);
    }

    #[test]
    fn test_sim_log_keeps_only_recent_writes() {
        let sim = SimDriver::new();
        let log = sim.log();
        let mut driver: Box<dyn ServoDriver> = Box::new(sim);

        for angle in 0..=180u8 {
            driver.write_angles(&[(1, angle), (4, angle)]).unwrap();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.writes.len(), SIM_LOG_CAPACITY);
        assert_eq!(log.writes.back(), Some(&vec![(1, 180), (4, 180)]));
        let oldest = (181 - SIM_LOG_CAPACITY) as u8;
        assert_eq!(log.writes.front(), Some(&vec![(1, oldest), (4, oldest)]));
    }
}
