// Actuator controller: calibration, pending targets and throttled paired writes
//
// Targets are cheap to set every tick; physical writes happen at most once per
// SERVO_UPDATE_INTERVAL and only for one pair at a time.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::driver::ServoDriver;
use crate::config::{
    NUM_SERVOS, SERVO_LEFT_EYE_X, SERVO_LEFT_EYE_Y, SERVO_LEFT_EYELID, SERVO_NAMES,
    SERVO_RIGHT_EYE_X, SERVO_RIGHT_EYE_Y, SERVO_RIGHT_EYELID, SERVO_UPDATE_INTERVAL,
};
use crate::store::{self, ServoCalibration, SettingsStore};

/// Write pairs in priority order: eyelids, horizontal, vertical
pub const SERVO_PAIRS: [[usize; 2]; 3] = [
    [SERVO_LEFT_EYELID, SERVO_RIGHT_EYELID],
    [SERVO_LEFT_EYE_X, SERVO_RIGHT_EYE_X],
    [SERVO_LEFT_EYE_Y, SERVO_RIGHT_EYE_Y],
];

/// Mirror a position for servos mounted the other way round
pub fn apply_invert(position: u8, invert: bool) -> u8 {
    if invert { 180 - position.min(180) } else { position }
}

/// Clamp without panicking on a min > max calibration
fn constrain(position: u8, min: u8, max: u8) -> u8 {
    position.max(min).min(max)
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    calibration: ServoCalibration,
    position: u8,
    target: u8,
}

impl Channel {
    fn new(calibration: ServoCalibration) -> Self {
        Self {
            calibration,
            position: calibration.center,
            target: calibration.center,
        }
    }

    fn output(&self) -> (u8, u8) {
        (
            self.calibration.pin,
            apply_invert(self.position, self.calibration.invert),
        )
    }
}

pub struct ServoController {
    channels: [Channel; NUM_SERVOS],
    driver: Box<dyn ServoDriver>,
    center_all_requested: bool,
    last_write: Option<Instant>,
}

impl ServoController {
    pub fn new(calibrations: [ServoCalibration; NUM_SERVOS], driver: Box<dyn ServoDriver>) -> Self {
        Self {
            channels: calibrations.map(Channel::new),
            driver,
            center_all_requested: false,
            last_write: None,
        }
    }

    /// Attach every output and move it to its calibrated center
    pub fn begin(&mut self) {
        for index in 0..NUM_SERVOS {
            self.attach(index);
        }
        info!("Servo controller ready ({} channels)", NUM_SERVOS);
    }

    fn attach(&mut self, index: usize) {
        let channel = self.channels[index];
        let pin = channel.calibration.pin;
        if let Err(e) = self.driver.attach(pin) {
            warn!("Failed to attach {} on pin {}: {}", SERVO_NAMES[index], pin, e);
            return;
        }
        if let Err(e) = self.driver.write_angles(&[channel.output()]) {
            warn!("Failed to write {} on pin {}: {}", SERVO_NAMES[index], pin, e);
        }
    }

    fn channel_mut(&mut self, index: usize) -> Option<&mut Channel> {
        let channel = self.channels.get_mut(index);
        if channel.is_none() {
            debug!("Ignoring servo index {} out of range", index);
        }
        channel
    }

    /// Set a target, clamped to the channel's calibrated range
    pub fn set_position(&mut self, index: usize, position: u8) {
        if let Some(channel) = self.channel_mut(index) {
            let cal = channel.calibration;
            channel.target = constrain(position, cal.min, cal.max);
        }
    }

    /// Set a target clamped only to the physical range (calibration preview)
    pub fn set_position_raw(&mut self, index: usize, position: u8) {
        if let Some(channel) = self.channel_mut(index) {
            channel.target = position.min(180);
        }
    }

    /// Last written position; 90 for an unknown index
    pub fn position(&self, index: usize) -> u8 {
        self.channels.get(index).map_or(90, |c| c.position)
    }

    pub fn target(&self, index: usize) -> u8 {
        self.channels.get(index).map_or(90, |c| c.target)
    }

    pub fn calibration(&self, index: usize) -> Option<&ServoCalibration> {
        self.channels.get(index).map(|c| &c.calibration)
    }

    /// Center every channel on the next tick
    pub fn request_center_all(&mut self) {
        self.center_all_requested = true;
    }

    pub fn center(&mut self, index: usize) {
        if let Some(center) = self.calibration(index).map(|c| c.center) {
            self.set_position(index, center);
        }
    }

    pub fn set_calibration(
        &mut self,
        index: usize,
        min: u8,
        center: u8,
        max: u8,
        store: &mut dyn SettingsStore,
    ) {
        let Some(channel) = self.channel_mut(index) else {
            return;
        };
        channel.calibration.min = min;
        channel.calibration.center = center;
        channel.calibration.max = max;
        let calibration = channel.calibration;
        store::update(store, |s| s.servos[index] = calibration);
        info!(
            "{} calibrated: min={} center={} max={}",
            SERVO_NAMES[index], min, center, max
        );
    }

    /// Move a channel to another output, re-attaching at the current position
    pub fn set_pin(&mut self, index: usize, pin: u8, store: &mut dyn SettingsStore) {
        let Some(channel) = self.channel_mut(index) else {
            return;
        };
        let old_pin = channel.calibration.pin;
        channel.calibration.pin = pin;
        let calibration = channel.calibration;
        store::update(store, |s| s.servos[index] = calibration);

        if let Err(e) = self.driver.detach(old_pin) {
            warn!("Failed to detach pin {}: {}", old_pin, e);
        }
        self.attach(index);
        info!("{} moved from pin {} to {}", SERVO_NAMES[index], old_pin, pin);
    }

    /// Flip direction; the channel jumps to its center so the linkage never sees the mirror
    pub fn set_invert(&mut self, index: usize, invert: bool, store: &mut dyn SettingsStore) {
        let Some(channel) = self.channel_mut(index) else {
            return;
        };
        channel.calibration.invert = invert;
        channel.position = channel.calibration.center;
        channel.target = channel.calibration.center;
        let calibration = channel.calibration;
        let output = channel.output();
        store::update(store, |s| s.servos[index] = calibration);

        if let Err(e) = self.driver.write_angles(&[output]) {
            warn!("Failed to write {}: {}", SERVO_NAMES[index], e);
        }
    }

    /// Restore one channel's factory calibration
    pub fn reset_calibration(&mut self, index: usize, store: &mut dyn SettingsStore) {
        if index >= NUM_SERVOS {
            debug!("Ignoring servo index {} out of range", index);
            return;
        }
        let factory = ServoCalibration::factory(index);
        let pin = self.channels[index].calibration.pin;
        if factory.pin != pin {
            self.set_pin(index, factory.pin, store);
        }
        self.set_calibration(index, factory.min, factory.center, factory.max, store);
        self.set_invert(index, factory.invert, store);
    }

    /// Write at most one pending pair; returns the pair index that was written
    pub fn tick(&mut self, now: Instant) -> Option<usize> {
        if self.center_all_requested {
            self.center_all_requested = false;
            for channel in &mut self.channels {
                channel.target = channel.calibration.center;
            }
        }

        if let Some(last) = self.last_write {
            if now.saturating_duration_since(last) < SERVO_UPDATE_INTERVAL {
                return None;
            }
        }

        let pair = SERVO_PAIRS.iter().position(|&[a, b]| {
            self.channels[a].position != self.channels[a].target
                || self.channels[b].position != self.channels[b].target
        })?;

        let [a, b] = SERVO_PAIRS[pair];
        for index in [a, b] {
            self.channels[index].position = self.channels[index].target;
        }
        let outputs = [self.channels[a].output(), self.channels[b].output()];
        if let Err(e) = self.driver.write_angles(&outputs) {
            warn!("Servo write failed: {}", e);
        }
        debug!("Wrote pair {} {:?}", pair, outputs);
        self.last_write = Some(now);
        Some(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::driver::{SimDriver, SimLog};
    use crate::store::{MemoryStore, Settings};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn wide() -> [ServoCalibration; NUM_SERVOS] {
        std::array::from_fn(|i| ServoCalibration {
            pin: i as u8 + 1,
            min: 40,
            center: 90,
            max: 140,
            invert: false,
        })
    }

    fn controller() -> (ServoController, Arc<Mutex<SimLog>>) {
        let sim = SimDriver::new();
        let log = sim.log();
        (ServoController::new(wide(), Box::new(sim)), log)
    }

    #[test]
    fn test_set_position_clamps_to_calibration() {
        let (mut servos, _) = controller();
        servos.set_position(0, 10);
        assert_eq!(servos.target(0), 40);
        servos.set_position(0, 200);
        assert_eq!(servos.target(0), 140);
        servos.set_position_raw(0, 10);
        assert_eq!(servos.target(0), 10);
        servos.set_position_raw(0, 250);
        assert_eq!(servos.target(0), 180);
    }

    #[test]
    fn test_out_of_range_index_is_noop() {
        let (mut servos, _) = controller();
        servos.set_position(9, 100);
        assert_eq!(servos.position(9), 90);
        assert!(servos.calibration(9).is_none());
    }

    #[test]
    fn test_writes_one_pair_per_interval_in_priority_order() {
        let (mut servos, log) = controller();
        let t0 = Instant::now();

        servos.set_position(SERVO_LEFT_EYE_Y, 100); // vertical
        servos.set_position(SERVO_RIGHT_EYE_X, 100); // horizontal
        servos.set_position(SERVO_LEFT_EYELID, 100); // eyelids

        assert_eq!(servos.tick(t0), Some(0));
        // Throttled
        assert_eq!(servos.tick(t0 + Duration::from_millis(5)), None);
        assert_eq!(servos.tick(t0 + Duration::from_millis(20)), Some(1));
        assert_eq!(servos.tick(t0 + Duration::from_millis(40)), Some(2));
        assert_eq!(servos.tick(t0 + Duration::from_millis(60)), None);

        let log = log.lock().unwrap();
        assert_eq!(log.writes.len(), 3);
        // Both lids written together, right one unchanged at center
        assert_eq!(log.writes[0], vec![(3, 100), (6, 90)]);
    }

    #[test]
    fn test_idle_tick_does_not_restart_throttle() {
        let (mut servos, _) = controller();
        let t0 = Instant::now();
        servos.set_position(0, 100);
        assert_eq!(servos.tick(t0), Some(1));
        // Nothing pending: clock is not restarted
        assert_eq!(servos.tick(t0 + Duration::from_millis(25)), None);
        servos.set_position(1, 100);
        assert_eq!(servos.tick(t0 + Duration::from_millis(26)), Some(2));
    }

    #[test]
    fn test_center_all_is_deferred_to_tick() {
        let (mut servos, _) = controller();
        let t0 = Instant::now();
        servos.set_position(2, 120);
        servos.tick(t0);
        servos.request_center_all();
        assert_eq!(servos.target(2), 120);
        servos.tick(t0 + Duration::from_millis(20));
        assert_eq!(servos.target(2), 90);
        assert_eq!(servos.position(2), 90);
    }

    #[test]
    fn test_invert_writes_mirrored_center_and_persists() {
        let (mut servos, log) = controller();
        let mut store = MemoryStore::new(Settings::default());
        let t0 = Instant::now();
        servos.set_calibration(0, 40, 70, 140, &mut store);
        servos.set_position(0, 120);
        servos.tick(t0);

        servos.set_invert(0, true, &mut store);
        assert_eq!(servos.position(0), 70);
        assert_eq!(servos.target(0), 70);
        assert!(store.settings().servos[0].invert);
        assert_eq!(log.lock().unwrap().writes.back(), Some(&vec![(1, 110)]));
    }

    #[test]
    fn test_set_pin_reattaches() {
        let (mut servos, log) = controller();
        let mut store = MemoryStore::new(Settings::default());
        servos.begin();
        servos.set_pin(4, 12, &mut store);

        let log = log.lock().unwrap();
        assert!(log.attached.contains(&12));
        assert!(!log.attached.contains(&5));
        assert_eq!(store.settings().servos[4].pin, 12);
    }

    #[test]
    fn test_apply_invert() {
        assert_eq!(apply_invert(30, false), 30);
        assert_eq!(apply_invert(30, true), 150);
        assert_eq!(apply_invert(0, true), 180);
    }
}
