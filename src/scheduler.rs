// Autonomous behavior on randomized intervals: auto-blink and auto-impulse
//
// Both schedulers share the same gate: paused beats everything, a runtime
// override beats the persisted enable flag.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{MAX_IMPULSE_SELECTION, MAX_SELECTION_LEN};
use crate::eye::EyeController;
use crate::sequence::{validate_name, DocumentSource, ImpulsePlayer};
use crate::store::{ImpulseConfig, ModeConfig};

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Comma-separated impulse names, trimmed and capped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImpulseSelection {
    raw: String,
    names: Vec<String>,
}

impl ImpulseSelection {
    pub fn parse(csv: &str) -> Self {
        let raw = truncate_bytes(csv, MAX_SELECTION_LEN).to_string();
        let names = raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter(|name| {
                let valid = validate_name(name).is_ok();
                if !valid {
                    warn!("Ignoring invalid impulse name {:?} in selection", name);
                }
                valid
            })
            .take(MAX_IMPULSE_SELECTION)
            .map(str::to_string)
            .collect();
        Self { raw, names }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// Timer and gating state shared by both schedulers
#[derive(Debug, Clone)]
pub struct Schedule {
    enabled: bool,
    paused: bool,
    runtime_override: Option<bool>,
    interval_min: u32,
    interval_max: u32,
    next_fire: Option<Instant>,
}

impl Schedule {
    pub fn new(enabled: bool, interval_min: u32, interval_max: u32) -> Self {
        Self {
            enabled,
            paused: false,
            runtime_override: None,
            interval_min: interval_min.min(interval_max),
            interval_max,
            next_fire: None,
        }
    }

    /// Gate before any scheduler-specific condition
    fn gate(&self) -> Option<bool> {
        if self.paused {
            return Some(false);
        }
        self.runtime_override
    }

    pub fn reschedule<R: Rng + ?Sized>(&mut self, rng: &mut R, now: Instant) {
        let ms = if self.interval_max <= self.interval_min {
            self.interval_min
        } else {
            rng.gen_range(self.interval_min..=self.interval_max)
        };
        self.next_fire = Some(now + Duration::from_millis(ms as u64));
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_fire.is_some_and(|t| now >= t)
    }

    pub fn next_fire(&self) -> Option<Instant> {
        self.next_fire
    }

    pub fn set_interval(&mut self, min: u32, max: u32) {
        self.interval_min = min.min(max);
        self.interval_max = max;
    }

    pub fn interval(&self) -> (u32, u32) {
        (self.interval_min, self.interval_max)
    }
}

pub struct AutoBlink {
    schedule: Schedule,
}

impl AutoBlink {
    pub fn new(config: &ModeConfig) -> Self {
        Self {
            schedule: Schedule::new(
                config.auto_blink,
                config.blink_interval_min,
                config.blink_interval_max,
            ),
        }
    }

    pub fn begin<R: Rng + ?Sized>(&mut self, rng: &mut R, now: Instant) {
        self.schedule.reschedule(rng, now);
    }

    pub fn is_active(&self) -> bool {
        self.schedule.gate().unwrap_or(self.schedule.enabled)
    }

    /// Fire an auto-scaled blink when due and nothing else owns the lids
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        eye: &mut EyeController,
        impulse_busy: bool,
        rng: &mut R,
        now: Instant,
    ) -> bool {
        if !self.is_active() || eye.is_animating() || impulse_busy {
            return false;
        }
        if !self.schedule.is_due(now) {
            return false;
        }
        debug!("Auto-triggered blink");
        eye.start_blink(0, now);
        self.schedule.reschedule(rng, now);
        true
    }

    /// Push the next blink out after an external one
    pub fn reset_timer<R: Rng + ?Sized>(&mut self, rng: &mut R, now: Instant) {
        self.schedule.reschedule(rng, now);
    }

    pub fn set_enabled<R: Rng + ?Sized>(&mut self, enabled: bool, rng: &mut R, now: Instant) {
        self.schedule.enabled = enabled;
        if enabled {
            self.schedule.reschedule(rng, now);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.schedule.enabled
    }

    pub fn set_interval(&mut self, min: u32, max: u32) {
        self.schedule.set_interval(min, max);
    }

    pub fn interval(&self) -> (u32, u32) {
        self.schedule.interval()
    }

    pub fn set_override(&mut self, value: Option<bool>) {
        self.schedule.runtime_override = value;
    }

    pub fn runtime_override(&self) -> Option<bool> {
        self.schedule.runtime_override
    }

    pub fn pause(&mut self) {
        self.schedule.paused = true;
    }

    pub fn resume<R: Rng + ?Sized>(&mut self, rng: &mut R, now: Instant) {
        self.schedule.paused = false;
        self.schedule.reschedule(rng, now);
    }

    pub fn is_paused(&self) -> bool {
        self.schedule.paused
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }
}

pub struct AutoImpulse {
    schedule: Schedule,
    selection: ImpulseSelection,
    /// Last preload failed; retried only when the schedule comes due
    preload_failed: bool,
}

impl AutoImpulse {
    pub fn new(config: &ImpulseConfig) -> Self {
        Self {
            schedule: Schedule::new(
                config.auto_impulse,
                config.impulse_interval_min,
                config.impulse_interval_max,
            ),
            selection: ImpulseSelection::parse(&config.impulse_selection),
            preload_failed: false,
        }
    }

    /// Schedule the first impulse and warm the preload
    pub fn begin<R: Rng + ?Sized>(
        &mut self,
        impulses: &mut ImpulsePlayer,
        source: &dyn DocumentSource,
        rng: &mut R,
        now: Instant,
    ) {
        self.schedule.reschedule(rng, now);
        self.preload(impulses, source, rng);
    }

    /// Active without a selection only when forced on by an override
    pub fn is_active(&self) -> bool {
        self.schedule
            .gate()
            .unwrap_or(self.schedule.enabled && !self.selection.is_empty())
    }

    pub fn preload<R: Rng + ?Sized>(
        &mut self,
        impulses: &mut ImpulsePlayer,
        source: &dyn DocumentSource,
        rng: &mut R,
    ) {
        match impulses.preload_random(self.selection.names(), source, rng) {
            Ok(()) => self.preload_failed = false,
            Err(e) => {
                warn!("Failed to preload impulse: {}", e);
                self.preload_failed = true;
            }
        }
    }

    /// Fire the preloaded impulse when due; returns true if one was triggered
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        impulses: &mut ImpulsePlayer,
        eye: &mut EyeController,
        source: &dyn DocumentSource,
        rng: &mut R,
        now: Instant,
    ) -> bool {
        if !self.is_active() || impulses.is_busy() {
            return false;
        }
        // Recover the preload after a manual trigger
        if impulses.preloaded().is_none() && !self.preload_failed {
            self.preload(impulses, source, rng);
        }
        if !self.schedule.is_due(now) {
            return false;
        }
        if impulses.preloaded().is_none() {
            self.preload(impulses, source, rng);
        }
        info!("Auto-triggered impulse");
        let fired = impulses.trigger(eye).is_ok();
        self.schedule.reschedule(rng, now);
        fired
    }

    pub fn reset_timer<R: Rng + ?Sized>(&mut self, rng: &mut R, now: Instant) {
        self.schedule.reschedule(rng, now);
    }

    pub fn set_enabled<R: Rng + ?Sized>(
        &mut self,
        enabled: bool,
        impulses: &mut ImpulsePlayer,
        source: &dyn DocumentSource,
        rng: &mut R,
        now: Instant,
    ) {
        self.schedule.enabled = enabled;
        if enabled {
            self.schedule.reschedule(rng, now);
            self.preload(impulses, source, rng);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.schedule.enabled
    }

    pub fn set_selection<R: Rng + ?Sized>(
        &mut self,
        csv: &str,
        impulses: &mut ImpulsePlayer,
        source: &dyn DocumentSource,
        rng: &mut R,
    ) {
        self.selection = ImpulseSelection::parse(csv);
        self.preload(impulses, source, rng);
    }

    pub fn selection(&self) -> &ImpulseSelection {
        &self.selection
    }

    pub fn set_interval(&mut self, min: u32, max: u32) {
        self.schedule.set_interval(min, max);
    }

    pub fn interval(&self) -> (u32, u32) {
        self.schedule.interval()
    }

    pub fn set_override(&mut self, value: Option<bool>) {
        self.schedule.runtime_override = value;
    }

    pub fn runtime_override(&self) -> Option<bool> {
        self.schedule.runtime_override
    }

    pub fn pause(&mut self) {
        self.schedule.paused = true;
    }

    pub fn resume<R: Rng + ?Sized>(&mut self, rng: &mut R, now: Instant) {
        self.schedule.paused = false;
        self.schedule.reschedule(rng, now);
    }

    pub fn is_paused(&self) -> bool {
        self.schedule.paused
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }
}

/// Both schedulers, as handed to the mode manager
pub struct Schedulers {
    pub blink: AutoBlink,
    pub impulse: AutoImpulse,
}

impl Schedulers {
    pub fn new(mode: &ModeConfig, impulse: &ImpulseConfig) -> Self {
        Self {
            blink: AutoBlink::new(mode),
            impulse: AutoImpulse::new(impulse),
        }
    }

    pub fn clear_overrides(&mut self) {
        self.blink.set_override(None);
        self.impulse.set_override(None);
    }
}
