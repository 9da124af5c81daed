// One-shot impulse player with a preloaded slot
//
// The next impulse is parsed ahead of time so that firing it never waits on
// the document source. Playback snapshots the eye and restores it afterwards.

use std::time::Instant;

use rand::Rng;
use tracing::{debug, info, warn};

use super::document::SequenceDocument;
use super::engine::{LidPolicy, SequencePlayer, TickOutcome};
use super::source::{DocumentSource, LoadError, SequenceKind};
use crate::eye::{EyeController, EyeSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum ImpulseError {
    #[error("Impulse already playing or pending")]
    Busy,

    #[error("No preloaded impulse available")]
    NothingPreloaded,

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// What happened to the impulse slot during a tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImpulseTick {
    pub outcome: TickOutcome,
    /// A pending impulse began playing
    pub started: bool,
    /// Playback completed and the eye was restored
    pub finished: bool,
}

#[derive(Debug, Default)]
pub struct ImpulsePlayer {
    preloaded: Option<(String, SequenceDocument)>,
    current: Option<String>,
    player: SequencePlayer,
    pending: bool,
    snapshot: Option<EyeSnapshot>,
}

impl ImpulsePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_playing()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_busy(&self) -> bool {
        self.is_playing() || self.pending
    }

    /// Name of the impulse playing or pending
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn preloaded(&self) -> Option<&str> {
        self.preloaded.as_ref().map(|(name, _)| name.as_str())
    }

    /// Parse `name` into the preload slot; on failure the old preload stays
    pub fn preload(&mut self, name: &str, source: &dyn DocumentSource) -> Result<(), LoadError> {
        let document = source.load(SequenceKind::Impulse, name)?;
        debug!("Preloaded impulse '{}'", name);
        self.preloaded = Some((name.to_string(), document));
        Ok(())
    }

    /// Preload a random entry of `selection`; an empty selection does nothing
    pub fn preload_random<R: Rng + ?Sized>(
        &mut self,
        selection: &[String],
        source: &dyn DocumentSource,
        rng: &mut R,
    ) -> Result<(), LoadError> {
        if selection.is_empty() {
            return Ok(());
        }
        let name = &selection[rng.gen_range(0..selection.len())];
        self.preload(name, source)
    }

    /// Fire the preloaded impulse
    pub fn trigger(&mut self, eye: &mut EyeController) -> Result<(), ImpulseError> {
        if self.is_busy() {
            debug!("Impulse trigger refused, already busy");
            return Err(ImpulseError::Busy);
        }
        let Some((name, document)) = self.preloaded.take() else {
            warn!("No preloaded impulse available");
            return Err(ImpulseError::NothingPreloaded);
        };
        self.begin(name, document, eye);
        Ok(())
    }

    /// Fire a specific impulse, reusing the preload when it matches
    pub fn trigger_by_name(
        &mut self,
        name: &str,
        source: &dyn DocumentSource,
        eye: &mut EyeController,
    ) -> Result<(), ImpulseError> {
        if self.is_busy() {
            debug!("Impulse trigger refused, already busy");
            return Err(ImpulseError::Busy);
        }
        if self.preloaded() == Some(name) {
            return self.trigger(eye);
        }
        let document = source.load(SequenceKind::Impulse, name)?;
        self.begin(name.to_string(), document, eye);
        Ok(())
    }

    fn begin(&mut self, name: String, document: SequenceDocument, eye: &mut EyeController) {
        self.player.load(document);
        if eye.is_animating() {
            info!("Impulse '{}' pending (waiting for animation)", name);
            self.current = Some(name);
            self.pending = true;
        } else {
            self.current = Some(name);
            self.start_playback(eye);
        }
    }

    fn start_playback(&mut self, eye: &mut EyeController) {
        self.snapshot = Some(eye.snapshot());
        self.player.start(false);
        info!("Playing impulse '{}'", self.current.as_deref().unwrap_or(""));
    }

    /// Abort playback or a pending start; returns true if an impulse was playing
    pub fn stop(&mut self, eye: &mut EyeController) -> bool {
        let was_playing = self.is_playing();
        if was_playing {
            if let Some(snapshot) = self.snapshot.take() {
                eye.restore(&snapshot);
            }
            info!("Impulse '{}' stopped", self.current.as_deref().unwrap_or(""));
        }
        self.player.unload();
        self.pending = false;
        self.current = None;
        self.snapshot = None;
        was_playing
    }

    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        eye: &mut EyeController,
        rng: &mut R,
        now: Instant,
    ) -> ImpulseTick {
        if self.pending {
            if eye.is_animating() {
                return ImpulseTick::default();
            }
            self.pending = false;
            self.start_playback(eye);
            return ImpulseTick {
                started: true,
                ..Default::default()
            };
        }

        if !self.is_playing() {
            return ImpulseTick::default();
        }

        let outcome = self.player.tick(eye, LidPolicy::Always, rng, now);
        let mut tick = ImpulseTick {
            outcome,
            ..Default::default()
        };
        if outcome.completed {
            if let Some(snapshot) = self.snapshot.take() {
                eye.restore(&snapshot);
            }
            info!("Impulse '{}' finished", self.current.as_deref().unwrap_or(""));
            self.player.unload();
            self.current = None;
            tick.finished = true;
        }
        tick
    }
}
