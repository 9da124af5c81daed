// Looping player for the selected auto mode

use std::time::Instant;

use rand::Rng;
use tracing::info;

use super::document::SequenceDocument;
use super::engine::{LidPolicy, SequencePlayer, TickOutcome};
use crate::eye::EyeController;

#[derive(Debug, Default)]
pub struct ModePlayer {
    name: Option<String>,
    player: SequencePlayer,
}

impl ModePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an already-parsed mode document
    pub fn install(&mut self, name: &str, document: SequenceDocument) {
        info!(
            "Loaded mode '{}' with {} steps (loop={})",
            name,
            document.steps.len(),
            document.looping
        );
        self.player.load(document);
        self.name = Some(name.to_string());
    }

    pub fn unload(&mut self) {
        self.player.unload();
        self.name = None;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Play from the top with the document's coupling
    pub fn start(&mut self, eye: &mut EyeController) {
        let Some(doc) = self.player.document() else {
            return;
        };
        let (looping, coupling) = (doc.looping, doc.coupling);
        if self.player.start(looping) {
            eye.set_coupling(coupling);
            info!("Started playback of '{}'", self.name.as_deref().unwrap_or(""));
        }
    }

    pub fn stop(&mut self, eye: &mut EyeController) {
        self.player.stop();
        eye.set_coupling(1.0);
        if let Some(name) = &self.name {
            info!("Stopped playback of '{}'", name);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        self.player.pause(now);
    }

    pub fn resume(&mut self, now: Instant) {
        self.player.resume(now);
    }

    pub fn is_paused(&self) -> bool {
        self.player.is_paused()
    }

    /// Playing, whether or not paused
    pub fn is_playing(&self) -> bool {
        self.player.is_playing()
    }

    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        eye: &mut EyeController,
        rng: &mut R,
        now: Instant,
    ) -> TickOutcome {
        let outcome = self.player.tick(eye, LidPolicy::SkipWhileAnimating, rng, now);
        if outcome.completed {
            info!("Mode '{}' finished", self.name.as_deref().unwrap_or(""));
        }
        outcome
    }
}
