// Scripted behavior: documents, their sources and the players that run them

pub mod document;
pub mod engine;
pub mod impulse_player;
pub mod mode_player;
pub mod source;

pub use document::{SequenceDocument, Step, StepKind, ValueSpec};
pub use engine::{LidPolicy, SequencePlayer, TickOutcome};
pub use impulse_player::{ImpulseError, ImpulsePlayer, ImpulseTick};
pub use mode_player::ModePlayer;
pub use source::{validate_name, DirSource, DocumentSource, LoadError, MemorySource, SequenceKind};
