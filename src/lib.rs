//! Narration Engine — label-driven visual-novel narration with rewindable
//! history.
//!
//! Stories are written as labels: ordered lists of async steps that talk to
//! the player through dialogue, choice and input mailboxes. Every settled
//! step is recorded in a history of structural diffs, so the game can go
//! back, show a narrative log, and save or load at any point.

pub mod core;
pub mod schema;

pub use crate::core::config::EngineConfig;
pub use crate::core::engine::{Engine, EngineBuilder, EngineError};
pub use crate::core::history::{AddOptions, HistoryError};
pub use crate::core::narration::{GoNextOptions, RandomOptions, SequentialEnd};
pub use crate::core::unifier::{GameUnifier, MemoryUnifier};
pub use crate::schema::choice::{ChoiceOption, ChoiceMenuOption};
pub use crate::schema::dialogue::{Dialogue, InputRequest};
pub use crate::schema::label::{hook, LabelDefinition, Step, StepProps};
