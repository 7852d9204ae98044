//! Plain data model: labels and steps, choices, dialogue, history entries
//! and the persisted game-state shapes.

pub mod choice;
pub mod dialogue;
pub mod history;
pub mod label;
pub mod state;
