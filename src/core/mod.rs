//! Narration machinery: label registry, step identity, structural diff,
//! storage facade, unifier seam, and the engine with its narration and
//! history operations.

pub mod config;
pub mod diff;
pub mod engine;
pub mod history;
pub mod narration;
pub mod registry;
pub mod step_identity;
pub mod storage;
pub mod unifier;
