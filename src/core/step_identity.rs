/// Content hashes of step source text, used to notice
/// that a script step was edited between a save and a load.
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::schema::label::Step;

/// Identity of a step whose source could not be fingerprinted. Two such
/// steps compare equal to each other.
pub const ERROR_SHA: &str = "error";

/// Hash of the lower-cased source text, as lowercase hex.
pub fn hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// Identity hash of a step, or [`ERROR_SHA`] if it carries no source text.
pub fn step_sha(step: &Step) -> String {
    match step.source() {
        Some(source) => hash(source),
        None => {
            warn!("step has no source text, using the error identity");
            ERROR_SHA.to_string()
        }
    }
}
