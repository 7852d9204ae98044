/// Persisted game-state shapes. These round-trip through JSON unchanged.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use super::history::HistoryStep;
use super::label::LabelId;
use crate::core::engine::EngineError;

/// A frame of the opened-label stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedLabel {
    pub label: LabelId,
    pub current_step_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NarrationGameState {
    pub opened_labels: Vec<OpenedLabel>,
    pub step_counter: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryGameState {
    pub steps_history: Vec<HistoryStep>,
    pub original_step_data: Option<GameStepState>,
}

/// The part of the composite state owned by the subsystems outside the
/// narration core. Opaque to the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub path: String,
    pub storage: Value,
    pub canvas: Value,
    pub sound: Value,
}

/// Composite game state: everything history diffs and restores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameStepState {
    pub path: String,
    pub storage: Value,
    pub canvas: Value,
    pub sound: Value,
    pub label_index: Option<usize>,
    pub opened_labels: Vec<OpenedLabel>,
}

impl GameStepState {
    pub fn environment(&self) -> Environment {
        Environment {
            path: self.path.clone(),
            storage: self.storage.clone(),
            canvas: self.canvas.clone(),
            sound: self.sound.clone(),
        }
    }
}

/// A full save: narration, history and the outer subsystems.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameSaveData {
    pub engine_version: String,
    pub narration: NarrationGameState,
    pub history: HistoryGameState,
    pub environment: Environment,
}

impl GameSaveData {
    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(input: &str) -> Result<GameSaveData, EngineError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), EngineError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_from_path(path: &Path) -> Result<GameSaveData, EngineError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}
