/// History entries and the narrative view derived from them.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::choice::ChoiceOption;
use super::dialogue::Dialogue;
use super::label::LabelId;
use crate::core::diff::DiffOp;

/// Where the narration stood when a step settled. Passed to
/// `Engine::add_history`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryInfo {
    pub step_sha1: String,
    pub current_label: Option<LabelId>,
    pub label_step_index: Option<usize>,
    pub index: u64,
    pub choice_index_made: Option<usize>,
}

/// One settled step.
///
/// `diff` turns the composite state before this step into the state after
/// it. It is absent on the first entry, on entries past the retention
/// window, and on entries blocked with `block_go_back`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryStep {
    pub step_sha1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_label: Option<LabelId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_step_index: Option<usize>,
    pub index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<Dialogue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<ChoiceOption>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice_index_made: Option<usize>,
    pub already_made_choices: Vec<usize>,
    pub is_glued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Vec<DiffOp>>,
}

/// A choice as shown in the narrative history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeChoice {
    pub text: Value,
    #[serde(rename = "type")]
    pub action_type: String,
    pub is_response: bool,
    pub hidden: bool,
}

/// One line of the narrative history shown to the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeHistory {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<Dialogue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<NarrativeChoice>>,
    pub player_made_choice: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_value: Option<Value>,
    pub step_index: u64,
    pub is_glued: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_entry_fills_defaults() {
        let step: HistoryStep = serde_json::from_value(json!({
            "stepSha1": "abc",
            "index": 3
        }))
        .unwrap();
        assert_eq!(step.index, 3);
        assert!(step.diff.is_none());
        assert!(step.already_made_choices.is_empty());
        assert!(!step.is_glued);
    }

    #[test]
    fn entry_field_names() {
        let step = HistoryStep {
            step_sha1: "abc".into(),
            current_label: Some("start".into()),
            label_step_index: Some(0),
            index: 1,
            choice_index_made: Some(0),
            ..Default::default()
        };
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["currentLabel"], json!("start"));
        assert_eq!(v["labelStepIndex"], json!(0));
        assert_eq!(v["choiceIndexMade"], json!(0));
        assert!(v.get("diff").is_none());
    }
}
