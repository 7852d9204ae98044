/// Dialogue and input mailbox contents.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Dialogue text: a single line, or several glued lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DialogueText {
    Single(String),
    Lines(Vec<String>),
}

impl DialogueText {
    /// Concatenate `next` after `self`, always producing the array form.
    pub fn append(self, next: DialogueText) -> DialogueText {
        let mut lines = self.into_lines();
        lines.extend(next.into_lines());
        DialogueText::Lines(lines)
    }

    pub fn into_lines(self) -> Vec<String> {
        match self {
            Self::Single(text) => vec![text],
            Self::Lines(lines) => lines,
        }
    }

    /// Lines joined with a single space.
    pub fn joined(&self) -> String {
        match self {
            Self::Single(text) => text.clone(),
            Self::Lines(lines) => lines.join(" "),
        }
    }
}

impl From<&str> for DialogueText {
    fn from(text: &str) -> Self {
        Self::Single(text.to_string())
    }
}

impl From<String> for DialogueText {
    fn from(text: String) -> Self {
        Self::Single(text)
    }
}

impl From<Vec<String>> for DialogueText {
    fn from(lines: Vec<String>) -> Self {
        Self::Lines(lines)
    }
}

/// The dialogue mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialogue {
    pub text: DialogueText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dialogue {
    pub fn new(text: impl Into<DialogueText>) -> Self {
        Self {
            text: text.into(),
            character: None,
            extra: Map::new(),
        }
    }

    pub fn with_character(mut self, character: impl Into<String>) -> Self {
        self.character = Some(character.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl From<&str> for Dialogue {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Dialogue {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// The input-request mailbox: what kind of value the narration is
/// waiting for and whether it may be skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRequest {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl InputRequest {
    pub fn required(input_type: impl Into<String>) -> Self {
        Self {
            input_type: Some(input_type.into()),
            is_required: true,
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_single_to_single_gives_lines() {
        let text = DialogueText::from("A").append(DialogueText::from("B"));
        assert_eq!(text, DialogueText::Lines(vec!["A".into(), "B".into()]));
    }

    #[test]
    fn append_to_lines_extends() {
        let text = DialogueText::Lines(vec!["A".into(), "B".into()]).append("C".into());
        assert_eq!(text.joined(), "A B C");
    }

    #[test]
    fn dialogue_json_shape() {
        let d = Dialogue::new("Hello")
            .with_character("alice")
            .with_extra("voice", json!("soft"));
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v, json!({"text": "Hello", "character": "alice", "voice": "soft"}));
        let back: Dialogue = serde_json::from_value(v).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn lines_deserialize_untagged() {
        let d: Dialogue = serde_json::from_value(json!({"text": ["A", "B"]})).unwrap();
        assert_eq!(d.text, DialogueText::Lines(vec!["A".into(), "B".into()]));
        assert!(d.character.is_none());
    }

    #[test]
    fn input_request_type_field() {
        let req = InputRequest::required("string").with_default(json!("Ada"));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["type"], json!("string"));
        assert_eq!(v["isRequired"], json!(true));
        assert_eq!(v["defaultValue"], json!("Ada"));
    }
}
