/// Choice menu options and the record of choices the player has made.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::label::{LabelId, StepProps};

/// What selecting an option does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChoiceAction {
    /// Open the label on top of the current one; it returns here when done.
    Call { label: LabelId },
    /// Replace the current label with this one.
    Jump { label: LabelId },
    /// Dismiss the menu and continue, optionally closing the current label.
    #[serde(rename_all = "camelCase")]
    Close {
        #[serde(default)]
        close_current_label: bool,
    },
}

impl ChoiceAction {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::Jump { .. } => "jump",
            Self::Close { .. } => "close",
        }
    }

    /// Target label, if the action opens one.
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Call { label } | Self::Jump { label } => Some(label),
            Self::Close { .. } => None,
        }
    }
}

/// One entry of a choice menu, as written into the choice mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceOption {
    pub text: Value,
    #[serde(flatten)]
    pub action: ChoiceAction,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub props: StepProps,
    /// Hidden once it has been selected at this step.
    #[serde(default)]
    pub one_time: bool,
    /// Only offered when nothing else is left to choose.
    #[serde(default)]
    pub only_have_no_choice: bool,
    /// Selected automatically when it is the only option shown.
    #[serde(default)]
    pub auto_select: bool,
}

impl ChoiceOption {
    pub fn new(text: impl Into<Value>, action: ChoiceAction) -> Self {
        Self {
            text: text.into(),
            action,
            props: StepProps::new(),
            one_time: false,
            only_have_no_choice: false,
            auto_select: false,
        }
    }

    pub fn call(text: impl Into<Value>, label: impl Into<LabelId>) -> Self {
        Self::new(text, ChoiceAction::Call { label: label.into() })
    }

    pub fn jump(text: impl Into<Value>, label: impl Into<LabelId>) -> Self {
        Self::new(text, ChoiceAction::Jump { label: label.into() })
    }

    pub fn close(text: impl Into<Value>) -> Self {
        Self::new(
            text,
            ChoiceAction::Close {
                close_current_label: false,
            },
        )
    }

    /// A close option that also closes the label the menu was posed in.
    pub fn close_label(text: impl Into<Value>) -> Self {
        Self::new(
            text,
            ChoiceAction::Close {
                close_current_label: true,
            },
        )
    }

    pub fn one_time(mut self) -> Self {
        self.one_time = true;
        self
    }

    pub fn only_have_no_choice(mut self) -> Self {
        self.only_have_no_choice = true;
        self
    }

    pub fn auto_select(mut self) -> Self {
        self.auto_select = true;
        self
    }

    pub fn with_props(mut self, props: StepProps) -> Self {
        self.props = props;
        self
    }
}

/// An option as presented to the player: the stored option plus its
/// position in the original menu.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceMenuOption {
    pub choice_index: usize,
    pub option: ChoiceOption,
}

/// How many times a choice was taken at a (label, step, step hash) point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceMadeRecord {
    pub label_id: LabelId,
    pub step_index: usize,
    pub choice_index: usize,
    pub step_sha1: String,
    pub made_times: u32,
}
