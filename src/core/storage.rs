/// In-memory key-value storage backing the narration mailboxes.
///
/// Keys are case-insensitive. Temporary variables live in a separate
/// namespace tagged with the label depth they were written at; they shadow
/// base variables on read and disappear when a label at that depth closes.
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Storage keys the engine reserves for itself.
pub mod keys {
    pub const CURRENT_DIALOGUE: &str = "___current_dialogue_memory___";
    pub const LAST_DIALOGUE_ADDED_IN_STEP: &str = "___last_dialogue_added_in_step_memory___";
    pub const CURRENT_MENU_OPTIONS: &str = "___current_menu_options_memory___";
    pub const LAST_MENU_OPTIONS_ADDED_IN_STEP: &str = "___last_menu_options_added_in_step_memory___";
    pub const CURRENT_INPUT_INFO: &str = "___current_input_info_memory___";
    pub const CURRENT_INPUT_VALUE: &str = "___current_input_value_memory___";
    pub const LAST_INPUT_ADDED_IN_STEP: &str = "___last_input_added_in_step_memory___";
    pub const DIALOG_GLUE: &str = "___glue___";
    pub const LAST_STEP_GLUED: &str = "___last_step_glued___";
    pub const ALL_CHOICES_MADE: &str = "___all_choices_made___";
    pub const LABEL_PROGRESS: &str = "___opened_labels_counter___";
    pub const STEP_TIMES_COUNTER: &str = "___current_step_times_counter___";
    pub const RANDOM_MEMORY: &str = "___random_memory___";
}

/// Exported form of [`GameStorage`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageGameState {
    pub base: Map<String, Value>,
    pub temp: Map<String, Value>,
    pub temp_deadlines: BTreeMap<String, usize>,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GameStorage {
    base: FxHashMap<String, Value>,
    temp: FxHashMap<String, Value>,
    temp_deadlines: FxHashMap<String, usize>,
    flags: FxHashSet<String>,
}

impl GameStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        let key = key.to_lowercase();
        self.temp.get(&key).or_else(|| self.base.get(&key))
    }

    /// Setting `Value::Null` removes the key.
    pub fn set(&mut self, key: &str, value: Value) {
        let key = key.to_lowercase();
        if value.is_null() {
            self.base.remove(&key);
        } else {
            self.base.insert(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        let key = key.to_lowercase();
        self.base.remove(&key);
        self.temp.remove(&key);
        self.temp_deadlines.remove(&key);
    }

    /// Store a value that lives until the label at depth `opened_labels`
    /// closes.
    pub fn set_temp_variable(&mut self, key: &str, value: Value, opened_labels: usize) {
        let key = key.to_lowercase();
        if value.is_null() {
            self.temp.remove(&key);
            self.temp_deadlines.remove(&key);
            return;
        }
        self.temp.insert(key.clone(), value);
        self.temp_deadlines.insert(key, opened_labels);
    }

    /// Drop temporary variables written deeper than `opened_labels`.
    pub fn clear_expired_temp_variables(&mut self, opened_labels: usize) {
        let expired: Vec<String> = self
            .temp_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline > opened_labels)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.temp.remove(&key);
            self.temp_deadlines.remove(&key);
        }
    }

    pub fn get_flag(&self, name: &str) -> bool {
        self.flags.contains(&name.to_lowercase())
    }

    pub fn set_flag(&mut self, name: &str, value: bool) {
        let name = name.to_lowercase();
        if value {
            self.flags.insert(name);
        } else {
            self.flags.remove(&name);
        }
    }

    pub fn clear(&mut self) {
        self.base.clear();
        self.temp.clear();
        self.temp_deadlines.clear();
        self.flags.clear();
    }

    /// Snapshot with sorted keys, so equal storages export equal values.
    pub fn export(&self) -> StorageGameState {
        let mut flags: Vec<String> = self.flags.iter().cloned().collect();
        flags.sort();
        StorageGameState {
            base: sorted(&self.base),
            temp: sorted(&self.temp),
            temp_deadlines: self
                .temp_deadlines
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            flags,
        }
    }

    pub fn import(&mut self, state: StorageGameState) {
        self.clear();
        for (key, value) in state.base {
            self.set(&key, value);
        }
        for (key, value) in state.temp {
            let deadline = state.temp_deadlines.get(&key).copied().unwrap_or(0);
            self.set_temp_variable(&key, value, deadline);
        }
        for flag in state.flags {
            self.set_flag(&flag, true);
        }
    }
}

fn sorted(map: &FxHashMap<String, Value>) -> Map<String, Value> {
    let ordered: BTreeMap<&String, &Value> = map.iter().collect();
    ordered
        .into_iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
