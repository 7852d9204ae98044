/// The seam between the narration core and the outer subsystems
/// (storage, canvas, sound, navigation).
///
/// The engine only ever talks to its environment through [`GameUnifier`];
/// [`MemoryUnifier`] is a complete in-memory implementation, good enough to
/// drive the whole core without any renderer or audio attached.
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Ref, RefCell, RefMut};
use thiserror::Error;
use tracing::debug;

use crate::core::storage::{GameStorage, StorageGameState};
use crate::schema::state::Environment;

#[derive(Debug, Error)]
pub enum UnifierError {
    #[error("storage snapshot is malformed: {0}")]
    Storage(#[from] serde_json::Error),
    #[error("restore failed: {0}")]
    Restore(String),
}

/// A speaking character, as far as dialogue is concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
}

#[async_trait(?Send)]
pub trait GameUnifier {
    /// Current state of everything outside the narration core.
    fn environment(&self) -> Environment;

    /// Put storage, canvas, sound and path back to `environment`.
    async fn restore_environment(
        &self,
        environment: &Environment,
        navigate: bool,
    ) -> Result<(), UnifierError>;

    fn get_variable(&self, key: &str) -> Option<Value>;
    fn set_variable(&self, key: &str, value: Value);
    fn remove_variable(&self, key: &str);
    fn get_flag(&self, name: &str) -> bool;
    fn set_flag(&self, name: &str, value: bool);
    fn character(&self, id: &str) -> Option<Character>;

    /// Called after a label was popped; `opened_labels` is the new depth.
    fn on_label_closing(&self, opened_labels: usize);

    fn navigate(&self, path: &str);

    /// Forget everything; used by a full engine reset.
    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct MemoryUnifier {
    storage: RefCell<GameStorage>,
    path: RefCell<String>,
    canvas: RefCell<Value>,
    sound: RefCell<Value>,
    characters: RefCell<FxHashMap<String, Character>>,
    navigations: RefCell<Vec<String>>,
}

impl MemoryUnifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_character(self, id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        self.characters.borrow_mut().insert(
            id.clone(),
            Character {
                id,
                name: name.into(),
            },
        );
        self
    }

    pub fn storage(&self) -> Ref<'_, GameStorage> {
        self.storage.borrow()
    }

    pub fn storage_mut(&self) -> RefMut<'_, GameStorage> {
        self.storage.borrow_mut()
    }

    pub fn path(&self) -> String {
        self.path.borrow().clone()
    }

    pub fn canvas(&self) -> Value {
        self.canvas.borrow().clone()
    }

    pub fn set_canvas(&self, canvas: Value) {
        *self.canvas.borrow_mut() = canvas;
    }

    pub fn sound(&self) -> Value {
        self.sound.borrow().clone()
    }

    pub fn set_sound(&self, sound: Value) {
        *self.sound.borrow_mut() = sound;
    }

    /// Every path passed to `navigate`, oldest first.
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.borrow().clone()
    }
}

#[async_trait(?Send)]
impl GameUnifier for MemoryUnifier {
    fn environment(&self) -> Environment {
        Environment {
            path: self.path(),
            storage: serde_json::to_value(self.storage.borrow().export()).unwrap_or_default(),
            canvas: self.canvas(),
            sound: self.sound(),
        }
    }

    async fn restore_environment(
        &self,
        environment: &Environment,
        navigate: bool,
    ) -> Result<(), UnifierError> {
        let storage: StorageGameState = if environment.storage.is_null() {
            StorageGameState::default()
        } else {
            serde_json::from_value(environment.storage.clone())?
        };
        self.storage.borrow_mut().import(storage);
        self.set_canvas(environment.canvas.clone());
        self.set_sound(environment.sound.clone());
        if navigate {
            self.navigate(&environment.path);
        } else {
            *self.path.borrow_mut() = environment.path.clone();
        }
        Ok(())
    }

    fn get_variable(&self, key: &str) -> Option<Value> {
        self.storage.borrow().get(key).cloned()
    }

    fn set_variable(&self, key: &str, value: Value) {
        self.storage.borrow_mut().set(key, value);
    }

    fn remove_variable(&self, key: &str) {
        self.storage.borrow_mut().remove(key);
    }

    fn get_flag(&self, name: &str) -> bool {
        self.storage.borrow().get_flag(name)
    }

    fn set_flag(&self, name: &str, value: bool) {
        self.storage.borrow_mut().set_flag(name, value);
    }

    fn character(&self, id: &str) -> Option<Character> {
        self.characters.borrow().get(id).cloned()
    }

    fn on_label_closing(&self, opened_labels: usize) {
        self.storage
            .borrow_mut()
            .clear_expired_temp_variables(opened_labels);
    }

    fn navigate(&self, path: &str) {
        debug!(path, "navigate");
        *self.path.borrow_mut() = path.to_string();
        self.navigations.borrow_mut().push(path.to_string());
    }

    fn clear(&self) {
        self.storage.borrow_mut().clear();
        *self.canvas.borrow_mut() = Value::Null;
        *self.sound.borrow_mut() = Value::Null;
        self.path.borrow_mut().clear();
    }
}
