/// The engine handle: registry, narration stack, history log and the
/// unifier, shared by every step through a cheap clone.
///
/// Narration operations live in `core::narration`, history operations in
/// `core::history`; both are `impl Engine` blocks over the state held here.
use futures::future::{FutureExt, LocalBoxFuture};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::config::{ConfigError, EngineConfig};
use crate::core::history::{HistoryError, HistoryLog};
use crate::core::narration::NarrationState;
use crate::core::registry::LabelRegistry;
use crate::core::unifier::{GameUnifier, MemoryUnifier, UnifierError};
use crate::schema::label::{Label, LabelDefinition, LabelHook, StepError, StepProps, StepResult};
use crate::schema::state::{GameSaveData, GameStepState};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("history error: {0}")]
    History(#[from] HistoryError),
    #[error("unifier error: {0}")]
    Unifier(#[from] UnifierError),
}

/// Runs when the outermost label runs out of steps.
pub type GameEndHandler = Rc<dyn Fn(Engine, StepProps) -> LocalBoxFuture<'static, StepResult>>;

/// Receives every error a step body returns.
pub type StepErrorHandler = Rc<dyn Fn(&StepError, &StepProps)>;

/// Engine-wide hooks. The step hooks run alongside the label's own hooks.
#[derive(Default, Clone)]
pub(crate) struct EngineHooks {
    pub on_step_start: Option<LabelHook>,
    pub on_step_end: Option<LabelHook>,
    pub on_loading_label: Option<LabelHook>,
    pub on_game_end: Option<GameEndHandler>,
    pub on_step_error: Option<StepErrorHandler>,
}

pub(crate) struct EngineInner {
    pub config: EngineConfig,
    pub registry: RefCell<LabelRegistry>,
    pub narration: RefCell<NarrationState>,
    pub history: RefCell<HistoryLog>,
    pub go_back_running: Cell<bool>,
    pub block_go_back_pending: Cell<bool>,
    pub hooks: EngineHooks,
    pub rng: RefCell<StdRng>,
    pub unifier: Rc<dyn GameUnifier>,
}

/// Shared handle to a running game. Cloning is cheap and every clone sees
/// the same state.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Rc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("opened_labels", &self.opened_labels())
            .field("step_counter", &self.step_counter())
            .finish_non_exhaustive()
    }
}

/// Builder for constructing an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    config_path: Option<PathBuf>,
    seed: Option<u64>,
    unifier: Option<Rc<dyn GameUnifier>>,
    labels: Vec<LabelDefinition>,
    hooks: EngineHooks,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
            config_path: None,
            seed: None,
            unifier: None,
            labels: Vec::new(),
            hooks: EngineHooks::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn unifier(&self) -> Rc<dyn GameUnifier> {
        self.inner.unifier.clone()
    }

    pub fn add_label(&self, definition: LabelDefinition) {
        self.inner.registry.borrow_mut().add(definition);
    }

    pub fn add_labels(&self, definitions: impl IntoIterator<Item = LabelDefinition>) {
        self.inner.registry.borrow_mut().add_all(definitions);
    }

    pub fn has_label(&self, id: &str) -> bool {
        self.inner.registry.borrow().has(id)
    }

    /// Look up a label; a missing id is logged and yields `None`.
    pub fn get_label(&self, id: &str) -> Option<Rc<Label>> {
        self.inner.registry.borrow_mut().get(id)
    }

    /// Composite state: the unifier's environment plus the label stack.
    pub fn current_game_step_state(&self) -> GameStepState {
        let environment = self.inner.unifier.environment();
        let narration = self.inner.narration.borrow();
        GameStepState {
            path: environment.path,
            storage: environment.storage,
            canvas: environment.canvas,
            sound: environment.sound,
            label_index: narration.opened_labels.last().map(|f| f.current_step_index),
            opened_labels: narration.opened_labels.clone(),
        }
    }

    pub fn export_game_state(&self) -> GameSaveData {
        GameSaveData {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            narration: self.export_narration(),
            history: self.export_history(),
            environment: self.inner.unifier.environment(),
        }
    }

    /// Load a save, then run the loading hooks of every opened label.
    pub async fn restore_game_state(
        &self,
        save: GameSaveData,
        navigate: bool,
    ) -> Result<(), EngineError> {
        if save.engine_version != env!("CARGO_PKG_VERSION") {
            warn!(
                saved = %save.engine_version,
                current = env!("CARGO_PKG_VERSION"),
                "save was written by a different engine version"
            );
        }
        self.restore_history(save.history);
        self.restore_narration(save.narration);
        self.inner
            .unifier
            .restore_environment(&save.environment, navigate)
            .await?;
        self.run_loading_hooks_for_opened_labels().await;
        info!(step_counter = self.step_counter(), "game state restored");
        Ok(())
    }

    /// Load a JSON save, tolerating missing or legacy sections.
    pub async fn load_game_from_json(&self, input: &str, navigate: bool) -> Result<(), EngineError> {
        let data: serde_json::Value = serde_json::from_str(input)?;
        let narration = match data.get("narration") {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                warn!(error = %e, "malformed narration state, starting from an empty stack");
                Default::default()
            }),
            None => {
                warn!("save has no narration state");
                Default::default()
            }
        };
        let environment = match data.get("environment") {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                warn!(error = %e, "malformed environment, using defaults");
                Default::default()
            }),
            None => {
                warn!("save has no environment");
                Default::default()
            }
        };
        self.restore_history_value(data.get("history").unwrap_or(&serde_json::Value::Null));
        self.restore_narration(narration);
        self.inner
            .unifier
            .restore_environment(&environment, navigate)
            .await?;
        self.run_loading_hooks_for_opened_labels().await;
        Ok(())
    }

    /// Full reset of narration, history and the environment. Registered
    /// labels are kept.
    pub fn clear(&self) {
        *self.inner.narration.borrow_mut() = NarrationState::default();
        self.clear_history();
        self.inner.go_back_running.set(false);
        self.inner.block_go_back_pending.set(false);
        self.inner.unifier.clear();
    }
}

impl EngineBuilder {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Read the configuration from a RON file at build time. Replaces any
    /// config given with `with_config`.
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Overrides the seed of whatever config ends up being used.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_unifier<U: GameUnifier + 'static>(mut self, unifier: Rc<U>) -> Self {
        self.unifier = Some(unifier);
        self
    }

    pub fn label(mut self, definition: LabelDefinition) -> Self {
        self.labels.push(definition);
        self
    }

    pub fn labels(mut self, definitions: impl IntoIterator<Item = LabelDefinition>) -> Self {
        self.labels.extend(definitions);
        self
    }

    pub fn on_step_start(mut self, hook: LabelHook) -> Self {
        self.hooks.on_step_start = Some(hook);
        self
    }

    pub fn on_step_end(mut self, hook: LabelHook) -> Self {
        self.hooks.on_step_end = Some(hook);
        self
    }

    pub fn on_loading_label(mut self, hook: LabelHook) -> Self {
        self.hooks.on_loading_label = Some(hook);
        self
    }

    pub fn on_game_end<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Engine, StepProps) -> Fut + 'static,
        Fut: Future<Output = StepResult> + 'static,
    {
        self.hooks.on_game_end = Some(Rc::new(move |engine, props| {
            handler(engine, props).boxed_local()
        }));
        self
    }

    pub fn on_step_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&StepError, &StepProps) + 'static,
    {
        self.hooks.on_step_error = Some(Rc::new(handler));
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let mut config = match self.config_path {
            Some(ref path) => EngineConfig::load_from_ron(path)?,
            None => self.config,
        };
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }

        let mut registry = LabelRegistry::new(config.label_cache_size);
        registry.add_all(self.labels);

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let unifier = self
            .unifier
            .unwrap_or_else(|| Rc::new(MemoryUnifier::new()));

        Ok(Engine {
            inner: Rc::new(EngineInner {
                config,
                registry: RefCell::new(registry),
                narration: RefCell::new(NarrationState::default()),
                history: RefCell::new(HistoryLog::default()),
                go_back_running: Cell::new(false),
                block_go_back_pending: Cell::new(false),
                hooks: self.hooks,
                rng: RefCell::new(rng),
                unifier,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::label::Step;
    use futures::executor::block_on;
    use serde_json::json;

    fn say(text: &'static str) -> Step {
        Step::new(format!("say {text}"), move |engine: Engine, _| async move {
            engine.set_dialogue(text);
            Ok(None)
        })
    }

    #[test]
    fn builder_defaults() {
        let engine = Engine::builder().build().unwrap();
        assert_eq!(engine.config().step_limit_saved, 20);
        assert!(engine.opened_labels().is_empty());
        assert_eq!(engine.step_counter(), 0);
    }

    #[test]
    fn builder_registers_labels() {
        let engine = Engine::builder()
            .label(LabelDefinition::new("start", vec![say("hi")]))
            .build()
            .unwrap();
        assert!(engine.has_label("start"));
        assert!(engine.get_label("missing").is_none());
    }

    #[test]
    fn builder_reads_config_file_and_seed_override() {
        let path = std::env::temp_dir().join(format!("engine-config-{}.ron", std::process::id()));
        std::fs::write(&path, "(step_limit_saved: 3, seed: Some(1))").unwrap();
        let engine = Engine::builder().config_file(&path).seed(99).build().unwrap();
        assert_eq!(engine.config().step_limit_saved, 3);
        assert_eq!(engine.config().seed, Some(99));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let result = Engine::builder()
            .config_file("/definitely/not/here.ron")
            .build();
        assert!(matches!(result, Err(EngineError::Config(ConfigError::Io(_)))));
    }

    #[test]
    fn composite_state_tracks_label_stack() {
        let unifier = Rc::new(MemoryUnifier::new());
        unifier.set_canvas(json!({"bg": "room"}));
        let engine = Engine::builder()
            .with_unifier(unifier.clone())
            .label(LabelDefinition::new("start", vec![say("one"), say("two")]))
            .build()
            .unwrap();

        block_on(engine.call_label("start", StepProps::new()));
        let state = engine.current_game_step_state();
        assert_eq!(state.label_index, Some(0));
        assert_eq!(state.opened_labels.len(), 1);
        assert_eq!(state.canvas, json!({"bg": "room"}));
    }

    #[test]
    fn clear_resets_everything_but_labels() {
        let engine = Engine::builder()
            .label(LabelDefinition::new("start", vec![say("one"), say("two")]))
            .build()
            .unwrap();
        block_on(engine.call_label("start", StepProps::new()));
        assert!(engine.dialogue().is_some());

        engine.clear();
        assert!(engine.dialogue().is_none());
        assert!(engine.opened_labels().is_empty());
        assert!(engine.steps_history().is_empty());
        assert!(engine.has_label("start"));
    }
}
