/// Labels and steps — the units of narrative control flow.
use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use crate::core::engine::Engine;
use crate::core::step_identity;

/// Identifier of a registered label.
pub type LabelId = String;

/// Free-form properties handed to every step body.
pub type StepProps = Map<String, Value>;

/// Value a step hands back to whoever advanced the narration.
pub type StepOutput = Option<Value>;

/// Any error a step body or hook wants to surface.
pub type StepError = Box<dyn std::error::Error>;

pub type StepResult = Result<StepOutput, StepError>;

type StepFn = Rc<dyn Fn(Engine, StepProps) -> LocalBoxFuture<'static, StepResult>>;

/// Lifecycle hook: receives the step index and the label it belongs to.
pub type LabelHook = Rc<dyn Fn(usize, Rc<Label>) -> LocalBoxFuture<'static, Result<(), StepError>>>;

/// Wrap an async closure as a [`LabelHook`].
pub fn hook<F, Fut>(f: F) -> LabelHook
where
    F: Fn(usize, Rc<Label>) -> Fut + 'static,
    Fut: Future<Output = Result<(), StepError>> + 'static,
{
    Rc::new(move |index, label| f(index, label).boxed_local())
}

/// One unit of narrative execution.
///
/// The `source` text is what the step identity hash is computed from: two
/// steps with the same source are considered the same step across saves.
/// A step without source text cannot be fingerprinted and hashes to the
/// `"error"` sentinel.
#[derive(Clone)]
pub struct Step {
    source: Option<Rc<str>>,
    run: StepFn,
}

impl Step {
    pub fn new<F, Fut>(source: impl Into<String>, f: F) -> Self
    where
        F: Fn(Engine, StepProps) -> Fut + 'static,
        Fut: Future<Output = StepResult> + 'static,
    {
        Self {
            source: Some(Rc::from(source.into())),
            run: Rc::new(move |engine, props| f(engine, props).boxed_local()),
        }
    }

    /// A step with no serializable source text.
    pub fn anonymous<F, Fut>(f: F) -> Self
    where
        F: Fn(Engine, StepProps) -> Fut + 'static,
        Fut: Future<Output = StepResult> + 'static,
    {
        Self {
            source: None,
            run: Rc::new(move |engine, props| f(engine, props).boxed_local()),
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub(crate) fn call(&self, engine: Engine, props: StepProps) -> LocalBoxFuture<'static, StepResult> {
        (self.run)(engine, props)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
enum StepSource {
    Fixed(Vec<Step>),
    Generated(Rc<dyn Fn() -> Vec<Step>>),
}

/// A label registration. The registry keeps these for the whole run and
/// materializes [`Label`] instances from them on demand.
#[derive(Clone)]
pub struct LabelDefinition {
    id: LabelId,
    steps: StepSource,
    on_step_start: Option<LabelHook>,
    on_loading_label: Option<LabelHook>,
    on_step_end: Option<LabelHook>,
}

impl LabelDefinition {
    pub fn new(id: impl Into<LabelId>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            steps: StepSource::Fixed(steps),
            on_step_start: None,
            on_loading_label: None,
            on_step_end: None,
        }
    }

    /// A label whose step list is rebuilt by `generator` every time the
    /// label is materialized.
    pub fn generated<G>(id: impl Into<LabelId>, generator: G) -> Self
    where
        G: Fn() -> Vec<Step> + 'static,
    {
        Self {
            id: id.into(),
            steps: StepSource::Generated(Rc::new(generator)),
            on_step_start: None,
            on_loading_label: None,
            on_step_end: None,
        }
    }

    pub fn on_step_start(mut self, hook: LabelHook) -> Self {
        self.on_step_start = Some(hook);
        self
    }

    /// Runs before step 0, and for every opened label when a save is loaded.
    pub fn on_loading_label(mut self, hook: LabelHook) -> Self {
        self.on_loading_label = Some(hook);
        self
    }

    pub fn on_step_end(mut self, hook: LabelHook) -> Self {
        self.on_step_end = Some(hook);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn materialize(&self) -> Label {
        let steps = match &self.steps {
            StepSource::Fixed(steps) => steps.clone(),
            StepSource::Generated(generator) => generator(),
        };
        let shas = steps.iter().map(step_identity::step_sha).collect();
        Label {
            id: self.id.clone(),
            steps,
            shas,
            on_step_start: self.on_step_start.clone(),
            on_loading_label: self.on_loading_label.clone(),
            on_step_end: self.on_step_end.clone(),
        }
    }
}

impl fmt::Debug for LabelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.steps {
            StepSource::Fixed(ref steps) => format!("fixed({})", steps.len()),
            StepSource::Generated(_) => "generated".to_string(),
        };
        f.debug_struct("LabelDefinition")
            .field("id", &self.id)
            .field("steps", &kind)
            .finish_non_exhaustive()
    }
}

/// A materialized label: its steps and their identity hashes.
pub struct Label {
    id: LabelId,
    steps: Vec<Step>,
    shas: Vec<String>,
    on_step_start: Option<LabelHook>,
    on_loading_label: Option<LabelHook>,
    on_step_end: Option<LabelHook>,
}

impl Label {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn steps_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Identity hash of the step at `index`.
    pub fn step_sha(&self, index: usize) -> Option<&str> {
        self.shas.get(index).map(String::as_str)
    }

    pub fn on_step_start(&self) -> Option<&LabelHook> {
        self.on_step_start.as_ref()
    }

    pub fn on_loading_label(&self) -> Option<&LabelHook> {
        self.on_loading_label.as_ref()
    }

    pub fn on_step_end(&self) -> Option<&LabelHook> {
        self.on_step_end.as_ref()
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Label")
            .field("id", &self.id)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}
