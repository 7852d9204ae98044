/// Narration: the opened-label stack, step execution and the mailboxes
/// steps use to talk to the player.
///
/// Every mailbox lives in the unifier's storage under the reserved
/// [`keys`], so it is part of the composite state and rewinds with history.
use futures::future::{join_all, FutureExt, LocalBoxFuture};
use rand::Rng;
use rustc_hash::FxHashSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, error, warn};

use crate::core::engine::Engine;
use crate::core::history::AddOptions;
use crate::core::step_identity::ERROR_SHA;
use crate::core::storage::keys;
use crate::core::unifier::Character;
use crate::schema::choice::{ChoiceAction, ChoiceMadeRecord, ChoiceMenuOption, ChoiceOption};
use crate::schema::dialogue::{Dialogue, InputRequest};
use crate::schema::history::HistoryInfo;
use crate::schema::label::{Label, LabelHook, LabelId, StepOutput, StepProps};
use crate::schema::state::{NarrationGameState, OpenedLabel};

#[derive(Debug, Default)]
pub(crate) struct NarrationState {
    pub opened_labels: Vec<OpenedLabel>,
    pub step_counter: u64,
    pub steps_running: usize,
    pub go_next_requests: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoNextOptions {
    /// Choice index to record on the history entry of the step that runs.
    pub choice_made: Option<usize>,
    /// Skip the pending-choice/input gate and the running-step queue.
    pub run_now: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RandomOptions {
    /// Never return the same number twice at this step.
    pub once_only: bool,
    /// Separates several once-only draws made by the same step.
    pub nested_id: Option<String>,
}

/// What `choose_sequential` does once every element has been returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SequentialEnd {
    #[default]
    Stop,
    Loop,
    KeepLast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelProgress {
    biggest_step: usize,
    open_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepTimes {
    step_sha1: String,
    times: u32,
}

async fn run_hooks(
    hooks: [Option<LabelHook>; 2],
    index: usize,
    label: Rc<Label>,
    stage: &'static str,
) {
    let runs = hooks.into_iter().flatten().map(|hook| {
        let label = label.clone();
        async move {
            if let Err(err) = hook(index, label.clone()).await {
                error!(label = %label.id(), step = index, stage, error = %err, "label hook failed");
            }
        }
    });
    join_all(runs).await;
}

/// Ranges up to this width are listed outright for once-only draws.
const SMALL_RANGE: u128 = 1024;

impl Engine {
    // --- storage helpers ---

    fn var<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.inner.unifier.get_variable(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "stored value has an unexpected shape");
                None
            }
        }
    }

    fn set_var<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.inner.unifier.set_variable(key, v),
            Err(e) => error!(key, error = %e, "value could not be stored"),
        }
    }

    // --- stack inspection ---

    pub fn opened_labels(&self) -> Vec<OpenedLabel> {
        self.inner.narration.borrow().opened_labels.clone()
    }

    pub fn step_counter(&self) -> u64 {
        self.inner.narration.borrow().step_counter
    }

    /// Steps currently executing, counting nested ones.
    pub fn steps_running(&self) -> usize {
        self.inner.narration.borrow().steps_running
    }

    fn current_frame(&self) -> Option<OpenedLabel> {
        self.inner.narration.borrow().opened_labels.last().cloned()
    }

    pub fn current_label_id(&self) -> Option<LabelId> {
        self.current_frame().map(|f| f.label)
    }

    pub fn current_label_step_index(&self) -> Option<usize> {
        self.current_frame().map(|f| f.current_step_index)
    }

    pub fn current_label(&self) -> Option<Rc<Label>> {
        let id = self.current_label_id()?;
        self.get_label(&id)
    }

    fn step_sha_at(&self, label_id: &str, index: usize) -> String {
        self.get_label(label_id)
            .and_then(|label| label.step_sha(index).map(str::to_string))
            .unwrap_or_else(|| ERROR_SHA.to_string())
    }

    pub(crate) fn export_narration(&self) -> NarrationGameState {
        let narration = self.inner.narration.borrow();
        NarrationGameState {
            opened_labels: narration.opened_labels.clone(),
            step_counter: narration.step_counter,
        }
    }

    pub(crate) fn restore_narration(&self, state: NarrationGameState) {
        *self.inner.narration.borrow_mut() = NarrationState {
            opened_labels: state.opened_labels,
            step_counter: state.step_counter,
            steps_running: 0,
            go_next_requests: 0,
        };
    }

    pub(crate) async fn run_loading_hooks_for_opened_labels(&self) {
        for frame in self.opened_labels() {
            let Some(label) = self.get_label(&frame.label) else {
                continue;
            };
            let hooks = [
                label.on_loading_label().cloned(),
                self.inner.hooks.on_loading_label.clone(),
            ];
            run_hooks(hooks, frame.current_step_index, label, "on_loading_label").await;
        }
    }

    // --- dialogue ---

    pub fn dialogue(&self) -> Option<Dialogue> {
        self.var(keys::CURRENT_DIALOGUE)
    }

    /// Write the dialogue mailbox. With glue enabled the text is appended to
    /// the current dialogue and the glue flag is consumed.
    pub fn set_dialogue(&self, dialogue: impl Into<Dialogue>) {
        let mut dialogue = dialogue.into();
        let counter = self.step_counter();
        if self.dialog_glue() {
            if let Some(previous) = self.dialogue() {
                dialogue.text = previous.text.append(dialogue.text);
                if dialogue.character.is_none() {
                    dialogue.character = previous.character;
                }
                self.set_var(keys::LAST_STEP_GLUED, &counter);
            }
            self.set_dialog_glue(false);
        }
        self.set_var(keys::CURRENT_DIALOGUE, &dialogue);
        self.set_var(keys::LAST_DIALOGUE_ADDED_IN_STEP, &counter);
    }

    pub fn clear_dialogue(&self) {
        self.inner.unifier.remove_variable(keys::CURRENT_DIALOGUE);
    }

    pub fn dialogue_character(&self) -> Option<Character> {
        let id = self.dialogue()?.character?;
        self.inner.unifier.character(&id)
    }

    pub fn dialog_glue(&self) -> bool {
        self.inner.unifier.get_flag(keys::DIALOG_GLUE)
    }

    pub fn set_dialog_glue(&self, glue: bool) {
        self.inner.unifier.set_flag(keys::DIALOG_GLUE, glue);
    }

    // --- choices ---

    pub fn set_choice_menu_options(&self, options: Vec<ChoiceOption>) {
        if options.is_empty() {
            self.clear_choice_menu();
            return;
        }
        self.set_var(keys::CURRENT_MENU_OPTIONS, &options);
        self.set_var(keys::LAST_MENU_OPTIONS_ADDED_IN_STEP, &self.step_counter());
    }

    pub fn clear_choice_menu(&self) {
        self.inner.unifier.remove_variable(keys::CURRENT_MENU_OPTIONS);
    }

    /// The stored menu, unfiltered.
    pub(crate) fn stored_choice_menu(&self) -> Option<Vec<ChoiceOption>> {
        self.var(keys::CURRENT_MENU_OPTIONS)
    }

    /// The menu as the player should see it: one-time options already taken
    /// at this step are dropped, and "only if no choice" options appear only
    /// when nothing else is left.
    pub fn choice_menu_options(&self) -> Option<Vec<ChoiceMenuOption>> {
        let stored = self.stored_choice_menu()?;
        let already_made = self.already_current_step_made_choices();
        let mut options = Vec::new();
        let mut fallback = Vec::new();
        for (choice_index, option) in stored.into_iter().enumerate() {
            if option.one_time && already_made.contains(&choice_index) {
                continue;
            }
            let item = ChoiceMenuOption {
                choice_index,
                option,
            };
            if item.option.only_have_no_choice {
                fallback.push(item);
            } else {
                options.push(item);
            }
        }
        if !options.is_empty() {
            return Some(options);
        }
        fallback.into_iter().next().map(|item| vec![item])
    }

    fn choices_made(&self) -> Vec<ChoiceMadeRecord> {
        self.var(keys::ALL_CHOICES_MADE).unwrap_or_default()
    }

    fn made_choices_at(&self, label_id: &str, step_index: usize, step_sha1: &str) -> Vec<usize> {
        self.choices_made()
            .into_iter()
            .filter(|r| r.label_id == label_id && r.step_index == step_index && r.step_sha1 == step_sha1)
            .map(|r| r.choice_index)
            .collect()
    }

    /// Choice indices already taken at the current step.
    pub fn already_current_step_made_choices(&self) -> Vec<usize> {
        let Some(frame) = self.current_frame() else {
            return Vec::new();
        };
        let sha = self.step_sha_at(&frame.label, frame.current_step_index);
        self.made_choices_at(&frame.label, frame.current_step_index, &sha)
    }

    pub fn choice_made_times(&self, label_id: &str, step_index: usize, choice_index: usize) -> u32 {
        let sha = self.step_sha_at(label_id, step_index);
        self.choices_made()
            .into_iter()
            .find(|r| {
                r.label_id == label_id
                    && r.step_index == step_index
                    && r.choice_index == choice_index
                    && r.step_sha1 == sha
            })
            .map(|r| r.made_times)
            .unwrap_or(0)
    }

    fn record_current_choice(&self, choice_index: usize) {
        let Some(frame) = self.current_frame() else {
            warn!(choice_index, "choice made with no opened label");
            return;
        };
        let sha = self.step_sha_at(&frame.label, frame.current_step_index);
        let mut records = self.choices_made();
        let existing = records.iter_mut().find(|r| {
            r.label_id == frame.label
                && r.step_index == frame.current_step_index
                && r.choice_index == choice_index
                && r.step_sha1 == sha
        });
        match existing {
            Some(record) => record.made_times += 1,
            None => records.push(ChoiceMadeRecord {
                label_id: frame.label,
                step_index: frame.current_step_index,
                choice_index,
                step_sha1: sha,
                made_times: 1,
            }),
        }
        self.set_var(keys::ALL_CHOICES_MADE, &records);
    }

    // --- input ---

    pub fn request_input(&self, request: InputRequest) {
        if let Some(default) = &request.default_value {
            self.inner
                .unifier
                .set_variable(keys::CURRENT_INPUT_VALUE, default.clone());
        }
        self.set_var(keys::CURRENT_INPUT_INFO, &request);
    }

    pub fn input_request(&self) -> Option<InputRequest> {
        self.var(keys::CURRENT_INPUT_INFO)
    }

    pub fn is_required_input(&self) -> bool {
        self.input_request().is_some_and(|r| r.is_required)
    }

    pub fn input_value(&self) -> Option<Value> {
        self.inner.unifier.get_variable(keys::CURRENT_INPUT_VALUE)
    }

    /// Answer the pending input request.
    pub fn set_input_value(&self, value: Value) {
        self.inner.unifier.set_variable(keys::CURRENT_INPUT_VALUE, value);
        self.set_var(keys::LAST_INPUT_ADDED_IN_STEP, &self.step_counter());
        self.remove_input_request();
    }

    pub fn remove_input_request(&self) {
        self.inner.unifier.remove_variable(keys::CURRENT_INPUT_INFO);
    }

    /// False while a choice menu or a required input is waiting on the player.
    pub fn can_go_next(&self) -> bool {
        let choices_pending = self
            .choice_menu_options()
            .is_some_and(|options| !options.is_empty());
        !choices_pending && !self.is_required_input()
    }

    // --- progress ---

    fn label_progress(&self) -> BTreeMap<LabelId, LabelProgress> {
        self.var(keys::LABEL_PROGRESS).unwrap_or_default()
    }

    fn record_label_opened(&self, label_id: &str) {
        let mut progress = self.label_progress();
        progress.entry(label_id.to_string()).or_default().open_count += 1;
        self.set_var(keys::LABEL_PROGRESS, &progress);
    }

    fn record_label_step(&self, label_id: &str, index: usize) {
        let mut progress = self.label_progress();
        let entry = progress.entry(label_id.to_string()).or_default();
        if index > entry.biggest_step {
            entry.biggest_step = index;
        }
        self.set_var(keys::LABEL_PROGRESS, &progress);
    }

    /// True once the last step of the label has settled at least once.
    pub fn is_label_completed(&self, label_id: &str) -> bool {
        let Some(progress) = self.label_progress().get(label_id).copied() else {
            return false;
        };
        let Some(label) = self.get_label(label_id) else {
            return false;
        };
        progress.biggest_step + 1 >= label.steps_count()
    }

    pub fn times_label_opened(&self, label_id: &str) -> u32 {
        self.label_progress()
            .get(label_id)
            .map(|p| p.open_count)
            .unwrap_or(0)
    }

    fn step_times(&self) -> BTreeMap<String, StepTimes> {
        self.var(keys::STEP_TIMES_COUNTER).unwrap_or_default()
    }

    fn increase_step_times_counter(&self, label_id: &str, index: usize, sha: &str) {
        let mut counters = self.step_times();
        let entry = counters.entry(format!("{label_id}:{index}")).or_default();
        if entry.step_sha1 != sha {
            entry.step_sha1 = sha.to_string();
            entry.times = 0;
        }
        entry.times += 1;
        self.set_var(keys::STEP_TIMES_COUNTER, &counters);
    }

    /// How many times the current step has been started.
    pub fn current_step_times_counter(&self) -> u32 {
        let Some(frame) = self.current_frame() else {
            return 0;
        };
        let sha = self.step_sha_at(&frame.label, frame.current_step_index);
        self.step_times()
            .get(&format!("{}:{}", frame.label, frame.current_step_index))
            .filter(|t| t.step_sha1 == sha)
            .map(|t| t.times)
            .unwrap_or(0)
    }

    // --- randomness ---

    /// Uniform integer in `min..=max`. With `once_only`, numbers already
    /// returned at this step are excluded, and `None` comes back once the
    /// range is exhausted.
    pub fn get_random_number(&self, min: i64, max: i64, options: RandomOptions) -> Option<i64> {
        if min > max {
            warn!(min, max, "empty random range");
            return None;
        }
        if !options.once_only {
            return Some(self.inner.rng.borrow_mut().gen_range(min..=max));
        }

        let (label, index) = match self.current_frame() {
            Some(frame) => (frame.label, frame.current_step_index),
            None => (String::new(), 0),
        };
        let sha = self.step_sha_at(&label, index);
        let key = format!(
            "{label}|{index}|{sha}|{}|{min}..{max}",
            options.nested_id.as_deref().unwrap_or_default()
        );
        let mut memory: BTreeMap<String, Vec<i64>> = self.var(keys::RANDOM_MEMORY).unwrap_or_default();
        let used = memory.entry(key).or_default();
        let width = (max as i128 - min as i128 + 1) as u128;
        if used.len() as u128 >= width {
            debug!(min, max, "once-only random range exhausted");
            return None;
        }
        let taken: FxHashSet<i64> = used.iter().copied().collect();
        let pick = {
            let mut rng = self.inner.rng.borrow_mut();
            if width <= SMALL_RANGE || used.len() as u128 * 2 >= width {
                let available: Vec<i64> = (min..=max).filter(|n| !taken.contains(n)).collect();
                if available.is_empty() {
                    debug!(min, max, "once-only random range exhausted");
                    return None;
                }
                available[rng.gen_range(0..available.len())]
            } else {
                loop {
                    let n = rng.gen_range(min..=max);
                    if !taken.contains(&n) {
                        break n;
                    }
                }
            }
        };
        used.push(pick);
        self.set_var(keys::RANDOM_MEMORY, &memory);
        Some(pick)
    }

    /// Element number `n - 1` on the `n`-th run of the current step.
    pub fn choose_sequential<T: Clone>(&self, elements: &[T], end: SequentialEnd) -> Option<T> {
        if elements.is_empty() {
            return None;
        }
        let run = self.current_step_times_counter().saturating_sub(1) as usize;
        if let Some(element) = elements.get(run) {
            return Some(element.clone());
        }
        match end {
            SequentialEnd::Stop => None,
            SequentialEnd::Loop => elements.get(run % elements.len()).cloned(),
            SequentialEnd::KeepLast => elements.last().cloned(),
        }
    }

    pub fn choose_random<T: Clone>(&self, elements: &[T], once_only: bool) -> Option<T> {
        if elements.is_empty() {
            return None;
        }
        let options = RandomOptions {
            once_only,
            nested_id: Some("choose_random".to_string()),
        };
        let index = self.get_random_number(0, elements.len() as i64 - 1, options)?;
        elements.get(index as usize).cloned()
    }

    // --- control flow ---

    fn open_label(&self, label_id: &str) {
        self.inner.narration.borrow_mut().opened_labels.push(OpenedLabel {
            label: label_id.to_string(),
            current_step_index: 0,
        });
        self.record_label_opened(label_id);
        debug!(label = %label_id, "label opened");
    }

    /// Pop the top frame. Temporary variables of the closed depth expire.
    pub fn close_current_label(&self) {
        let remaining = {
            let mut narration = self.inner.narration.borrow_mut();
            match narration.opened_labels.pop() {
                Some(frame) => {
                    debug!(label = %frame.label, "label closed");
                    narration.opened_labels.len()
                }
                None => {
                    warn!("no label to close");
                    return;
                }
            }
        };
        self.inner.unifier.on_label_closing(remaining);
    }

    pub fn close_all_labels(&self) {
        while self.current_frame().is_some() {
            self.close_current_label();
        }
    }

    fn increase_current_step_index(&self) {
        if let Some(frame) = self.inner.narration.borrow_mut().opened_labels.last_mut() {
            frame.current_step_index += 1;
        }
    }

    /// Open `label` on top of the stack and run its first step.
    pub fn call_label(&self, label: impl Into<LabelId>, props: StepProps) -> LocalBoxFuture<'static, StepOutput> {
        self.open_and_run(label.into(), props, None, false)
    }

    /// Replace the top frame with `label` and run its first step.
    pub fn jump_label(&self, label: impl Into<LabelId>, props: StepProps) -> LocalBoxFuture<'static, StepOutput> {
        self.open_and_run(label.into(), props, None, true)
    }

    fn open_and_run(
        &self,
        label_id: LabelId,
        props: StepProps,
        choice_made: Option<usize>,
        jump: bool,
    ) -> LocalBoxFuture<'static, StepOutput> {
        let engine = self.clone();
        async move {
            if !engine.has_label(&label_id) {
                error!(label = %label_id, "cannot open label: not registered");
                return None;
            }
            if let Some(choice) = choice_made {
                engine.record_current_choice(choice);
            }
            if jump && engine.current_frame().is_some() {
                engine.close_current_label();
            }
            engine.open_label(&label_id);
            engine.run_current_step(props, choice_made).await
        }
        .boxed_local()
    }

    /// Advance to the next step.
    ///
    /// Returns `None` without doing anything while a choice or a required
    /// input is pending. Called while a step is still running, the request
    /// is queued and served once that step settles.
    pub fn go_next(&self, props: StepProps) -> LocalBoxFuture<'static, StepOutput> {
        self.go_next_with(props, GoNextOptions::default())
    }

    pub fn go_next_with(&self, props: StepProps, options: GoNextOptions) -> LocalBoxFuture<'static, StepOutput> {
        let engine = self.clone();
        async move {
            if !options.run_now && !engine.can_go_next() {
                warn!("cannot go next: a choice or a required input is pending");
                return None;
            }
            if !options.run_now && engine.steps_running() != 0 {
                engine.inner.narration.borrow_mut().go_next_requests += 1;
                debug!("step still running, go next queued");
                return None;
            }
            if let Some(frame) = engine.current_frame() {
                if let Some(label) = engine.get_label(&frame.label) {
                    let hooks = [
                        label.on_step_end().cloned(),
                        engine.inner.hooks.on_step_end.clone(),
                    ];
                    run_hooks(hooks, frame.current_step_index, label, "on_step_end").await;
                }
                engine.increase_current_step_index();
            }
            engine.run_current_step(props, options.choice_made).await
        }
        .boxed_local()
    }

    /// Take a menu option: records the choice, then calls, jumps or closes
    /// as the option says.
    pub fn select_choice(&self, item: ChoiceMenuOption, props: StepProps) -> LocalBoxFuture<'static, StepOutput> {
        self.select_choice_with(item, props, false)
    }

    fn select_choice_with(
        &self,
        item: ChoiceMenuOption,
        props: StepProps,
        run_now: bool,
    ) -> LocalBoxFuture<'static, StepOutput> {
        let engine = self.clone();
        async move {
            engine.clear_choice_menu();
            let ChoiceMenuOption {
                choice_index,
                option,
            } = item;
            let mut merged = option.props;
            merged.extend(props);
            match option.action {
                ChoiceAction::Call { label } => {
                    engine.open_and_run(label, merged, Some(choice_index), false).await
                }
                ChoiceAction::Jump { label } => {
                    engine.open_and_run(label, merged, Some(choice_index), true).await
                }
                ChoiceAction::Close {
                    close_current_label,
                } => {
                    engine.record_current_choice(choice_index);
                    if close_current_label {
                        engine.close_current_label();
                    }
                    let options = GoNextOptions {
                        choice_made: Some(choice_index),
                        run_now,
                    };
                    engine.go_next_with(merged, options).await
                }
            }
        }
        .boxed_local()
    }

    fn run_current_step(&self, props: StepProps, choice_made: Option<usize>) -> LocalBoxFuture<'static, StepOutput> {
        let engine = self.clone();
        async move {
            let Some(frame) = engine.current_frame() else {
                return engine.game_end(props).await;
            };
            let Some(label) = engine.get_label(&frame.label) else {
                error!(label = %frame.label, "current label is not registered");
                return None;
            };
            let index = frame.current_step_index;
            let Some(step) = label.step(index).cloned() else {
                let depth = engine.inner.narration.borrow().opened_labels.len();
                engine.close_current_label();
                if depth > 1 {
                    let options = GoNextOptions {
                        choice_made,
                        run_now: true,
                    };
                    return engine.go_next_with(props, options).await;
                }
                return engine.game_end(props).await;
            };

            let start_hooks = [
                label.on_step_start().cloned(),
                engine.inner.hooks.on_step_start.clone(),
            ];
            run_hooks(start_hooks, index, label.clone(), "on_step_start").await;
            if index == 0 {
                let loading_hooks = [
                    label.on_loading_label().cloned(),
                    engine.inner.hooks.on_loading_label.clone(),
                ];
                run_hooks(loading_hooks, index, label.clone(), "on_loading_label").await;
            }

            let step_sha = label.step_sha(index).unwrap_or(ERROR_SHA).to_string();
            engine.increase_step_times_counter(label.id(), index, &step_sha);
            engine.inner.narration.borrow_mut().steps_running += 1;

            let mut output = match step.call(engine.clone(), props.clone()).await {
                Ok(output) => output,
                Err(err) => {
                    {
                        let mut narration = engine.inner.narration.borrow_mut();
                        narration.steps_running = narration.steps_running.saturating_sub(1);
                    }
                    error!(label = %label.id(), step = index, error = %err, "step failed");
                    if let Some(handler) = engine.inner.hooks.on_step_error.clone() {
                        handler(&err, &props);
                    }
                    return None;
                }
            };

            if let Some(options) = engine.choice_menu_options() {
                if let [only] = options.as_slice() {
                    if only.option.auto_select {
                        let only = only.clone();
                        output = engine.select_choice_with(only, props.clone(), true).await;
                    }
                }
            }

            let settled = {
                let mut narration = engine.inner.narration.borrow_mut();
                narration.steps_running = narration.steps_running.saturating_sub(1);
                narration.steps_running == 0
            };
            if settled {
                engine.record_label_step(label.id(), index);
                engine.add_step_history(step_sha, choice_made);
                let queued = {
                    let mut narration = engine.inner.narration.borrow_mut();
                    if narration.go_next_requests > 0 {
                        narration.go_next_requests -= 1;
                        true
                    } else {
                        false
                    }
                };
                if queued {
                    return engine.go_next(props).await;
                }
            }
            output
        }
        .boxed_local()
    }

    /// Record the settled step and move the step counter on.
    fn add_step_history(&self, step_sha1: String, choice_index_made: Option<usize>) {
        let frame = self.current_frame();
        let info = HistoryInfo {
            step_sha1,
            current_label: frame.as_ref().map(|f| f.label.clone()),
            label_step_index: frame.as_ref().map(|f| f.current_step_index),
            index: self.step_counter(),
            choice_index_made,
        };
        self.add_history(info, AddOptions::default());
        self.inner.narration.borrow_mut().step_counter += 1;
    }

    fn game_end(&self, props: StepProps) -> LocalBoxFuture<'static, StepOutput> {
        let engine = self.clone();
        async move {
            let Some(handler) = engine.inner.hooks.on_game_end.clone() else {
                error!("the end of the game is not managed: set an on_game_end handler");
                return None;
            };
            match handler(engine.clone(), props.clone()).await {
                Ok(output) => output,
                Err(err) => {
                    error!(error = %err, "game end handler failed");
                    if let Some(on_error) = engine.inner.hooks.on_step_error.clone() {
                        on_error(&err, &props);
                    }
                    None
                }
            }
        }
        .boxed_local()
    }
}
