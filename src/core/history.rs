/// History: one entry per settled step, each carrying the structural diff
/// that produced it, so the composite state can be rewound.
///
/// `original_step_data` always holds the composite state as of the newest
/// entry; going back reverts diffs from there.
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::core::diff::{self, DiffError};
use crate::core::engine::Engine;
use crate::core::storage::keys;
use crate::core::unifier::UnifierError;
use crate::schema::choice::ChoiceOption;
use crate::schema::history::{HistoryInfo, HistoryStep, NarrativeChoice, NarrativeHistory};
use crate::schema::state::{GameStepState, HistoryGameState};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("go back needs at least one step")]
    NoSteps,
    #[error("cannot go back {requested} step(s) with {available} history entries")]
    NotEnoughHistory { requested: usize, available: usize },
    #[error("a go back is already running")]
    AlreadyRunning,
    #[error("history step {index} is blocked and cannot be reverted")]
    Blocked { index: u64 },
    #[error("no state recorded to go back from")]
    NoOriginalState,
    #[error("diff of history step {index} does not apply: {source}")]
    Diff {
        index: u64,
        #[source]
        source: DiffError,
    },
    #[error("reconstructed state is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("environment restore failed: {0}")]
    Unifier(#[from] UnifierError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Record the entry even if nothing changed since the last one.
    pub ignore_same_step: bool,
}

#[derive(Debug, Default)]
pub(crate) struct HistoryLog {
    pub steps: Vec<HistoryStep>,
    pub original_step_data: Option<GameStepState>,
}

fn state_value(state: &GameStepState) -> Value {
    serde_json::to_value(state).unwrap_or_default()
}

fn narrative_choices(options: &[ChoiceOption], already_made: &[usize]) -> Vec<NarrativeChoice> {
    let made_before = |i: usize, option: &ChoiceOption| option.one_time && already_made.contains(&i);
    let mut choices: Vec<NarrativeChoice> = options
        .iter()
        .enumerate()
        .map(|(i, option)| NarrativeChoice {
            text: option.text.clone(),
            action_type: option.action.type_name().to_string(),
            is_response: false,
            hidden: made_before(i, option) || option.only_have_no_choice,
        })
        .collect();
    if choices.iter().all(|c| c.hidden) {
        let fallback = options
            .iter()
            .enumerate()
            .position(|(i, option)| option.only_have_no_choice && !made_before(i, option));
        if let Some(i) = fallback {
            choices[i].hidden = false;
        }
    }
    choices
}

impl Engine {
    /// Append a history entry for the step described by `info`.
    ///
    /// Nothing is recorded when the composite state equals the one of the
    /// previous entry, unless `ignore_same_step` is set. Mailbox contents are
    /// copied only if they were written during step `info.index`.
    pub fn add_history(&self, info: HistoryInfo, options: AddOptions) {
        let current = self.current_game_step_state();
        let original = self.inner.history.borrow().original_step_data.clone();
        let blocked = self.inner.block_go_back_pending.replace(false);
        if blocked {
            debug!(index = info.index, "go back blocked at this step");
        }
        if !options.ignore_same_step && original.as_ref() == Some(&current) {
            debug!(index = info.index, "state unchanged, history entry skipped");
            if blocked {
                if let Some(last) = self.inner.history.borrow_mut().steps.last_mut() {
                    last.diff = None;
                }
            }
            return;
        }

        let written_now = |key: &str| {
            self.inner
                .unifier
                .get_variable(key)
                .and_then(|v| v.as_u64())
                == Some(info.index)
        };
        let dialogue = if written_now(keys::LAST_DIALOGUE_ADDED_IN_STEP) {
            self.dialogue()
        } else {
            None
        };
        let choices = if written_now(keys::LAST_MENU_OPTIONS_ADDED_IN_STEP) {
            self.stored_choice_menu()
        } else {
            None
        };
        let input_value = if written_now(keys::LAST_INPUT_ADDED_IN_STEP) {
            self.input_value()
        } else {
            None
        };
        let is_glued = written_now(keys::LAST_STEP_GLUED);

        let diff = match &original {
            Some(original) if !blocked => {
                Some(diff::diff(&state_value(original), &state_value(&current)))
            }
            _ => None,
        };

        let entry = HistoryStep {
            step_sha1: info.step_sha1,
            current_label: info.current_label,
            label_step_index: info.label_step_index,
            index: info.index,
            dialogue,
            choices,
            input_value,
            choice_index_made: info.choice_index_made,
            already_made_choices: self.already_current_step_made_choices(),
            is_glued,
            diff,
        };

        let mut log = self.inner.history.borrow_mut();
        log.steps.push(entry);
        log.original_step_data = Some(current);
        if let Some(retention) = self.inner.config.history_retention {
            let len = log.steps.len();
            if len > retention.max_entries {
                log.steps.drain(..len - retention.max_entries);
            }
            let stale = log.steps.len().saturating_sub(retention.diff_window);
            for step in log.steps.iter_mut().take(stale) {
                step.diff = None;
            }
        }
    }

    /// Rewind the composite state by `steps` entries.
    ///
    /// Either every requested entry is reverted or nothing changes: the
    /// whole range is checked before any state is touched.
    pub async fn go_back(&self, navigate: bool, steps: usize) -> Result<(), HistoryError> {
        if steps == 0 {
            warn!("go back called with zero steps");
            return Err(HistoryError::NoSteps);
        }
        if self.inner.go_back_running.get() {
            warn!("go back already running");
            return Err(HistoryError::AlreadyRunning);
        }

        let (restored, step_counter) = {
            let log = self.inner.history.borrow();
            let available = log.steps.len();
            if available < 2 || steps >= available {
                warn!(steps, available, "not enough history to go back");
                return Err(HistoryError::NotEnoughHistory {
                    requested: steps,
                    available,
                });
            }
            let Some(original) = &log.original_step_data else {
                error!("history has entries but no recorded state");
                return Err(HistoryError::NoOriginalState);
            };
            let mut state = state_value(original);
            for entry in log.steps.iter().rev().take(steps) {
                let Some(ops) = &entry.diff else {
                    warn!(index = entry.index, "cannot go back past a blocked step");
                    return Err(HistoryError::Blocked { index: entry.index });
                };
                if let Err(source) = diff::revert(&mut state, ops) {
                    error!(index = entry.index, error = %source, "history diff does not revert");
                    return Err(HistoryError::Diff {
                        index: entry.index,
                        source,
                    });
                }
            }
            let restored: GameStepState = serde_json::from_value(state)?;
            (restored, log.steps[available - steps].index)
        };

        self.inner.go_back_running.set(true);
        let result = self
            .inner
            .unifier
            .restore_environment(&restored.environment(), navigate)
            .await;
        if let Err(e) = result {
            self.inner.go_back_running.set(false);
            error!(error = %e, "environment restore failed, history left unchanged");
            return Err(e.into());
        }

        {
            let mut narration = self.inner.narration.borrow_mut();
            narration.opened_labels = restored.opened_labels.clone();
            narration.step_counter = step_counter;
            narration.go_next_requests = 0;
        }
        {
            let mut log = self.inner.history.borrow_mut();
            let keep = log.steps.len() - steps;
            log.steps.truncate(keep);
            log.original_step_data = Some(restored);
        }
        self.inner.go_back_running.set(false);
        debug!(steps, step_counter, "went back");
        Ok(())
    }

    /// Make the newest entry impossible to go back past. While a step is
    /// running the block applies to the entry that step will record.
    pub fn block_go_back(&self) {
        if self.steps_running() != 0 {
            self.inner.block_go_back_pending.set(true);
            return;
        }
        if let Some(last) = self.inner.history.borrow_mut().steps.last_mut() {
            last.diff = None;
        }
    }

    pub fn can_go_back(&self) -> bool {
        let log = self.inner.history.borrow();
        log.steps.len() >= 2 && log.steps.last().is_some_and(|s| s.diff.is_some())
    }

    /// The player-facing history: dialogue lines and menus in order, with
    /// each menu marked by the option that was taken and each input value
    /// attached to the line that asked for it.
    pub fn narrative_history(&self) -> Vec<NarrativeHistory> {
        let log = self.inner.history.borrow();
        let mut list = Vec::new();
        let mut pending_choice: Option<usize> = None;
        let mut pending_input: Option<Value> = None;

        for step in log.steps.iter().rev() {
            let mut choices = step
                .choices
                .as_deref()
                .map(|options| narrative_choices(options, &step.already_made_choices));
            let mut player_made_choice = false;
            if let (Some(choices), Some(made)) = (choices.as_mut(), pending_choice) {
                if let Some(choice) = choices.get_mut(made) {
                    choice.is_response = true;
                    choice.hidden = false;
                }
                player_made_choice = true;
                pending_choice = None;
            }

            if step.dialogue.is_some() || choices.is_some() {
                list.push(NarrativeHistory {
                    dialogue: step.dialogue.clone(),
                    choices,
                    player_made_choice,
                    input_value: pending_input.take(),
                    step_index: step.index,
                    is_glued: step.is_glued,
                });
            }

            if step.choice_index_made.is_some() {
                pending_choice = step.choice_index_made;
            }
            if step.input_value.is_some() {
                pending_input = step.input_value.clone();
            }
        }

        list.reverse();
        list
    }

    pub fn steps_history(&self) -> Vec<HistoryStep> {
        self.inner.history.borrow().steps.clone()
    }

    pub fn last_history_step(&self) -> Option<HistoryStep> {
        self.inner.history.borrow().steps.last().cloned()
    }

    pub fn clear_history(&self) {
        *self.inner.history.borrow_mut() = HistoryLog::default();
    }

    /// Snapshot for saving. Only the newest `step_limit_saved` entries keep
    /// their diffs.
    pub fn export_history(&self) -> HistoryGameState {
        let log = self.inner.history.borrow();
        let keep_from = log.steps.len().saturating_sub(self.inner.config.step_limit_saved);
        let steps_history = log
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let mut step = step.clone();
                if i < keep_from {
                    step.diff = None;
                }
                step
            })
            .collect();
        HistoryGameState {
            steps_history,
            original_step_data: log.original_step_data.clone(),
        }
    }

    pub fn restore_history(&self, state: HistoryGameState) {
        *self.inner.history.borrow_mut() = HistoryLog {
            steps: state.steps_history,
            original_step_data: state.original_step_data,
        };
    }

    /// Restore from raw JSON, skipping whatever does not parse instead of
    /// failing the whole load.
    pub fn restore_history_value(&self, data: &Value) {
        let Some(object) = data.as_object() else {
            warn!("history data is not an object, starting with an empty history");
            self.clear_history();
            return;
        };

        let steps: Vec<HistoryStep> = match object.get("stepsHistory") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(position, item)| {
                    serde_json::from_value(item.clone())
                        .map_err(|e| warn!(position, error = %e, "skipping malformed history step"))
                        .ok()
                })
                .collect(),
            _ => {
                warn!("history data has no stepsHistory");
                Vec::new()
            }
        };

        let original_step_data = match object.get("originalStepData") {
            None | Some(Value::Null) => {
                if !steps.is_empty() {
                    warn!("history data has steps but no originalStepData");
                }
                None
            }
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| warn!(error = %e, "malformed originalStepData ignored"))
                .ok(),
        };

        self.restore_history(HistoryGameState {
            steps_history: steps,
            original_step_data,
        });
    }
}
