/// History integration tests — rewinding, blocking and the narrative view.
mod common;

use common::{choice_story, linear_story, props, say, text};
use futures::executor::block_on;
use narration_engine::core::engine::Engine;
use narration_engine::core::history::HistoryError;
use narration_engine::core::unifier::{Character, GameUnifier, MemoryUnifier, UnifierError};
use narration_engine::schema::dialogue::InputRequest;
use narration_engine::schema::label::{LabelDefinition, Step};
use narration_engine::schema::state::Environment;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

const LINES: [&str; 5] = ["one", "two", "three", "four", "five"];

fn play_linear(engine: &Engine) {
    block_on(engine.call_label("start", props()));
    for _ in 1..LINES.len() {
        block_on(engine.go_next(props()));
    }
}

#[test]
fn going_back_all_the_way_restores_the_first_step() {
    let engine = Engine::builder().label(linear_story(&LINES)).build().unwrap();
    play_linear(&engine);
    let first_state = {
        let fresh = Engine::builder().label(linear_story(&LINES)).build().unwrap();
        block_on(fresh.call_label("start", props()));
        fresh.current_game_step_state()
    };

    block_on(engine.go_back(false, LINES.len() - 1)).unwrap();
    assert_eq!(text(&engine).as_deref(), Some("one"));
    assert_eq!(engine.current_label_step_index(), Some(0));
    assert_eq!(engine.step_counter(), 1);
    assert_eq!(engine.steps_history().len(), 1);
    assert_eq!(engine.current_game_step_state(), first_state);
    assert!(!engine.can_go_back());
}

#[test]
fn going_back_one_at_a_time_matches_a_single_jump() {
    let stepwise = Engine::builder().label(linear_story(&LINES)).build().unwrap();
    let at_once = Engine::builder().label(linear_story(&LINES)).build().unwrap();
    play_linear(&stepwise);
    play_linear(&at_once);

    for _ in 0..3 {
        block_on(stepwise.go_back(false, 1)).unwrap();
    }
    block_on(at_once.go_back(false, 3)).unwrap();

    assert_eq!(stepwise.current_game_step_state(), at_once.current_game_step_state());
    assert_eq!(stepwise.step_counter(), at_once.step_counter());
    assert_eq!(stepwise.steps_history(), at_once.steps_history());
}

#[test]
fn replaying_after_go_back_records_the_same_entries() {
    let engine = Engine::builder().label(linear_story(&LINES)).build().unwrap();
    play_linear(&engine);
    let recorded = engine.steps_history();

    block_on(engine.go_back(false, 2)).unwrap();
    block_on(engine.go_next(props()));
    block_on(engine.go_next(props()));
    assert_eq!(engine.steps_history(), recorded);
}

#[test]
fn blocked_step_refuses_go_back_past_it() {
    let engine = Engine::builder().label(linear_story(&LINES)).build().unwrap();
    block_on(engine.call_label("start", props()));
    block_on(engine.go_next(props()));
    block_on(engine.go_next(props()));
    engine.block_go_back();
    block_on(engine.go_next(props()));

    assert!(engine.can_go_back());
    block_on(engine.go_back(false, 1)).unwrap();
    assert_eq!(text(&engine).as_deref(), Some("three"));
    let result = block_on(engine.go_back(false, 1));
    assert!(matches!(result, Err(HistoryError::Blocked { index: 2 })));
    assert_eq!(text(&engine).as_deref(), Some("three"));
}

#[test]
fn go_back_with_navigate_asks_the_unifier_to_navigate() {
    let unifier = Rc::new(MemoryUnifier::new());
    unifier.navigate("/game");
    let engine = Engine::builder()
        .with_unifier(unifier.clone())
        .label(linear_story(&LINES))
        .build()
        .unwrap();
    block_on(engine.call_label("start", props()));
    block_on(engine.go_next(props()));

    block_on(engine.go_back(true, 1)).unwrap();
    assert_eq!(unifier.navigations().last().map(String::as_str), Some("/game"));
}

#[test]
fn storage_changes_are_rewound() {
    let unifier = Rc::new(MemoryUnifier::new());
    let engine = Engine::builder()
        .with_unifier(unifier.clone())
        .label(LabelDefinition::new(
            "start",
            vec![
                say("before"),
                Step::new("earn gold", |engine: Engine, _| async move {
                    engine.unifier().set_variable("gold", json!(10));
                    engine.set_dialogue("rich now");
                    Ok(None)
                }),
            ],
        ))
        .build()
        .unwrap();
    block_on(engine.call_label("start", props()));
    block_on(engine.go_next(props()));
    assert_eq!(unifier.get_variable("gold"), Some(json!(10)));

    block_on(engine.go_back(false, 1)).unwrap();
    assert!(unifier.get_variable("gold").is_none());
}

#[test]
fn narrative_view_marks_the_choice_taken() {
    let engine = Engine::builder().labels(choice_story()).build().unwrap();
    block_on(engine.call_label("choice", props()));
    let option = engine.choice_menu_options().unwrap().remove(0);
    block_on(engine.select_choice(option, props()));
    block_on(engine.go_next(props()));

    let view = engine.narrative_history();
    assert_eq!(view.len(), 3);

    let menu = &view[0];
    assert_eq!(menu.dialogue.as_ref().map(|d| d.text.joined()).as_deref(), Some("Choose"));
    assert!(menu.player_made_choice);
    let choices = menu.choices.as_ref().unwrap();
    assert_eq!(choices.len(), 3);
    assert!(choices[0].is_response);
    assert_eq!(choices[0].action_type, "call");
    assert!(!choices[1].is_response);

    assert_eq!(
        view[1].dialogue.as_ref().map(|d| d.text.joined()).as_deref(),
        Some("This is a A label")
    );
    assert!(view[1].choices.is_none());
    assert_eq!(view[2].step_index, 2);
}

#[test]
fn narrative_view_attaches_input_to_the_question() {
    let engine = Engine::builder()
        .label(LabelDefinition::new(
            "start",
            vec![
                Step::new("ask name", |engine: Engine, _| async move {
                    engine.set_dialogue("What is your name?");
                    engine.request_input(InputRequest::required("string"));
                    Ok(None)
                }),
                say("Nice to meet you"),
            ],
        ))
        .build()
        .unwrap();
    block_on(engine.call_label("start", props()));
    engine.set_input_value(json!("Ada"));
    block_on(engine.go_next(props()));

    let view = engine.narrative_history();
    assert_eq!(view.len(), 2);
    assert_eq!(view[0].input_value, Some(json!("Ada")));
    assert!(view[1].input_value.is_none());
}

#[test]
fn narrative_view_flags_glued_lines() {
    let engine = Engine::builder()
        .label(LabelDefinition::new(
            "start",
            vec![
                say("Hello"),
                Step::new("glue", |engine: Engine, _| async move {
                    engine.set_dialog_glue(true);
                    engine.set_dialogue("again");
                    Ok(None)
                }),
            ],
        ))
        .build()
        .unwrap();
    block_on(engine.call_label("start", props()));
    block_on(engine.go_next(props()));

    let view = engine.narrative_history();
    assert!(!view[0].is_glued);
    assert!(view[1].is_glued);
    assert_eq!(
        view[1].dialogue.as_ref().map(|d| d.text.clone().into_lines()),
        Some(vec!["Hello".to_string(), "again".to_string()])
    );
}

/// Resolves on its second poll, after waking itself.
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            return Poll::Ready(());
        }
        self.0 = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

enum RestoreMode {
    Fail,
    YieldFirst,
}

/// In-memory unifier whose environment restore either fails or suspends once.
struct SlowUnifier {
    memory: MemoryUnifier,
    mode: RestoreMode,
}

impl SlowUnifier {
    fn new(mode: RestoreMode) -> Rc<Self> {
        Rc::new(Self {
            memory: MemoryUnifier::new(),
            mode,
        })
    }
}

#[async_trait::async_trait(?Send)]
impl GameUnifier for SlowUnifier {
    fn environment(&self) -> Environment {
        self.memory.environment()
    }

    async fn restore_environment(
        &self,
        environment: &Environment,
        navigate: bool,
    ) -> Result<(), UnifierError> {
        match self.mode {
            RestoreMode::Fail => Err(UnifierError::Restore("canvas unavailable".into())),
            RestoreMode::YieldFirst => {
                YieldOnce(false).await;
                self.memory.restore_environment(environment, navigate).await
            }
        }
    }

    fn get_variable(&self, key: &str) -> Option<Value> {
        self.memory.get_variable(key)
    }

    fn set_variable(&self, key: &str, value: Value) {
        self.memory.set_variable(key, value)
    }

    fn remove_variable(&self, key: &str) {
        self.memory.remove_variable(key)
    }

    fn get_flag(&self, name: &str) -> bool {
        self.memory.get_flag(name)
    }

    fn set_flag(&self, name: &str, value: bool) {
        self.memory.set_flag(name, value)
    }

    fn character(&self, id: &str) -> Option<Character> {
        self.memory.character(id)
    }

    fn on_label_closing(&self, opened_labels: usize) {
        self.memory.on_label_closing(opened_labels)
    }

    fn navigate(&self, path: &str) {
        self.memory.navigate(path)
    }

    fn clear(&self) {
        self.memory.clear()
    }
}

#[test]
fn failed_environment_restore_leaves_everything_in_place() {
    let engine = Engine::builder()
        .with_unifier(SlowUnifier::new(RestoreMode::Fail))
        .label(linear_story(&LINES))
        .build()
        .unwrap();
    block_on(engine.call_label("start", props()));
    block_on(engine.go_next(props()));
    block_on(engine.go_next(props()));
    let before = engine.current_game_step_state();
    let history_before = engine.steps_history();

    let result = block_on(engine.go_back(false, 1));
    assert!(matches!(result, Err(HistoryError::Unifier(UnifierError::Restore(_)))));
    assert_eq!(text(&engine).as_deref(), Some("three"));
    assert_eq!(engine.current_label_step_index(), Some(2));
    assert_eq!(engine.step_counter(), 3);
    assert_eq!(engine.steps_history(), history_before);
    assert_eq!(engine.current_game_step_state(), before);

    block_on(engine.go_next(props()));
    assert_eq!(text(&engine).as_deref(), Some("four"));
    assert_eq!(engine.steps_history().len(), 4);
    assert!(engine.can_go_back());
}

#[test]
fn second_go_back_while_one_is_running_is_refused() {
    let engine = Engine::builder()
        .with_unifier(SlowUnifier::new(RestoreMode::YieldFirst))
        .label(linear_story(&LINES))
        .build()
        .unwrap();
    play_linear(&engine);

    let (first, second) = block_on(futures::future::join(
        engine.go_back(false, 1),
        engine.go_back(false, 1),
    ));
    assert!(first.is_ok());
    assert!(matches!(second, Err(HistoryError::AlreadyRunning)));
    assert_eq!(text(&engine).as_deref(), Some("four"));
    assert_eq!(engine.steps_history().len(), LINES.len() - 1);

    block_on(engine.go_back(false, 1)).unwrap();
    assert_eq!(text(&engine).as_deref(), Some("three"));
}
