/// Choice Story demo — a short branching scene played from the terminal
/// script below, with a go back and a save/load in the middle.
///
/// Run with: cargo run --example choice_story
/// Set RUST_LOG=narration_engine=debug to watch the engine work.

use futures::executor::block_on;
use narration_engine::core::engine::Engine;
use narration_engine::core::unifier::MemoryUnifier;
use narration_engine::schema::choice::ChoiceOption;
use narration_engine::schema::dialogue::{Dialogue, InputRequest};
use narration_engine::schema::label::{LabelDefinition, Step, StepProps};
use narration_engine::schema::state::GameSaveData;
use narration_engine::RandomOptions;
use serde_json::{json, Value};
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

fn line(character: &'static str, text: &'static str) -> Step {
    Step::new(format!("{character}: {text}"), move |engine: Engine, _| async move {
        engine.set_dialogue(Dialogue::new(text).with_character(character));
        Ok(None)
    })
}

fn labels() -> Vec<LabelDefinition> {
    vec![
        LabelDefinition::new(
            "station",
            vec![
                line("narrator", "The last train pulls into an empty station."),
                Step::new("ask name", |engine: Engine, _| async move {
                    engine.set_dialogue(Dialogue::new("Ticket, please. Name?").with_character("guard"));
                    engine.request_input(InputRequest::required("string"));
                    Ok(None)
                }),
                Step::new("platform menu", |engine: Engine, _| async move {
                    let name = engine
                        .input_value()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_else(|| "stranger".to_string());
                    engine.set_dialogue(format!("Where to, {name}?"));
                    engine.set_choice_menu_options(vec![
                        ChoiceOption::call("Look around first", "platform").one_time(),
                        ChoiceOption::jump("Board the train", "train"),
                    ]);
                    Ok(None)
                }),
                Step::new("second menu", |engine: Engine, _| async move {
                    engine.set_dialogue("The train is still waiting.");
                    engine.set_choice_menu_options(vec![ChoiceOption::jump("Board the train", "train")]);
                    Ok(None)
                }),
            ],
        ),
        LabelDefinition::new(
            "platform",
            vec![
                Step::new("flickering lamp", |engine: Engine, _| async move {
                    let flickers = engine
                        .get_random_number(2, 5, RandomOptions::default())
                        .unwrap_or(3);
                    engine.set_dialogue(format!("A lamp flickers {flickers} times, then dies."));
                    Ok(None)
                }),
                line("guard", "Nothing to see here."),
            ],
        ),
        LabelDefinition::new(
            "train",
            vec![
                line("narrator", "The doors close behind you."),
                line("narrator", "The train leaves without a sound."),
            ],
        ),
    ]
}

fn plain(text: &Value) -> String {
    text.as_str().map(str::to_string).unwrap_or_else(|| text.to_string())
}

fn show(engine: &Engine) {
    if let Some(dialogue) = engine.dialogue() {
        let speaker = dialogue.character.as_deref().unwrap_or("narrator");
        println!("{:>10} | {}", speaker, dialogue.text.joined());
    }
    if let Some(options) = engine.choice_menu_options() {
        for option in options {
            println!("{:>10} | [{}] {}", "", option.choice_index, plain(&option.option.text));
        }
    }
}

fn choose(engine: &Engine, position: usize) {
    let options = engine.choice_menu_options().unwrap_or_default();
    let Some(option) = options.into_iter().nth(position) else {
        println!("(no option {position})");
        return;
    };
    println!("{:>10} > {}", "player", plain(&option.option.text));
    block_on(engine.select_choice(option, StepProps::new()));
    show(engine);
}

fn next(engine: &Engine) {
    block_on(engine.go_next(StepProps::new()));
    show(engine);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let unifier = Rc::new(MemoryUnifier::new());
    let engine = Engine::builder()
        .seed(2026)
        .with_unifier(unifier)
        .labels(labels())
        .on_game_end(|engine: Engine, _| async move {
            engine.set_dialogue("~ THE END ~");
            Ok(None)
        })
        .build()
        .expect("Failed to build engine");

    println!("========================================");
    println!("   THE LAST TRAIN");
    println!("========================================");

    block_on(engine.call_label("station", StepProps::new()));
    show(&engine);
    next(&engine);

    println!("{:>10} > {}", "player", "Mara");
    engine.set_input_value(json!("Mara"));
    next(&engine);

    choose(&engine, 0);
    next(&engine);

    println!();
    println!("--- going back one step ---");
    block_on(engine.go_back(false, 1)).expect("Failed to go back");
    show(&engine);
    next(&engine);
    next(&engine);

    println!();
    println!("--- saving and loading ---");
    let json = engine
        .export_game_state()
        .to_json()
        .expect("Failed to export save");
    engine.clear();
    let save = GameSaveData::from_json(&json).expect("Failed to parse save");
    block_on(engine.restore_game_state(save, false)).expect("Failed to load save");
    show(&engine);

    choose(&engine, 0);
    next(&engine);
    next(&engine);

    println!();
    println!("--- narrative history ---");
    for entry in engine.narrative_history() {
        if let Some(dialogue) = &entry.dialogue {
            println!("{:>4} {}", entry.step_index, dialogue.text.joined());
        }
        if let Some(value) = &entry.input_value {
            println!("{:>4}   answered {}", "", value);
        }
        for choice in entry.choices.iter().flatten().filter(|c| !c.hidden) {
            let marker = if choice.is_response { ">" } else { " " };
            println!("{:>4}   {} {}", "", marker, plain(&choice.text));
        }
    }

    println!("========================================");
    println!("   FIN");
    println!("========================================");
}
