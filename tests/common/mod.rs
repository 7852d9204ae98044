#![allow(dead_code)]
// Shared story fixtures for the integration suites.

use narration_engine::core::engine::Engine;
use narration_engine::schema::choice::ChoiceOption;
use narration_engine::schema::label::{LabelDefinition, Step, StepProps};

pub fn say(text: &'static str) -> Step {
    Step::new(format!("say {text}"), move |engine: Engine, _| async move {
        engine.set_dialogue(text);
        Ok(None)
    })
}

pub fn text(engine: &Engine) -> Option<String> {
    engine.dialogue().map(|d| d.text.joined())
}

pub fn props() -> StepProps {
    StepProps::new()
}

/// "choice" poses a three-way menu: call A, jump to B, or close and move on.
pub fn choice_story() -> Vec<LabelDefinition> {
    vec![
        LabelDefinition::new(
            "choice",
            vec![
                Step::new("choose a label", |engine: Engine, _| async move {
                    engine.set_dialogue("Choose");
                    engine.set_choice_menu_options(vec![
                        ChoiceOption::call("A", "A"),
                        ChoiceOption::jump("B", "B"),
                        ChoiceOption::close("Stay"),
                    ]);
                    Ok(None)
                }),
                say("end"),
            ],
        ),
        LabelDefinition::new(
            "A",
            vec![
                say("This is a A label"),
                say("This is a A label 2"),
                say("This is a A label 3"),
            ],
        ),
        LabelDefinition::new(
            "B",
            vec![
                say("This is a B label"),
                say("This is a B label 2"),
                say("This is a B label 3"),
            ],
        ),
    ]
}

pub fn linear_story(lines: &[&'static str]) -> LabelDefinition {
    LabelDefinition::new("start", lines.iter().copied().map(say).collect())
}
