//! Piping: template substitution from prior answers.

use survey_runtime::engine::interpolate;

use crate::common::{self, choices, text};
use survey_runtime::models::QuestionType;

#[test]
fn titles_pipe_prior_answers() {
    let q1 = common::question("Name", QuestionType::Text);
    let definition = common::definition(vec![common::page(0, vec![q1])]);
    let ctx = common::context(&definition, vec![("Name", text("Alice"))]);

    assert_eq!(
        interpolate("Welcome back, ${pipe:question:Name:response}!", &ctx),
        "Welcome back, Alice!"
    );
}

#[test]
fn choice_field_joins_selections() {
    let q1 = common::multi_choice_question("Fruits", &["Apple", "Banana", "Cherry"]);
    let definition = common::definition(vec![common::page(0, vec![q1])]);
    let ctx = common::context(&definition, vec![("Fruits", choices(&["Apple", "Cherry"]))]);

    assert_eq!(
        interpolate("You picked: ${pipe:question:Fruits:choices}", &ctx),
        "You picked: Apple, Cherry"
    );
}

#[test]
fn interpolation_is_a_pure_substitution() {
    let q1 = common::question("Name", QuestionType::Text);
    let definition = common::definition(vec![common::page(0, vec![q1])]);
    let ctx = common::context(&definition, vec![("Name", text("Alice"))]);

    // Unresolved tokens stay literal, so applying twice changes nothing
    let template = "Hi ${pipe:question:Name:response}, ${pipe:question:Later:response}";
    let once = interpolate(template, &ctx);
    assert_eq!(interpolate(&once, &ctx), once);
    assert!(once.contains("${pipe:question:Later:response}"));
}
