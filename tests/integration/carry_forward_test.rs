//! Carry-forward: options computed from a prior answer's choices.

use uuid::Uuid;

use survey_runtime::engine::resolve_page;
use survey_runtime::models::{OptionsSource, QuestionType};

use crate::common::{self, choices};

#[test]
fn carried_options_keep_source_index_order() {
    let q1 = common::multi_choice_question("Q1", &["Apple", "Banana", "Cherry"]);
    let q1_id = q1.id;
    let mut q2 = common::question("Q2", QuestionType::MultipleChoice);
    q2.options_source = OptionsSource::CarryForward;
    q2.carry_forward_question_id = Some(q1_id);

    let definition = common::definition(vec![
        common::page(0, vec![q1]),
        common::page(1, vec![q2]),
    ]);

    // Answer order is Cherry, Apple; carried options follow Q1's own order
    let ctx = common::context(&definition, vec![("Q1", choices(&["Cherry", "Apple"]))]);
    let resolved = resolve_page(&definition, &definition.pages[1], Uuid::new_v4(), &ctx);
    let values: Vec<&str> = resolved
        .questions()
        .next()
        .unwrap()
        .options
        .iter()
        .map(|o| o.value.as_str())
        .collect();
    assert_eq!(values, vec!["Apple", "Cherry"]);
}

#[test]
fn own_options_win_on_duplicate_values() {
    let q1 = common::multi_choice_question("Q1", &["Apple", "Banana"]);
    let q1_id = q1.id;
    let mut q2 = common::question("Q2", QuestionType::MultipleChoice);
    q2.options_source = OptionsSource::CarryForward;
    q2.carry_forward_question_id = Some(q1_id);
    q2.options = vec![common::option("Apple", 0), common::option("Other", 1)];

    let definition = common::definition(vec![
        common::page(0, vec![q1]),
        common::page(1, vec![q2]),
    ]);

    let ctx = common::context(&definition, vec![("Q1", choices(&["Apple", "Banana"]))]);
    let resolved = resolve_page(&definition, &definition.pages[1], Uuid::new_v4(), &ctx);
    let values: Vec<&str> = resolved
        .questions()
        .next()
        .unwrap()
        .options
        .iter()
        .map(|o| o.value.as_str())
        .collect();
    // Own options first, the duplicate Apple deduplicated by value
    assert_eq!(values, vec!["Apple", "Other", "Banana"]);
}

#[test]
fn unanswered_source_yields_no_carried_options() {
    let q1 = common::multi_choice_question("Q1", &["Apple", "Banana"]);
    let q1_id = q1.id;
    let mut q2 = common::question("Q2", QuestionType::MultipleChoice);
    q2.options_source = OptionsSource::CarryForward;
    q2.carry_forward_question_id = Some(q1_id);

    let definition = common::definition(vec![
        common::page(0, vec![q1]),
        common::page(1, vec![q2]),
    ]);

    let ctx = common::context(&definition, vec![]);
    let resolved = resolve_page(&definition, &definition.pages[1], Uuid::new_v4(), &ctx);
    assert!(resolved.questions().next().unwrap().options.is_empty());
}

#[test]
fn filter_expression_narrows_carried_options() {
    let filter = common::expression("notEquals(optionValue, 'Banana')");
    let q1 = common::multi_choice_question("Q1", &["Apple", "Banana", "Cherry"]);
    let q1_id = q1.id;
    let mut q2 = common::question("Q2", QuestionType::MultipleChoice);
    q2.options_source = OptionsSource::CarryForward;
    q2.carry_forward_question_id = Some(q1_id);
    q2.carry_forward_filter_expression_id = Some(filter.id);

    let mut definition = common::definition(vec![
        common::page(0, vec![q1]),
        common::page(1, vec![q2]),
    ]);
    definition.expressions.push(filter);

    let ctx = common::context(
        &definition,
        vec![("Q1", choices(&["Apple", "Banana", "Cherry"]))],
    );
    let resolved = resolve_page(&definition, &definition.pages[1], Uuid::new_v4(), &ctx);
    let values: Vec<&str> = resolved
        .questions()
        .next()
        .unwrap()
        .options
        .iter()
        .map(|o| o.value.as_str())
        .collect();
    assert_eq!(values, vec!["Apple", "Cherry"]);
}
