//! Terminate-by-answer and termination dominance.

use uuid::Uuid;

use survey_runtime::engine::{route_next, NextStep};
use survey_runtime::models::Jump;

use crate::common::{self, choices};

#[test]
fn answer_triggers_termination_with_reason() {
    let mut expr = common::expression("equals(answer('Q1'), 'No')");
    expr.description = Some("screened out".into());

    let mut q1 = common::single_choice_question("Q1", &["Yes", "No"]);
    q1.terminate_if_expression_id = Some(expr.id);
    let q1_id = q1.id;

    let mut definition = common::definition(vec![
        common::page(0, vec![q1]),
        common::page(1, vec![common::required_text_question("Q2")]),
    ]);
    definition.expressions.push(expr);

    let ctx = common::context(&definition, vec![("Q1", choices(&["No"]))]);
    let outcome = route_next(
        &definition,
        &definition.pages[0],
        &[q1_id],
        None,
        Uuid::new_v4(),
        &ctx,
    );
    assert_eq!(
        outcome.step,
        NextStep::Terminated {
            reason: "screened out".into()
        }
    );

    // The affirmative answer routes normally
    let ctx = common::context(&definition, vec![("Q1", choices(&["Yes"]))]);
    let outcome = route_next(
        &definition,
        &definition.pages[0],
        &[q1_id],
        None,
        Uuid::new_v4(),
        &ctx,
    );
    assert!(matches!(outcome.step, NextStep::Next { .. }));
}

#[test]
fn termination_dominates_jumps_and_sequential_advance() {
    let expr = common::expression("anySelected('Q1', ['disqualify'])");
    let mut q1 = common::multi_choice_question("Q1", &["ok", "disqualify"]);
    q1.terminate_if_expression_id = Some(expr.id);
    let q1_id = q1.id;

    let mut definition = common::definition(vec![
        common::page(0, vec![q1]),
        common::page(1, vec![common::question("Q2", survey_runtime::models::QuestionType::Text)]),
    ]);
    let p2_id = definition.pages[1].id;
    definition.expressions.push(expr);
    // A jump that would otherwise always fire
    definition.jumps.push(Jump {
        id: Uuid::new_v4(),
        from_page_id: None,
        from_question_id: Some(q1_id),
        to_page_id: Some(p2_id),
        to_question_id: None,
        priority: 0,
        condition_expression_id: None,
    });

    let ctx = common::context(&definition, vec![("Q1", choices(&["ok", "disqualify"]))]);
    let outcome = route_next(
        &definition,
        &definition.pages[0],
        &[q1_id],
        None,
        Uuid::new_v4(),
        &ctx,
    );
    assert!(matches!(outcome.step, NextStep::Terminated { .. }));
}
