//! Happy-path flow: three sequential pages, a required question, and the
//! resolve -> validate -> route pipeline a submit performs.

use uuid::Uuid;

use survey_runtime::engine::{resolve_page, route_next, validate_page, NextStep};
use survey_runtime::models::QuestionType;

use crate::common::{self, text};

#[test]
fn three_page_survey_advances_and_completes() {
    let q1 = common::required_text_question("Q1");
    let q2 = common::question("Q2", QuestionType::Text);
    let q3 = common::question("Q3", QuestionType::Text);
    let q1_id = q1.id;

    let definition = common::definition(vec![
        common::page(0, vec![q1]),
        common::page(1, vec![q2]),
        common::page(2, vec![q3]),
    ]);
    let p2_id = definition.pages[1].id;
    let p3_id = definition.pages[2].id;
    let session = Uuid::new_v4();

    // Empty submit on P1: the required question violates
    let ctx = common::context(&definition, vec![]);
    let resolved = resolve_page(&definition, &definition.pages[0], session, &ctx);
    let visible: Vec<_> = resolved
        .questions()
        .filter_map(|rq| definition.question(rq.question_id))
        .collect();
    let violations = validate_page(&visible, &ctx.answers);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].code, "REQUIRED");
    assert_eq!(violations[0].question_id, q1_id);

    // Re-submit with Q1 answered: valid, routes to P2
    let ctx = common::context(&definition, vec![("Q1", text("x"))]);
    let violations = validate_page(&visible, &ctx.answers);
    assert!(violations.is_empty());

    let outcome = route_next(
        &definition,
        &definition.pages[0],
        &[q1_id],
        None,
        session,
        &ctx,
    );
    assert_eq!(
        outcome.step,
        NextStep::Next {
            page_id: p2_id,
            question_id: None
        }
    );

    // P2 -> P3
    let outcome = route_next(&definition, &definition.pages[1], &[], None, session, &ctx);
    assert_eq!(
        outcome.step,
        NextStep::Next {
            page_id: p3_id,
            question_id: None
        }
    );

    // P3 -> complete
    let outcome = route_next(&definition, &definition.pages[2], &[], None, session, &ctx);
    assert_eq!(outcome.step, NextStep::Complete);
}

#[test]
fn optional_questions_allow_empty_submits() {
    let q1 = common::question("Q1", QuestionType::Text);
    let definition = common::definition(vec![common::page(0, vec![q1])]);
    let ctx = common::context(&definition, vec![]);

    let resolved = resolve_page(&definition, &definition.pages[0], Uuid::new_v4(), &ctx);
    let visible: Vec<_> = resolved
        .questions()
        .filter_map(|rq| definition.question(rq.question_id))
        .collect();
    assert!(validate_page(&visible, &ctx.answers).is_empty());
}

#[test]
fn hidden_questions_are_not_validated() {
    // Q2 is required but only visible when Q1 == 'show'
    let expr = common::expression("equals(answer('Q1'), 'show')");
    let q1 = common::question("Q1", QuestionType::Text);
    let mut q2 = common::required_text_question("Q2");
    q2.visible_if_expression_id = Some(expr.id);

    let mut definition = common::definition(vec![common::page(0, vec![q1, q2])]);
    definition.expressions.push(expr);

    let ctx = common::context(&definition, vec![("Q1", text("hide"))]);
    let resolved = resolve_page(&definition, &definition.pages[0], Uuid::new_v4(), &ctx);
    let visible: Vec<_> = resolved
        .questions()
        .filter_map(|rq| definition.question(rq.question_id))
        .collect();

    // Only Q1 is visible, so the required-but-hidden Q2 cannot violate
    assert_eq!(visible.len(), 1);
    assert!(validate_page(&visible, &ctx.answers).is_empty());
}
