//! Routing: where a session goes after a successful submit
//!
//! Priority order: loop continuation, question-level terminations,
//! question-level jumps, page-level jumps, sequential next. A termination
//! always dominates; no jump or advance is taken once one fires.

use serde_json::Value;
use uuid::Uuid;

use super::expression::{evaluate_bool, EvalContext};
use super::prng::{DeterministicRng, SeedParts};
use crate::models::{Jump, LoopBattery, LoopSource, LoopState, Page, SurveyDefinition};

/// The routing decision for one submit
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    Terminated { reason: String },
    Complete,
    Next {
        page_id: Uuid,
        question_id: Option<Uuid>,
    },
}

/// Decision plus the loop state to persist alongside it
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub step: NextStep,
    pub loop_state: Option<LoopState>,
}

/// Compute the next step after answers on `current_page` were accepted.
///
/// `answered` lists the questions answered on this page in render order;
/// `loop_state` is the active loop from render state, if any.
pub fn route_next(
    definition: &SurveyDefinition,
    current_page: &Page,
    answered: &[Uuid],
    loop_state: Option<LoopState>,
    session_id: Uuid,
    ctx: &EvalContext,
) -> RouteOutcome {
    // 1. Loop continuation on the battery's end page
    let mut loop_state = loop_state;
    if let Some(state) = loop_state.as_ref() {
        if state.end_page_id == current_page.id {
            if state.current_iteration + 1 < state.total_items {
                let mut advanced = state.clone();
                advanced.current_iteration += 1;
                advanced.current_item = advanced
                    .items
                    .get(advanced.current_iteration)
                    .cloned()
                    .unwrap_or(Value::Null);
                let start = advanced.start_page_id;
                return RouteOutcome {
                    step: NextStep::Next {
                        page_id: start,
                        question_id: None,
                    },
                    loop_state: Some(advanced),
                };
            }
            // Iterations exhausted
            loop_state = None;
        }
    }

    // 2. Question-level terminations dominate everything downstream
    for qid in answered {
        let Some(question) = definition.question(*qid) else {
            continue;
        };
        if let Some(expr_id) = question.terminate_if_expression_id {
            if let Some(source) = definition.expression_source(expr_id) {
                if evaluate_bool(source, ctx) {
                    let reason = definition
                        .expressions
                        .iter()
                        .find(|e| e.id == expr_id)
                        .and_then(|e| e.description.clone())
                        .unwrap_or_else(|| "logic_condition".to_string());
                    return RouteOutcome {
                        step: NextStep::Terminated { reason },
                        loop_state,
                    };
                }
            }
        }
    }

    // 3. Question-level jumps, per answered question
    for qid in answered {
        if let Some(step) = first_matching_jump(
            definition,
            definition
                .jumps
                .iter()
                .filter(|j| j.from_question_id == Some(*qid)),
            ctx,
        ) {
            return with_loop_entry(definition, step, loop_state, session_id, ctx);
        }
    }

    // 4. Page-level jumps
    if let Some(step) = first_matching_jump(
        definition,
        definition
            .jumps
            .iter()
            .filter(|j| j.from_question_id.is_none() && j.from_page_id == Some(current_page.id)),
        ctx,
    ) {
        return with_loop_entry(definition, step, loop_state, session_id, ctx);
    }

    // 5. Sequential: first later page whose visibility holds
    let mut later: Vec<&Page> = definition
        .pages
        .iter()
        .filter(|p| p.index > current_page.index)
        .collect();
    later.sort_by_key(|p| p.index);
    for page in later {
        if page_visible(definition, page, ctx) {
            let step = NextStep::Next {
                page_id: page.id,
                question_id: None,
            };
            return with_loop_entry(definition, step, loop_state, session_id, ctx);
        }
    }

    RouteOutcome {
        step: NextStep::Complete,
        loop_state,
    }
}

/// First jump (ascending priority) whose condition holds; a jump without a
/// target falls through.
fn first_matching_jump<'a>(
    definition: &SurveyDefinition,
    jumps: impl Iterator<Item = &'a Jump>,
    ctx: &EvalContext,
) -> Option<NextStep> {
    let mut candidates: Vec<&Jump> = jumps.collect();
    candidates.sort_by_key(|j| j.priority);

    for jump in candidates {
        let condition_holds = match jump.condition_expression_id {
            None => true,
            Some(expr_id) => definition
                .expression_source(expr_id)
                .map(|source| evaluate_bool(source, ctx))
                .unwrap_or(false),
        };
        if !condition_holds {
            continue;
        }
        if let Some(page_id) = jump.to_page_id {
            return Some(NextStep::Next {
                page_id,
                question_id: None,
            });
        }
        if let Some(question_id) = jump.to_question_id {
            if let Some(page) = definition.page_of_question(question_id) {
                return Some(NextStep::Next {
                    page_id: page.id,
                    question_id: Some(question_id),
                });
            }
        }
        // No target: fall through to the next rule
    }
    None
}

/// When a step lands on a loop battery's start page with no active loop,
/// initialize the loop from its source.
fn with_loop_entry(
    definition: &SurveyDefinition,
    step: NextStep,
    loop_state: Option<LoopState>,
    session_id: Uuid,
    ctx: &EvalContext,
) -> RouteOutcome {
    let NextStep::Next { page_id, .. } = &step else {
        return RouteOutcome { step, loop_state };
    };
    if loop_state.is_some() {
        return RouteOutcome { step, loop_state };
    }
    let Some(battery) = definition
        .loop_batteries
        .iter()
        .find(|b| b.start_page_id == *page_id)
    else {
        return RouteOutcome { step, loop_state };
    };

    let state = initialize_loop(battery, session_id, ctx);
    RouteOutcome {
        step,
        loop_state: state,
    }
}

/// Build initial loop state; an empty item source yields no loop.
pub fn initialize_loop(
    battery: &LoopBattery,
    session_id: Uuid,
    ctx: &EvalContext,
) -> Option<LoopState> {
    let mut items: Vec<Value> = match &battery.source {
        LoopSource::Answer { question_id } => ctx
            .answers
            .get(question_id)
            .map(|a| {
                a.choices()
                    .iter()
                    .map(|c| Value::String(c.clone()))
                    .collect()
            })
            .unwrap_or_default(),
        LoopSource::Dataset { items } => items.clone(),
    };

    if items.is_empty() {
        return None;
    }

    let session = session_id.to_string();
    let battery_id = battery.id.to_string();
    let seed = SeedParts {
        session_id: Some(&session),
        bucket: Some(&battery_id),
        ..Default::default()
    };
    if battery.sample_without_replacement {
        let n = battery.max_items.unwrap_or(items.len());
        items = DeterministicRng::from_parts(&seed).sample_without_replacement(&items, n);
    } else {
        if battery.randomize {
            DeterministicRng::from_parts(&seed).shuffle(&mut items);
        }
        if let Some(max) = battery.max_items {
            items.truncate(max);
        }
    }

    if items.is_empty() {
        return None;
    }

    Some(LoopState {
        battery_id: battery.id,
        start_page_id: battery.start_page_id,
        end_page_id: battery.end_page_id,
        current_iteration: 0,
        total_items: items.len(),
        current_item: items[0].clone(),
        items,
    })
}

fn page_visible(definition: &SurveyDefinition, page: &Page, ctx: &EvalContext) -> bool {
    match page.visible_if_expression_id {
        None => true,
        Some(expr_id) => definition
            .expression_source(expr_id)
            .map(|source| evaluate_bool(source, ctx))
            .unwrap_or(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AnswerValue, ExpressionDef, OptionsSource, OrderMode, Question, QuestionConfig,
        QuestionType,
    };
    use std::collections::HashMap;

    fn question(variable: &str) -> Question {
        Question {
            id: Uuid::new_v4(),
            group_id: None,
            index: 0,
            variable_name: variable.into(),
            question_type: QuestionType::SingleChoice,
            title_template: None,
            description_template: None,
            required: false,
            visible_if_expression_id: None,
            terminate_if_expression_id: None,
            options_source: OptionsSource::Own,
            carry_forward_question_id: None,
            carry_forward_filter_expression_id: None,
            option_order_mode: OrderMode::Sequential,
            options: vec![],
            items: vec![],
            scales: vec![],
            config: QuestionConfig::default(),
        }
    }

    fn page(index: i32, questions: Vec<Question>) -> Page {
        Page {
            id: Uuid::new_v4(),
            index,
            title_template: None,
            description_template: None,
            visible_if_expression_id: None,
            group_order_mode: OrderMode::Sequential,
            question_order_mode: OrderMode::Sequential,
            groups: vec![],
            questions,
        }
    }

    fn ctx_for(definition: &SurveyDefinition) -> EvalContext {
        EvalContext {
            answers: HashMap::new(),
            loop_context: HashMap::new(),
            question_id_map: definition.variable_map(),
            additional: serde_json::Map::new(),
        }
    }

    #[test]
    fn sequential_next_skips_invisible_pages() {
        let expr = ExpressionDef {
            id: Uuid::new_v4(),
            source: "false".into(),
            description: None,
        };
        let p1 = page(0, vec![question("Q1")]);
        let mut p2 = page(1, vec![question("Q2")]);
        p2.visible_if_expression_id = Some(expr.id);
        let p3 = page(2, vec![question("Q3")]);
        let p3_id = p3.id;
        let definition = SurveyDefinition {
            pages: vec![p1, p2, p3],
            expressions: vec![expr],
            ..Default::default()
        };
        let ctx = ctx_for(&definition);
        let outcome = route_next(
            &definition,
            &definition.pages[0],
            &[],
            None,
            Uuid::new_v4(),
            &ctx,
        );
        assert_eq!(
            outcome.step,
            NextStep::Next {
                page_id: p3_id,
                question_id: None
            }
        );
    }

    #[test]
    fn last_page_completes() {
        let definition = SurveyDefinition {
            pages: vec![page(0, vec![question("Q1")])],
            ..Default::default()
        };
        let ctx = ctx_for(&definition);
        let outcome = route_next(
            &definition,
            &definition.pages[0],
            &[],
            None,
            Uuid::new_v4(),
            &ctx,
        );
        assert_eq!(outcome.step, NextStep::Complete);
    }

    #[test]
    fn termination_dominates_jumps() {
        let terminate = ExpressionDef {
            id: Uuid::new_v4(),
            source: "equals(answer('Q1'), 'No')".into(),
            description: Some("screened out".into()),
        };
        let mut q1 = question("Q1");
        q1.terminate_if_expression_id = Some(terminate.id);
        let q1_id = q1.id;
        let p1 = page(0, vec![q1]);
        let p2 = page(1, vec![question("Q2")]);
        let jump = Jump {
            id: Uuid::new_v4(),
            from_page_id: None,
            from_question_id: Some(q1_id),
            to_page_id: Some(p2.id),
            to_question_id: None,
            priority: 0,
            condition_expression_id: None,
        };
        let definition = SurveyDefinition {
            pages: vec![p1, p2],
            expressions: vec![terminate],
            jumps: vec![jump],
            ..Default::default()
        };
        let mut ctx = ctx_for(&definition);
        ctx.answers.insert(
            q1_id,
            AnswerValue::Choices {
                choices: vec!["No".into()],
            },
        );
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
    }

    #[test]
    fn question_jump_beats_page_jump_and_priority_orders() {
        let q1 = question("Q1");
        let q1_id = q1.id;
        let p1 = page(0, vec![q1]);
        let p2 = page(1, vec![question("Q2")]);
        let p3 = page(2, vec![question("Q3")]);
        let p1_id = p1.id;
        let p2_id = p2.id;
        let p3_id = p3.id;

        let low_priority = Jump {
            id: Uuid::new_v4(),
            from_page_id: None,
            from_question_id: Some(q1_id),
            to_page_id: Some(p3_id),
            to_question_id: None,
            priority: 5,
            condition_expression_id: None,
        };
        let high_priority = Jump {
            id: Uuid::new_v4(),
            from_page_id: None,
            from_question_id: Some(q1_id),
            to_page_id: Some(p2_id),
            to_question_id: None,
            priority: 1,
            condition_expression_id: None,
        };
        let page_jump = Jump {
            id: Uuid::new_v4(),
            from_page_id: Some(p1_id),
            from_question_id: None,
            to_page_id: Some(p3_id),
            to_question_id: None,
            priority: 0,
            condition_expression_id: None,
        };
        let definition = SurveyDefinition {
            pages: vec![p1, p2, p3],
            jumps: vec![low_priority, high_priority, page_jump],
            ..Default::default()
        };
        let ctx = ctx_for(&definition);
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
            NextStep::Next {
                page_id: p2_id,
                question_id: None
            }
        );
    }

    #[test]
    fn conditional_jump_falls_through_when_false() {
        let cond = ExpressionDef {
            id: Uuid::new_v4(),
            source: "equals(answer('Q1'), 'jump')".into(),
            description: None,
        };
        let q1 = question("Q1");
        let q1_id = q1.id;
        let p1 = page(0, vec![q1]);
        let p2 = page(1, vec![question("Q2")]);
        let p3 = page(2, vec![question("Q3")]);
        let p2_id = p2.id;
        let p3_id = p3.id;
        let jump = Jump {
            id: Uuid::new_v4(),
            from_page_id: None,
            from_question_id: Some(q1_id),
            to_page_id: Some(p3_id),
            to_question_id: None,
            priority: 0,
            condition_expression_id: Some(cond.id),
        };
        let definition = SurveyDefinition {
            pages: vec![p1, p2, p3],
            expressions: vec![cond],
            jumps: vec![jump],
            ..Default::default()
        };
        let mut ctx = ctx_for(&definition);
        ctx.answers.insert(
            q1_id,
            AnswerValue::Text {
                text_value: "stay".into(),
            },
        );
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
            NextStep::Next {
                page_id: p2_id,
                question_id: None
            }
        );
    }

    #[test]
    fn loop_advances_until_exhausted() {
        let p1 = page(0, vec![question("Q1")]);
        let p2 = page(1, vec![question("Q2")]);
        let start = p1.id;
        let end = p2.id;
        let definition = SurveyDefinition {
            pages: vec![p1, p2],
            ..Default::default()
        };
        let ctx = ctx_for(&definition);
        let state = LoopState {
            battery_id: Uuid::new_v4(),
            start_page_id: start,
            end_page_id: end,
            current_iteration: 0,
            total_items: 2,
            items: vec![serde_json::json!("Apple"), serde_json::json!("Cherry")],
            current_item: serde_json::json!("Apple"),
        };

        // On the end page with an iteration left: back to start
        let outcome = route_next(
            &definition,
            &definition.pages[1],
            &[],
            Some(state.clone()),
            Uuid::new_v4(),
            &ctx,
        );
        assert_eq!(
            outcome.step,
            NextStep::Next {
                page_id: start,
                question_id: None
            }
        );
        let advanced = outcome.loop_state.unwrap();
        assert_eq!(advanced.current_iteration, 1);
        assert_eq!(advanced.current_item, serde_json::json!("Cherry"));

        // Exhausted: loop clears and the session completes past the end page
        let outcome = route_next(
            &definition,
            &definition.pages[1],
            &[],
            Some(advanced),
            Uuid::new_v4(),
            &ctx,
        );
        assert_eq!(outcome.step, NextStep::Complete);
        assert!(outcome.loop_state.is_none());
    }

    #[test]
    fn entering_loop_start_initializes_state() {
        let q1 = question("Q1");
        let q1_id = q1.id;
        let p1 = page(0, vec![q1]);
        let p2 = page(1, vec![question("Q2")]);
        let p3 = page(2, vec![question("Q3")]);
        let battery = LoopBattery {
            id: Uuid::new_v4(),
            start_page_id: p2.id,
            end_page_id: p3.id,
            source: LoopSource::Answer { question_id: q1_id },
            max_items: None,
            randomize: false,
            sample_without_replacement: false,
        };
        let definition = SurveyDefinition {
            pages: vec![p1, p2, p3],
            loop_batteries: vec![battery],
            ..Default::default()
        };
        let mut ctx = ctx_for(&definition);
        ctx.answers.insert(
            q1_id,
            AnswerValue::Choices {
                choices: vec!["A".into(), "B".into()],
            },
        );
        let outcome = route_next(
            &definition,
            &definition.pages[0],
            &[q1_id],
            None,
            Uuid::new_v4(),
            &ctx,
        );
        let state = outcome.loop_state.expect("loop initialized");
        assert_eq!(state.total_items, 2);
        assert_eq!(state.current_iteration, 0);
        assert_eq!(state.current_item, serde_json::json!("A"));
    }
}
