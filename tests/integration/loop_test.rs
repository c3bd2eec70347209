//! Loop batteries: initialization from an answer, iteration, exhaustion.

use serde_json::json;
use uuid::Uuid;

use survey_runtime::engine::{initialize_loop, route_next, NextStep};
use survey_runtime::models::{LoopBattery, LoopSource, QuestionType};

use crate::common::{self, choices};

fn battery(start: Uuid, end: Uuid, source: LoopSource) -> LoopBattery {
    LoopBattery {
        id: Uuid::new_v4(),
        start_page_id: start,
        end_page_id: end,
        source,
        max_items: None,
        randomize: false,
        sample_without_replacement: false,
    }
}

#[test]
fn loop_runs_once_per_selected_choice() {
    let q1 = common::multi_choice_question("Brands", &["A", "B", "C"]);
    let q1_id = q1.id;
    let intro = common::page(0, vec![q1]);
    let loop_start = common::page(1, vec![common::question("Rating", QuestionType::OpinionScale)]);
    let loop_end = common::page(2, vec![common::question("Comment", QuestionType::Text)]);

    let mut definition = common::definition(vec![intro, loop_start, loop_end]);
    let start_id = definition.pages[1].id;
    let end_id = definition.pages[2].id;
    definition.loop_batteries.push(battery(
        start_id,
        end_id,
        LoopSource::Answer { question_id: q1_id },
    ));

    let session = Uuid::new_v4();
    let ctx = common::context(&definition, vec![("Brands", choices(&["A", "C"]))]);

    // Submitting the intro page enters the loop with the chosen items
    let outcome = route_next(&definition, &definition.pages[0], &[q1_id], None, session, &ctx);
    assert_eq!(
        outcome.step,
        NextStep::Next {
            page_id: start_id,
            question_id: None
        }
    );
    let state = outcome.loop_state.expect("loop entered");
    assert_eq!(state.total_items, 2);
    assert_eq!(state.current_item, json!("A"));

    // Finishing the end page advances to iteration 1
    let outcome = route_next(
        &definition,
        &definition.pages[2],
        &[],
        Some(state),
        session,
        &ctx,
    );
    assert_eq!(
        outcome.step,
        NextStep::Next {
            page_id: start_id,
            question_id: None
        }
    );
    let state = outcome.loop_state.expect("still looping");
    assert_eq!(state.current_iteration, 1);
    assert_eq!(state.current_item, json!("C"));

    // Second pass exhausts the loop; past the end page the survey completes
    let outcome = route_next(
        &definition,
        &definition.pages[2],
        &[],
        Some(state),
        session,
        &ctx,
    );
    assert_eq!(outcome.step, NextStep::Complete);
    assert!(outcome.loop_state.is_none());
}

#[test]
fn dataset_loop_respects_max_items() {
    let battery = LoopBattery {
        id: Uuid::new_v4(),
        start_page_id: Uuid::new_v4(),
        end_page_id: Uuid::new_v4(),
        source: LoopSource::Dataset {
            items: (0..10).map(|i| json!(i)).collect(),
        },
        max_items: Some(4),
        randomize: false,
        sample_without_replacement: false,
    };
    let definition = common::definition(vec![]);
    let ctx = common::context(&definition, vec![]);

    let state = initialize_loop(&battery, Uuid::new_v4(), &ctx).expect("items present");
    assert_eq!(state.total_items, 4);
    assert_eq!(state.current_item, json!(0));
}

#[test]
fn sampling_is_deterministic_per_session() {
    let battery = LoopBattery {
        id: Uuid::new_v4(),
        start_page_id: Uuid::new_v4(),
        end_page_id: Uuid::new_v4(),
        source: LoopSource::Dataset {
            items: (0..20).map(|i| json!(i)).collect(),
        },
        max_items: Some(5),
        randomize: false,
        sample_without_replacement: true,
    };
    let definition = common::definition(vec![]);
    let ctx = common::context(&definition, vec![]);
    let session = Uuid::new_v4();

    let a = initialize_loop(&battery, session, &ctx).unwrap();
    let b = initialize_loop(&battery, session, &ctx).unwrap();
    assert_eq!(a.items, b.items);
    assert_eq!(a.items.len(), 5);
}

#[test]
fn empty_answer_source_skips_the_loop() {
    let q1 = common::multi_choice_question("Brands", &["A"]);
    let q1_id = q1.id;
    let definition = common::definition(vec![common::page(0, vec![q1])]);
    let ctx = common::context(&definition, vec![]);

    let battery = battery(
        Uuid::new_v4(),
        Uuid::new_v4(),
        LoopSource::Answer { question_id: q1_id },
    );
    assert!(initialize_loop(&battery, Uuid::new_v4(), &ctx).is_none());
}
