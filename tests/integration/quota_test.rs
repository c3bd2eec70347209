//! Quota matching and capacity semantics over the pure parts of the
//! manager; counter mutation SQL is exercised against a live database in
//! deployment smoke tests.

use chrono::Utc;
use uuid::Uuid;

use survey_runtime::engine::{QuotaCheck, QuotaManager};
use survey_runtime::models::{QuotaBucket, QuotaPlan};

use crate::common::{self, choices};

fn plan(survey_id: Uuid, buckets: Vec<QuotaBucket>) -> (QuotaPlan, Vec<QuotaBucket>) {
    (
        QuotaPlan {
            id: Uuid::new_v4(),
            survey_id,
            name: "plan".into(),
            state: "OPEN".into(),
            created_at: Utc::now(),
        },
        buckets,
    )
}

fn bucket(question_id: Option<Uuid>, option_value: Option<&str>) -> QuotaBucket {
    QuotaBucket {
        id: Uuid::new_v4(),
        plan_id: Uuid::new_v4(),
        name: "bucket".into(),
        target_n: 1,
        filled_n: 0,
        reserved_n: 0,
        max_overfill: 0,
        question_id,
        option_value: option_value.map(String::from),
        condition_expression_id: None,
    }
}

#[test]
fn overquota_scenario_exhausts_single_bucket() {
    // targetN=1, filledN=1: a session answering Q1='A' is constrained and
    // blocked
    let q1 = common::single_choice_question("Q1", &["A", "B"]);
    let q1_id = q1.id;
    let definition = common::definition(vec![common::page(0, vec![q1])]);

    let mut full = bucket(Some(q1_id), Some("A"));
    full.filled_n = 1;
    let plans = vec![plan(Uuid::new_v4(), vec![full])];

    let ctx = common::context(&definition, vec![("Q1", choices(&["A"]))]);
    let matches = QuotaManager::matching_buckets(&definition, &plans, &ctx);
    assert_eq!(matches.len(), 1);
    assert_eq!(QuotaManager::check(&matches), QuotaCheck::Exhausted);

    // The other answer profile is unconstrained and proceeds
    let ctx = common::context(&definition, vec![("Q1", choices(&["B"]))]);
    let matches = QuotaManager::matching_buckets(&definition, &plans, &ctx);
    assert_eq!(QuotaManager::check(&matches), QuotaCheck::Unconstrained);
}

#[test]
fn one_open_bucket_is_enough_to_proceed() {
    let q1 = common::multi_choice_question("Q1", &["A", "B"]);
    let q1_id = q1.id;
    let definition = common::definition(vec![common::page(0, vec![q1])]);

    let mut full = bucket(Some(q1_id), Some("A"));
    full.filled_n = 1;
    let open = bucket(Some(q1_id), Some("B"));
    let plans = vec![plan(Uuid::new_v4(), vec![full, open])];

    // Both buckets match the multi-choice answer; one still has room
    let ctx = common::context(&definition, vec![("Q1", choices(&["A", "B"]))]);
    let matches = QuotaManager::matching_buckets(&definition, &plans, &ctx);
    assert_eq!(matches.len(), 2);
    assert_eq!(QuotaManager::check(&matches), QuotaCheck::Allowed);
}

#[test]
fn expression_addressed_buckets_use_the_dsl() {
    let expr = common::expression("greaterThan(answer('Age'), 40)");
    let age = common::question("Age", survey_runtime::models::QuestionType::Number);
    let mut definition = common::definition(vec![common::page(0, vec![age])]);
    definition.expressions.push(expr.clone());

    let mut b = bucket(None, None);
    b.condition_expression_id = Some(expr.id);
    let plans = vec![plan(Uuid::new_v4(), vec![b])];

    let older = common::context(
        &definition,
        vec![(
            "Age",
            survey_runtime::models::AnswerValue::Numeric { numeric_value: 55.0 },
        )],
    );
    assert_eq!(
        QuotaManager::matching_buckets(&definition, &plans, &older).len(),
        1
    );

    let younger = common::context(
        &definition,
        vec![(
            "Age",
            survey_runtime::models::AnswerValue::Numeric { numeric_value: 25.0 },
        )],
    );
    assert!(QuotaManager::matching_buckets(&definition, &plans, &younger).is_empty());
}

#[test]
fn overfill_extends_capacity() {
    let mut b = bucket(None, None);
    b.target_n = 2;
    b.filled_n = 2;
    b.max_overfill = 1;
    assert!(b.has_capacity());
    b.reserved_n = 1;
    assert!(!b.has_capacity());
}
