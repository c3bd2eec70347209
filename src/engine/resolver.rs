//! Page resolver
//!
//! Compiles a page into the ResolvedPage tree a client renders: visibility,
//! piping, carry-forward, and deterministic ordering. Resolution is pure;
//! the session controller persists the result into render state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::expression::{evaluate_bool, interpolate, EvalContext};
use super::prng::{DeterministicRng, SeedParts};
use crate::models::{
    Group, MatrixItem, MatrixScale, OptionDef, OptionsSource, OrderMode, Page, Question,
    QuestionConfig, QuestionType, SurveyDefinition,
};

/// A page compiled for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPage {
    pub page_id: Uuid,
    pub is_visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub groups: Vec<ResolvedGroup>,
}

impl ResolvedPage {
    pub fn hidden(page_id: Uuid) -> Self {
        Self {
            page_id,
            is_visible: false,
            title: None,
            description: None,
            groups: vec![],
        }
    }

    /// All visible questions in render order.
    pub fn questions(&self) -> impl Iterator<Item = &ResolvedQuestion> {
        self.groups.iter().flat_map(|g| g.questions.iter())
    }
}

/// A group (or the standalone pseudo-group when `group_id` is None)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedGroup {
    pub group_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub questions: Vec<ResolvedQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedQuestion {
    pub question_id: Uuid,
    pub variable_name: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    pub options: Vec<ResolvedOption>,
    pub items: Vec<ResolvedAxis>,
    pub scales: Vec<ResolvedAxis>,
    pub config: QuestionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOption {
    pub option_id: Uuid,
    pub value: String,
    pub label: String,
    pub exclusive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A resolved matrix row or column
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAxis {
    pub id: Uuid,
    pub value: String,
    pub label: String,
}

/// Resolve one page for one session.
pub fn resolve_page(
    definition: &SurveyDefinition,
    page: &Page,
    session_id: Uuid,
    ctx: &EvalContext,
) -> ResolvedPage {
    if !expression_visible(definition, page.visible_if_expression_id, ctx) {
        return ResolvedPage::hidden(page.id);
    }

    let session = session_id.to_string();
    let page_id_str = page.id.to_string();

    // Groups in page order, then the standalone pseudo-group for questions
    // without a group.
    let mut groups: Vec<&Group> = page
        .groups
        .iter()
        .filter(|g| expression_visible(definition, g.visible_if_expression_id, ctx))
        .collect();
    order_groups(&mut groups, page.group_order_mode, &session, &page_id_str);

    let mut resolved_groups = Vec::with_capacity(groups.len() + 1);
    for group in groups {
        let questions = resolve_group_questions(
            definition,
            page,
            Some(group),
            group.inner_order_mode,
            &session,
            ctx,
        );
        resolved_groups.push(ResolvedGroup {
            group_id: Some(group.id),
            key: group.key.clone(),
            title: group
                .title_template
                .as_deref()
                .map(|t| interpolate(t, ctx)),
            description: group
                .description_template
                .as_deref()
                .map(|t| interpolate(t, ctx)),
            questions,
        });
    }

    let standalone = resolve_group_questions(
        definition,
        page,
        None,
        page.question_order_mode,
        &session,
        ctx,
    );
    if !standalone.is_empty() {
        resolved_groups.push(ResolvedGroup {
            group_id: None,
            key: None,
            title: None,
            description: None,
            questions: standalone,
        });
    }

    ResolvedPage {
        page_id: page.id,
        is_visible: true,
        title: page.title_template.as_deref().map(|t| interpolate(t, ctx)),
        description: page
            .description_template
            .as_deref()
            .map(|t| interpolate(t, ctx)),
        groups: resolved_groups,
    }
}

fn resolve_group_questions(
    definition: &SurveyDefinition,
    page: &Page,
    group: Option<&Group>,
    order: OrderMode,
    session: &str,
    ctx: &EvalContext,
) -> Vec<ResolvedQuestion> {
    let group_id = group.map(|g| g.id);
    let mut questions: Vec<&Question> = page
        .questions
        .iter()
        .filter(|q| q.group_id == group_id)
        .filter(|q| expression_visible(definition, q.visible_if_expression_id, ctx))
        .collect();

    let page_id_str = page.id.to_string();
    let group_id_str = group_id.map(|g| g.to_string());
    match order {
        OrderMode::Sequential => questions.sort_by_key(|q| q.index),
        OrderMode::Random | OrderMode::GroupRandom => {
            questions.sort_by_key(|q| q.index);
            let mut rng = DeterministicRng::from_parts(&SeedParts {
                session_id: Some(session),
                page_id: Some(&page_id_str),
                group_id: group_id_str.as_deref(),
                ..Default::default()
            });
            rng.shuffle(&mut questions);
        }
        OrderMode::Weighted => questions.sort_by_key(|q| q.index),
    }

    questions
        .into_iter()
        .map(|q| resolve_question(definition, page, q, session, ctx))
        .collect()
}

fn resolve_question(
    definition: &SurveyDefinition,
    page: &Page,
    question: &Question,
    session: &str,
    ctx: &EvalContext,
) -> ResolvedQuestion {
    let options = resolve_options(definition, page, question, session, ctx);
    let items = resolve_axes(
        definition,
        page,
        question,
        &question.items.iter().map(axis_from_item).collect::<Vec<_>>(),
        "items",
        session,
        ctx,
    );
    let scales = resolve_axes(
        definition,
        page,
        question,
        &question
            .scales
            .iter()
            .map(axis_from_scale)
            .collect::<Vec<_>>(),
        "scales",
        session,
        ctx,
    );

    ResolvedQuestion {
        question_id: question.id,
        variable_name: question.variable_name.clone(),
        question_type: question.question_type,
        title: question
            .title_template
            .as_deref()
            .map(|t| interpolate(t, ctx)),
        description: question
            .description_template
            .as_deref()
            .map(|t| interpolate(t, ctx)),
        required: question.required,
        options,
        items,
        scales,
        config: question.config.clone(),
    }
}

/// Options after carry-forward, visibility, piping, and ordering.
fn resolve_options(
    definition: &SurveyDefinition,
    page: &Page,
    question: &Question,
    session: &str,
    ctx: &EvalContext,
) -> Vec<ResolvedOption> {
    let mut pool: Vec<OptionDef> = question.options.clone();

    if question.options_source == OptionsSource::CarryForward {
        if let Some(carried) = carry_forward_options(definition, question, ctx) {
            // Own options first; carried options skipped on duplicate value
            let mut merged = pool;
            for option in carried {
                if !merged.iter().any(|o| o.value == option.value) {
                    merged.push(option);
                }
            }
            pool = merged;
        }
    }

    let mut visible: Vec<&OptionDef> = pool
        .iter()
        .filter(|o| expression_visible(definition, o.visible_if_expression_id, ctx))
        .collect();

    let page_id_str = page.id.to_string();
    let group_id_str = question.group_id.map(|g| g.to_string());
    let question_id_str = question.id.to_string();

    match question.option_order_mode {
        OrderMode::Sequential => visible.sort_by_key(|o| o.index),
        OrderMode::Random => {
            visible.sort_by_key(|o| o.index);
            let mut rng = DeterministicRng::from_parts(&SeedParts {
                session_id: Some(session),
                page_id: Some(&page_id_str),
                group_id: group_id_str.as_deref(),
                question_id: Some(&question_id_str),
                bucket: None,
            });
            rng.shuffle(&mut visible);
        }
        OrderMode::GroupRandom => {
            visible.sort_by_key(|o| o.index);
            visible = group_random_order(
                visible,
                session,
                &page_id_str,
                group_id_str.as_deref(),
                &question_id_str,
            );
        }
        OrderMode::Weighted => {
            // Stable sort keeps index order among equal weights
            visible.sort_by_key(|o| o.index);
            visible.sort_by(|a, b| {
                let wa = a.weight.unwrap_or(0.0);
                let wb = b.weight.unwrap_or(0.0);
                wb.partial_cmp(&wa).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    visible
        .into_iter()
        .map(|o| ResolvedOption {
            option_id: o.id,
            value: o.value.clone(),
            label: interpolate(&o.label_template, ctx),
            exclusive: o.exclusive,
            image_url: o.image_url.clone(),
        })
        .collect()
}

/// Partition by group key, shuffle within each partition, then shuffle
/// partition order.
fn group_random_order<'a>(
    options: Vec<&'a OptionDef>,
    session: &str,
    page_id: &str,
    group_id: Option<&str>,
    question_id: &str,
) -> Vec<&'a OptionDef> {
    let mut partitions: Vec<(String, Vec<&OptionDef>)> = Vec::new();
    for option in options {
        let key = option.group_key.clone().unwrap_or_default();
        match partitions.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(option),
            None => partitions.push((key, vec![option])),
        }
    }
    for (key, members) in partitions.iter_mut() {
        let mut rng = DeterministicRng::from_parts(&SeedParts {
            session_id: Some(session),
            page_id: Some(page_id),
            group_id,
            question_id: Some(question_id),
            bucket: Some(key.as_str()),
        });
        rng.shuffle(members);
    }
    let mut outer = DeterministicRng::from_parts(&SeedParts {
        session_id: Some(session),
        page_id: Some(page_id),
        group_id,
        question_id: Some(question_id),
        bucket: Some("partitions"),
    });
    outer.shuffle(&mut partitions);
    partitions.into_iter().flat_map(|(_, m)| m).collect()
}

/// Source options carried into this question, restricted to the source
/// answer's choices in source index order, then filtered.
fn carry_forward_options(
    definition: &SurveyDefinition,
    question: &Question,
    ctx: &EvalContext,
) -> Option<Vec<OptionDef>> {
    let source_id = question.carry_forward_question_id?;
    let source = definition.question(source_id)?;
    let answer = ctx.answers.get(&source_id)?;
    let chosen = answer.choices();
    if chosen.is_empty() {
        return Some(vec![]);
    }

    let mut sorted: Vec<&OptionDef> = source.options.iter().collect();
    sorted.sort_by_key(|o| o.index);

    let filter = question
        .carry_forward_filter_expression_id
        .and_then(|id| definition.expression_source(id));

    let carried = sorted
        .into_iter()
        .filter(|o| chosen.iter().any(|c| *c == o.value))
        .filter(|o| match filter {
            None => true,
            Some(source) => {
                // The filter sees the candidate option as loop-style context
                let mut filter_ctx = ctx.clone();
                filter_ctx
                    .additional
                    .insert("optionValue".into(), serde_json::json!(o.value));
                filter_ctx
                    .additional
                    .insert("optionLabel".into(), serde_json::json!(o.label_template));
                evaluate_bool(source, &filter_ctx)
            }
        })
        .cloned()
        .collect();
    Some(carried)
}

fn resolve_axes(
    definition: &SurveyDefinition,
    page: &Page,
    question: &Question,
    axes: &[AxisDef],
    bucket: &str,
    session: &str,
    ctx: &EvalContext,
) -> Vec<ResolvedAxis> {
    let mut visible: Vec<&AxisDef> = axes
        .iter()
        .filter(|a| expression_visible(definition, a.visible_if, ctx))
        .collect();
    visible.sort_by_key(|a| a.index);

    // Items and scales order the same way; the bucket keeps their shuffle
    // streams independent
    if question.option_order_mode == OrderMode::Random {
        let page_id_str = page.id.to_string();
        let question_id_str = question.id.to_string();
        let mut rng = DeterministicRng::from_parts(&SeedParts {
            session_id: Some(session),
            page_id: Some(&page_id_str),
            group_id: None,
            question_id: Some(&question_id_str),
            bucket: Some(bucket),
        });
        rng.shuffle(&mut visible);
    }

    visible
        .into_iter()
        .map(|a| ResolvedAxis {
            id: a.id,
            value: a.value.clone(),
            label: interpolate(&a.label, ctx),
        })
        .collect()
}

struct AxisDef {
    id: Uuid,
    index: i32,
    value: String,
    label: String,
    visible_if: Option<Uuid>,
}

fn axis_from_item(item: &MatrixItem) -> AxisDef {
    AxisDef {
        id: item.id,
        index: item.index,
        value: item.value.clone(),
        label: item.label_template.clone(),
        visible_if: item.visible_if_expression_id,
    }
}

fn axis_from_scale(scale: &MatrixScale) -> AxisDef {
    AxisDef {
        id: scale.id,
        index: scale.index,
        value: scale.value.clone(),
        label: scale.label_template.clone(),
        visible_if: scale.visible_if_expression_id,
    }
}

fn order_groups(
    groups: &mut Vec<&Group>,
    mode: OrderMode,
    session: &str,
    page_id: &str,
) {
    match mode {
        OrderMode::Sequential | OrderMode::GroupRandom | OrderMode::Weighted => {
            groups.sort_by_key(|g| g.index)
        }
        OrderMode::Random => {
            groups.sort_by_key(|g| g.index);
            let mut rng = DeterministicRng::from_parts(&SeedParts {
                session_id: Some(session),
                page_id: Some(page_id),
                bucket: Some("groups"),
                ..Default::default()
            });
            rng.shuffle(groups);
        }
    }
}

/// Missing expression id means visible; evaluation faults mean hidden.
fn expression_visible(
    definition: &SurveyDefinition,
    expr_id: Option<Uuid>,
    ctx: &EvalContext,
) -> bool {
    match expr_id {
        None => true,
        Some(id) => match definition.expression_source(id) {
            Some(source) => evaluate_bool(source, ctx),
            // Dangling reference: render rather than silently dropping content
            None => true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerValue, ExpressionDef};
    use std::collections::HashMap;

    fn option(value: &str, index: i32) -> OptionDef {
        OptionDef {
            id: Uuid::new_v4(),
            index,
            value: value.into(),
            label_template: value.into(),
            exclusive: false,
            group_key: None,
            weight: None,
            visible_if_expression_id: None,
            image_url: None,
        }
    }

    fn question(variable: &str, options: Vec<OptionDef>) -> Question {
        Question {
            id: Uuid::new_v4(),
            group_id: None,
            index: 0,
            variable_name: variable.into(),
            question_type: QuestionType::MultipleChoice,
            title_template: None,
            description_template: None,
            required: false,
            visible_if_expression_id: None,
            terminate_if_expression_id: None,
            options_source: OptionsSource::Own,
            carry_forward_question_id: None,
            carry_forward_filter_expression_id: None,
            option_order_mode: OrderMode::Sequential,
            options,
            items: vec![],
            scales: vec![],
            config: QuestionConfig::default(),
        }
    }

    fn page_with(questions: Vec<Question>) -> Page {
        Page {
            id: Uuid::new_v4(),
            index: 0,
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
    fn carry_forward_keeps_source_order_and_merges_own() {
        let q1 = question(
            "Q1",
            vec![option("Apple", 0), option("Banana", 1), option("Cherry", 2)],
        );
        let mut q2 = question("Q2", vec![option("Other", 0)]);
        q2.options_source = OptionsSource::CarryForward;
        q2.carry_forward_question_id = Some(q1.id);

        let q1_id = q1.id;
        let definition = SurveyDefinition {
            pages: vec![page_with(vec![q1]), page_with(vec![q2])],
            ..Default::default()
        };

        let mut ctx = ctx_for(&definition);
        ctx.answers.insert(
            q1_id,
            AnswerValue::Choices {
                choices: vec!["Cherry".into(), "Apple".into()],
            },
        );

        let page = &definition.pages[1];
        let resolved = resolve_page(&definition, page, Uuid::new_v4(), &ctx);
        let values: Vec<&str> = resolved.questions().next().unwrap().options
            .iter()
            .map(|o| o.value.as_str())
            .collect();
        // Own option first, carried options in source index order
        assert_eq!(values, vec!["Other", "Apple", "Cherry"]);
    }

    #[test]
    fn random_order_is_deterministic_per_session() {
        let mut q = question(
            "Q1",
            (0..8).map(|i| option(&format!("v{}", i), i)).collect(),
        );
        q.option_order_mode = OrderMode::Random;
        let definition = SurveyDefinition {
            pages: vec![page_with(vec![q])],
            ..Default::default()
        };
        let ctx = ctx_for(&definition);
        let page = &definition.pages[0];
        let session = Uuid::new_v4();

        let a = resolve_page(&definition, page, session, &ctx);
        let b = resolve_page(&definition, page, session, &ctx);
        let order = |r: &ResolvedPage| {
            r.questions().next().unwrap().options
                .iter()
                .map(|o| o.value.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&a), order(&b));

        let other = resolve_page(&definition, page, Uuid::new_v4(), &ctx);
        assert_ne!(order(&a), order(&other));
    }

    #[test]
    fn weighted_order_sorts_descending_with_missing_as_zero() {
        let mut opts = vec![option("light", 0), option("heavy", 1), option("mid", 2)];
        opts[1].weight = Some(10.0);
        opts[2].weight = Some(5.0);
        let mut q = question("Q1", opts);
        q.option_order_mode = OrderMode::Weighted;
        let definition = SurveyDefinition {
            pages: vec![page_with(vec![q])],
            ..Default::default()
        };
        let ctx = ctx_for(&definition);
        let resolved = resolve_page(&definition, &definition.pages[0], Uuid::new_v4(), &ctx);
        let values: Vec<&str> = resolved.questions().next().unwrap().options
            .iter()
            .map(|o| o.value.as_str())
            .collect();
        assert_eq!(values, vec!["heavy", "mid", "light"]);
    }

    #[test]
    fn hidden_page_resolves_invisible() {
        let expr = ExpressionDef {
            id: Uuid::new_v4(),
            source: "equals(answer('Q1'), 'yes')".into(),
            description: None,
        };
        let mut page = page_with(vec![question("Q2", vec![])]);
        page.visible_if_expression_id = Some(expr.id);
        let definition = SurveyDefinition {
            pages: vec![page],
            expressions: vec![expr],
            ..Default::default()
        };
        let ctx = ctx_for(&definition);
        let resolved = resolve_page(&definition, &definition.pages[0], Uuid::new_v4(), &ctx);
        assert!(!resolved.is_visible);
        assert!(resolved.groups.is_empty());
    }

    #[test]
    fn invisible_question_is_dropped() {
        let expr = ExpressionDef {
            id: Uuid::new_v4(),
            source: "equals(answer('Q1'), 'show')".into(),
            description: None,
        };
        let q1 = question("Q1", vec![]);
        let mut q2 = question("Q2", vec![]);
        q2.visible_if_expression_id = Some(expr.id);
        let q1_id = q1.id;
        let definition = SurveyDefinition {
            pages: vec![page_with(vec![q1, q2])],
            expressions: vec![expr],
            ..Default::default()
        };

        let mut ctx = ctx_for(&definition);
        let resolved = resolve_page(&definition, &definition.pages[0], Uuid::new_v4(), &ctx);
        assert_eq!(resolved.questions().count(), 1);

        ctx.answers.insert(
            q1_id,
            AnswerValue::Text {
                text_value: "show".into(),
            },
        );
        let resolved = resolve_page(&definition, &definition.pages[0], Uuid::new_v4(), &ctx);
        assert_eq!(resolved.questions().count(), 2);
    }

    #[test]
    fn page_title_is_piped() {
        let q1 = question("Q1", vec![]);
        let q1_id = q1.id;
        let mut page = page_with(vec![q1]);
        page.title_template = Some("Hello ${pipe:question:Q1:response}".into());
        let definition = SurveyDefinition {
            pages: vec![page],
            ..Default::default()
        };
        let mut ctx = ctx_for(&definition);
        ctx.answers.insert(
            q1_id,
            AnswerValue::Text {
                text_value: "Alice".into(),
            },
        );
        let resolved = resolve_page(&definition, &definition.pages[0], Uuid::new_v4(), &ctx);
        assert_eq!(resolved.title.as_deref(), Some("Hello Alice"));
    }

    #[test]
    fn group_random_partitions_stay_contiguous() {
        let mut opts = Vec::new();
        for i in 0..4 {
            let mut o = option(&format!("a{}", i), i);
            o.group_key = Some("A".into());
            opts.push(o);
        }
        for i in 0..4 {
            let mut o = option(&format!("b{}", i), 4 + i);
            o.group_key = Some("B".into());
            opts.push(o);
        }
        let mut q = question("Q1", opts);
        q.option_order_mode = OrderMode::GroupRandom;
        let definition = SurveyDefinition {
            pages: vec![page_with(vec![q])],
            ..Default::default()
        };
        let ctx = ctx_for(&definition);
        let resolved = resolve_page(&definition, &definition.pages[0], Uuid::new_v4(), &ctx);
        let values: Vec<String> = resolved.questions().next().unwrap().options
            .iter()
            .map(|o| o.value.clone())
            .collect();
        // Each partition's members stay adjacent after the shuffles
        let first_partition = values[0].chars().next().unwrap();
        let split = values
            .iter()
            .position(|v| v.chars().next().unwrap() != first_partition)
            .unwrap();
        assert!(values[split..]
            .iter()
            .all(|v| v.chars().next().unwrap() != first_partition));
    }
}
