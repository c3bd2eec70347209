//! Common test utilities and fixtures
//!
//! Builders for in-memory survey definitions and evaluation contexts so the
//! scenario tests read like the flows they describe.

#![allow(dead_code)]

use std::collections::HashMap;
use uuid::Uuid;

use survey_runtime::engine::EvalContext;
use survey_runtime::models::{
    AnswerValue, ExpressionDef, OptionDef, OptionsSource, OrderMode, Page, Question,
    QuestionConfig, QuestionType, SurveyDefinition,
};

/// A choice option with value == label.
pub fn option(value: &str, index: i32) -> OptionDef {
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

/// A bare question of the given kind.
pub fn question(variable: &str, kind: QuestionType) -> Question {
    Question {
        id: Uuid::new_v4(),
        group_id: None,
        index: 0,
        variable_name: variable.into(),
        question_type: kind,
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

pub fn required_text_question(variable: &str) -> Question {
    let mut q = question(variable, QuestionType::Text);
    q.required = true;
    q
}

pub fn single_choice_question(variable: &str, values: &[&str]) -> Question {
    let mut q = question(variable, QuestionType::SingleChoice);
    q.options = values
        .iter()
        .enumerate()
        .map(|(i, v)| option(v, i as i32))
        .collect();
    q
}

pub fn multi_choice_question(variable: &str, values: &[&str]) -> Question {
    let mut q = question(variable, QuestionType::MultipleChoice);
    q.options = values
        .iter()
        .enumerate()
        .map(|(i, v)| option(v, i as i32))
        .collect();
    q
}

/// A page holding the given questions, indexed in order of creation.
pub fn page(index: i32, questions: Vec<Question>) -> Page {
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

pub fn expression(source: &str) -> ExpressionDef {
    ExpressionDef {
        id: Uuid::new_v4(),
        source: source.into(),
        description: None,
    }
}

pub fn definition(pages: Vec<Page>) -> SurveyDefinition {
    SurveyDefinition {
        pages,
        ..Default::default()
    }
}

/// Evaluation context over the definition's variable map and the given
/// answers (by variable name).
pub fn context(
    definition: &SurveyDefinition,
    answers: Vec<(&str, AnswerValue)>,
) -> EvalContext {
    let variable_map = definition.variable_map();
    let mut answer_map = HashMap::new();
    for (variable, value) in answers {
        let id = variable_map
            .get(variable)
            .unwrap_or_else(|| panic!("unknown variable {variable}"));
        answer_map.insert(*id, value);
    }
    EvalContext {
        answers: answer_map,
        loop_context: HashMap::new(),
        question_id_map: variable_map,
        additional: serde_json::Map::new(),
    }
}

pub fn choices(values: &[&str]) -> AnswerValue {
    AnswerValue::Choices {
        choices: values.iter().map(|v| v.to_string()).collect(),
    }
}

pub fn text(value: &str) -> AnswerValue {
    AnswerValue::Text {
        text_value: value.into(),
    }
}
