//! Survey definition models
//!
//! A survey row carries its whole questionnaire as one JSONB document: pages,
//! groups, questions, options, expressions, jumps, and loop batteries. The
//! document is immutable once the survey is published; edits bump `version`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Survey database entity. The questionnaire itself lives in `definition`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Survey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub status: String,
    pub version: i32,
    pub default_language: String,
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Survey {
    /// Parse the JSONB definition document.
    pub fn parsed_definition(&self) -> Result<SurveyDefinition, serde_json::Error> {
        serde_json::from_value(self.definition.clone())
    }

    pub fn survey_status(&self) -> SurveyStatus {
        SurveyStatus::parse(&self.status)
    }
}

/// Survey lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyStatus {
    Draft,
    Published,
    Closed,
}

impl SurveyStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "published" => Self::Published,
            "closed" => Self::Closed,
            _ => Self::Draft,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Closed => "closed",
        }
    }
}

/// The complete questionnaire document stored per survey version
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyDefinition {
    #[serde(default)]
    pub pages: Vec<Page>,
    /// Shared expression table; pages, groups, questions, options, jumps and
    /// quota buckets reference entries here by id.
    #[serde(default)]
    pub expressions: Vec<ExpressionDef>,
    #[serde(default)]
    pub jumps: Vec<Jump>,
    #[serde(default)]
    pub loop_batteries: Vec<LoopBattery>,
    #[serde(default)]
    pub settings: SurveySettings,
}

impl SurveyDefinition {
    pub fn page(&self, page_id: Uuid) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == page_id)
    }

    pub fn question(&self, question_id: Uuid) -> Option<&Question> {
        self.pages
            .iter()
            .flat_map(|p| p.questions.iter())
            .find(|q| q.id == question_id)
    }

    /// Page that owns the given question, if any.
    pub fn page_of_question(&self, question_id: Uuid) -> Option<&Page> {
        self.pages
            .iter()
            .find(|p| p.questions.iter().any(|q| q.id == question_id))
    }

    pub fn expression_source(&self, expr_id: Uuid) -> Option<&str> {
        self.expressions
            .iter()
            .find(|e| e.id == expr_id)
            .map(|e| e.source.as_str())
    }

    /// Map every variable name to its question id. Used by both the DSL and
    /// piping for the whole session.
    pub fn variable_map(&self) -> std::collections::HashMap<String, Uuid> {
        self.pages
            .iter()
            .flat_map(|p| p.questions.iter())
            .map(|q| (q.variable_name.clone(), q.id))
            .collect()
    }
}

/// One page of the questionnaire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: Uuid,
    /// Zero-based position within the survey
    pub index: i32,
    #[serde(default)]
    pub title_template: Option<String>,
    #[serde(default)]
    pub description_template: Option<String>,
    #[serde(default)]
    pub visible_if_expression_id: Option<Uuid>,
    #[serde(default)]
    pub group_order_mode: OrderMode,
    #[serde(default)]
    pub question_order_mode: OrderMode,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

/// A question group within a page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub index: i32,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub title_template: Option<String>,
    #[serde(default)]
    pub description_template: Option<String>,
    #[serde(default)]
    pub visible_if_expression_id: Option<Uuid>,
    #[serde(default)]
    pub inner_order_mode: OrderMode,
}

/// Ordering modes for groups, questions, and options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderMode {
    #[default]
    Sequential,
    Random,
    GroupRandom,
    Weighted,
}

/// The closed set of question kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    Dropdown,
    YesNo,
    Text,
    TextArea,
    Number,
    Decimal,
    Slider,
    OpinionScale,
    Date,
    Time,
    DateTime,
    Email,
    Phone,
    Url,
    FileUpload,
    PhotoCapture,
    Signature,
    Consent,
    ContactForm,
    MatrixSingle,
    MatrixMultiple,
    BipolarMatrix,
    Rank,
    GroupRank,
    PictureChoice,
    ConstantSum,
    Payment,
    Descriptive,
}

impl QuestionType {
    /// Kinds whose answers are a list of option values.
    pub fn is_choice_kind(&self) -> bool {
        matches!(
            self,
            Self::SingleChoice
                | Self::MultipleChoice
                | Self::Dropdown
                | Self::YesNo
                | Self::PictureChoice
        )
    }

    pub fn is_matrix_kind(&self) -> bool {
        matches!(self, Self::MatrixSingle | Self::MatrixMultiple | Self::BipolarMatrix)
    }
}

/// Where a question's options come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionsSource {
    #[default]
    Own,
    CarryForward,
}

/// A question within a page, optionally inside a group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: Uuid,
    #[serde(default)]
    pub group_id: Option<Uuid>,
    pub index: i32,
    /// Unique within the survey, `^[A-Za-z][A-Za-z0-9_]*$`
    pub variable_name: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub title_template: Option<String>,
    #[serde(default)]
    pub description_template: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub visible_if_expression_id: Option<Uuid>,
    #[serde(default)]
    pub terminate_if_expression_id: Option<Uuid>,
    #[serde(default)]
    pub options_source: OptionsSource,
    #[serde(default)]
    pub carry_forward_question_id: Option<Uuid>,
    #[serde(default)]
    pub carry_forward_filter_expression_id: Option<Uuid>,
    #[serde(default)]
    pub option_order_mode: OrderMode,
    #[serde(default)]
    pub options: Vec<OptionDef>,
    #[serde(default)]
    pub items: Vec<MatrixItem>,
    #[serde(default)]
    pub scales: Vec<MatrixScale>,
    #[serde(default)]
    pub config: QuestionConfig,
}

/// Per-kind configuration knobs. Unused fields stay `None` for other kinds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionConfig {
    #[serde(default)]
    pub max_selections: Option<usize>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub min_date: Option<String>,
    #[serde(default)]
    pub max_date: Option<String>,
    #[serde(default)]
    pub max_files: Option<usize>,
    #[serde(default)]
    pub total_points: Option<f64>,
    #[serde(default)]
    pub allow_zero: Option<bool>,
    #[serde(default)]
    pub url_protocol: Option<String>,
    /// Enabled fields for contact forms: name, email, phone, company, address
    #[serde(default)]
    pub contact_fields: Vec<String>,
}

/// An option of a choice-type question
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionDef {
    pub id: Uuid,
    pub index: i32,
    pub value: String,
    pub label_template: String,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub group_key: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub visible_if_expression_id: Option<Uuid>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A matrix row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixItem {
    pub id: Uuid,
    pub index: i32,
    pub value: String,
    pub label_template: String,
    #[serde(default)]
    pub visible_if_expression_id: Option<Uuid>,
}

/// A matrix column
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixScale {
    pub id: Uuid,
    pub index: i32,
    pub value: String,
    pub label_template: String,
    #[serde(default)]
    pub visible_if_expression_id: Option<Uuid>,
}

/// A DSL expression shared by reference
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionDef {
    pub id: Uuid,
    pub source: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A jump rule. Page-level when `from_question_id` is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Jump {
    pub id: Uuid,
    #[serde(default)]
    pub from_page_id: Option<Uuid>,
    #[serde(default)]
    pub from_question_id: Option<Uuid>,
    #[serde(default)]
    pub to_page_id: Option<Uuid>,
    #[serde(default)]
    pub to_question_id: Option<Uuid>,
    /// Lower wins
    pub priority: i32,
    #[serde(default)]
    pub condition_expression_id: Option<Uuid>,
}

/// A repeated block bounded by a start and end page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopBattery {
    pub id: Uuid,
    pub start_page_id: Uuid,
    pub end_page_id: Uuid,
    pub source: LoopSource,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub randomize: bool,
    #[serde(default)]
    pub sample_without_replacement: bool,
}

/// Where loop items come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopSource {
    /// Iterate the choices of a prior multiple-choice answer
    #[serde(rename_all = "camelCase")]
    Answer { question_id: Uuid },
    /// Iterate a fixed dataset
    #[serde(rename_all = "camelCase")]
    Dataset { items: Vec<serde_json::Value> },
}

// ============================================================================
// Settings bags
// ============================================================================

/// The survey `settings` bag, grouped by concern. Keys overlap between
/// `security` and `responses` for historical reasons; consumers read the
/// union.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveySettings {
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub navigation: NavigationSettings,
    #[serde(default)]
    pub responses: ResponseSettings,
    #[serde(default)]
    pub completion: CompletionSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_required: bool,
    /// Lowercased host the Referer must match when set
    #[serde(default)]
    pub referral_website: Option<String>,
    #[serde(default)]
    pub prevent_multiple_submissions: bool,
    #[serde(default)]
    pub block_vpn: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationSettings {
    #[serde(default = "default_true")]
    pub show_back_button: bool,
    #[serde(default = "default_true")]
    pub show_progress_bar: bool,
    #[serde(default)]
    pub show_question_numbers: bool,
    #[serde(default)]
    pub show_page_numbers: bool,
    #[serde(default)]
    pub allow_finish_later: bool,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            show_back_button: true,
            show_progress_bar: true,
            show_question_numbers: false,
            show_page_numbers: false,
            allow_finish_later: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSettings {
    #[serde(default)]
    pub prevent_multiple_submissions: bool,
    #[serde(default)]
    pub custom_error_message: Option<String>,
    /// Incomplete sessions older than this many hours may be abandoned by the
    /// background closer. Zero disables the sweep for this survey.
    #[serde(default)]
    pub incomplete_ttl_hours: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSettings {
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub send_thank_you_email: bool,
    #[serde(default)]
    pub thank_you_message: Option<String>,
    #[serde(default)]
    pub completion_message: Option<String>,
    #[serde(default)]
    pub show_results: bool,
    /// Close the survey after this many completed sessions
    #[serde(default)]
    pub hard_close_target: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSettings {
    #[serde(default)]
    pub survey_start: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    pub survey_end: Option<chrono::DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Variable names must start with a letter and contain only letters, digits,
/// and underscores.
pub fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_name_rules() {
        assert!(is_valid_variable_name("Q1"));
        assert!(is_valid_variable_name("age_group"));
        assert!(!is_valid_variable_name("1Q"));
        assert!(!is_valid_variable_name(""));
        assert!(!is_valid_variable_name("Q-1"));
    }

    #[test]
    fn definition_round_trips_through_json() {
        let def = SurveyDefinition {
            pages: vec![Page {
                id: Uuid::new_v4(),
                index: 0,
                title_template: Some("Hello ${pipe:question:Q1:response}".into()),
                description_template: None,
                visible_if_expression_id: None,
                group_order_mode: OrderMode::Sequential,
                question_order_mode: OrderMode::Random,
                groups: vec![],
                questions: vec![],
            }],
            ..Default::default()
        };
        let json = serde_json::to_value(&def).unwrap();
        let back: SurveyDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back.pages.len(), 1);
        assert_eq!(back.pages[0].question_order_mode, OrderMode::Random);
    }

    #[test]
    fn order_mode_uses_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&OrderMode::GroupRandom).unwrap(),
            "\"GROUP_RANDOM\""
        );
    }
}
