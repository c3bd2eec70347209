//! Per-question-kind answer validation
//!
//! Input is the submitted answers for one page plus the question
//! configurations on that page; output is a list of violations. An empty
//! list means the page is valid. Messages may be overridden later by the
//! settings engine; codes are stable machine identifiers.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{AnswerValue, Question, QuestionType};
use crate::utils::validation::{validate_email, validate_phone, validate_url};

/// One validation failure
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub question_id: Uuid,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Violation {
    fn new(question_id: Uuid, code: &str, message: impl Into<String>) -> Self {
        Self {
            question_id,
            code: code.to_string(),
            message: message.into(),
            field: None,
        }
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Validate one page's submitted answers against its visible questions.
pub fn validate_page(
    questions: &[&Question],
    answers: &HashMap<Uuid, AnswerValue>,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    for question in questions {
        if question.question_type == QuestionType::Descriptive {
            continue;
        }
        let answer = answers.get(&question.id);
        let empty = answer.map(|a| a.is_empty()).unwrap_or(true);

        if empty {
            if question.required {
                violations.push(Violation::new(
                    question.id,
                    "REQUIRED",
                    "This question is required",
                ));
            }
            continue;
        }
        let answer = answer.expect("non-empty answer present");
        validate_question(question, answer, &mut violations);
    }
    violations
}

fn validate_question(question: &Question, answer: &AnswerValue, out: &mut Vec<Violation>) {
    let qid = question.id;
    let cfg = &question.config;

    match question.question_type {
        QuestionType::SingleChoice
        | QuestionType::Dropdown
        | QuestionType::YesNo
        | QuestionType::PictureChoice => {
            if answer.choices().len() != 1 {
                out.push(Violation::new(
                    qid,
                    "INVALID_CHOICE_COUNT",
                    "Select exactly one option",
                ));
            }
        }
        QuestionType::MultipleChoice => {
            let n = answer.choices().len();
            if n == 0 {
                out.push(Violation::new(
                    qid,
                    "INVALID_CHOICE_COUNT",
                    "Select at least one option",
                ));
            } else if let Some(max) = cfg.max_selections {
                if n > max {
                    out.push(Violation::new(
                        qid,
                        "TOO_MANY_SELECTIONS",
                        format!("Select at most {} options", max),
                    ));
                }
            }
        }
        QuestionType::Text | QuestionType::TextArea => {
            let text = match answer {
                AnswerValue::Text { text_value } => text_value.as_str(),
                _ => {
                    out.push(invalid_value(qid));
                    return;
                }
            };
            let len = text.chars().count();
            if let Some(min) = cfg.min_length {
                if len < min {
                    out.push(Violation::new(
                        qid,
                        "TOO_SHORT",
                        format!("Enter at least {} characters", min),
                    ));
                }
            }
            if let Some(max) = cfg.max_length {
                if len > max {
                    out.push(Violation::new(
                        qid,
                        "TOO_LONG",
                        format!("Enter at most {} characters", max),
                    ));
                }
            }
            if let Some(pattern) = &cfg.pattern {
                // An invalid pattern is treated as unmatched, not as its own
                // violation kind
                let matched = regex_lite::Regex::new(pattern)
                    .map(|re| re.is_match(text))
                    .unwrap_or(false);
                if !matched {
                    out.push(Violation::new(
                        qid,
                        "PATTERN_MISMATCH",
                        "The value has an invalid format",
                    ));
                }
            }
        }
        QuestionType::Email => {
            let email = match answer {
                AnswerValue::Email { email } => email.as_str(),
                AnswerValue::Text { text_value } => text_value.as_str(),
                _ => {
                    out.push(invalid_value(qid));
                    return;
                }
            };
            if !validate_email(email) {
                out.push(Violation::new(qid, "INVALID_EMAIL", "Enter a valid email address"));
            }
        }
        QuestionType::Phone => {
            let phone = match answer {
                AnswerValue::Phone { phone } => phone.as_str(),
                AnswerValue::Text { text_value } => text_value.as_str(),
                _ => {
                    out.push(invalid_value(qid));
                    return;
                }
            };
            if !validate_phone(phone) {
                out.push(Violation::new(qid, "INVALID_PHONE", "Enter a valid phone number"));
            }
        }
        QuestionType::Url => {
            let url = match answer {
                AnswerValue::Url { url } => url.as_str(),
                AnswerValue::Text { text_value } => text_value.as_str(),
                _ => {
                    out.push(invalid_value(qid));
                    return;
                }
            };
            if !validate_url(url) {
                out.push(Violation::new(qid, "INVALID_URL", "Enter a valid URL"));
            } else if let Some(protocol) = &cfg.url_protocol {
                let prefix = format!("{}://", protocol.trim_end_matches("://"));
                if !url.starts_with(&prefix) {
                    out.push(Violation::new(
                        qid,
                        "INVALID_PROTOCOL",
                        format!("URL must start with {}", prefix),
                    ));
                }
            }
        }
        QuestionType::Number
        | QuestionType::Decimal
        | QuestionType::Slider
        | QuestionType::OpinionScale => {
            let Some(n) = answer.as_number() else {
                out.push(invalid_value(qid));
                return;
            };
            if let Some(min) = cfg.min_value {
                if n < min {
                    out.push(Violation::new(
                        qid,
                        "TOO_SMALL",
                        format!("Enter a value of at least {}", min),
                    ));
                }
            }
            if let Some(max) = cfg.max_value {
                if n > max {
                    out.push(Violation::new(
                        qid,
                        "TOO_LARGE",
                        format!("Enter a value of at most {}", max),
                    ));
                }
            }
        }
        QuestionType::ConstantSum => {
            validate_constant_sum(question, answer, out);
        }
        QuestionType::Date => {
            let parsed = match answer {
                AnswerValue::Date { date } => Some(*date),
                AnswerValue::Text { text_value } => {
                    NaiveDate::parse_from_str(text_value, "%Y-%m-%d").ok()
                }
                _ => None,
            };
            match parsed {
                None => out.push(Violation::new(qid, "INVALID_DATE", "Enter a valid date")),
                Some(date) => check_date_bounds(qid, date, cfg, out),
            }
        }
        QuestionType::Time => {
            let valid = matches!(answer, AnswerValue::Time { .. })
                || matches!(answer, AnswerValue::Text { text_value }
                    if chrono::NaiveTime::parse_from_str(text_value, "%H:%M:%S").is_ok()
                        || chrono::NaiveTime::parse_from_str(text_value, "%H:%M").is_ok());
            if !valid {
                out.push(Violation::new(qid, "INVALID_TIME", "Enter a valid time"));
            }
        }
        QuestionType::DateTime => {
            let parsed = match answer {
                AnswerValue::DateTime { date_time } => Some(*date_time),
                AnswerValue::Text { text_value } => {
                    NaiveDateTime::parse_from_str(text_value, "%Y-%m-%dT%H:%M:%S")
                        .or_else(|_| NaiveDateTime::parse_from_str(text_value, "%Y-%m-%d %H:%M:%S"))
                        .ok()
                }
                _ => None,
            };
            match parsed {
                None => out.push(Violation::new(qid, "INVALID_DATE", "Enter a valid date and time")),
                Some(dt) => check_date_bounds(qid, dt.date(), cfg, out),
            }
        }
        QuestionType::FileUpload | QuestionType::PhotoCapture => {
            let urls = match answer {
                AnswerValue::Files { file_urls } => file_urls.as_slice(),
                _ => {
                    out.push(invalid_value(qid));
                    return;
                }
            };
            if urls.is_empty() {
                out.push(Violation::new(qid, "NO_FILES", "Upload at least one file"));
            } else if let Some(max) = cfg.max_files {
                if urls.len() > max {
                    out.push(Violation::new(
                        qid,
                        "TOO_MANY_FILES",
                        format!("Upload at most {} files", max),
                    ));
                }
            }
        }
        QuestionType::MatrixSingle | QuestionType::MatrixMultiple | QuestionType::BipolarMatrix => {
            let valid = matches!(answer, AnswerValue::Json { json_value: Value::Object(m) } if !m.is_empty());
            if !valid {
                out.push(Violation::new(
                    qid,
                    "INVALID_MATRIX",
                    "Answer the matrix rows",
                ));
            }
        }
        QuestionType::Rank | QuestionType::GroupRank => {
            validate_ranking(qid, answer, out);
        }
        QuestionType::Payment => {
            let ok = matches!(
                answer,
                AnswerValue::Payment { payment_id, payment_status }
                    if !payment_id.trim().is_empty() && payment_status == "completed"
            );
            if !ok {
                out.push(Violation::new(
                    qid,
                    "PAYMENT_INCOMPLETE",
                    "Payment has not been completed",
                ));
            }
        }
        QuestionType::Signature => {
            let ok = match answer {
                AnswerValue::Signature { signature_url } => !signature_url.trim().is_empty(),
                AnswerValue::Boolean { boolean_value } => *boolean_value,
                _ => false,
            };
            if !ok {
                out.push(Violation::new(qid, "SIGNATURE_REQUIRED", "A signature is required"));
            }
        }
        QuestionType::Consent => {
            let ok = matches!(answer, AnswerValue::Boolean { boolean_value: true });
            if !ok {
                out.push(Violation::new(qid, "CONSENT_REQUIRED", "Consent is required"));
            }
        }
        QuestionType::ContactForm => {
            validate_contact_form(question, answer, out);
        }
        QuestionType::Descriptive => {}
    }
}

fn invalid_value(qid: Uuid) -> Violation {
    Violation::new(qid, "INVALID_VALUE", "The submitted value has the wrong shape")
}

fn check_date_bounds(
    qid: Uuid,
    date: NaiveDate,
    cfg: &crate::models::QuestionConfig,
    out: &mut Vec<Violation>,
) {
    if let Some(min) = cfg
        .min_date
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    {
        if date < min {
            out.push(Violation::new(
                qid,
                "DATE_TOO_EARLY",
                format!("Enter a date on or after {}", min),
            ));
        }
    }
    if let Some(max) = cfg
        .max_date
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    {
        if date > max {
            out.push(Violation::new(
                qid,
                "DATE_TOO_LATE",
                format!("Enter a date on or before {}", max),
            ));
        }
    }
}

fn validate_constant_sum(question: &Question, answer: &AnswerValue, out: &mut Vec<Violation>) {
    let qid = question.id;
    let cfg = &question.config;
    let values: Vec<f64> = match answer {
        AnswerValue::Json {
            json_value: Value::Array(items),
        } => {
            let nums: Vec<f64> = items.iter().filter_map(|v| v.as_f64()).collect();
            if nums.len() != items.len() {
                out.push(invalid_value(qid));
                return;
            }
            nums
        }
        _ => {
            out.push(invalid_value(qid));
            return;
        }
    };

    if values.iter().any(|v| *v < 0.0) {
        out.push(Violation::new(
            qid,
            "NEGATIVE_NOT_ALLOWED",
            "Values cannot be negative",
        ));
        return;
    }
    if cfg.allow_zero == Some(false) && values.iter().any(|v| *v == 0.0) {
        out.push(Violation::new(qid, "ZERO_NOT_ALLOWED", "Values cannot be zero"));
    }
    if let Some(total) = cfg.total_points {
        let sum: f64 = values.iter().sum();
        if (sum - total).abs() > 0.01 {
            out.push(Violation::new(
                qid,
                "INVALID_SUM",
                format!("Values must add up to {}", total),
            ));
        }
    }
}

fn validate_ranking(qid: Uuid, answer: &AnswerValue, out: &mut Vec<Violation>) {
    let items = match answer {
        AnswerValue::Json {
            json_value: Value::Array(items),
        } => items,
        _ => {
            out.push(Violation::new(qid, "INVALID_RANKING", "Provide a ranking"));
            return;
        }
    };
    if items.is_empty() {
        out.push(Violation::new(qid, "INVALID_RANKING", "Provide a ranking"));
        return;
    }
    // Ranks are either bare values (position = rank) or {value, rank} objects
    let mut ranks: Vec<String> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let rank = match item {
            Value::Object(m) => m
                .get("rank")
                .map(|r| r.to_string())
                .unwrap_or_else(|| i.to_string()),
            other => other.to_string(),
        };
        ranks.push(rank);
    }
    let mut dedup = ranks.clone();
    dedup.sort();
    dedup.dedup();
    if dedup.len() != ranks.len() {
        out.push(Violation::new(qid, "DUPLICATE_RANKS", "Each rank may be used once"));
    }
}

fn validate_contact_form(question: &Question, answer: &AnswerValue, out: &mut Vec<Violation>) {
    let qid = question.id;
    let fields = match answer {
        AnswerValue::Json {
            json_value: Value::Object(m),
        } => m,
        _ => {
            out.push(invalid_value(qid));
            return;
        }
    };
    let enabled: Vec<&str> = if question.config.contact_fields.is_empty() {
        vec!["name", "email"]
    } else {
        question
            .config
            .contact_fields
            .iter()
            .map(|s| s.as_str())
            .collect()
    };
    for field in enabled {
        let value = fields.get(field).and_then(|v| v.as_str()).unwrap_or("");
        if value.trim().is_empty() {
            out.push(
                Violation::new(qid, "REQUIRED", format!("{} is required", field))
                    .with_field(field),
            );
            continue;
        }
        match field {
            "email" if !validate_email(value) => out.push(
                Violation::new(qid, "INVALID_EMAIL", "Enter a valid email address")
                    .with_field(field),
            ),
            "phone" if !validate_phone(value) => out.push(
                Violation::new(qid, "INVALID_PHONE", "Enter a valid phone number")
                    .with_field(field),
            ),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OptionsSource, OrderMode, QuestionConfig};
    use serde_json::json;

    fn question(kind: QuestionType, required: bool, config: QuestionConfig) -> Question {
        Question {
            id: Uuid::new_v4(),
            group_id: None,
            index: 0,
            variable_name: "Q1".into(),
            question_type: kind,
            title_template: None,
            description_template: None,
            required,
            visible_if_expression_id: None,
            terminate_if_expression_id: None,
            options_source: OptionsSource::Own,
            carry_forward_question_id: None,
            carry_forward_filter_expression_id: None,
            option_order_mode: OrderMode::Sequential,
            options: vec![],
            items: vec![],
            scales: vec![],
            config,
        }
    }

    fn check(q: &Question, answer: Option<AnswerValue>) -> Vec<Violation> {
        let mut answers = HashMap::new();
        if let Some(a) = answer {
            answers.insert(q.id, a);
        }
        validate_page(&[q], &answers)
    }

    fn codes(violations: &[Violation]) -> Vec<&str> {
        violations.iter().map(|v| v.code.as_str()).collect()
    }

    #[test]
    fn required_fires_on_missing_and_empty() {
        let q = question(QuestionType::Text, true, QuestionConfig::default());
        assert_eq!(codes(&check(&q, None)), vec!["REQUIRED"]);
        assert_eq!(
            codes(&check(&q, Some(AnswerValue::Text { text_value: " ".into() }))),
            vec!["REQUIRED"]
        );
    }

    #[test]
    fn optional_empty_is_valid() {
        let q = question(QuestionType::Text, false, QuestionConfig::default());
        assert!(check(&q, None).is_empty());
    }

    #[test]
    fn single_choice_needs_exactly_one() {
        let q = question(QuestionType::SingleChoice, true, QuestionConfig::default());
        let two = AnswerValue::Choices {
            choices: vec!["a".into(), "b".into()],
        };
        assert_eq!(codes(&check(&q, Some(two))), vec!["INVALID_CHOICE_COUNT"]);
        let one = AnswerValue::Choices {
            choices: vec!["a".into()],
        };
        assert!(check(&q, Some(one)).is_empty());
    }

    #[test]
    fn multiple_choice_max_selections() {
        let q = question(
            QuestionType::MultipleChoice,
            true,
            QuestionConfig {
                max_selections: Some(2),
                ..Default::default()
            },
        );
        let three = AnswerValue::Choices {
            choices: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(codes(&check(&q, Some(three))), vec!["TOO_MANY_SELECTIONS"]);
    }

    #[test]
    fn text_length_and_pattern() {
        let q = question(
            QuestionType::Text,
            true,
            QuestionConfig {
                min_length: Some(3),
                max_length: Some(5),
                pattern: Some("^[a-z]+$".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            codes(&check(&q, Some(AnswerValue::Text { text_value: "ab".into() }))),
            vec!["TOO_SHORT"]
        );
        assert_eq!(
            codes(&check(&q, Some(AnswerValue::Text { text_value: "abcdef".into() }))),
            vec!["TOO_LONG"]
        );
        assert_eq!(
            codes(&check(&q, Some(AnswerValue::Text { text_value: "ABC".into() }))),
            vec!["PATTERN_MISMATCH"]
        );
        assert!(check(&q, Some(AnswerValue::Text { text_value: "abcd".into() })).is_empty());
    }

    #[test]
    fn invalid_pattern_is_treated_as_unmatched() {
        let q = question(
            QuestionType::Text,
            true,
            QuestionConfig {
                pattern: Some("([".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            codes(&check(&q, Some(AnswerValue::Text { text_value: "x".into() }))),
            vec!["PATTERN_MISMATCH"]
        );
    }

    #[test]
    fn email_and_url_checks() {
        let q = question(QuestionType::Email, true, QuestionConfig::default());
        assert_eq!(
            codes(&check(&q, Some(AnswerValue::Email { email: "nope".into() }))),
            vec!["INVALID_EMAIL"]
        );
        assert!(check(
            &q,
            Some(AnswerValue::Email {
                email: "a@example.com".into()
            })
        )
        .is_empty());

        let q = question(
            QuestionType::Url,
            true,
            QuestionConfig {
                url_protocol: Some("https".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            codes(&check(
                &q,
                Some(AnswerValue::Url {
                    url: "http://example.com".into()
                })
            )),
            vec!["INVALID_PROTOCOL"]
        );
    }

    #[test]
    fn numeric_bounds() {
        let q = question(
            QuestionType::Number,
            true,
            QuestionConfig {
                min_value: Some(1.0),
                max_value: Some(10.0),
                ..Default::default()
            },
        );
        assert_eq!(
            codes(&check(&q, Some(AnswerValue::Numeric { numeric_value: 0.5 }))),
            vec!["TOO_SMALL"]
        );
        assert_eq!(
            codes(&check(&q, Some(AnswerValue::Numeric { numeric_value: 11.0 }))),
            vec!["TOO_LARGE"]
        );
        assert!(check(&q, Some(AnswerValue::Numeric { numeric_value: 5.0 })).is_empty());
    }

    #[test]
    fn constant_sum_rules() {
        let q = question(
            QuestionType::ConstantSum,
            true,
            QuestionConfig {
                total_points: Some(100.0),
                allow_zero: Some(false),
                ..Default::default()
            },
        );
        let ok = AnswerValue::Json {
            json_value: json!([60.0, 40.0]),
        };
        assert!(check(&q, Some(ok)).is_empty());

        let bad_sum = AnswerValue::Json {
            json_value: json!([60.0, 50.0]),
        };
        assert_eq!(codes(&check(&q, Some(bad_sum))), vec!["INVALID_SUM"]);

        let with_zero = AnswerValue::Json {
            json_value: json!([100.0, 0.0]),
        };
        assert_eq!(codes(&check(&q, Some(with_zero))), vec!["ZERO_NOT_ALLOWED"]);

        let negative = AnswerValue::Json {
            json_value: json!([-1.0, 101.0]),
        };
        assert_eq!(codes(&check(&q, Some(negative))), vec!["NEGATIVE_NOT_ALLOWED"]);
    }

    #[test]
    fn rank_uniqueness() {
        let q = question(QuestionType::Rank, true, QuestionConfig::default());
        let dup = AnswerValue::Json {
            json_value: json!([{"value": "a", "rank": 1}, {"value": "b", "rank": 1}]),
        };
        assert_eq!(codes(&check(&q, Some(dup))), vec!["DUPLICATE_RANKS"]);
        let ok = AnswerValue::Json {
            json_value: json!([{"value": "a", "rank": 1}, {"value": "b", "rank": 2}]),
        };
        assert!(check(&q, Some(ok)).is_empty());
    }

    #[test]
    fn payment_must_be_completed() {
        let q = question(QuestionType::Payment, true, QuestionConfig::default());
        let pending = AnswerValue::Payment {
            payment_id: "pay_1".into(),
            payment_status: "pending".into(),
        };
        assert_eq!(codes(&check(&q, Some(pending))), vec!["PAYMENT_INCOMPLETE"]);
        let done = AnswerValue::Payment {
            payment_id: "pay_1".into(),
            payment_status: "completed".into(),
        };
        assert!(check(&q, Some(done)).is_empty());
    }

    #[test]
    fn contact_form_enabled_fields() {
        let q = question(
            QuestionType::ContactForm,
            true,
            QuestionConfig {
                contact_fields: vec!["name".into(), "email".into(), "phone".into()],
                ..Default::default()
            },
        );
        let partial = AnswerValue::Json {
            json_value: json!({"name": "Alice", "email": "bad", "phone": ""}),
        };
        let violations = check(&q, Some(partial));
        assert_eq!(codes(&violations), vec!["INVALID_EMAIL", "REQUIRED"]);
        assert_eq!(violations[1].field.as_deref(), Some("phone"));
    }

    #[test]
    fn consent_and_signature() {
        let q = question(QuestionType::Consent, true, QuestionConfig::default());
        assert_eq!(
            codes(&check(
                &q,
                Some(AnswerValue::Boolean {
                    boolean_value: false
                })
            )),
            vec!["CONSENT_REQUIRED"]
        );

        let q = question(QuestionType::Signature, true, QuestionConfig::default());
        assert!(check(
            &q,
            Some(AnswerValue::Signature {
                signature_url: "https://cdn/sig.png".into()
            })
        )
        .is_empty());
    }

    #[test]
    fn matrix_needs_object() {
        let q = question(QuestionType::MatrixSingle, true, QuestionConfig::default());
        let ok = AnswerValue::Json {
            json_value: json!({"row1": "col2"}),
        };
        assert!(check(&q, Some(ok)).is_empty());
        let bad = AnswerValue::Json {
            json_value: json!([1, 2]),
        };
        assert_eq!(codes(&check(&q, Some(bad))), vec!["INVALID_MATRIX"]);
    }
}
