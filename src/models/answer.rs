//! Answer models
//!
//! An answer is unique per `(session, question)` and carries a tagged value
//! union with one case per family of question kinds. Resubmitting a page
//! deletes and re-inserts that page's answers inside one transaction.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Answer database entity. `value` is the serialized [`AnswerValue`].
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Answer {
    pub id: Uuid,
    pub session_id: Uuid,
    pub question_id: Uuid,
    pub page_id: Uuid,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Answer {
    pub fn parsed_value(&self) -> AnswerValue {
        serde_json::from_value(self.value.clone()).unwrap_or(AnswerValue::Empty)
    }
}

/// One submitted answer in a page submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub question_id: Uuid,
    #[serde(flatten)]
    pub value: AnswerValue,
}

/// The typed answer union. The validator dispatches on the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AnswerValue {
    Choices {
        choices: Vec<String>,
    },
    Text {
        #[serde(rename = "textValue")]
        text_value: String,
    },
    Numeric {
        #[serde(rename = "numericValue")]
        numeric_value: f64,
    },
    Decimal {
        #[serde(rename = "decimalValue")]
        decimal_value: Decimal,
    },
    Boolean {
        #[serde(rename = "booleanValue")]
        boolean_value: bool,
    },
    Email {
        email: String,
    },
    Phone {
        phone: String,
    },
    Url {
        url: String,
    },
    Date {
        date: NaiveDate,
    },
    Time {
        time: NaiveTime,
    },
    DateTime {
        #[serde(rename = "dateTime")]
        date_time: NaiveDateTime,
    },
    Files {
        #[serde(rename = "fileUrls")]
        file_urls: Vec<String>,
    },
    Signature {
        #[serde(rename = "signatureUrl")]
        signature_url: String,
    },
    Payment {
        #[serde(rename = "paymentId")]
        payment_id: String,
        #[serde(rename = "paymentStatus")]
        payment_status: String,
    },
    Json {
        #[serde(rename = "jsonValue")]
        json_value: serde_json::Value,
    },
    Empty,
}

impl AnswerValue {
    /// Uniform emptiness across the union: all-null, all-empty-string, or
    /// all-empty-collections count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Choices { choices } => choices.is_empty(),
            Self::Text { text_value } => text_value.trim().is_empty(),
            Self::Email { email } => email.trim().is_empty(),
            Self::Phone { phone } => phone.trim().is_empty(),
            Self::Url { url } => url.trim().is_empty(),
            Self::Files { file_urls } => file_urls.is_empty(),
            Self::Signature { signature_url } => signature_url.trim().is_empty(),
            Self::Payment { payment_id, .. } => payment_id.trim().is_empty(),
            Self::Json { json_value } => match json_value {
                serde_json::Value::Null => true,
                serde_json::Value::Object(m) => m.is_empty(),
                serde_json::Value::Array(a) => a.is_empty(),
                serde_json::Value::String(s) => s.trim().is_empty(),
                _ => false,
            },
            Self::Numeric { .. }
            | Self::Decimal { .. }
            | Self::Boolean { .. }
            | Self::Date { .. }
            | Self::Time { .. }
            | Self::DateTime { .. } => false,
        }
    }

    /// Selected option values, empty for non-choice answers.
    pub fn choices(&self) -> &[String] {
        match self {
            Self::Choices { choices } => choices,
            _ => &[],
        }
    }

    /// The primary scalar used by `answer(Q)` in the DSL: first choice for
    /// choice answers, else the first non-null scalar field.
    pub fn primary_scalar(&self) -> serde_json::Value {
        use serde_json::{json, Value};
        match self {
            Self::Choices { choices } => choices
                .first()
                .map(|c| Value::String(c.clone()))
                .unwrap_or(Value::Null),
            Self::Text { text_value } => json!(text_value),
            Self::Numeric { numeric_value } => json!(numeric_value),
            Self::Decimal { decimal_value } => decimal_value
                .to_string()
                .parse::<f64>()
                .map(|f| json!(f))
                .unwrap_or(Value::Null),
            Self::Boolean { boolean_value } => json!(boolean_value),
            Self::Email { email } => json!(email),
            Self::Phone { phone } => json!(phone),
            Self::Url { url } => json!(url),
            Self::Date { date } => json!(date.to_string()),
            Self::Time { time } => json!(time.to_string()),
            Self::DateTime { date_time } => json!(date_time.to_string()),
            Self::Files { file_urls } => file_urls
                .first()
                .map(|u| Value::String(u.clone()))
                .unwrap_or(Value::Null),
            Self::Signature { signature_url } => json!(signature_url),
            Self::Payment { payment_id, .. } => json!(payment_id),
            Self::Json { json_value } => json_value.clone(),
            Self::Empty => Value::Null,
        }
    }

    /// Numeric view where the value coerces cleanly, `None` otherwise.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Numeric { numeric_value } => Some(*numeric_value),
            Self::Decimal { decimal_value } => decimal_value.to_string().parse().ok(),
            Self::Text { text_value } => text_value.trim().parse().ok(),
            Self::Choices { choices } if choices.len() == 1 => choices[0].parse().ok(),
            _ => None,
        }
    }
}
