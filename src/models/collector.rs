//! Collector and invite models
//!
//! A collector is a distribution endpoint for one survey. SINGLE_USE
//! collectors own invites, each consumable exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Collector database entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Collector {
    pub id: Uuid,
    pub survey_id: Uuid,
    pub slug: String,
    pub collector_type: String,
    pub status: String,
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
    pub max_responses: Option<i32>,
    /// Per-collector policy knobs: device reuse, test traffic
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Collector {
    pub fn kind(&self) -> CollectorType {
        CollectorType::parse(&self.collector_type)
    }

    pub fn collector_status(&self) -> CollectorStatus {
        CollectorStatus::parse(&self.status)
    }

    pub fn parsed_settings(&self) -> CollectorSettings {
        serde_json::from_value(self.settings.clone()).unwrap_or_default()
    }

    /// Open for traffic at `now`, considering status and the open/close window.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if self.collector_status() != CollectorStatus::Open {
            return false;
        }
        if let Some(opens) = self.opens_at {
            if now < opens {
                return false;
            }
        }
        if let Some(closes) = self.closes_at {
            if now > closes {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectorType {
    Public,
    SingleUse,
    Internal,
    Panel,
}

impl CollectorType {
    pub fn parse(s: &str) -> Self {
        match s {
            "SINGLE_USE" => Self::SingleUse,
            "INTERNAL" => Self::Internal,
            "PANEL" => Self::Panel,
            _ => Self::Public,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::SingleUse => "SINGLE_USE",
            Self::Internal => "INTERNAL",
            Self::Panel => "PANEL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectorStatus {
    Open,
    Paused,
    Closed,
}

impl CollectorStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "PAUSED" => Self::Paused,
            "CLOSED" => Self::Closed,
            _ => Self::Open,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Paused => "PAUSED",
            Self::Closed => "CLOSED",
        }
    }
}

/// Per-collector policy bag
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorSettings {
    /// Allow a device holding an IN_PROGRESS session to resume it instead of
    /// starting over
    #[serde(default = "default_true")]
    pub allow_session_reuse: bool,
    #[serde(default)]
    pub allow_multiple_per_device: bool,
    #[serde(default)]
    pub allow_test_responses: bool,
}

fn default_true() -> bool {
    true
}

/// Invite database entity, owned by a SINGLE_USE collector
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invite {
    pub id: Uuid,
    pub collector_id: Uuid,
    pub token: String,
    pub email: Option<String>,
    pub external_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Invite {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        if self.consumed_at.is_some() {
            return false;
        }
        match self.expires_at {
            Some(exp) => now <= exp,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn collector(status: &str, opens: Option<i64>, closes: Option<i64>) -> Collector {
        let now = Utc::now();
        Collector {
            id: Uuid::new_v4(),
            survey_id: Uuid::new_v4(),
            slug: "test".into(),
            collector_type: "PUBLIC".into(),
            status: status.into(),
            opens_at: opens.map(|h| now + Duration::hours(h)),
            closes_at: closes.map(|h| now + Duration::hours(h)),
            max_responses: None,
            settings: serde_json::json!({}),
            created_at: now,
        }
    }

    #[test]
    fn window_gating() {
        let now = Utc::now();
        assert!(collector("OPEN", None, None).is_open(now));
        assert!(!collector("CLOSED", None, None).is_open(now));
        assert!(!collector("OPEN", Some(1), None).is_open(now));
        assert!(!collector("OPEN", None, Some(-1)).is_open(now));
        assert!(collector("OPEN", Some(-1), Some(1)).is_open(now));
    }

    #[test]
    fn invite_usability() {
        let now = Utc::now();
        let mut invite = Invite {
            id: Uuid::new_v4(),
            collector_id: Uuid::new_v4(),
            token: "t".into(),
            email: None,
            external_id: None,
            expires_at: None,
            consumed_at: None,
            session_id: None,
            created_at: now,
        };
        assert!(invite.is_usable(now));
        invite.expires_at = Some(now - Duration::minutes(1));
        assert!(!invite.is_usable(now));
        invite.expires_at = None;
        invite.consumed_at = Some(now);
        assert!(!invite.is_usable(now));
    }
}
