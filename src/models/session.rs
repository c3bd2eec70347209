//! Session models
//!
//! One session is one respondent's pass through a survey. The state machine
//! is CREATED -> IN_PROGRESS -> (COMPLETED | TERMINATED | ABANDONED).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Session database entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub survey_id: Uuid,
    pub survey_version: i32,
    pub collector_id: Uuid,
    pub status: String,
    pub current_page_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub terminate_reason: Option<String>,
    pub meta: serde_json::Value,
    pub render_state: serde_json::Value,
    pub progress: serde_json::Value,
}

impl Session {
    pub fn session_status(&self) -> SessionStatus {
        SessionStatus::parse(&self.status)
    }

    pub fn parsed_meta(&self) -> SessionMeta {
        serde_json::from_value(self.meta.clone()).unwrap_or_default()
    }

    pub fn parsed_render_state(&self) -> RenderState {
        serde_json::from_value(self.render_state.clone()).unwrap_or_default()
    }

    pub fn parsed_progress(&self) -> ProgressData {
        serde_json::from_value(self.progress.clone()).unwrap_or_default()
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    InProgress,
    Completed,
    Terminated,
    Abandoned,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "IN_PROGRESS" => Self::InProgress,
            "COMPLETED" => Self::Completed,
            "TERMINATED" => Self::Terminated,
            "ABANDONED" => Self::Abandoned,
            _ => Self::Created,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Terminated => "TERMINATED",
            Self::Abandoned => "ABANDONED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated | Self::Abandoned)
    }
}

/// Respondent metadata captured at admission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Hash of ip + user agent, used for duplicate detection and reuse
    #[serde(default)]
    pub device_fingerprint: Option<String>,
    #[serde(default)]
    pub geo_country: Option<String>,
    #[serde(default)]
    pub utm: HashMap<String, String>,
    #[serde(default)]
    pub is_test: bool,
}

/// Per-session cache of resolved layouts plus loop state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderState {
    /// Resolved layout per page id, keyed by string for JSON round-tripping
    #[serde(default)]
    pub pages: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub loop_state: Option<LoopState>,
}

/// Active loop battery state, rewritten by the router inside the session
/// transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopState {
    pub battery_id: Uuid,
    pub start_page_id: Uuid,
    pub end_page_id: Uuid,
    pub current_iteration: usize,
    pub total_items: usize,
    pub items: Vec<serde_json::Value>,
    pub current_item: serde_json::Value,
}

/// Page history and last-submitted snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    #[serde(default)]
    pub page_history: Vec<Uuid>,
    #[serde(default)]
    pub last_submitted_page: Option<Uuid>,
}
