//! Outbox models
//!
//! Outbox rows are written in the same transaction as the state change they
//! describe. The relay publishes them after commit, in id (commit) order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbox event database entity. `id` is a BIGSERIAL so relay order follows
/// commit order.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_type: String,
    pub tenant_id: Uuid,
    pub survey_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Event bus topics, one per outbox row type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    SessionStarted,
    SessionCompleted,
    SessionTerminated,
    AnswerUpserted,
    QuotaReserved,
    QuotaReleased,
    QuotaFinalized,
}

impl EventType {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session.started",
            Self::SessionCompleted => "session.completed",
            Self::SessionTerminated => "session.terminated",
            Self::AnswerUpserted => "answer.upserted",
            Self::QuotaReserved => "quota.reserved",
            Self::QuotaReleased => "quota.released",
            Self::QuotaFinalized => "quota.finalized",
        }
    }
}
