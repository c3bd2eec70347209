//! Quota models
//!
//! A plan enumerates buckets; each bucket caps qualifying completions via
//! `target_n + max_overfill`. Counters only move through conditional updates,
//! so the invariants hold without pessimistic locking:
//! `0 <= reserved_n` and `filled_n + reserved_n <= target_n + max_overfill`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Quota plan database entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuotaPlan {
    pub id: Uuid,
    pub survey_id: Uuid,
    pub name: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

impl QuotaPlan {
    pub fn plan_state(&self) -> QuotaPlanState {
        QuotaPlanState::parse(&self.state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaPlanState {
    Open,
    Paused,
    Closed,
}

impl QuotaPlanState {
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

/// Quota bucket database entity.
///
/// Addressing rule, evaluated in this order: `condition_expression_id` when
/// set, else `(question_id, option_value)` when set, else catch-all.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuotaBucket {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub name: String,
    pub target_n: i32,
    pub filled_n: i32,
    pub reserved_n: i32,
    pub max_overfill: i32,
    pub question_id: Option<Uuid>,
    pub option_value: Option<String>,
    pub condition_expression_id: Option<Uuid>,
}

impl QuotaBucket {
    /// Room left for another reservation or fill.
    pub fn has_capacity(&self) -> bool {
        self.filled_n + self.reserved_n < self.target_n + self.max_overfill
    }

    pub fn is_catch_all(&self) -> bool {
        self.condition_expression_id.is_none() && self.question_id.is_none()
    }
}

/// An active, released, or finalized reservation tying a session to a bucket.
/// At most one ACTIVE reservation exists per `(session, bucket)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuotaReservation {
    pub id: Uuid,
    pub session_id: Uuid,
    pub bucket_id: Uuid,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl QuotaReservation {
    pub fn reservation_state(&self) -> ReservationState {
        ReservationState::parse(&self.state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    Active,
    Released,
    Finalized,
}

impl ReservationState {
    pub fn parse(s: &str) -> Self {
        match s {
            "RELEASED" => Self::Released,
            "FINALIZED" => Self::Finalized,
            _ => Self::Active,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Released => "RELEASED",
            Self::Finalized => "FINALIZED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(target: i32, filled: i32, reserved: i32, overfill: i32) -> QuotaBucket {
        QuotaBucket {
            id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            name: "b".into(),
            target_n: target,
            filled_n: filled,
            reserved_n: reserved,
            max_overfill: overfill,
            question_id: None,
            option_value: None,
            condition_expression_id: None,
        }
    }

    #[test]
    fn capacity_respects_overfill() {
        assert!(bucket(1, 0, 0, 0).has_capacity());
        assert!(!bucket(1, 1, 0, 0).has_capacity());
        assert!(bucket(1, 1, 0, 1).has_capacity());
        assert!(!bucket(1, 1, 1, 1).has_capacity());
    }

    #[test]
    fn catch_all_detection() {
        let mut b = bucket(5, 0, 0, 0);
        assert!(b.is_catch_all());
        b.question_id = Some(Uuid::new_v4());
        assert!(!b.is_catch_all());
    }
}
