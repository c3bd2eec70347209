//! Quota management
//!
//! Bucket matching is pure; counter mutations run inside the caller's
//! transaction as conditional updates, so the safety invariant
//! `filled_n + reserved_n <= target_n + max_overfill` holds under
//! concurrency without pessimistic locks. Releases are fully symmetric
//! with reserves.

use chrono::{Duration, Utc};
use sqlx::PgConnection;
use tracing::debug;
use uuid::Uuid;

use super::expression::{evaluate_bool, EvalContext};
use crate::error::AppError;
use crate::models::{QuotaBucket, QuotaPlan, QuotaPlanState, QuotaReservation, SurveyDefinition};

/// Reservation lifetime; expired reservations are swept back to RELEASED.
pub const RESERVATION_TTL_MINUTES: i64 = 30;

/// Result of a capacity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCheck {
    /// No bucket constrains this session
    Unconstrained,
    /// At least one matching bucket still has room
    Allowed,
    /// Every matching bucket is saturated
    Exhausted,
}

/// Result of a reservation attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    Unconstrained,
    Reserved { bucket_id: Uuid },
    /// The session already holds an active reservation in a matched bucket
    AlreadyReserved { bucket_id: Uuid },
    Exhausted,
}

pub struct QuotaManager;

impl QuotaManager {
    /// All OPEN plans with their buckets, in plan creation order.
    pub async fn load_open_plans(
        conn: &mut PgConnection,
        survey_id: Uuid,
    ) -> Result<Vec<(QuotaPlan, Vec<QuotaBucket>)>, AppError> {
        let plans: Vec<QuotaPlan> = sqlx::query_as::<_, QuotaPlan>(
            "SELECT * FROM quota_plans WHERE survey_id = $1 ORDER BY created_at, id",
        )
        .bind(survey_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut result = Vec::new();
        for plan in plans {
            if plan.plan_state() != QuotaPlanState::Open {
                continue;
            }
            let buckets: Vec<QuotaBucket> = sqlx::query_as::<_, QuotaBucket>(
                "SELECT * FROM quota_buckets WHERE plan_id = $1 ORDER BY name, id",
            )
            .bind(plan.id)
            .fetch_all(&mut *conn)
            .await?;
            result.push((plan, buckets));
        }
        Ok(result)
    }

    /// Buckets whose addressing rule matches the session's answers, across
    /// all open plans, in evaluation order.
    pub fn matching_buckets<'a>(
        definition: &SurveyDefinition,
        plans: &'a [(QuotaPlan, Vec<QuotaBucket>)],
        ctx: &EvalContext,
    ) -> Vec<&'a QuotaBucket> {
        plans
            .iter()
            .flat_map(|(_, buckets)| buckets.iter())
            .filter(|bucket| Self::bucket_matches(definition, bucket, ctx))
            .collect()
    }

    fn bucket_matches(
        definition: &SurveyDefinition,
        bucket: &QuotaBucket,
        ctx: &EvalContext,
    ) -> bool {
        if let Some(expr_id) = bucket.condition_expression_id {
            return definition
                .expression_source(expr_id)
                .map(|source| evaluate_bool(source, ctx))
                .unwrap_or(false);
        }
        if let Some(question_id) = bucket.question_id {
            let Some(answer) = ctx.answers.get(&question_id) else {
                return false;
            };
            let Some(wanted) = bucket.option_value.as_deref() else {
                return false;
            };
            let choices = answer.choices();
            if !choices.is_empty() {
                return choices.iter().any(|c| c == wanted);
            }
            return answer.primary_scalar().as_str() == Some(wanted);
        }
        // Catch-all
        true
    }

    /// Proceed iff no bucket matches or at least one matching bucket has
    /// capacity. Pure read.
    pub fn check(matches: &[&QuotaBucket]) -> QuotaCheck {
        if matches.is_empty() {
            return QuotaCheck::Unconstrained;
        }
        if matches.iter().any(|b| b.has_capacity()) {
            QuotaCheck::Allowed
        } else {
            QuotaCheck::Exhausted
        }
    }

    /// Reserve one slot in the first matching bucket that still fits. The
    /// counter moves through a conditional update; losing a race simply
    /// falls through to the next bucket.
    ///
    /// At most one reservation is created per call. Reservations are unique
    /// per `(session, bucket)`, so a resubmit against an already-reserved
    /// bucket is idempotent, while a session whose answers newly match a
    /// bucket from an independent plan still reserves there.
    pub async fn reserve(
        conn: &mut PgConnection,
        session_id: Uuid,
        matches: &[&QuotaBucket],
    ) -> Result<ReserveOutcome, AppError> {
        if matches.is_empty() {
            return Ok(ReserveOutcome::Unconstrained);
        }

        // Resubmits keep an existing reservation in any of the buckets
        // matched by this call
        let match_ids: Vec<Uuid> = matches.iter().map(|b| b.id).collect();
        let existing: Option<QuotaReservation> = sqlx::query_as::<_, QuotaReservation>(
            "SELECT * FROM quota_reservations \
             WHERE session_id = $1 AND state = 'ACTIVE' AND bucket_id = ANY($2) \
             LIMIT 1",
        )
        .bind(session_id)
        .bind(&match_ids)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(reservation) = existing {
            return Ok(ReserveOutcome::AlreadyReserved {
                bucket_id: reservation.bucket_id,
            });
        }

        for bucket in matches {
            let updated = sqlx::query(
                "UPDATE quota_buckets \
                 SET reserved_n = reserved_n + 1 \
                 WHERE id = $1 AND reserved_n + filled_n < target_n + max_overfill",
            )
            .bind(bucket.id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

            if updated == 1 {
                let expires_at = Utc::now() + Duration::minutes(RESERVATION_TTL_MINUTES);
                sqlx::query(
                    "INSERT INTO quota_reservations (id, session_id, bucket_id, state, created_at, expires_at) \
                     VALUES ($1, $2, $3, 'ACTIVE', now(), $4)",
                )
                .bind(Uuid::new_v4())
                .bind(session_id)
                .bind(bucket.id)
                .bind(expires_at)
                .execute(&mut *conn)
                .await?;
                debug!(%session_id, bucket_id = %bucket.id, "quota reserved");
                return Ok(ReserveOutcome::Reserved {
                    bucket_id: bucket.id,
                });
            }
        }
        Ok(ReserveOutcome::Exhausted)
    }

    /// Move every ACTIVE reservation of the session to FINALIZED:
    /// `reserved_n -= 1`, `filled_n += 1`. Returns affected bucket ids.
    pub async fn finalize(
        conn: &mut PgConnection,
        session_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let buckets: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE quota_buckets b \
             SET reserved_n = b.reserved_n - 1, filled_n = b.filled_n + 1 \
             FROM quota_reservations r \
             WHERE r.bucket_id = b.id AND r.session_id = $1 \
               AND r.state = 'ACTIVE' AND b.reserved_n > 0 \
             RETURNING b.id",
        )
        .bind(session_id)
        .fetch_all(&mut *conn)
        .await?;

        sqlx::query(
            "UPDATE quota_reservations SET state = 'FINALIZED' \
             WHERE session_id = $1 AND state = 'ACTIVE'",
        )
        .bind(session_id)
        .execute(&mut *conn)
        .await?;

        Ok(buckets.into_iter().map(|(id,)| id).collect())
    }

    /// Move every ACTIVE reservation of the session to RELEASED:
    /// `reserved_n -= 1`. Fully symmetric with reserve.
    pub async fn release(
        conn: &mut PgConnection,
        session_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let buckets: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE quota_buckets b \
             SET reserved_n = b.reserved_n - 1 \
             FROM quota_reservations r \
             WHERE r.bucket_id = b.id AND r.session_id = $1 \
               AND r.state = 'ACTIVE' AND b.reserved_n > 0 \
             RETURNING b.id",
        )
        .bind(session_id)
        .fetch_all(&mut *conn)
        .await?;

        sqlx::query(
            "UPDATE quota_reservations SET state = 'RELEASED' \
             WHERE session_id = $1 AND state = 'ACTIVE'",
        )
        .bind(session_id)
        .execute(&mut *conn)
        .await?;

        Ok(buckets.into_iter().map(|(id,)| id).collect())
    }

    /// Sweep ACTIVE reservations past their expiry back to RELEASED,
    /// returning the affected `(session, bucket)` pairs so the caller can
    /// emit release events. Idempotent; run periodically by a background
    /// job.
    pub async fn cleanup_expired(
        conn: &mut PgConnection,
    ) -> Result<Vec<(Uuid, Uuid)>, AppError> {
        let released: Vec<(Uuid, Uuid)> = sqlx::query_as(
            "UPDATE quota_buckets b \
             SET reserved_n = b.reserved_n - 1 \
             FROM quota_reservations r \
             WHERE r.bucket_id = b.id AND r.state = 'ACTIVE' \
               AND r.expires_at < now() AND b.reserved_n > 0 \
             RETURNING r.session_id, b.id",
        )
        .fetch_all(&mut *conn)
        .await?;

        sqlx::query(
            "UPDATE quota_reservations SET state = 'RELEASED' \
             WHERE state = 'ACTIVE' AND expires_at < now()",
        )
        .execute(&mut *conn)
        .await?;

        Ok(released)
    }

    /// True when the survey should stop admitting: the hard-close target of
    /// completed sessions is met, or every bucket across all open plans is
    /// saturated.
    pub async fn should_close_survey(
        conn: &mut PgConnection,
        survey_id: Uuid,
        hard_close_target: Option<i64>,
    ) -> Result<bool, AppError> {
        if let Some(target) = hard_close_target {
            let completed: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sessions WHERE survey_id = $1 AND status = 'COMPLETED'",
            )
            .bind(survey_id)
            .fetch_one(&mut *conn)
            .await?;
            if completed.0 >= target {
                return Ok(true);
            }
        }

        let counts: Option<(i64, i64)> = sqlx::query_as(
            "SELECT COUNT(*), \
                    COUNT(*) FILTER (WHERE b.filled_n + b.reserved_n >= b.target_n + b.max_overfill) \
             FROM quota_buckets b \
             JOIN quota_plans p ON p.id = b.plan_id \
             WHERE p.survey_id = $1 AND p.state = 'OPEN'",
        )
        .bind(survey_id)
        .fetch_optional(&mut *conn)
        .await?;

        match counts {
            Some((total, saturated)) if total > 0 => Ok(total == saturated),
            _ => Ok(false),
        }
    }
}
