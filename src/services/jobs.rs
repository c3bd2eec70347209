//! Background maintenance jobs
//!
//! Two periodic sweeps with explicit start/stop lifecycles: releasing
//! expired quota reservations and abandoning sessions past their inactivity
//! TTL. Both are idempotent and safe to run on multiple instances.

use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::QuotaManager;
use crate::error::AppError;
use crate::models::EventType;
use crate::services::outbox::insert_event;

/// Handle for a spawned periodic job.
pub struct JobHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl JobHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
        info!(job = self.name, "Background job stopped");
    }
}

fn spawn_periodic<F, Fut>(name: &'static str, interval: Duration, job: F) -> JobHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), AppError>> + Send,
{
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        info!(job = name, interval_secs = interval.as_secs(), "Background job started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = job().await {
                        error!(job = name, "Job tick failed: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
    JobHandle {
        name,
        shutdown,
        handle,
    }
}

/// Sweep ACTIVE reservations past their expiry back to RELEASED, emitting
/// a release event per reservation.
pub fn spawn_reservation_sweeper(pool: PgPool, interval: Duration) -> JobHandle {
    spawn_periodic("reservation-sweeper", interval, move || {
        let pool = pool.clone();
        async move {
            let mut tx = pool.begin().await?;
            let released = QuotaManager::cleanup_expired(&mut tx).await?;
            if released.is_empty() {
                tx.commit().await?;
                return Ok(());
            }

            let session_ids: Vec<Uuid> = released.iter().map(|(s, _)| *s).collect();
            let owners: Vec<(Uuid, Uuid, Uuid)> = sqlx::query_as(
                "SELECT id, tenant_id, survey_id FROM sessions WHERE id = ANY($1)",
            )
            .bind(&session_ids)
            .fetch_all(&mut *tx)
            .await?;

            for (session_id, bucket_id) in &released {
                let Some((_, tenant_id, survey_id)) =
                    owners.iter().find(|(id, _, _)| id == session_id)
                else {
                    continue;
                };
                insert_event(
                    &mut tx,
                    EventType::QuotaReleased,
                    *tenant_id,
                    Some(*survey_id),
                    Some(*session_id),
                    json!({ "bucketId": bucket_id, "expired": true }),
                )
                .await?;
            }
            tx.commit().await?;
            info!(released = released.len(), "Released expired quota reservations");
            Ok(())
        }
    })
}

/// Close IN_PROGRESS sessions whose last activity is past the TTL: release
/// their reservations, mark them ABANDONED, and emit a termination event.
pub fn spawn_session_closer(
    pool: PgPool,
    interval: Duration,
    default_ttl_hours: u32,
) -> JobHandle {
    spawn_periodic("session-closer", interval, move || {
        let pool = pool.clone();
        async move { close_stale_sessions(&pool, default_ttl_hours).await }
    })
}

async fn close_stale_sessions(pool: &PgPool, default_ttl_hours: u32) -> Result<(), AppError> {
    // Surveys can shorten the TTL via settings; the sweep applies the
    // stricter of the two
    let stale: Vec<(Uuid, Uuid, Uuid)> = sqlx::query_as(
        "SELECT s.id, s.tenant_id, s.survey_id \
         FROM sessions s \
         JOIN surveys sv ON sv.id = s.survey_id \
         WHERE s.status = 'IN_PROGRESS' \
           AND s.last_activity_at < now() - make_interval(hours => \
               LEAST( \
                   COALESCE(NULLIF((sv.definition #>> '{settings,responses,incompleteTtlHours}')::int, 0), $1), \
                   $1)) \
         LIMIT 200",
    )
    .bind(default_ttl_hours as i32)
    .fetch_all(pool)
    .await?;

    if stale.is_empty() {
        return Ok(());
    }
    debug!(count = stale.len(), "Abandoning stale sessions");

    for (session_id, tenant_id, survey_id) in stale {
        let mut tx = pool.begin().await?;

        // Re-check under the row lock; another instance may have raced us
        let still_stale: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM sessions WHERE id = $1 AND status = 'IN_PROGRESS' FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;
        if still_stale.is_none() {
            continue;
        }

        let released = QuotaManager::release(&mut tx, session_id).await?;
        for bucket_id in released {
            insert_event(
                &mut tx,
                EventType::QuotaReleased,
                tenant_id,
                Some(survey_id),
                Some(session_id),
                json!({ "bucketId": bucket_id }),
            )
            .await?;
        }

        sqlx::query(
            "UPDATE sessions \
             SET status = 'ABANDONED', finalized_at = now() \
             WHERE id = $1",
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        insert_event(
            &mut tx,
            EventType::SessionTerminated,
            tenant_id,
            Some(survey_id),
            Some(session_id),
            json!({ "reason": "ABANDONED" }),
        )
        .await?;

        tx.commit().await?;
    }
    Ok(())
}
