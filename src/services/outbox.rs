//! Transactional outbox and relay
//!
//! State changes insert outbox rows inside their own transaction; a
//! background relay polls unpublished rows in commit order, publishes them
//! to the event bus, and stamps `published_at`. Delivery is at-least-once;
//! consumers deduplicate by outbox id. The relay also maintains short-TTL
//! dashboard counters, best-effort only.

use async_trait::async_trait;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{EventType, OutboxEvent};
use crate::redis::RedisManager;

/// Dashboard counter TTL. Counters are approximate by design; a relay crash
/// can lose or double one increment.
const COUNTER_TTL_SECS: u64 = 86_400;

/// Insert one outbox row inside the caller's transaction.
pub async fn insert_event(
    conn: &mut PgConnection,
    event_type: EventType,
    tenant_id: Uuid,
    survey_id: Option<Uuid>,
    session_id: Option<Uuid>,
    payload: serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO outbox_events (event_type, tenant_id, survey_id, session_id, payload) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(event_type.topic())
    .bind(tenant_id)
    .bind(survey_id)
    .bind(session_id)
    .bind(payload)
    .execute(conn)
    .await?;
    Ok(())
}

/// Downstream event bus abstraction
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), AppError>;
}

pub type DynEventBus = Arc<dyn EventBus>;

/// Redis pub/sub implementation; one channel per topic under the
/// `survey.events.` prefix.
pub struct RedisEventBus {
    redis: RedisManager,
}

impl RedisEventBus {
    pub fn new(redis: RedisManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), AppError> {
        let channel = format!("survey.events.{}", event.event_type);
        let message = json!({
            "outboxId": event.id,
            "type": event.event_type,
            "tenantId": event.tenant_id,
            "surveyId": event.survey_id,
            "sessionId": event.session_id,
            "payload": event.payload,
            "createdAt": event.created_at,
        });
        let mut redis = self.redis.clone();
        redis
            .publish(&channel, &message.to_string())
            .await
            .map_err(|e| AppError::ExternalServiceUnavailable(format!("event bus: {}", e)))?;
        Ok(())
    }
}

/// Bus that drops everything; test and degraded-mode fallback.
pub struct NoOpEventBus;

#[async_trait]
impl EventBus for NoOpEventBus {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), AppError> {
        debug!(outbox_id = event.id, topic = %event.event_type, "NoOp bus drop");
        Ok(())
    }
}

/// Handle for the background relay task with an explicit stop.
pub struct OutboxRelay {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl OutboxRelay {
    /// Start the relay loop. Lifecycle is tied to server startup/shutdown.
    pub fn spawn(
        pool: PgPool,
        redis: RedisManager,
        bus: DynEventBus,
        poll_interval: Duration,
        batch_size: i64,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            info!(
                poll_ms = poll_interval.as_millis() as u64,
                batch = batch_size,
                "Outbox relay started"
            );
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = relay_tick(&pool, &redis, bus.as_ref(), batch_size).await {
                            error!("Outbox relay tick failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Outbox relay stopping");
                            break;
                        }
                    }
                }
            }
        });
        Self { shutdown, handle }
    }

    /// Signal the loop to stop and wait for it to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// One poll: fetch unpublished rows in id (commit) order, publish, stamp.
/// Publishing stops at the first failure so per-session order is preserved.
async fn relay_tick(
    pool: &PgPool,
    redis: &RedisManager,
    bus: &dyn EventBus,
    batch_size: i64,
) -> Result<(), AppError> {
    let events: Vec<OutboxEvent> = sqlx::query_as::<_, OutboxEvent>(
        "SELECT * FROM outbox_events WHERE published_at IS NULL ORDER BY id LIMIT $1",
    )
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    if events.is_empty() {
        return Ok(());
    }
    debug!(count = events.len(), "Relaying outbox events");

    for event in &events {
        if let Err(e) = bus.publish(event).await {
            warn!(outbox_id = event.id, "Publish failed, will retry: {}", e);
            return Ok(());
        }

        sqlx::query("UPDATE outbox_events SET published_at = now() WHERE id = $1")
            .bind(event.id)
            .execute(pool)
            .await?;

        // Best-effort dashboard counters, never on the transactional path
        update_counters(redis, event).await;
    }
    Ok(())
}

/// Short-TTL activity counters for real-time dashboards.
async fn update_counters(redis: &RedisManager, event: &OutboxEvent) {
    let Some(survey_id) = event.survey_id else {
        return;
    };
    let suffix = match event.event_type.as_str() {
        "session.started" => "starts",
        "session.completed" => "completes",
        "session.terminated" => "terminates",
        "answer.upserted" => "answers",
        _ => return,
    };
    let key = format!("survey:stats:{}:{}", survey_id, suffix);
    let mut redis = redis.clone();
    if let Err(e) = redis.incr_with_ttl(&key, COUNTER_TTL_SECS).await {
        warn!("Dashboard counter update failed: {}", e);
    }
}
