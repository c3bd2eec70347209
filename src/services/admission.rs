//! Admission service
//!
//! Everything that happens before a session exists: collector lookup by
//! slug, open-window and capacity checks, invite validation for SINGLE_USE
//! collectors, duplicate detection by device fingerprint, the VPN policy
//! lookup, and reuse of an existing in-progress session.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::PgConnection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::{AdmissionContext, AdmissionRejection, QuotaManager, SettingsEngine};
use crate::error::{AppError, OptionExt};
use crate::models::{Collector, CollectorType, Invite, Session, SessionMeta, SurveyStatus};
use crate::services::definition::{self, LoadedSurvey};
use crate::state::AppState;

/// Request-scoped respondent context gathered from headers
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Lowercased host of the Referer header
    pub referer_host: Option<String>,
    pub password: Option<String>,
    pub utm: std::collections::HashMap<String, String>,
}

/// Everything the session controller needs to create or resume a session
#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    pub collector: Collector,
    pub loaded: LoadedSurvey,
    pub invite: Option<Invite>,
    pub meta: SessionMeta,
    /// An IN_PROGRESS session for the same collector and device, when reuse
    /// is allowed
    pub reusable_session: Option<Session>,
    /// Collector is near its close window or response cap
    pub closing_soon: bool,
}

/// Run the full admission pipeline for a start request.
pub async fn admit(
    state: &AppState,
    slug: &str,
    token: Option<&str>,
    user: &UserContext,
) -> Result<AdmissionOutcome, AppError> {
    let collector: Collector =
        sqlx::query_as::<_, Collector>("SELECT * FROM collectors WHERE slug = $1")
            .bind(slug)
            .fetch_optional(state.db())
            .await?
            .ok_or_not_found("Collector")?;

    let now = Utc::now();
    if !collector.is_open(now) {
        return Err(AppError::AdmissionRejected(AdmissionRejection::AlreadyClosed));
    }

    let loaded = definition::load_survey(state, collector.survey_id).await?;
    if loaded.survey.survey_status() != SurveyStatus::Published {
        return Err(AppError::AdmissionRejected(AdmissionRejection::AlreadyClosed));
    }

    // Stop admitting once the hard-close target is met or every quota bucket
    // is saturated
    {
        let mut conn = state.db().acquire().await?;
        let closed = QuotaManager::should_close_survey(
            &mut conn,
            collector.survey_id,
            loaded.definition.settings.completion.hard_close_target,
        )
        .await?;
        if closed {
            return Err(AppError::AdmissionRejected(AdmissionRejection::AlreadyClosed));
        }
    }

    // Response cap across finished and in-flight sessions
    let mut closing_soon = false;
    if let Some(max) = collector.max_responses {
        let (used,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sessions \
             WHERE collector_id = $1 AND status IN ('IN_PROGRESS', 'COMPLETED')",
        )
        .bind(collector.id)
        .fetch_one(state.db())
        .await?;
        if used >= max as i64 {
            return Err(AppError::AdmissionRejected(AdmissionRejection::AlreadyClosed));
        }
        closing_soon = used * 10 >= (max as i64) * 9;
    }
    if let Some(closes) = collector.closes_at {
        closing_soon = closing_soon || (closes - now) < chrono::Duration::hours(1);
    }

    // SINGLE_USE collectors require a live invite token
    let invite = match collector.kind() {
        CollectorType::SingleUse => {
            let token =
                token.ok_or_else(|| AppError::BadRequest("An invite token is required".into()))?;
            let invite: Invite = sqlx::query_as::<_, Invite>(
                "SELECT * FROM invites WHERE collector_id = $1 AND token = $2",
            )
            .bind(collector.id)
            .bind(token)
            .fetch_optional(state.db())
            .await?
            .ok_or_not_found("Invite")?;
            if !invite.is_usable(now) {
                // A consumed invite may still resume its own session
                if let Some(session_id) = invite.session_id {
                    if let Some(session) = in_progress_session(state.db(), session_id).await? {
                        return Ok(AdmissionOutcome {
                            meta: session.parsed_meta(),
                            reusable_session: Some(session),
                            collector,
                            loaded,
                            invite: Some(invite),
                            closing_soon,
                        });
                    }
                }
                return Err(AppError::AdmissionRejected(
                    AdmissionRejection::DuplicateSubmission,
                ));
            }
            Some(invite)
        }
        _ => None,
    };

    let fingerprint = device_fingerprint(user.ip.as_deref(), user.user_agent.as_deref());

    // Duplicate detection: a completed session from the same device
    let device_has_submission = match &fingerprint {
        Some(fp) => {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sessions \
                 WHERE collector_id = $1 AND status = 'COMPLETED' \
                   AND meta ->> 'deviceFingerprint' = $2",
            )
            .bind(collector.id)
            .bind(fp)
            .fetch_one(state.db())
            .await?;
            count > 0
        }
        None => false,
    };

    // VPN verdict only when the survey asks for it and a lookup is wired up
    let is_vpn = if loaded.definition.settings.security.block_vpn {
        vpn_verdict(state, user.ip.as_deref()).await
    } else {
        None
    };

    let engine = SettingsEngine::new();
    let decision = engine.admission(
        &loaded.definition.settings,
        &AdmissionContext {
            supplied_password: user.password.as_deref(),
            referer_host: user.referer_host.as_deref(),
            now: Some(now),
            device_has_submission,
            is_vpn,
        },
    );
    if let Some(reason) = decision.reason {
        return Err(AppError::AdmissionRejected(reason));
    }

    // Session reuse: same collector + device, still in progress
    let reusable_session = match (&fingerprint, collector.parsed_settings().allow_session_reuse) {
        (Some(fp), true) => {
            sqlx::query_as::<_, Session>(
                "SELECT * FROM sessions \
                 WHERE collector_id = $1 AND status = 'IN_PROGRESS' \
                   AND meta ->> 'deviceFingerprint' = $2 \
                 ORDER BY started_at DESC LIMIT 1",
            )
            .bind(collector.id)
            .bind(fp)
            .fetch_optional(state.db())
            .await?
        }
        _ => None,
    };

    let meta = SessionMeta {
        ip: user.ip.clone(),
        user_agent: user.user_agent.clone(),
        device_fingerprint: fingerprint,
        geo_country: None,
        utm: user.utm.clone(),
        is_test: false,
    };

    Ok(AdmissionOutcome {
        collector,
        loaded,
        invite,
        meta,
        reusable_session,
        closing_soon,
    })
}

/// Consume an invite exactly once inside the session-creation transaction.
/// The conditional update makes the consumption race-safe.
pub async fn consume_invite(
    conn: &mut PgConnection,
    invite_id: Uuid,
    session_id: Uuid,
) -> Result<(), AppError> {
    let updated = sqlx::query(
        "UPDATE invites SET consumed_at = now(), session_id = $2 \
         WHERE id = $1 AND consumed_at IS NULL",
    )
    .bind(invite_id)
    .bind(session_id)
    .execute(conn)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::AdmissionRejected(
            AdmissionRejection::DuplicateSubmission,
        ));
    }
    Ok(())
}

async fn in_progress_session(
    db: &sqlx::PgPool,
    session_id: Uuid,
) -> Result<Option<Session>, AppError> {
    let session = sqlx::query_as::<_, Session>(
        "SELECT * FROM sessions WHERE id = $1 AND status = 'IN_PROGRESS'",
    )
    .bind(session_id)
    .fetch_optional(db)
    .await?;
    Ok(session)
}

/// Stable device fingerprint from ip + user agent.
pub fn device_fingerprint(ip: Option<&str>, user_agent: Option<&str>) -> Option<String> {
    if ip.is_none() && user_agent.is_none() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(ip.unwrap_or(""));
    hasher.update("|");
    hasher.update(user_agent.unwrap_or(""));
    Some(hex::encode(&hasher.finalize()[..16]))
}

/// Ask the configured lookup service whether the ip is a VPN exit. Faults
/// degrade to `None`, which the settings engine treats as "allow".
async fn vpn_verdict(state: &AppState, ip: Option<&str>) -> Option<bool> {
    let config = &state.config().vpn_lookup;
    let endpoint = config.endpoint.as_deref()?;
    let ip = ip?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_secs))
        .build()
        .ok()?;

    match client.get(endpoint).query(&[("ip", ip)]).send().await {
        Ok(response) => match response.json::<serde_json::Value>().await {
            Ok(body) => {
                let verdict = body.get("isVpn").and_then(|v| v.as_bool());
                debug!(ip = %ip, ?verdict, "VPN lookup");
                verdict
            }
            Err(e) => {
                warn!("VPN lookup returned unparseable body: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("VPN lookup failed: {}", e);
            None
        }
    }
}
