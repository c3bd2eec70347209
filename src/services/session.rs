//! Session controller
//!
//! Orchestrates the engine per API call: admission on start, resolve for
//! layout, validate -> persist -> quota -> terminate -> route on submit, and
//! the terminal transitions. Every mutating operation runs inside one
//! transaction that locks the session row and inserts its outbox rows before
//! commit; serialization conflicts retry a bounded number of times.

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::{PgConnection, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{
    self, resolve_page, route_next, EvalContext, NextStep, QuotaManager, ReserveOutcome,
    ResolvedPage, SettingsEngine,
};
use crate::error::{AppError, OptionExt};
use crate::models::{
    Answer, AnswerPayload, AnswerValue, CollectorType, EventType, LoopState, Page, ProgressData,
    RenderState, Session, SessionStatus, SurveyDefinition,
};
use crate::services::admission::{self, AdmissionOutcome, UserContext};
use crate::services::definition::{self, LoadedSurvey};
use crate::services::outbox::insert_event;
use crate::state::AppState;

/// Termination reason used when a quota bucket is saturated
pub const REASON_OVERQUOTA: &str = "OVERQUOTA";

/// Result of starting a session
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResult {
    pub session_id: Uuid,
    pub first_page_id: Uuid,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_resume: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub closing_soon: bool,
}

/// Result of a page submit
#[derive(Debug, Clone)]
pub enum SubmitResult {
    Next {
        page_id: Uuid,
        question_id: Option<Uuid>,
    },
    Complete {
        post_survey: engine::CompletionPolicy,
    },
    Terminated {
        reason: String,
    },
}

/// Result of resuming a session
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeResult {
    pub session_id: Uuid,
    pub current_page_id: Option<Uuid>,
    pub page_data: Option<ResolvedPage>,
    pub progress_data: ProgressData,
}

/// Session summary for the status endpoint
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    pub status: String,
    pub started_at: chrono::DateTime<Utc>,
    pub finalized_at: Option<chrono::DateTime<Utc>>,
    pub first_page_id: Option<Uuid>,
    pub collector: String,
}

// ============================================================================
// start
// ============================================================================

/// Start (or resume) a session for the collector behind `slug`.
pub async fn start(
    state: &AppState,
    slug: &str,
    token: Option<&str>,
    user: &UserContext,
) -> Result<StartResult, AppError> {
    let outcome = admission::admit(state, slug, token, user).await?;

    if let Some(existing) = &outcome.reusable_session {
        info!(session_id = %existing.id, "Reusing in-progress session");
        return Ok(StartResult {
            session_id: existing.id,
            first_page_id: existing
                .current_page_id
                .or_else(|| first_visible_page(&outcome.loaded.definition).map(|p| p.id))
                .ok_or_else(|| {
                    AppError::SurveyConfiguration("Survey has no visible first page".into())
                })?,
            is_resume: true,
            closing_soon: outcome.closing_soon,
        });
    }

    let AdmissionOutcome {
        collector,
        loaded,
        invite,
        meta,
        closing_soon,
        ..
    } = outcome;

    let first_page = first_visible_page(&loaded.definition).ok_or_else(|| {
        AppError::SurveyConfiguration("Survey has no visible first page".into())
    })?;

    let session_id = Uuid::new_v4();

    // A loop battery starting on the first page begins at iteration 0
    let ctx = EvalContext {
        question_id_map: loaded.definition.variable_map(),
        ..Default::default()
    };
    let loop_state = loaded
        .definition
        .loop_batteries
        .iter()
        .find(|b| b.start_page_id == first_page.id)
        .and_then(|battery| engine::initialize_loop(battery, session_id, &ctx));

    let render_state = RenderState {
        pages: HashMap::new(),
        loop_state,
    };

    let mut tx = state.db().begin().await?;

    sqlx::query(
        "INSERT INTO sessions \
         (id, tenant_id, survey_id, survey_version, collector_id, status, current_page_id, \
          meta, render_state, progress) \
         VALUES ($1, $2, $3, $4, $5, 'IN_PROGRESS', $6, $7, $8, $9)",
    )
    .bind(session_id)
    .bind(loaded.survey.tenant_id)
    .bind(loaded.survey.id)
    .bind(loaded.survey.version)
    .bind(collector.id)
    .bind(first_page.id)
    .bind(serde_json::to_value(&meta)?)
    .bind(serde_json::to_value(&render_state)?)
    .bind(serde_json::to_value(ProgressData::default())?)
    .execute(&mut *tx)
    .await?;

    if collector.kind() == CollectorType::SingleUse {
        if let Some(invite) = &invite {
            admission::consume_invite(&mut tx, invite.id, session_id).await?;
        }
    }

    insert_event(
        &mut tx,
        EventType::SessionStarted,
        loaded.survey.tenant_id,
        Some(loaded.survey.id),
        Some(session_id),
        json!({
            "collectorId": collector.id,
            "collectorType": collector.collector_type,
            "firstPageId": first_page.id,
        }),
    )
    .await?;

    tx.commit().await?;
    info!(%session_id, survey_id = %loaded.survey.id, "Session started");

    Ok(StartResult {
        session_id,
        first_page_id: first_page.id,
        is_resume: false,
        closing_soon,
    })
}

// ============================================================================
// layout
// ============================================================================

/// Resolve a page for rendering. Requires IN_PROGRESS.
pub async fn get_page_layout(
    state: &AppState,
    session_id: Uuid,
    page_id: Uuid,
) -> Result<(ResolvedPage, engine::NavigationPolicy), AppError> {
    let session = load_session(state, session_id).await?;
    require_in_progress(&session)?;

    let loaded = definition::load_survey(state, session.survey_id).await?;
    let page = loaded
        .definition
        .page(page_id)
        .ok_or_not_found("Page")?;

    let answers = load_answers(state.db(), session_id).await?;
    let render_state = session.parsed_render_state();
    let ctx = build_ctx(&loaded.definition, &answers, render_state.loop_state.as_ref());

    let resolved = resolve_page(&loaded.definition, page, session_id, &ctx);

    // The deterministic seed makes this cache a redundancy, but refreshes
    // must return identical content even if seeds ever change shape
    persist_render_page(state, &session, &resolved).await?;

    let policy = SettingsEngine::new().navigation(&loaded.definition.settings);
    Ok((resolved, policy))
}

// ============================================================================
// submit
// ============================================================================

/// Submit a page's answers and advance the session.
pub async fn submit_answers(
    state: &AppState,
    session_id: Uuid,
    page_id: Uuid,
    payloads: &[AnswerPayload],
) -> Result<SubmitResult, AppError> {
    let retries = state.config().runtime.conflict_retries;
    let mut attempt = 0;
    loop {
        match submit_once(state, session_id, page_id, payloads).await {
            Err(AppError::Database(e)) if is_serialization_conflict(&e) && attempt < retries => {
                attempt += 1;
                warn!(%session_id, attempt, "Submit conflict, retrying");
                continue;
            }
            Err(AppError::Database(e)) if is_serialization_conflict(&e) => {
                return Err(AppError::Conflict(
                    "The session is being modified concurrently".into(),
                ));
            }
            other => return other,
        }
    }
}

async fn submit_once(
    state: &AppState,
    session_id: Uuid,
    page_id: Uuid,
    payloads: &[AnswerPayload],
) -> Result<SubmitResult, AppError> {
    let mut tx = state.db().begin().await?;

    let session = lock_session(&mut tx, session_id).await?;
    require_in_progress(&session)?;

    let loaded = definition::load_survey(state, session.survey_id).await?;
    let page = loaded
        .definition
        .page(page_id)
        .ok_or_not_found("Page")?;

    let mut render_state = session.parsed_render_state();
    let answers_before = load_answers_conn(&mut tx, session_id).await?;

    // The submission replaces this page's answers wholesale, and visibility
    // and validation see the replacement state, so an answer on this page
    // can reveal or hide its neighbours
    let mut answers_now = answers_before.clone();
    for question in &page.questions {
        answers_now.remove(&question.id);
    }
    for payload in payloads {
        answers_now.insert(payload.question_id, payload.value.clone());
    }
    let ctx = build_ctx(&loaded.definition, &answers_now, render_state.loop_state.as_ref());

    let resolved = resolve_page(&loaded.definition, page, session_id, &ctx);
    let visible: Vec<&crate::models::Question> = resolved
        .questions()
        .filter_map(|rq| loaded.definition.question(rq.question_id))
        .collect();

    let mut violations = engine::validate_page(&visible, &answers_now);
    if !violations.is_empty() {
        let policy = SettingsEngine::new().validation(&loaded.definition.settings);
        if let Some(message) = policy.custom_error_message {
            for violation in &mut violations {
                violation.message = message.clone();
            }
        }
        return Err(AppError::ValidationFailed(violations));
    }

    // Replace this page's answers atomically: delete then insert
    sqlx::query("DELETE FROM answers WHERE session_id = $1 AND page_id = $2")
        .bind(session_id)
        .bind(page_id)
        .execute(&mut *tx)
        .await?;

    let page_question_ids: Vec<Uuid> = resolved.questions().map(|q| q.question_id).collect();
    let mut inserted: Vec<Uuid> = Vec::new();
    for payload in payloads {
        if !page_question_ids.contains(&payload.question_id) {
            continue;
        }
        if payload.value.is_empty() {
            continue;
        }
        sqlx::query(
            "INSERT INTO answers (id, session_id, question_id, page_id, value) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(payload.question_id)
        .bind(page_id)
        .bind(serde_json::to_value(&payload.value)?)
        .execute(&mut *tx)
        .await?;
        inserted.push(payload.question_id);

        insert_event(
            &mut tx,
            EventType::AnswerUpserted,
            session.tenant_id,
            Some(session.survey_id),
            Some(session_id),
            json!({
                "questionId": payload.question_id,
                "pageId": page_id,
                "value": payload.value,
            }),
        )
        .await?;
    }

    // Routing reads answers in page render order, not payload order
    let answered: Vec<Uuid> = page_question_ids
        .iter()
        .copied()
        .filter(|id| inserted.contains(id))
        .collect();

    // Quota: find the constraining buckets, then reserve. The conditional
    // update inside reserve is the authoritative capacity check; a session
    // that already holds a reservation passes through untouched, so a
    // resubmit cannot overquota itself.
    let plans = QuotaManager::load_open_plans(&mut tx, session.survey_id).await?;
    let matches = QuotaManager::matching_buckets(&loaded.definition, &plans, &ctx);
    match QuotaManager::reserve(&mut tx, session_id, &matches).await? {
        ReserveOutcome::Exhausted => {
            release_quota_with_event(&mut tx, &session).await?;
            terminate_in_tx(&mut tx, &session, REASON_OVERQUOTA).await?;
            tx.commit().await?;
            return Err(AppError::Overquota);
        }
        ReserveOutcome::Reserved { bucket_id } => {
            insert_event(
                &mut tx,
                EventType::QuotaReserved,
                session.tenant_id,
                Some(session.survey_id),
                Some(session_id),
                json!({ "bucketId": bucket_id }),
            )
            .await?;
        }
        ReserveOutcome::AlreadyReserved { .. } | ReserveOutcome::Unconstrained => {}
    }

    // Terminations and routing
    let outcome = route_next(
        &loaded.definition,
        page,
        &answered,
        render_state.loop_state.clone(),
        session_id,
        &ctx,
    );
    render_state.loop_state = outcome.loop_state.clone();

    let mut progress = session.parsed_progress();
    progress.last_submitted_page = Some(page_id);
    if !progress.page_history.contains(&page_id) {
        progress.page_history.push(page_id);
    }

    let result = match outcome.step {
        NextStep::Terminated { reason } => {
            release_quota_with_event(&mut tx, &session).await?;
            terminate_in_tx(&mut tx, &session, &reason).await?;
            tx.commit().await?;
            debug!(%session_id, %reason, "Session terminated by logic");
            SubmitResult::Terminated { reason }
        }
        NextStep::Complete => {
            let policy = complete_in_tx(&mut tx, &session, &loaded).await?;
            sqlx::query(
                "UPDATE sessions SET progress = $2, render_state = $3 WHERE id = $1",
            )
            .bind(session_id)
            .bind(serde_json::to_value(&progress)?)
            .bind(serde_json::to_value(&render_state)?)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            send_completion_email(state, session_id, &loaded, &policy).await;
            SubmitResult::Complete {
                post_survey: policy,
            }
        }
        NextStep::Next {
            page_id: next_page,
            question_id,
        } => {
            sqlx::query(
                "UPDATE sessions \
                 SET current_page_id = $2, last_activity_at = now(), \
                     progress = $3, render_state = $4 \
                 WHERE id = $1",
            )
            .bind(session_id)
            .bind(next_page)
            .bind(serde_json::to_value(&progress)?)
            .bind(serde_json::to_value(&render_state)?)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            SubmitResult::Next {
                page_id: next_page,
                question_id,
            }
        }
    };

    Ok(result)
}

// ============================================================================
// complete / terminate
// ============================================================================

/// Explicit completion of an in-progress session.
pub async fn complete(
    state: &AppState,
    session_id: Uuid,
) -> Result<engine::CompletionPolicy, AppError> {
    let mut tx = state.db().begin().await?;
    let session = lock_session(&mut tx, session_id).await?;
    let loaded = definition::load_survey(state, session.survey_id).await?;

    match session.session_status() {
        SessionStatus::Completed => {
            // Idempotent: return the policy without another transition
            let policy = SettingsEngine::new().completion(&loaded.definition.settings);
            return Ok(policy);
        }
        SessionStatus::InProgress => {}
        _ => return Err(AppError::SessionNotInProgress),
    }

    let policy = complete_in_tx(&mut tx, &session, &loaded).await?;
    tx.commit().await?;
    send_completion_email(state, session_id, &loaded, &policy).await;
    Ok(policy)
}

/// Client-initiated termination (abort).
pub async fn terminate(
    state: &AppState,
    session_id: Uuid,
    reason: &str,
) -> Result<(), AppError> {
    let mut tx = state.db().begin().await?;
    let session = lock_session(&mut tx, session_id).await?;
    require_in_progress(&session)?;

    release_quota_with_event(&mut tx, &session).await?;
    terminate_in_tx(&mut tx, &session, reason).await?;
    tx.commit().await?;
    info!(%session_id, %reason, "Session terminated");
    Ok(())
}

// ============================================================================
// resume / status
// ============================================================================

/// Reload the current page and recent progress for an in-progress session.
pub async fn resume(state: &AppState, session_id: Uuid) -> Result<ResumeResult, AppError> {
    let session = load_session(state, session_id).await?;
    require_in_progress(&session)?;

    let loaded = definition::load_survey(state, session.survey_id).await?;
    let ttl_hours = resume_ttl_hours(state, &loaded.definition);
    if ttl_hours > 0 {
        let deadline = session.last_activity_at + Duration::hours(ttl_hours as i64);
        if Utc::now() > deadline {
            return Err(AppError::SessionExpired);
        }
    }

    let page_data = match session.current_page_id {
        Some(page_id) => {
            let page = loaded
                .definition
                .page(page_id)
                .ok_or_not_found("Page")?;
            let answers = load_answers(state.db(), session_id).await?;
            let render_state = session.parsed_render_state();
            let ctx = build_ctx(&loaded.definition, &answers, render_state.loop_state.as_ref());
            Some(resolve_page(&loaded.definition, page, session_id, &ctx))
        }
        None => None,
    };

    sqlx::query("UPDATE sessions SET last_activity_at = now() WHERE id = $1")
        .bind(session_id)
        .execute(state.db())
        .await?;

    Ok(ResumeResult {
        session_id,
        current_page_id: session.current_page_id,
        page_data,
        progress_data: session.parsed_progress(),
    })
}

/// Session summary.
pub async fn status(state: &AppState, session_id: Uuid) -> Result<StatusResult, AppError> {
    let session = load_session(state, session_id).await?;

    let (slug,): (String,) = sqlx::query_as("SELECT slug FROM collectors WHERE id = $1")
        .bind(session.collector_id)
        .fetch_one(state.db())
        .await?;

    let loaded = definition::load_survey(state, session.survey_id).await?;
    let first_page_id = first_visible_page(&loaded.definition).map(|p| p.id);

    Ok(StatusResult {
        status: session.status.clone(),
        started_at: session.started_at,
        finalized_at: session.finalized_at,
        first_page_id,
        collector: slug,
    })
}

// ============================================================================
// shared helpers
// ============================================================================

fn first_visible_page(definition: &SurveyDefinition) -> Option<&Page> {
    let ctx = EvalContext {
        question_id_map: definition.variable_map(),
        ..Default::default()
    };
    let mut pages: Vec<&Page> = definition.pages.iter().collect();
    pages.sort_by_key(|p| p.index);
    pages.into_iter().find(|p| {
        resolve_page(definition, p, Uuid::nil(), &ctx).is_visible
    })
}

/// Build the evaluation context for a session's answers and loop state.
pub fn build_ctx(
    definition: &SurveyDefinition,
    answers: &HashMap<Uuid, AnswerValue>,
    loop_state: Option<&LoopState>,
) -> EvalContext {
    let mut loop_context = HashMap::new();
    if let Some(state) = loop_state {
        loop_context.insert("item".to_string(), state.current_item.clone());
        loop_context.insert("index".to_string(), json!(state.current_iteration));
        loop_context.insert("total".to_string(), json!(state.total_items));
    }
    EvalContext {
        answers: answers.clone(),
        loop_context,
        question_id_map: definition.variable_map(),
        additional: serde_json::Map::new(),
    }
}

async fn load_session(state: &AppState, session_id: Uuid) -> Result<Session, AppError> {
    sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
        .bind(session_id)
        .fetch_optional(state.db())
        .await?
        .ok_or_not_found("Session")
}

/// Row-level lock for mutating operations.
async fn lock_session(
    tx: &mut Transaction<'_, Postgres>,
    session_id: Uuid,
) -> Result<Session, AppError> {
    sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1 FOR UPDATE")
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_not_found("Session")
}

fn require_in_progress(session: &Session) -> Result<(), AppError> {
    if session.session_status() != SessionStatus::InProgress {
        return Err(AppError::SessionNotInProgress);
    }
    Ok(())
}

async fn load_answers(
    db: &sqlx::PgPool,
    session_id: Uuid,
) -> Result<HashMap<Uuid, AnswerValue>, AppError> {
    let rows: Vec<Answer> = sqlx::query_as::<_, Answer>(
        "SELECT * FROM answers WHERE session_id = $1",
    )
    .bind(session_id)
    .fetch_all(db)
    .await?;
    Ok(rows
        .into_iter()
        .map(|a| (a.question_id, a.parsed_value()))
        .collect())
}

async fn load_answers_conn(
    conn: &mut PgConnection,
    session_id: Uuid,
) -> Result<HashMap<Uuid, AnswerValue>, AppError> {
    let rows: Vec<Answer> = sqlx::query_as::<_, Answer>(
        "SELECT * FROM answers WHERE session_id = $1",
    )
    .bind(session_id)
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|a| (a.question_id, a.parsed_value()))
        .collect())
}

async fn persist_render_page(
    state: &AppState,
    session: &Session,
    resolved: &ResolvedPage,
) -> Result<(), AppError> {
    let mut render_state = session.parsed_render_state();
    render_state.pages.insert(
        resolved.page_id.to_string(),
        serde_json::to_value(resolved)?,
    );
    sqlx::query(
        "UPDATE sessions SET render_state = $2, last_activity_at = now() WHERE id = $1",
    )
    .bind(session.id)
    .bind(serde_json::to_value(&render_state)?)
    .execute(state.db())
    .await?;
    Ok(())
}

/// Terminal transition to TERMINATED inside the caller's transaction.
async fn terminate_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    session: &Session,
    reason: &str,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE sessions \
         SET status = 'TERMINATED', terminate_reason = $2, finalized_at = now(), \
             last_activity_at = now() \
         WHERE id = $1",
    )
    .bind(session.id)
    .bind(reason)
    .execute(&mut **tx)
    .await?;

    insert_event(
        tx,
        EventType::SessionTerminated,
        session.tenant_id,
        Some(session.survey_id),
        Some(session.id),
        json!({ "reason": reason }),
    )
    .await?;
    Ok(())
}

/// Terminal transition to COMPLETED: finalize quota, stamp, emit events.
async fn complete_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    session: &Session,
    loaded: &LoadedSurvey,
) -> Result<engine::CompletionPolicy, AppError> {
    let finalized = QuotaManager::finalize(tx, session.id).await?;
    for bucket_id in finalized {
        insert_event(
            tx,
            EventType::QuotaFinalized,
            session.tenant_id,
            Some(session.survey_id),
            Some(session.id),
            json!({ "bucketId": bucket_id }),
        )
        .await?;
    }

    sqlx::query(
        "UPDATE sessions \
         SET status = 'COMPLETED', finalized_at = now(), last_activity_at = now() \
         WHERE id = $1",
    )
    .bind(session.id)
    .execute(&mut **tx)
    .await?;

    insert_event(
        tx,
        EventType::SessionCompleted,
        session.tenant_id,
        Some(session.survey_id),
        Some(session.id),
        json!({ "collectorId": session.collector_id }),
    )
    .await?;

    Ok(SettingsEngine::new().completion(&loaded.definition.settings))
}

async fn release_quota_with_event(
    tx: &mut Transaction<'_, Postgres>,
    session: &Session,
) -> Result<(), AppError> {
    let released = QuotaManager::release(tx, session.id).await?;
    for bucket_id in released {
        insert_event(
            tx,
            EventType::QuotaReleased,
            session.tenant_id,
            Some(session.survey_id),
            Some(session.id),
            json!({ "bucketId": bucket_id }),
        )
        .await?;
    }
    Ok(())
}

/// Best-effort thank-you mail after commit; failures are logged only.
async fn send_completion_email(
    state: &AppState,
    session_id: Uuid,
    loaded: &LoadedSurvey,
    policy: &engine::CompletionPolicy,
) {
    if !policy.send_thank_you_email {
        return;
    }
    let answers = match load_answers(state.db(), session_id).await {
        Ok(answers) => answers,
        Err(e) => {
            warn!("Could not load answers for thank-you email: {}", e);
            return;
        }
    };
    let recipient = answers.values().find_map(|a| match a {
        AnswerValue::Email { email } => Some(email.clone()),
        _ => None,
    });
    let Some(recipient) = recipient else {
        debug!(%session_id, "No email answer; skipping thank-you mail");
        return;
    };
    if let Err(e) = state
        .email()
        .send_thank_you(
            &recipient,
            &loaded.survey.title,
            policy.thank_you_message.as_deref(),
        )
        .await
    {
        warn!("Thank-you email failed: {}", e);
    }
}

fn resume_ttl_hours(state: &AppState, definition: &SurveyDefinition) -> u32 {
    let configured = definition.settings.responses.incomplete_ttl_hours;
    if configured > 0 {
        configured
    } else {
        state.config().runtime.default_incomplete_ttl_hours
    }
}

/// Serialization/deadlock conflicts worth retrying.
fn is_serialization_conflict(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("40001") | Some("40P01")
        ),
        _ => false,
    }
}
