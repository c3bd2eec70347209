//! Respondent runtime routes
//!
//! The request/response surface one respondent drives: start, layout,
//! submit, complete, terminate, resume, status. Session start is
//! rate-limited per IP; everything else is keyed by an unguessable session
//! id.

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::engine::{CompletionPolicy, NavigationPolicy, ResolvedPage};
use crate::error::{AppError, AppResult};
use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter};
use crate::models::AnswerPayload;
use crate::services::session::{
    self, ResumeResult, StartResult, StatusResult, SubmitResult,
};
use crate::services::UserContext;
use crate::state::AppState;

/// Per-IP limiter for the admission endpoint
fn start_limiter() -> &'static RateLimiter {
    static LIMITER: OnceLock<RateLimiter> = OnceLock::new();
    LIMITER.get_or_init(|| RateLimiter::new(RateLimitConfig::strict()))
}

/// Query parameters for session start
#[derive(Debug, Deserialize)]
pub struct StartQuery {
    pub slug: String,
    /// Invite token for SINGLE_USE collectors
    pub t: Option<String>,
    /// Survey password when one is configured
    pub pw: Option<String>,
}

/// Submit request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub page_id: Uuid,
    pub answers: Vec<AnswerPayload>,
}

/// Terminate request body
#[derive(Debug, Deserialize)]
pub struct TerminateRequest {
    pub reason: Option<String>,
}

/// Layout response: the resolved page plus UI policy
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutResponse {
    pub page: ResolvedPage,
    pub settings: NavigationPolicy,
}

/// Submit response, one variant populated
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<NextTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_survey_settings: Option<CompletionPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTarget {
    pub page_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<Uuid>,
}

/// Completion response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub success: bool,
    pub post_survey_settings: CompletionPolicy,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /runtime/start?slug=<slug>[&t=<token>]
async fn start_session(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<StartQuery>,
    Query(raw_query): Query<HashMap<String, String>>,
) -> AppResult<Json<StartResult>> {
    let ip = client_ip(&headers, addr);
    if start_limiter().check(ip).await.is_err() {
        return Err(AppError::RateLimitExceeded);
    }

    let user = user_context(&headers, ip, &query, &raw_query);
    let result = session::start(&state, &query.slug, query.t.as_deref(), &user).await?;
    Ok(Json(result))
}

/// GET /runtime/:session_id/pages/:page_id/layout
async fn page_layout(
    State(state): State<AppState>,
    Path((session_id, page_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<LayoutResponse>> {
    let (page, settings) = session::get_page_layout(&state, session_id, page_id).await?;
    Ok(Json(LayoutResponse { page, settings }))
}

/// POST /runtime/:session_id/answers
async fn submit_answers(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<SubmitRequest>,
) -> AppResult<Json<SubmitResponse>> {
    let result = session::submit_answers(&state, session_id, body.page_id, &body.answers).await?;

    let response = match result {
        SubmitResult::Next {
            page_id,
            question_id,
        } => SubmitResponse {
            next: Some(NextTarget {
                page_id,
                question_id,
            }),
            complete: None,
            post_survey_settings: None,
            terminated: None,
            reason: None,
        },
        SubmitResult::Complete { post_survey } => SubmitResponse {
            next: None,
            complete: Some(true),
            post_survey_settings: Some(post_survey),
            terminated: None,
            reason: None,
        },
        SubmitResult::Terminated { reason } => SubmitResponse {
            next: None,
            complete: None,
            post_survey_settings: None,
            terminated: Some(true),
            reason: Some(reason),
        },
    };
    Ok(Json(response))
}

/// POST /runtime/:session_id/complete
async fn complete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<CompleteResponse>> {
    let post_survey_settings = session::complete(&state, session_id).await?;
    Ok(Json(CompleteResponse {
        success: true,
        post_survey_settings,
    }))
}

/// POST /runtime/:session_id/terminate
async fn terminate_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<TerminateRequest>,
) -> AppResult<Json<SuccessResponse>> {
    let reason = body.reason.unwrap_or_else(|| "USER_ABORT".to_string());
    session::terminate(&state, session_id, &reason).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// GET /runtime/:session_id/resume
async fn resume_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<ResumeResult>> {
    let result = session::resume(&state, session_id).await?;
    Ok(Json(result))
}

/// GET /runtime/:session_id/status
async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<StatusResult>> {
    let result = session::status(&state, session_id).await?;
    Ok(Json(result))
}

// ============================================================================
// Request context helpers
// ============================================================================

/// Client IP: X-Forwarded-For wins over the socket address.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(|| addr.ip())
}

fn user_context(
    headers: &HeaderMap,
    ip: IpAddr,
    query: &StartQuery,
    raw_query: &HashMap<String, String>,
) -> UserContext {
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let referer_host = headers
        .get(axum::http::header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_host)
        .map(|h| h.to_lowercase());

    let utm: HashMap<String, String> = raw_query
        .iter()
        .filter(|(k, _)| k.starts_with("utm_"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    UserContext {
        ip: Some(ip.to_string()),
        user_agent,
        referer_host,
        password: query.pw.clone(),
        utm,
    }
}

/// Host part of a URL without pulling in a URL parser.
fn extract_host(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.split('@').last()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Runtime routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_session))
        .route("/:session_id/pages/:page_id/layout", get(page_layout))
        .route("/:session_id/answers", post(submit_answers))
        .route("/:session_id/complete", post(complete_session))
        .route("/:session_id/terminate", post(terminate_session))
        .route("/:session_id/resume", get(resume_session))
        .route("/:session_id/status", get(session_status))
}
