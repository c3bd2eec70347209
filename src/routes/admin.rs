//! Admin authoring routes
//!
//! Thin CRUD around surveys, collectors, invites, and quota plans. The
//! runtime engine never writes through these; they exist so a deployment is
//! drivable end-to-end. Authentication sits in front of this router as an
//! external middleware.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::engine::expression::parse;
use crate::error::{AppError, AppResult, OptionExt};
use crate::models::survey::is_valid_variable_name;
use crate::models::{Collector, Invite, QuotaBucket, QuotaPlan, Survey, SurveyDefinition};
use crate::services::definition;
use crate::state::AppState;

// ============================================================================
// Surveys
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSurveyRequest {
    pub tenant_id: Uuid,
    #[validate(length(min = 1, max = 300))]
    pub title: String,
    #[serde(default = "default_language")]
    pub default_language: String,
    pub definition: SurveyDefinition,
}

fn default_language() -> String {
    "en".to_string()
}

/// Reject definitions the runtime could not execute: bad variable names,
/// duplicate variables, unparseable expressions, dangling loop pages.
fn validate_definition(definition: &SurveyDefinition) -> Result<(), AppError> {
    let mut seen = std::collections::HashSet::new();
    for question in definition.pages.iter().flat_map(|p| p.questions.iter()) {
        if !is_valid_variable_name(&question.variable_name) {
            return Err(AppError::InvalidInput(format!(
                "Invalid variable name: {}",
                question.variable_name
            )));
        }
        if !seen.insert(question.variable_name.clone()) {
            return Err(AppError::InvalidInput(format!(
                "Duplicate variable name: {}",
                question.variable_name
            )));
        }
    }
    for expression in &definition.expressions {
        if let Err(e) = parse(&expression.source) {
            return Err(AppError::InvalidInput(format!(
                "Expression {} does not parse: {}",
                expression.id, e
            )));
        }
    }
    for battery in &definition.loop_batteries {
        if definition.page(battery.start_page_id).is_none()
            || definition.page(battery.end_page_id).is_none()
        {
            return Err(AppError::InvalidInput(format!(
                "Loop battery {} references missing pages",
                battery.id
            )));
        }
    }
    Ok(())
}

async fn create_survey(
    State(state): State<AppState>,
    Json(body): Json<CreateSurveyRequest>,
) -> AppResult<Json<Survey>> {
    body.validate()?;
    validate_definition(&body.definition)?;

    let survey: Survey = sqlx::query_as::<_, Survey>(
        "INSERT INTO surveys (id, tenant_id, title, status, version, default_language, definition) \
         VALUES ($1, $2, $3, 'draft', 1, $4, $5) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(body.tenant_id)
    .bind(&body.title)
    .bind(&body.default_language)
    .bind(serde_json::to_value(&body.definition)?)
    .fetch_one(state.db())
    .await?;

    Ok(Json(survey))
}

async fn get_survey(
    State(state): State<AppState>,
    Path(survey_id): Path<Uuid>,
) -> AppResult<Json<Survey>> {
    let survey = sqlx::query_as::<_, Survey>("SELECT * FROM surveys WHERE id = $1")
        .bind(survey_id)
        .fetch_optional(state.db())
        .await?
        .ok_or_not_found("Survey")?;
    Ok(Json(survey))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSurveyRequest {
    pub title: Option<String>,
    pub definition: Option<SurveyDefinition>,
}

/// Draft-only edits; published surveys change through versioning on publish.
async fn update_survey(
    State(state): State<AppState>,
    Path(survey_id): Path<Uuid>,
    Json(body): Json<UpdateSurveyRequest>,
) -> AppResult<Json<Survey>> {
    if let Some(definition) = &body.definition {
        validate_definition(definition)?;
    }

    let survey = sqlx::query_as::<_, Survey>("SELECT * FROM surveys WHERE id = $1")
        .bind(survey_id)
        .fetch_optional(state.db())
        .await?
        .ok_or_not_found("Survey")?;
    if survey.status == "published" {
        return Err(AppError::Conflict(
            "Published surveys are immutable; publish a new version".into(),
        ));
    }

    let updated = sqlx::query_as::<_, Survey>(
        "UPDATE surveys SET \
            title = COALESCE($2, title), \
            definition = COALESCE($3, definition), \
            updated_at = now() \
         WHERE id = $1 RETURNING *",
    )
    .bind(survey_id)
    .bind(body.title)
    .bind(
        body.definition
            .map(|d| serde_json::to_value(&d))
            .transpose()?,
    )
    .fetch_one(state.db())
    .await?;

    Ok(Json(updated))
}

/// Publish bumps the version and invalidates the definition cache.
async fn publish_survey(
    State(state): State<AppState>,
    Path(survey_id): Path<Uuid>,
) -> AppResult<Json<Survey>> {
    let survey = sqlx::query_as::<_, Survey>(
        "UPDATE surveys SET status = 'published', version = version + 1, updated_at = now() \
         WHERE id = $1 RETURNING *",
    )
    .bind(survey_id)
    .fetch_optional(state.db())
    .await?
    .ok_or_not_found("Survey")?;

    definition::invalidate_cache(&state, survey.id, survey.version).await;
    Ok(Json(survey))
}

// ============================================================================
// Collectors and invites
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollectorRequest {
    pub survey_id: Uuid,
    #[validate(length(min = 3, max = 80))]
    pub slug: String,
    #[serde(default = "default_collector_type")]
    pub collector_type: String,
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
    pub max_responses: Option<i32>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_collector_type() -> String {
    "PUBLIC".to_string()
}

async fn create_collector(
    State(state): State<AppState>,
    Json(body): Json<CreateCollectorRequest>,
) -> AppResult<Json<Collector>> {
    body.validate()?;

    let collector = sqlx::query_as::<_, Collector>(
        "INSERT INTO collectors \
         (id, survey_id, slug, collector_type, status, opens_at, closes_at, max_responses, settings) \
         VALUES ($1, $2, $3, $4, 'OPEN', $5, $6, $7, $8) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(body.survey_id)
    .bind(&body.slug)
    .bind(&body.collector_type)
    .bind(body.opens_at)
    .bind(body.closes_at)
    .bind(body.max_responses)
    .bind(&body.settings)
    .fetch_one(state.db())
    .await?;

    Ok(Json(collector))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitesRequest {
    /// Generate this many anonymous invites
    pub count: Option<u32>,
    /// Or one invite per email
    #[serde(default)]
    pub emails: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CreateInvitesResponse {
    pub invites: Vec<Invite>,
}

fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

async fn create_invites(
    State(state): State<AppState>,
    Path(collector_id): Path<Uuid>,
    Json(body): Json<CreateInvitesRequest>,
) -> AppResult<Json<CreateInvitesResponse>> {
    let collector = sqlx::query_as::<_, Collector>("SELECT * FROM collectors WHERE id = $1")
        .bind(collector_id)
        .fetch_optional(state.db())
        .await?
        .ok_or_not_found("Collector")?;
    if collector.collector_type != "SINGLE_USE" {
        return Err(AppError::BadRequest(
            "Invites only apply to SINGLE_USE collectors".into(),
        ));
    }

    let total = body.count.unwrap_or(0) as usize + body.emails.len();
    if total == 0 || total > 10_000 {
        return Err(AppError::InvalidInput(
            "Request between 1 and 10000 invites".into(),
        ));
    }

    let mut emails: Vec<Option<String>> = body.emails.into_iter().map(Some).collect();
    emails.extend(std::iter::repeat(None).take(body.count.unwrap_or(0) as usize));

    let mut tx = state.db().begin().await?;
    let mut invites = Vec::with_capacity(emails.len());
    for email in emails {
        let invite = sqlx::query_as::<_, Invite>(
            "INSERT INTO invites (id, collector_id, token, email, expires_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(collector_id)
        .bind(generate_token())
        .bind(email)
        .bind(body.expires_at)
        .fetch_one(&mut *tx)
        .await?;
        invites.push(invite);
    }
    tx.commit().await?;

    Ok(Json(CreateInvitesResponse { invites }))
}

// ============================================================================
// Quota plans
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuotaBucketRequest {
    pub name: String,
    pub target_n: i32,
    #[serde(default)]
    pub max_overfill: i32,
    pub question_id: Option<Uuid>,
    pub option_value: Option<String>,
    pub condition_expression_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuotaPlanRequest {
    pub survey_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub buckets: Vec<CreateQuotaBucketRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaPlanResponse {
    pub plan: QuotaPlan,
    pub buckets: Vec<QuotaBucket>,
}

async fn create_quota_plan(
    State(state): State<AppState>,
    Json(body): Json<CreateQuotaPlanRequest>,
) -> AppResult<Json<QuotaPlanResponse>> {
    body.validate()?;
    for bucket in &body.buckets {
        if bucket.target_n < 0 || bucket.max_overfill < 0 {
            return Err(AppError::InvalidInput(
                "Bucket targets and overfill must be non-negative".into(),
            ));
        }
        if bucket.question_id.is_some() && bucket.option_value.is_none() {
            return Err(AppError::InvalidInput(
                "Option-addressed buckets need an option value".into(),
            ));
        }
    }

    let mut tx = state.db().begin().await?;

    let plan = sqlx::query_as::<_, QuotaPlan>(
        "INSERT INTO quota_plans (id, survey_id, name, state) \
         VALUES ($1, $2, $3, 'OPEN') RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(body.survey_id)
    .bind(&body.name)
    .fetch_one(&mut *tx)
    .await?;

    let mut buckets = Vec::with_capacity(body.buckets.len());
    for bucket in &body.buckets {
        let row = sqlx::query_as::<_, QuotaBucket>(
            "INSERT INTO quota_buckets \
             (id, plan_id, name, target_n, filled_n, reserved_n, max_overfill, \
              question_id, option_value, condition_expression_id) \
             VALUES ($1, $2, $3, $4, 0, 0, $5, $6, $7, $8) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(plan.id)
        .bind(&bucket.name)
        .bind(bucket.target_n)
        .bind(bucket.max_overfill)
        .bind(bucket.question_id)
        .bind(&bucket.option_value)
        .bind(bucket.condition_expression_id)
        .fetch_one(&mut *tx)
        .await?;
        buckets.push(row);
    }

    tx.commit().await?;
    Ok(Json(QuotaPlanResponse { plan, buckets }))
}

async fn list_quota_plans(
    State(state): State<AppState>,
    Path(survey_id): Path<Uuid>,
) -> AppResult<Json<Vec<QuotaPlanResponse>>> {
    let plans: Vec<QuotaPlan> = sqlx::query_as::<_, QuotaPlan>(
        "SELECT * FROM quota_plans WHERE survey_id = $1 ORDER BY created_at",
    )
    .bind(survey_id)
    .fetch_all(state.db())
    .await?;

    let mut result = Vec::with_capacity(plans.len());
    for plan in plans {
        let buckets: Vec<QuotaBucket> = sqlx::query_as::<_, QuotaBucket>(
            "SELECT * FROM quota_buckets WHERE plan_id = $1 ORDER BY name",
        )
        .bind(plan.id)
        .fetch_all(state.db())
        .await?;
        result.push(QuotaPlanResponse { plan, buckets });
    }
    Ok(Json(result))
}

/// Live counter snapshot for one survey's buckets.
async fn quota_status(
    State(state): State<AppState>,
    Path(survey_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let rows: Vec<(String, i32, i32, i32, i32)> = sqlx::query_as(
        "SELECT b.name, b.target_n, b.filled_n, b.reserved_n, b.max_overfill \
         FROM quota_buckets b JOIN quota_plans p ON p.id = b.plan_id \
         WHERE p.survey_id = $1 ORDER BY b.name",
    )
    .bind(survey_id)
    .fetch_all(state.db())
    .await?;

    let buckets: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(name, target, filled, reserved, overfill)| {
            json!({
                "name": name,
                "targetN": target,
                "filledN": filled,
                "reservedN": reserved,
                "maxOverfill": overfill,
                "saturated": filled + reserved >= target + overfill,
            })
        })
        .collect();
    Ok(Json(json!({ "buckets": buckets })))
}

/// Admin routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/surveys", post(create_survey))
        .route("/surveys/:survey_id", get(get_survey).put(update_survey))
        .route("/surveys/:survey_id/publish", post(publish_survey))
        .route("/collectors", post(create_collector))
        .route("/collectors/:collector_id/invites", post(create_invites))
        .route("/quota-plans", post(create_quota_plan))
        .route("/quota-plans/:survey_id", get(list_quota_plans))
        .route("/quota-status/:survey_id", get(quota_status))
}
