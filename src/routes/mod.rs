//! Route definitions module
//!
//! All routes are nested under the /api prefix via create_router.

pub mod admin;
pub mod health;
pub mod runtime;

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Create the main application router:
/// - /api/health -> health checks (basic, db, redis, full)
/// - /api/runtime -> respondent runtime (start, layout, answers, ...)
/// - /api/admin -> authoring CRUD (surveys, collectors, invites, quotas)
/// - /api/docs -> Swagger UI
/// - /api/openapi.json -> OpenAPI specification JSON
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/health", health::routes())
        .nest("/api/runtime", runtime::routes())
        .nest("/api/admin", admin::routes())
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}
