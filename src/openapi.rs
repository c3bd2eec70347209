//! OpenAPI documentation configuration
//!
//! Configures utoipa to generate the OpenAPI 3.0 specification for the
//! runtime surface. Path items and schema mirrors live here, keeping the
//! handlers themselves annotation-free.

use utoipa::OpenApi;

/// OpenAPI documentation for the survey runtime
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Survey Runtime API",
        version = "1.0.0",
        description = "Server-side engine driving respondents through configured questionnaires: admission, page resolution, validation, quotas, routing, and durable domain events.",
    ),
    servers(
        (url = "/api", description = "API base path")
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "runtime", description = "Respondent session endpoints"),
        (name = "admin", description = "Authoring CRUD endpoints"),
    ),
    paths(
        crate::openapi::paths::health_check,
        crate::openapi::paths::start_session,
        crate::openapi::paths::page_layout,
        crate::openapi::paths::submit_answers,
        crate::openapi::paths::complete_session,
        crate::openapi::paths::terminate_session,
        crate::openapi::paths::resume_session,
        crate::openapi::paths::session_status,
    ),
    components(
        schemas(
            schemas::ErrorResponse,
            schemas::StartResponse,
            schemas::SubmitRequest,
            schemas::AnswerPayload,
            schemas::SubmitResponse,
            schemas::NextTarget,
            schemas::TerminateRequest,
        )
    )
)]
pub struct ApiDoc;

/// Path definitions for OpenAPI
pub mod paths {
    #![allow(dead_code)]

    use super::schemas;

    #[utoipa::path(
        get,
        path = "/health",
        tag = "health",
        responses((status = 200, description = "Service is up"))
    )]
    pub fn health_check() {}

    #[utoipa::path(
        post,
        path = "/runtime/start",
        tag = "runtime",
        params(
            ("slug" = String, Query, description = "Collector slug"),
            ("t" = Option<String>, Query, description = "Invite token (SINGLE_USE collectors)"),
            ("pw" = Option<String>, Query, description = "Survey password when configured"),
        ),
        responses(
            (status = 200, description = "Session started or resumed", body = schemas::StartResponse),
            (status = 403, description = "Admission rejected", body = schemas::ErrorResponse),
            (status = 404, description = "Unknown collector", body = schemas::ErrorResponse),
            (status = 429, description = "Rate limited", body = schemas::ErrorResponse),
        )
    )]
    pub fn start_session() {}

    #[utoipa::path(
        get,
        path = "/runtime/{session_id}/pages/{page_id}/layout",
        tag = "runtime",
        params(
            ("session_id" = uuid::Uuid, Path, description = "Session id"),
            ("page_id" = uuid::Uuid, Path, description = "Page id"),
        ),
        responses(
            (status = 200, description = "Resolved page plus UI settings"),
            (status = 400, description = "Session not in progress", body = schemas::ErrorResponse),
        )
    )]
    pub fn page_layout() {}

    #[utoipa::path(
        post,
        path = "/runtime/{session_id}/answers",
        tag = "runtime",
        params(("session_id" = uuid::Uuid, Path, description = "Session id")),
        request_body = schemas::SubmitRequest,
        responses(
            (status = 200, description = "Next step, completion, or termination", body = schemas::SubmitResponse),
            (status = 400, description = "Validation violations", body = schemas::ErrorResponse),
            (status = 403, description = "Overquota; session terminated", body = schemas::ErrorResponse),
            (status = 409, description = "Concurrent modification", body = schemas::ErrorResponse),
        )
    )]
    pub fn submit_answers() {}

    #[utoipa::path(
        post,
        path = "/runtime/{session_id}/complete",
        tag = "runtime",
        params(("session_id" = uuid::Uuid, Path, description = "Session id")),
        responses(
            (status = 200, description = "Session completed; post-survey settings returned"),
            (status = 400, description = "Session not in progress", body = schemas::ErrorResponse),
        )
    )]
    pub fn complete_session() {}

    #[utoipa::path(
        post,
        path = "/runtime/{session_id}/terminate",
        tag = "runtime",
        params(("session_id" = uuid::Uuid, Path, description = "Session id")),
        request_body = schemas::TerminateRequest,
        responses((status = 200, description = "Session terminated"))
    )]
    pub fn terminate_session() {}

    #[utoipa::path(
        get,
        path = "/runtime/{session_id}/resume",
        tag = "runtime",
        params(("session_id" = uuid::Uuid, Path, description = "Session id")),
        responses(
            (status = 200, description = "Current page layout and progress"),
            (status = 410, description = "Past the resume window", body = schemas::ErrorResponse),
        )
    )]
    pub fn resume_session() {}

    #[utoipa::path(
        get,
        path = "/runtime/{session_id}/status",
        tag = "runtime",
        params(("session_id" = uuid::Uuid, Path, description = "Session id")),
        responses((status = 200, description = "Session summary"))
    )]
    pub fn session_status() {}
}

/// Schema mirrors for OpenAPI
pub mod schemas {
    use serde::{Deserialize, Serialize};
    use utoipa::ToSchema;
    use uuid::Uuid;

    /// Standard error response
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    pub struct ErrorResponse {
        /// Machine-readable error code
        #[schema(example = "validation_error")]
        pub error: String,
        /// Human-readable message
        pub message: String,
        /// Typed reason for admission/quota rejections
        #[schema(example = "OVERQUOTA")]
        pub reason: Option<String>,
    }

    /// Session start response
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct StartResponse {
        pub session_id: Uuid,
        pub first_page_id: Uuid,
        pub is_resume: Option<bool>,
        pub closing_soon: Option<bool>,
    }

    /// One submitted answer; `kind` selects the value union case
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct AnswerPayload {
        pub question_id: Uuid,
        #[schema(example = "choices")]
        pub kind: String,
        pub choices: Option<Vec<String>>,
        pub text_value: Option<String>,
        pub numeric_value: Option<f64>,
        pub boolean_value: Option<bool>,
    }

    /// Page submission request
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct SubmitRequest {
        pub page_id: Uuid,
        pub answers: Vec<AnswerPayload>,
    }

    /// Routing target after a submit
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct NextTarget {
        pub page_id: Uuid,
        pub question_id: Option<Uuid>,
    }

    /// Submit response; exactly one of next/complete/terminated is set
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct SubmitResponse {
        pub next: Option<NextTarget>,
        pub complete: Option<bool>,
        pub terminated: Option<bool>,
        pub reason: Option<String>,
    }

    /// Termination request
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    pub struct TerminateRequest {
        pub reason: Option<String>,
    }
}
