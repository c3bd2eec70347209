//! The runtime core
//!
//! CPU-only subsystems orchestrated per request by the session controller:
//! expression DSL, deterministic ordering, validation, page resolution,
//! quota accounting, routing, and phase-gated settings.

pub mod expression;
pub mod prng;
pub mod quota;
pub mod resolver;
pub mod router;
pub mod settings;
pub mod validator;

pub use expression::{evaluate, evaluate_bool, interpolate, EvalContext};
pub use prng::{DeterministicRng, SeedParts};
pub use quota::{QuotaCheck, QuotaManager, ReserveOutcome, RESERVATION_TTL_MINUTES};
pub use resolver::{resolve_page, ResolvedGroup, ResolvedOption, ResolvedPage, ResolvedQuestion};
pub use router::{initialize_loop, route_next, NextStep, RouteOutcome};
pub use settings::{
    AdmissionContext, AdmissionDecision, AdmissionRejection, CompletionPolicy, NavigationPolicy,
    SettingsEngine, ValidationPolicy,
};
pub use validator::{validate_page, Violation};
