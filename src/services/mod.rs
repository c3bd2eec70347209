//! Business logic services module
//!
//! The admission pipeline, the session controller, the transactional outbox
//! with its relay, survey definition caching, background sweeps, and the
//! thank-you mailer.

pub mod admission;
pub mod definition;
pub mod email;
pub mod jobs;
pub mod outbox;
pub mod session;

pub use admission::{AdmissionOutcome, UserContext};
pub use definition::LoadedSurvey;
pub use email::{build_email_service, DynEmailService, EmailService, NoOpEmailService};
pub use jobs::{spawn_reservation_sweeper, spawn_session_closer, JobHandle};
pub use outbox::{
    insert_event, DynEventBus, EventBus, NoOpEventBus, OutboxRelay, RedisEventBus,
};
pub use session::{ResumeResult, StartResult, StatusResult, SubmitResult};
