//! Domain model module
//!
//! Entities and DTOs for the survey runtime: survey definitions, collectors,
//! sessions, answers, quotas, and outbox events.

pub mod answer;
pub mod collector;
pub mod outbox;
pub mod quota;
pub mod session;
pub mod survey;

pub use answer::{Answer, AnswerPayload, AnswerValue};
pub use collector::{Collector, CollectorSettings, CollectorStatus, CollectorType, Invite};
pub use outbox::{EventType, OutboxEvent};
pub use quota::{QuotaBucket, QuotaPlan, QuotaPlanState, QuotaReservation, ReservationState};
pub use session::{LoopState, ProgressData, RenderState, Session, SessionMeta, SessionStatus};
pub use survey::{
    CompletionSettings, ExpressionDef, Group, Jump, LoopBattery, LoopSource, MatrixItem,
    MatrixScale, NavigationSettings, OptionDef, OptionsSource, OrderMode, Page, Question,
    QuestionConfig, QuestionType, ResponseSettings, ScheduleSettings, SecuritySettings, Survey,
    SurveyDefinition, SurveySettings, SurveyStatus,
};
