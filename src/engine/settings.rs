//! Phase-gated settings application
//!
//! The settings engine reads the survey settings bag at four phases:
//! admission, navigation, validation, and completion. Handlers are
//! defensive: anything that would fail internally degrades to allowing the
//! respondent through rather than failing the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{NavigationSettings, SurveySettings};

/// Typed admission rejection reasons, rendered by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionRejection {
    PasswordRequired,
    PasswordIncorrect,
    ReferralMismatch,
    NotYetOpen,
    AlreadyClosed,
    DuplicateSubmission,
    VpnBlocked,
}

impl AdmissionRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PasswordRequired => "PASSWORD_REQUIRED",
            Self::PasswordIncorrect => "PASSWORD_INCORRECT",
            Self::ReferralMismatch => "REFERRAL_MISMATCH",
            Self::NotYetOpen => "NOT_YET_OPEN",
            Self::AlreadyClosed => "ALREADY_CLOSED",
            Self::DuplicateSubmission => "DUPLICATE_SUBMISSION",
            Self::VpnBlocked => "VPN_BLOCKED",
        }
    }
}

impl std::fmt::Display for AdmissionRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-scoped facts the admission phase needs. Lookup results are
/// gathered by the admission service before the phase runs.
#[derive(Debug, Clone, Default)]
pub struct AdmissionContext<'a> {
    pub supplied_password: Option<&'a str>,
    /// Lowercased host of the Referer header
    pub referer_host: Option<&'a str>,
    pub now: Option<DateTime<Utc>>,
    /// Device/IP already has a submission for this survey
    pub device_has_submission: bool,
    /// VPN lookup verdict; `None` when the lookup was skipped or failed
    pub is_vpn: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionDecision {
    pub can_proceed: bool,
    pub reason: Option<AdmissionRejection>,
}

impl AdmissionDecision {
    fn allow() -> Self {
        Self {
            can_proceed: true,
            reason: None,
        }
    }

    fn reject(reason: AdmissionRejection) -> Self {
        Self {
            can_proceed: false,
            reason: Some(reason),
        }
    }
}

/// Computed UI policy for the navigation phase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationPolicy {
    pub show_back_button: bool,
    pub show_progress_bar: bool,
    pub show_question_numbers: bool,
    pub show_page_numbers: bool,
    pub allow_finish_later: bool,
}

impl From<&NavigationSettings> for NavigationPolicy {
    fn from(s: &NavigationSettings) -> Self {
        Self {
            show_back_button: s.show_back_button,
            show_progress_bar: s.show_progress_bar,
            show_question_numbers: s.show_question_numbers,
            show_page_numbers: s.show_page_numbers,
            allow_finish_later: s.allow_finish_later,
        }
    }
}

/// Validation-phase policy
#[derive(Debug, Clone, Default)]
pub struct ValidationPolicy {
    pub custom_error_message: Option<String>,
    pub prevent_multiple_submissions: bool,
}

/// Completion-phase policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub send_thank_you_email: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thank_you_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_message: Option<String>,
    pub show_results: bool,
    pub prevent_multiple_submissions: bool,
}

/// Stateless per-process engine
#[derive(Debug, Clone, Default)]
pub struct SettingsEngine;

impl SettingsEngine {
    pub fn new() -> Self {
        Self
    }

    /// ADMISSION: password, referral domain, schedule window, duplicate
    /// device, VPN policy. The first failing check wins.
    pub fn admission(
        &self,
        settings: &SurveySettings,
        ctx: &AdmissionContext<'_>,
    ) -> AdmissionDecision {
        let security = &settings.security;

        if security.password_required || security.password.is_some() {
            match (&security.password, ctx.supplied_password) {
                (Some(expected), Some(supplied)) => {
                    if expected != supplied {
                        return AdmissionDecision::reject(AdmissionRejection::PasswordIncorrect);
                    }
                }
                (Some(_), None) => {
                    return AdmissionDecision::reject(AdmissionRejection::PasswordRequired)
                }
                // Password flagged required but never configured: let the
                // respondent through rather than locking the survey
                (None, _) => {
                    warn!("survey requires a password but none is configured");
                }
            }
        }

        if let Some(expected) = &security.referral_website {
            let expected = expected.to_lowercase();
            let matched = ctx
                .referer_host
                .map(|host| host.to_lowercase() == expected)
                .unwrap_or(false);
            if !matched {
                return AdmissionDecision::reject(AdmissionRejection::ReferralMismatch);
            }
        }

        if let Some(now) = ctx.now {
            if let Some(start) = settings.schedule.survey_start {
                if now < start {
                    return AdmissionDecision::reject(AdmissionRejection::NotYetOpen);
                }
            }
            if let Some(end) = settings.schedule.survey_end {
                if now > end {
                    return AdmissionDecision::reject(AdmissionRejection::AlreadyClosed);
                }
            }
        }

        if self.prevents_multiple_submissions(settings) && ctx.device_has_submission {
            return AdmissionDecision::reject(AdmissionRejection::DuplicateSubmission);
        }

        if security.block_vpn && ctx.is_vpn == Some(true) {
            return AdmissionDecision::reject(AdmissionRejection::VpnBlocked);
        }

        AdmissionDecision::allow()
    }

    /// NAVIGATION: computed UI policy.
    pub fn navigation(&self, settings: &SurveySettings) -> NavigationPolicy {
        NavigationPolicy::from(&settings.navigation)
    }

    /// VALIDATION: error-message override and resubmission policy.
    pub fn validation(&self, settings: &SurveySettings) -> ValidationPolicy {
        ValidationPolicy {
            custom_error_message: settings.responses.custom_error_message.clone(),
            prevent_multiple_submissions: self.prevents_multiple_submissions(settings),
        }
    }

    /// COMPLETION: post-survey policy, re-checking the resubmission rule.
    pub fn completion(&self, settings: &SurveySettings) -> CompletionPolicy {
        let completion = &settings.completion;
        CompletionPolicy {
            redirect_url: completion.redirect_url.clone(),
            send_thank_you_email: completion.send_thank_you_email,
            thank_you_message: completion.thank_you_message.clone(),
            completion_message: completion.completion_message.clone(),
            show_results: completion.show_results,
            prevent_multiple_submissions: self.prevents_multiple_submissions(settings),
        }
    }

    /// The key exists in both the `security` and `responses` bags; either
    /// one enables the behavior.
    fn prevents_multiple_submissions(&self, settings: &SurveySettings) -> bool {
        settings.security.prevent_multiple_submissions
            || settings.responses.prevent_multiple_submissions
    }
}
