//! Email service module
//!
//! Sends the completion thank-you mail over async SMTP. When SMTP is not
//! configured the NoOp implementation logs and drops the mail; completion
//! never fails on mail problems.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::error::AppError;

/// Email templates module
pub mod templates {
    /// Thank-you email body shown after a completed session.
    pub fn thank_you_template(survey_title: &str, message: Option<&str>) -> String {
        let body = message.unwrap_or("Thank you for completing the survey.");
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Thank you</title>
</head>
<body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px; background-color: #f5f5f5;">
    <div style="background-color: #ffffff; padding: 30px; border-radius: 10px; box-shadow: 0 2px 10px rgba(0,0,0,0.1);">
        <h2 style="color: #333; margin-bottom: 20px;">{survey_title}</h2>
        <p style="color: #666; line-height: 1.6;">
            {body}
        </p>
        <p style="color: #999; font-size: 12px; margin-top: 30px; border-top: 1px solid #eee; padding-top: 20px;">
            You received this email because you completed this survey.
        </p>
    </div>
</body>
</html>"#,
            survey_title = survey_title,
            body = body
        )
    }
}

/// Email service trait
#[async_trait]
pub trait EmailService: Send + Sync {
    /// Send the post-completion thank-you mail.
    async fn send_thank_you(
        &self,
        to: &str,
        survey_title: &str,
        message: Option<&str>,
    ) -> Result<(), AppError>;
}

pub type DynEmailService = Arc<dyn EmailService>;

/// SMTP-backed implementation
pub struct EmailServiceImpl {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailServiceImpl {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| AppError::EmailService("SMTP host not configured".into()))?;
        let username = config.username.clone().unwrap_or_default();
        let password = config.password.clone().unwrap_or_default();

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| AppError::EmailService(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(username, password))
            .build();

        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|_| AppError::EmailService("Invalid from address".into()))?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl EmailService for EmailServiceImpl {
    async fn send_thank_you(
        &self,
        to: &str,
        survey_title: &str,
        message: Option<&str>,
    ) -> Result<(), AppError> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|_| AppError::EmailService(format!("Invalid recipient: {}", to)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(format!("Thank you - {}", survey_title))
            .header(ContentType::TEXT_HTML)
            .body(templates::thank_you_template(survey_title, message))
            .map_err(|e| AppError::EmailService(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| AppError::EmailService(e.to_string()))?;

        info!(to = %to, "Thank-you email sent");
        Ok(())
    }
}

/// No-op implementation used when SMTP is not configured
pub struct NoOpEmailService;

#[async_trait]
impl EmailService for NoOpEmailService {
    async fn send_thank_you(
        &self,
        to: &str,
        survey_title: &str,
        _message: Option<&str>,
    ) -> Result<(), AppError> {
        warn!(
            to = %to,
            survey = %survey_title,
            "SMTP not configured; dropping thank-you email"
        );
        Ok(())
    }
}

/// Build the configured service, falling back to NoOp.
pub fn build_email_service(config: &SmtpConfig) -> DynEmailService {
    if config.is_configured() {
        match EmailServiceImpl::new(config) {
            Ok(service) => return Arc::new(service),
            Err(e) => warn!("Failed to build SMTP transport, using NoOp: {}", e),
        }
    }
    Arc::new(NoOpEmailService)
}
