//! Course-access and password-reset notifications over SMTP.

use anyhow::{Context, anyhow};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::AppConfig;

/// Sends a buyer the access link for a purchased course.
///
/// Settlement treats this as best-effort: an implementation failure is logged
/// by the caller and never rolls back payment state.
pub trait EntitlementNotifier: Send + Sync {
    fn send_course_access(
        &self,
        email: &str,
        buyer_name: &str,
        course_title: &str,
        group_link: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Delivers a password-reset link. Unlike entitlement mail this is not
/// best-effort: the caller invalidates the token if the email never went out.
pub trait ResetNotifier: Send + Sync {
    fn send_password_reset(
        &self,
        email: &str,
        reset_url: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Clone)]
pub struct SmtpEntitlementNotifier {
    smtp_server: String,
    smtp_port: u16,
    credentials: Credentials,
    from_email: String,
    from_name: String,
}

impl SmtpEntitlementNotifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            smtp_server: config.smtp_server.clone(),
            smtp_port: config.smtp_port,
            credentials: Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ),
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
        }
    }

    // New transport per send; relay connections are not pooled here.
    fn build_transport(&self) -> anyhow::Result<SmtpTransport> {
        let transport = SmtpTransport::relay(&self.smtp_server)
            .context("SMTP relay error")?
            .port(self.smtp_port)
            .credentials(self.credentials.clone())
            .build();
        Ok(transport)
    }

    fn from_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }

    async fn send_plain(&self, to: &str, subject: &str, body: String) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(
                self.from_header()
                    .parse()
                    .map_err(|e| anyhow!("invalid from address: {e}"))?,
            )
            .to(to
                .parse()
                .map_err(|e| anyhow!("invalid to address: {e}"))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .context("failed to build email")?;

        let mailer = self.build_transport()?;

        tokio::task::spawn_blocking(move || {
            mailer.send(&message).context("failed to send email")
        })
        .await
        .context("email task failed")??;

        Ok(())
    }
}

impl EntitlementNotifier for SmtpEntitlementNotifier {
    async fn send_course_access(
        &self,
        email: &str,
        buyer_name: &str,
        course_title: &str,
        group_link: &str,
    ) -> anyhow::Result<()> {
        let body = format!(
            "Hi {buyer_name}, thanks for purchasing {course_title}.\n\
             Join the group here: {group_link}\n"
        );
        self.send_plain(email, "Course Access Link", body).await
    }
}

impl ResetNotifier for SmtpEntitlementNotifier {
    async fn send_password_reset(&self, email: &str, reset_url: &str) -> anyhow::Result<()> {
        let body = format!(
            "You requested a password reset. Please click this link:\n\n{reset_url}\n"
        );
        self.send_plain(email, "Password Reset Request", body).await
    }
}
