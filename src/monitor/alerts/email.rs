// Email Notifier - Using handlebars and lettre

use crate::Result;
use crate::monitor::alerts::Notifier;
use crate::monitor::config::MailConfig;
use crate::monitor::types::NotificationGroup;
use async_trait::async_trait;
use handlebars::Handlebars;
use lettre::message::header;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;
use std::time::Duration;

/// Subject of every report mail
pub const SUBJECT: &str = "SSL certificates check failed";

const TEMPLATE_NAME: &str = "report";
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default mail body
///
/// Fields: `from`, `to`, `checks[]` with `hostname`, `param`, `protocol`,
/// `expires`, `errors[]` and `execution_error`.
pub const DEFAULT_TEMPLATE: &str = "\
The following servers have failed the TLS certificate check:
{{#each checks}}

{{hostname}}:{{param}} ({{protocol}}): Expires {{#if expires}}{{expires}}{{else}}unknown{{/if}}
{{#each errors}} ==> {{this}}
{{/each}}
{{#if execution_error}} ==> ({{execution_error}})
{{/if}}
{{/each}}

Update ASAP!
";

#[derive(Debug, Serialize)]
struct ReportData<'a> {
    from: &'a str,
    to: &'a str,
    checks: Vec<FailedCheck<'a>>,
}

#[derive(Debug, Serialize)]
struct FailedCheck<'a> {
    hostname: &'a str,
    param: &'a str,
    protocol: &'static str,
    expires: Option<String>,
    errors: Vec<String>,
    execution_error: Option<String>,
}

/// Email notifier
pub struct EmailNotifier {
    mail: MailConfig,
    templates: Handlebars<'static>,
}

impl EmailNotifier {
    /// Create notifier with the default template
    pub fn new(mail: MailConfig) -> Result<Self> {
        Self::with_template(mail, DEFAULT_TEMPLATE)
    }

    /// Create notifier with a custom Handlebars template
    pub fn with_template(mail: MailConfig, template: &str) -> Result<Self> {
        let mut templates = Handlebars::new();
        // Plain text mail
        templates.register_escape_fn(handlebars::no_escape);
        templates.register_template_string(TEMPLATE_NAME, template)?;
        Ok(Self { mail, templates })
    }

    /// Render the mail body for `group`
    pub fn render(&self, group: &NotificationGroup) -> Result<String> {
        let checks = group
            .failed_checks()
            .map(|check| FailedCheck {
                hostname: &check.hostname,
                param: &check.param,
                protocol: check.protocol.as_str(),
                expires: check
                    .expires_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
                errors: check.errors.iter().flatten().map(|e| e.to_string()).collect(),
                execution_error: check.execution_error.as_ref().map(|e| e.to_string()),
            })
            .collect();

        let data = ReportData {
            from: &self.mail.from,
            to: group.recipient.as_deref().unwrap_or_default(),
            checks,
        };

        Ok(self.templates.render(TEMPLATE_NAME, &data)?)
    }

    /// Build email message for `group`
    fn build_message(&self, recipient: &str, body: String) -> Result<Message> {
        let message = Message::builder()
            .from(self.mail.from.parse()?)
            .to(recipient.parse()?)
            .subject(SUBJECT)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)?;
        Ok(message)
    }

    /// Get SMTP transport
    fn get_transport(&self) -> Result<SmtpTransport> {
        let mut builder = SmtpTransport::starttls_relay(&self.mail.host)?
            .port(self.mail.port)
            .timeout(Some(SMTP_TIMEOUT));

        if !self.mail.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.mail.username.clone(),
                self.mail.password.clone(),
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, group: &NotificationGroup) -> Result<()> {
        let Some(recipient) = group.recipient.as_deref() else {
            return Ok(());
        };

        let body = self.render(group)?;
        let message = self.build_message(recipient, body)?;
        let transport = self.get_transport()?;

        // Send email (blocking operation, run in blocking task)
        tokio::task::spawn_blocking(move || transport.send(&message)).await??;

        tracing::debug!("Report mailed to {}", recipient);
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, RetrievalError, VerificationError};
    use crate::monitor::types::{Protocol, ServerCheck};
    use chrono::{TimeZone, Utc};

    fn create_test_config() -> MailConfig {
        MailConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            from: "certs@example.com".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    fn failed_group() -> NotificationGroup {
        let mut group = NotificationGroup::new(Some("ops@example.com".to_string()));

        let mut expiring = ServerCheck::new("www.example.com", "443", Protocol::Tls, Duration::ZERO);
        let expires = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        expiring.expires_at = Some(expires);
        expiring.errors = Some(vec![VerificationError::ExpiryWarning { expires }]);
        group.push(expiring);

        group.push(ServerCheck::new("ok.example.com", "443", Protocol::Tls, Duration::ZERO));

        let mut broken = ServerCheck::new("mail.example.com", "25", Protocol::Smtp, Duration::ZERO);
        broken.execution_error = Some(RetrievalError::ConnectionClosed);
        group.push(broken);

        group.alert = true;
        group
    }

    #[test]
    fn test_default_template_lists_failed_checks() {
        let notifier = EmailNotifier::new(create_test_config()).unwrap();
        let body = notifier.render(&failed_group()).unwrap();

        assert!(body.contains("www.example.com:443 (tls): Expires 2024-05-01 00:00:00 UTC"));
        assert!(body.contains(" ==> Expiration warning"));
        assert!(body.contains("mail.example.com:25 (smtp): Expires unknown"));
        assert!(body.contains(" ==> (connection closed by peer)"));
        assert!(!body.contains("ok.example.com"));
        assert!(body.trim_end().ends_with("Update ASAP!"));
    }

    #[test]
    fn test_custom_template() {
        let notifier =
            EmailNotifier::with_template(create_test_config(), "{{to}}: {{#each checks}}{{hostname}} {{/each}}")
                .unwrap();
        let body = notifier.render(&failed_group()).unwrap();
        assert_eq!(body, "ops@example.com: www.example.com mail.example.com ");
    }

    #[test]
    fn test_broken_template_rejected() {
        let result = EmailNotifier::with_template(create_test_config(), "{{#each checks}}");
        assert!(matches!(result, Err(Error::Template(_))));
    }

    #[test]
    fn test_message_headers() {
        let notifier = EmailNotifier::new(create_test_config()).unwrap();
        let message = notifier
            .build_message("ops@example.com", "body".to_string())
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: SSL certificates check failed"));
        assert!(raw.contains("To: ops@example.com"));
    }

    #[test]
    fn test_channel_name() {
        let notifier = EmailNotifier::new(create_test_config()).unwrap();
        assert_eq!(notifier.channel_name(), "email");
    }
}
