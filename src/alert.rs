//! Failure alerting over SMTP. Everything here is best-effort: an alert that
//! cannot be gathered or delivered is logged and swallowed, never propagated
//! into the monitor or controller that asked for it.

use crate::config::AlertConfig;
use crate::error::{ManagerError, Result};
use crate::host::HostControl;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::sync::Arc;

/// Trailing bytes of status/log output included in an alert mail.
const MAX_LOG_TAIL: usize = 5000;

#[async_trait]
pub trait Alerter: Send + Sync {
    /// Notify about a failed service. Infallible by contract.
    async fn notify(&self, module_name: &str, service_name: &str);
}

pub struct EmailAlerter {
    cfg: AlertConfig,
    servername: String,
    host: Arc<dyn HostControl>,
}

impl EmailAlerter {
    pub fn new(cfg: AlertConfig, servername: String, host: Arc<dyn HostControl>) -> Self {
        Self {
            cfg,
            servername,
            host,
        }
    }
}

#[async_trait]
impl Alerter for EmailAlerter {
    async fn notify(&self, module_name: &str, service_name: &str) {
        let Some(recipient) = self.cfg.email.clone() else {
            tracing::warn!("Alerting requested but no alert email address configured");
            return;
        };

        let log_content = match self.host.status_log(service_name).await {
            Ok(output) => truncate_log(&output),
            Err(e) => format!("Error getting logs: {e}"),
        };

        let subject = format!("Service Failure Alert: {module_name}");
        let body = format!(
            "Service failed\n\n\
             Module: {module_name}\n\
             Service: {service_name}\n\
             Time: {time}\n\
             Server: {server}\n\n\
             Recent logs:\n{log_content}\n",
            time = chrono::Local::now().to_rfc3339(),
            server = self.servername,
        );

        // lettre's SmtpTransport is blocking; keep it off the runtime's
        // worker threads.
        let cfg = self.cfg.clone();
        let module = module_name.to_string();
        let result =
            tokio::task::spawn_blocking(move || send_mail(&cfg, &recipient, &subject, body)).await;

        match result {
            Ok(Ok(())) => tracing::info!("Alert email sent for module '{}'", module),
            Ok(Err(e)) => tracing::error!("Failed to send alert email for module '{}': {}", module, e),
            Err(e) => tracing::error!("Alert mail task panicked for module '{}': {}", module, e),
        }
    }
}

fn send_mail(cfg: &AlertConfig, to: &str, subject: &str, body: String) -> Result<()> {
    let transport_err = |e: &dyn std::fmt::Display| ManagerError::Transport(e.to_string());

    let smtp_server = cfg
        .smtp_server
        .as_deref()
        .ok_or_else(|| ManagerError::Transport("no smtp_server configured".into()))?;
    let from = cfg
        .smtp_username
        .as_deref()
        .ok_or_else(|| ManagerError::Transport("no smtp_username configured".into()))?;

    let message = Message::builder()
        .from(from.parse().map_err(|e| transport_err(&e))?)
        .to(to.parse().map_err(|e| transport_err(&e))?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .map_err(|e| transport_err(&e))?;

    let mut builder =
        SmtpTransport::starttls_relay(smtp_server).map_err(|e| transport_err(&e))?.port(cfg.smtp_port);
    if let (Some(user), Some(pass)) = (&cfg.smtp_username, &cfg.smtp_password) {
        builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }

    builder.build().send(&message).map_err(|e| transport_err(&e))?;
    Ok(())
}

/// Cap log excerpts so a chatty unit cannot blow up the mail size.
fn truncate_log(s: &str) -> String {
    if s.len() <= MAX_LOG_TAIL {
        return s.to_string();
    }
    let mut cut = s.len() - MAX_LOG_TAIL;
    while !s.is_char_boundary(cut) {
        cut += 1;
    }
    format!("... (truncated) ...\n{}", &s[cut..])
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_log_untouched() {
        assert_eq!(truncate_log("short"), "short");
    }

    #[test]
    fn test_truncate_long_log_keeps_tail() {
        let long = "x".repeat(12_000);
        let truncated = truncate_log(&long);
        assert!(truncated.starts_with("... (truncated) ...\n"));
        assert!(truncated.ends_with('x'));
        assert_eq!(truncated.len(), MAX_LOG_TAIL + "... (truncated) ...\n".len());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        // Multibyte content right at the cut point must not panic
        let long = "б".repeat(6_000);
        let truncated = truncate_log(&long);
        assert!(truncated.starts_with("... (truncated) ...\n"));
    }

    #[test]
    fn test_send_mail_requires_smtp_server() {
        let cfg = AlertConfig {
            send_alert_after_service_failed: true,
            email: Some("ops@example.com".into()),
            smtp_server: None,
            smtp_port: 587,
            smtp_username: Some("alerts@example.com".into()),
            smtp_password: None,
        };
        let result = send_mail(&cfg, "ops@example.com", "subject", "body".into());
        assert!(matches!(result, Err(ManagerError::Transport(_))));
    }
}
