//! Email delivery for alert notifications

use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one HTML email. `tags` are passed through to the provider for
    /// filtering and analytics.
    async fn send_email(
        &self,
        to: &[String],
        subject: &str,
        html_body: &str,
        tags: &[(&str, &str)],
    ) -> Result<(), NotifierError>;
}

/// Sends email through a JSON HTTP API (`POST {from, to, subject, html, tags}`
/// with a bearer token)
pub struct HttpEmailNotifier {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpEmailNotifier {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl Notifier for HttpEmailNotifier {
    async fn send_email(
        &self,
        to: &[String],
        subject: &str,
        html_body: &str,
        tags: &[(&str, &str)],
    ) -> Result<(), NotifierError> {
        if to.is_empty() {
            return Err(NotifierError::NoRecipients);
        }

        let payload = serde_json::json!({
            "from": self.from,
            "to": to,
            "subject": subject,
            "html": html_body,
            "tags": tags
                .iter()
                .map(|(name, value)| serde_json::json!({ "name": name, "value": value }))
                .collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifierError::Http(format!("Failed to send email: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifierError::Rejected(format!(
                "Email API returned status {}",
                response.status()
            )));
        }

        tracing::debug!(recipients = to.len(), subject = %subject, "Email sent");

        Ok(())
    }
}

/// Writes notifications to the log instead of sending them
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(
        &self,
        to: &[String],
        subject: &str,
        _html_body: &str,
        tags: &[(&str, &str)],
    ) -> Result<(), NotifierError> {
        tracing::warn!(recipients = ?to, tags = ?tags, "Alert notification: {}", subject);
        Ok(())
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("No recipients configured")]
    NoRecipients,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Rejected: {0}")]
    Rejected(String),
}
