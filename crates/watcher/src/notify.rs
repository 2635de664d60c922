use anyhow::{Context, Result};
use common::polymarket::validate_https_url;
use reqwest::Url;
use std::time::Duration;

pub trait Notifier {
    fn send(&self, text: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Discord-compatible webhook: `POST {"content": text}`.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: Url,
    max_chars: usize,
}

/// Body for one message, cut to `max_chars` characters.
pub fn webhook_payload(text: &str, max_chars: usize) -> serde_json::Value {
    let content: String = text.chars().take(max_chars).collect();
    serde_json::json!({ "content": content })
}

impl WebhookNotifier {
    pub fn new(url: &str, max_chars: usize, timeout: Duration) -> Result<Self> {
        let url = validate_https_url(url).context("invalid webhook url")?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook client")?;
        Ok(Self {
            http,
            url,
            max_chars,
        })
    }
}

impl Notifier for WebhookNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        self.http
            .post(self.url.clone())
            .json(&webhook_payload(text, self.max_chars))
            .send()
            .await
            .context("webhook request failed")?
            .error_for_status()
            .context("webhook rejected message")?;
        Ok(())
    }
}

/// Send and swallow the error; failures are logged and counted.
pub async fn send_best_effort<N: Notifier>(notifier: &N, text: &str) -> bool {
    match notifier.send(text).await {
        Ok(()) => true,
        Err(e) => {
            metrics::counter!("pmwatch_notify_failures_total").increment(1);
            tracing::warn!(error = %format!("{e:#}"), "notification failed");
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::RecordingNotifier;
    use super::*;

    #[test]
    fn test_payload_truncates_by_chars() {
        let text = "é".repeat(2_000);
        let payload = webhook_payload(&text, 1_900);
        assert_eq!(payload["content"].as_str().unwrap().chars().count(), 1_900);
        assert_eq!(webhook_payload("short", 1_900)["content"], "short");
    }

    #[test]
    fn test_webhook_requires_https() {
        assert!(WebhookNotifier::new("http://example.com/hook", 1_900, Duration::from_secs(5)).is_err());
        assert!(WebhookNotifier::new("https://example.com/hook", 1_900, Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failures() {
        let ok = RecordingNotifier::default();
        assert!(send_best_effort(&ok, "hello").await);
        assert_eq!(ok.sent.lock().unwrap().as_slice(), ["hello".to_string()]);

        let failing = RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        };
        assert!(!send_best_effort(&failing, "hello").await);
    }
}
