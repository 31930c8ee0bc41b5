use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use super::{AlertNotification, Notifier};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs the JSON payload to an HTTP endpoint.
pub struct WebhookNotifier {
    url: String,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!("webhook URL must be http:// or https://: {}", url));
        }
        let agent = ureq::AgentBuilder::new().timeout(DEFAULT_TIMEOUT).build();
        Ok(Self {
            url: url.to_string(),
            agent,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn notify(&mut self, notification: &AlertNotification) -> Result<()> {
        let body = serde_json::to_string(notification)?;
        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .with_context(|| format!("webhook POST to {} failed", self.url))?;
        log::debug!("webhook responded {}", response.status());
        Ok(())
    }
}
