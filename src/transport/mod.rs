//! Alert notification transports.
//!
//! A `Notifier` delivers one `AlertNotification` per finalized clip. Delivery
//! is best-effort: the dispatcher makes a single attempt and only counts
//! failures.
//!
//! - `MqttNotifier`: JSON payload to an MQTT broker (loopback by default).
//! - `WebhookNotifier`: HTTP POST (feature `notify-webhook`).
//! - `EmailNotifier`: SMTP mail with the clip attached (feature `notify-email`).
//! - `LogNotifier`: writes the alert to the log.
//! - `ChannelNotifier`: forwards into an in-process channel.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;

use crate::recording::ClipArtifact;

mod email;
mod mqtt;
#[cfg(feature = "notify-webhook")]
mod webhook;

pub use email::{
    EmailNotifierConfig, SmtpSecurity, DEFAULT_MAX_ATTACHMENT_BYTES, DEFAULT_SMTP_PORT,
};
#[cfg(feature = "notify-email")]
pub use email::EmailNotifier;
pub use mqtt::{
    build_transport, parse_mqtt_endpoint, validate_loopback_addr, MqttEndpoint, MqttNotifier,
    MqttNotifierConfig, TlsMaterials, DEFAULT_CLIENT_ID, DEFAULT_TOPIC_PREFIX,
};
#[cfg(feature = "notify-webhook")]
pub use webhook::WebhookNotifier;

/// Payload sent for each finalized evidence clip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertNotification {
    pub clip_path: String,
    pub manifest_path: Option<String>,
    pub labels: Vec<String>,
    pub zone: String,
    /// RFC 3339 trigger time.
    pub triggered_at: String,
    pub frames: u64,
    pub sha256: String,
}

impl AlertNotification {
    pub fn from_artifact(artifact: &ClipArtifact) -> Self {
        Self {
            clip_path: artifact.path.display().to_string(),
            manifest_path: artifact
                .manifest_path
                .as_ref()
                .map(|p| p.display().to_string()),
            labels: artifact.labels.clone(),
            zone: artifact.zone.clone(),
            triggered_at: artifact.started_at.to_rfc3339(),
            frames: artifact.frames_written,
            sha256: artifact.sha256.clone(),
        }
    }

    /// Human-readable subject line, e.g. `person, car detected in Zone1`.
    pub fn subject(&self) -> String {
        format!("{} detected in {}", self.labels.join(", "), self.zone)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

pub trait Notifier: Send {
    fn name(&self) -> &'static str;

    fn notify(&mut self, notification: &AlertNotification) -> Result<()>;
}

/// Writes alerts to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&mut self, notification: &AlertNotification) -> Result<()> {
        log::info!(
            "ALERT: {} ({} frames) clip={}",
            notification.subject(),
            notification.frames,
            notification.clip_path
        );
        Ok(())
    }
}

/// Forwards notifications into an `mpsc` channel.
pub struct ChannelNotifier {
    tx: Sender<AlertNotification>,
}

impl ChannelNotifier {
    pub fn new(tx: Sender<AlertNotification>) -> Self {
        Self { tx }
    }
}

impl Notifier for ChannelNotifier {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn notify(&mut self, notification: &AlertNotification) -> Result<()> {
        self.tx
            .send(notification.clone())
            .map_err(|_| anyhow!("notification channel closed"))
    }
}
