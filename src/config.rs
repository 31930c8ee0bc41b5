use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::NotificationDispatcher;
use crate::frame::{capacity_for, MAX_BUFFER_FRAMES};
use crate::ingest::SourceConfig;
use crate::transport::{
    EmailNotifierConfig, LogNotifier, MqttNotifier, MqttNotifierConfig, SmtpSecurity,
};
use crate::zone::{Zone, ZoneRegistry};

const DEFAULT_OUTPUT_DIR: &str = "outputs";
const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_FPS: u32 = 30;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_ALERT_LABELS: [&str; 3] = ["person", "car", "truck"];
const DEFAULT_ZONE: (&str, i32, i32, i32, i32) = ("Zone1", 400, 100, 250, 350);
const DEFAULT_COOLDOWN_SECS: u64 = 300;
const DEFAULT_RECORDING_SECS: u64 = 10;
const DEFAULT_PRE_EVENT_SECS: u64 = 5;

pub const CLIPS_SUBDIR: &str = "clips";
pub const LOGS_SUBDIR: &str = "logs";
pub const SCREENSHOTS_SUBDIR: &str = "screenshots";

#[derive(Debug, Deserialize, Default)]
struct SentryConfigFile {
    output_dir: Option<PathBuf>,
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    zones: Option<Vec<ZoneConfigFile>>,
    alert: Option<AlertConfigFile>,
    recording: Option<RecordingConfigFile>,
    notifications: Option<NotificationsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence: Option<f32>,
    alert_labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ZoneConfigFile {
    name: String,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    duration_secs: Option<u64>,
    pre_event_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct NotificationsConfigFile {
    enabled: Option<bool>,
    transport: Option<String>,
    mqtt: Option<MqttConfigFile>,
    webhook: Option<WebhookConfigFile>,
    email: Option<EmailConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    topic_prefix: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    use_tls: Option<bool>,
    ca_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
    allow_remote_broker: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct WebhookConfigFile {
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EmailConfigFile {
    smtp_host: Option<String>,
    port: Option<u16>,
    security: Option<String>,
    sender: Option<String>,
    receiver: Option<String>,
    username: Option<String>,
    attach_clip: Option<bool>,
    max_attachment_mb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSettings {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NotifyTransport {
    #[default]
    Log,
    Mqtt,
    Webhook,
    Email,
}

impl FromStr for NotifyTransport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "mqtt" => Ok(Self::Mqtt),
            "webhook" | "http" => Ok(Self::Webhook),
            "email" | "smtp" => Ok(Self::Email),
            other => Err(anyhow!(
                "unknown notification transport '{}': expected 'log', 'mqtt', 'webhook' or 'email'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub transport: NotifyTransport,
    pub mqtt: Option<MqttNotifierConfig>,
    pub webhook_url: Option<String>,
    pub email: Option<EmailNotifierConfig>,
}

#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub output_dir: PathBuf,
    pub source: SourceConfig,
    pub confidence_threshold: f32,
    pub alert_labels: Vec<String>,
    pub zones: Vec<ZoneSettings>,
    pub cooldown: Duration,
    pub recording_duration: Duration,
    pub pre_event: Duration,
    pub notifications: NotificationSettings,
}

impl SentryConfig {
    /// Defaults, then `SENTRY_CONFIG` file, then `SENTRY_*` env, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTRY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentryConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let recording = file.recording.unwrap_or_default();
        let notifications = file.notifications.unwrap_or_default();

        let zones = file
            .zones
            .map(|zones| {
                zones
                    .into_iter()
                    .map(|z| ZoneSettings {
                        name: z.name,
                        x: z.x,
                        y: z.y,
                        width: z.width,
                        height: z.height,
                    })
                    .collect()
            })
            .unwrap_or_else(|| {
                let (name, x, y, width, height) = DEFAULT_ZONE;
                vec![ZoneSettings {
                    name: name.to_string(),
                    x,
                    y,
                    width,
                    height,
                }]
            });

        let mqtt = notifications.mqtt.and_then(|m| {
            m.broker.map(|broker| {
                let mut cfg = MqttNotifierConfig::new(broker);
                if let Some(prefix) = m.topic_prefix {
                    cfg.topic_prefix = prefix;
                }
                if let Some(client_id) = m.client_id {
                    cfg.client_id = client_id;
                }
                cfg.username = m.username;
                cfg.use_tls = m.use_tls.unwrap_or(false);
                cfg.ca_path = m.ca_path;
                cfg.client_cert_path = m.client_cert_path;
                cfg.client_key_path = m.client_key_path;
                cfg.allow_remote = m.allow_remote_broker.unwrap_or(false);
                cfg
            })
        });

        let email = match notifications.email {
            Some(e) => {
                let mut cfg = EmailNotifierConfig::new(
                    e.smtp_host.unwrap_or_default(),
                    e.sender.unwrap_or_default(),
                    e.receiver.unwrap_or_default(),
                );
                if let Some(port) = e.port {
                    cfg.port = port;
                }
                if let Some(security) = e.security.as_deref() {
                    cfg.security = security.parse::<SmtpSecurity>()?;
                }
                cfg.username = e.username;
                cfg.attach_clip = e.attach_clip.unwrap_or(true);
                if let Some(mb) = e.max_attachment_mb {
                    cfg.max_attachment_bytes = mb.saturating_mul(1024 * 1024);
                }
                Some(cfg)
            }
            None => None,
        };

        let transport = match notifications.transport.as_deref() {
            Some(name) => name.parse()?,
            None => NotifyTransport::default(),
        };

        Ok(Self {
            output_dir: file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            source: SourceConfig {
                url: source
                    .url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_FPS),
                width: source.width.unwrap_or(DEFAULT_WIDTH),
                height: source.height.unwrap_or(DEFAULT_HEIGHT),
            },
            confidence_threshold: detection.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            alert_labels: detection.alert_labels.unwrap_or_else(|| {
                DEFAULT_ALERT_LABELS.iter().map(|s| s.to_string()).collect()
            }),
            zones,
            cooldown: Duration::from_secs(
                file.alert
                    .and_then(|alert| alert.cooldown_secs)
                    .unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
            recording_duration: Duration::from_secs(
                recording.duration_secs.unwrap_or(DEFAULT_RECORDING_SECS),
            ),
            pre_event: Duration::from_secs(
                recording.pre_event_secs.unwrap_or(DEFAULT_PRE_EVENT_SECS),
            ),
            notifications: NotificationSettings {
                enabled: notifications.enabled.unwrap_or(false),
                transport,
                mqtt,
                webhook_url: notifications.webhook.and_then(|w| w.url),
                email,
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_nonempty("SENTRY_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_nonempty("SENTRY_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(labels) = env_nonempty("SENTRY_ALERT_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.alert_labels = parsed;
            }
        }
        if let Some(secs) = env_nonempty("SENTRY_COOLDOWN_SECS") {
            self.cooldown = Duration::from_secs(parse_secs("SENTRY_COOLDOWN_SECS", &secs)?);
        }
        if let Some(secs) = env_nonempty("SENTRY_RECORDING_SECS") {
            self.recording_duration =
                Duration::from_secs(parse_secs("SENTRY_RECORDING_SECS", &secs)?);
        }
        if let Some(secs) = env_nonempty("SENTRY_PRE_EVENT_SECS") {
            self.pre_event = Duration::from_secs(parse_secs("SENTRY_PRE_EVENT_SECS", &secs)?);
        }
        if let Some(confidence) = env_nonempty("SENTRY_CONFIDENCE") {
            self.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("SENTRY_CONFIDENCE must be a number in (0, 1]"))?;
        }
        if let Some(enabled) = env_nonempty("SENTRY_NOTIFICATIONS") {
            self.notifications.enabled = parse_bool("SENTRY_NOTIFICATIONS", &enabled)?;
        }
        if let Some(transport) = env_nonempty("SENTRY_NOTIFY_TRANSPORT") {
            self.notifications.transport = transport.parse()?;
        }
        if let Some(broker) = env_nonempty("SENTRY_MQTT_BROKER") {
            match self.notifications.mqtt.as_mut() {
                Some(mqtt) => mqtt.broker = broker,
                None => self.notifications.mqtt = Some(MqttNotifierConfig::new(broker)),
            }
        }
        if let Some(mqtt) = self.notifications.mqtt.as_mut() {
            if let Some(user) = env_nonempty("SENTRY_MQTT_USERNAME") {
                mqtt.username = Some(user);
            }
            if let Some(password) = env_nonempty("SENTRY_MQTT_PASSWORD") {
                mqtt.password = Some(password);
            }
        }
        if let Some(url) = env_nonempty("SENTRY_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(url);
        }
        if let Some(email) = self.notifications.email.as_mut() {
            if let Some(receiver) = env_nonempty("SENTRY_EMAIL_RECEIVER") {
                email.receiver = receiver;
            }
            if let Some(password) = env_nonempty("SENTRY_SMTP_PASSWORD") {
                email.password = Some(password);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.cooldown.is_zero() {
            return Err(anyhow!("alert cooldown must be greater than zero"));
        }
        if self.recording_duration.is_zero() {
            return Err(anyhow!("recording duration must be greater than zero"));
        }
        if self.pre_event.is_zero() {
            return Err(anyhow!("pre-event window must be greater than zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("frame rate must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return Err(anyhow!(
                "confidence threshold must be in (0, 1], got {}",
                self.confidence_threshold
            ));
        }

        self.alert_labels = self
            .alert_labels
            .iter()
            .map(|label| label.trim().to_lowercase())
            .filter(|label| !label.is_empty())
            .collect();
        self.alert_labels.sort();
        self.alert_labels.dedup();
        if self.alert_labels.is_empty() {
            return Err(anyhow!("at least one alert label is required"));
        }

        self.zone_registry()?;

        let capacity = self.buffer_capacity();
        if capacity > MAX_BUFFER_FRAMES {
            return Err(anyhow!(
                "pre-event window of {:?} at {} fps needs {} frames (max {})",
                self.pre_event,
                self.source.target_fps,
                capacity,
                MAX_BUFFER_FRAMES
            ));
        }

        if self.cooldown < self.recording_duration {
            log::warn!(
                "cooldown ({:?}) is shorter than the recording duration ({:?}); alerts during an active recording are dropped",
                self.cooldown,
                self.recording_duration
            );
        }

        if self.notifications.enabled {
            match self.notifications.transport {
                NotifyTransport::Log => {}
                NotifyTransport::Mqtt => {
                    self.notifications
                        .mqtt
                        .as_ref()
                        .ok_or_else(|| anyhow!("MQTT notifications need a broker address"))?
                        .endpoint()?;
                }
                NotifyTransport::Webhook => {
                    if self.notifications.webhook_url.is_none() {
                        return Err(anyhow!("webhook notifications need a URL"));
                    }
                    if !cfg!(feature = "notify-webhook") {
                        return Err(anyhow!(
                            "webhook notifications require the 'notify-webhook' feature"
                        ));
                    }
                }
                NotifyTransport::Email => {
                    self.notifications
                        .email
                        .as_ref()
                        .ok_or_else(|| anyhow!("email notifications need SMTP settings"))?
                        .validate()?;
                    if !cfg!(feature = "notify-email") {
                        return Err(anyhow!(
                            "email notifications require the 'notify-email' feature"
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.output_dir.join(CLIPS_SUBDIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join(LOGS_SUBDIR)
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.output_dir.join(SCREENSHOTS_SUBDIR)
    }

    /// Create `clips/`, `logs/` and `screenshots/` under the output root.
    pub fn ensure_output_dirs(&self) -> Result<()> {
        for dir in [self.clips_dir(), self.logs_dir(), self.screenshots_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Frames needed to cover the pre-event window at the source frame rate.
    pub fn buffer_capacity(&self) -> usize {
        capacity_for(self.source.target_fps, self.pre_event)
    }

    pub fn zone_registry(&self) -> Result<ZoneRegistry> {
        let zones = self
            .zones
            .iter()
            .map(|z| Zone::rect(&z.name, z.x, z.y, z.width, z.height))
            .collect::<Result<Vec<_>>>()?;
        ZoneRegistry::new(zones)
    }

    /// Dispatcher for the configured transport, or a disabled one.
    pub fn build_dispatcher(&self) -> Result<NotificationDispatcher> {
        let settings = &self.notifications;
        if !settings.enabled {
            return Ok(NotificationDispatcher::disabled());
        }
        match settings.transport {
            NotifyTransport::Log => NotificationDispatcher::spawn(Box::new(LogNotifier)),
            NotifyTransport::Mqtt => {
                let mqtt = settings
                    .mqtt
                    .clone()
                    .ok_or_else(|| anyhow!("MQTT notifications need a broker address"))?;
                NotificationDispatcher::spawn(Box::new(MqttNotifier::connect(mqtt)?))
            }
            #[cfg(feature = "notify-webhook")]
            NotifyTransport::Webhook => {
                let url = settings
                    .webhook_url
                    .as_deref()
                    .ok_or_else(|| anyhow!("webhook notifications need a URL"))?;
                NotificationDispatcher::spawn(Box::new(crate::transport::WebhookNotifier::new(
                    url,
                )?))
            }
            #[cfg(not(feature = "notify-webhook"))]
            NotifyTransport::Webhook => Err(anyhow!(
                "webhook notifications require the 'notify-webhook' feature"
            )),
            #[cfg(feature = "notify-email")]
            NotifyTransport::Email => {
                let email = settings
                    .email
                    .clone()
                    .ok_or_else(|| anyhow!("email notifications need SMTP settings"))?;
                NotificationDispatcher::spawn(Box::new(crate::transport::EmailNotifier::new(
                    email,
                )?))
            }
            #[cfg(not(feature = "notify-email"))]
            NotifyTransport::Email => Err(anyhow!(
                "email notifications require the 'notify-email' feature"
            )),
        }
    }
}

fn read_config_file(path: &Path) -> Result<SentryConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be an integer number of seconds", key))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be true or false", key)),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Default for SentryConfig {
        fn default() -> Self {
            SentryConfig::from_file(SentryConfigFile::default()).unwrap()
        }
    }

    #[test]
    fn defaults_match_original_tool() {
        let cfg = SentryConfig::default();
        assert_eq!(cfg.output_dir, PathBuf::from("outputs"));
        assert_eq!(cfg.alert_labels, vec!["person", "car", "truck"]);
        assert_eq!(cfg.zones.len(), 1);
        assert_eq!(cfg.zones[0].name, "Zone1");
        assert_eq!(cfg.cooldown, Duration::from_secs(300));
        assert_eq!(cfg.recording_duration, Duration::from_secs(10));
        assert_eq!(cfg.buffer_capacity(), 150);
        assert!(!cfg.notifications.enabled);
        assert_eq!(cfg.clips_dir(), PathBuf::from("outputs").join("clips"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = SentryConfig::default();
        cfg.confidence_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = SentryConfig::default();
        cfg.pre_event = Duration::from_secs(61);
        assert!(cfg.validate().is_err());

        let mut cfg = SentryConfig::default();
        cfg.zones.push(cfg.zones[0].clone());
        assert!(cfg.validate().is_err());

        let mut cfg = SentryConfig::default();
        cfg.alert_labels = vec![" ".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = SentryConfig::default();
        cfg.notifications.enabled = true;
        cfg.notifications.transport = NotifyTransport::Mqtt;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn short_cooldown_is_accepted() {
        let mut cfg = SentryConfig::default();
        cfg.cooldown = Duration::from_secs(5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn labels_are_normalised() {
        let mut cfg = SentryConfig::default();
        cfg.alert_labels = vec!["Person".to_string(), "person ".to_string(), "CAR".to_string()];
        cfg.validate().unwrap();
        assert_eq!(cfg.alert_labels, vec!["car", "person"]);
    }

    #[test]
    fn transport_names_parse() {
        assert_eq!("MQTT".parse::<NotifyTransport>().unwrap(), NotifyTransport::Mqtt);
        assert_eq!("http".parse::<NotifyTransport>().unwrap(), NotifyTransport::Webhook);
        assert_eq!("smtp".parse::<NotifyTransport>().unwrap(), NotifyTransport::Email);
        assert!("pigeon".parse::<NotifyTransport>().is_err());
    }

    #[test]
    fn email_transport_needs_complete_settings() {
        let mut cfg = SentryConfig::default();
        cfg.notifications.enabled = true;
        cfg.notifications.transport = NotifyTransport::Email;
        assert!(cfg.validate().is_err());

        let mut email = EmailNotifierConfig::new("smtp.example.com", "cam@example.com", "");
        cfg.notifications.email = Some(email.clone());
        assert!(cfg.validate().is_err());

        email.receiver = "me@example.com".to_string();
        cfg.notifications.email = Some(email);
        assert_eq!(cfg.validate().is_ok(), cfg!(feature = "notify-email"));
    }
}
