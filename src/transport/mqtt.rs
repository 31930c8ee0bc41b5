use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Transport;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{AlertNotification, Notifier};

pub const DEFAULT_TOPIC_PREFIX: &str = "zone_sentry";
pub const DEFAULT_CLIENT_ID: &str = "zone-sentry";
/// Outstanding publish requests held while the broker is unreachable.
const REQUEST_CAPACITY: usize = 64;
const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    pub ca: Option<Vec<u8>>,
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    /// Read PEM files. Client cert and key must be given together.
    pub fn load(
        ca_path: Option<&PathBuf>,
        client_cert_path: Option<&PathBuf>,
        client_key_path: Option<&PathBuf>,
    ) -> Result<Self> {
        let ca = match ca_path {
            Some(path) => Some(
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA {}", path.display()))?,
            ),
            None => None,
        };

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!(
                        "failed to read MQTT TLS client cert {}",
                        cert_path.display()
                    )
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read MQTT TLS client key {}", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            _ => {
                return Err(anyhow!(
                    "MQTT TLS client cert and key must be provided together"
                ))
            }
        };

        Ok(Self { ca, client_auth })
    }
}

/// Connection settings for `MqttNotifier`.
#[derive(Clone, Debug)]
pub struct MqttNotifierConfig {
    /// `host:port`, `mqtt://host:port`, `mqtts://host:port` or `[v6]:port`.
    pub broker: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub ca_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    /// Permit a non-loopback broker.
    pub allow_remote: bool,
}

impl MqttNotifierConfig {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            username: None,
            password: None,
            use_tls: false,
            ca_path: None,
            client_cert_path: None,
            client_key_path: None,
            allow_remote: false,
        }
    }

    /// Parse and check the broker address without connecting.
    pub fn endpoint(&self) -> Result<MqttEndpoint> {
        let endpoint = parse_mqtt_endpoint(&self.broker, self.use_tls)?;
        if !self.allow_remote {
            validate_loopback_addr(&endpoint, &self.broker)?;
        }
        Ok(endpoint)
    }

    pub fn alerts_topic(&self) -> String {
        format!("{}/alerts", self.topic_prefix)
    }

    pub fn zone_topic(&self, zone: &str) -> String {
        format!("{}/zone/{}/alert", self.topic_prefix, sanitize_topic_segment(zone))
    }
}

/// Publishes alert payloads with QoS 1 (not retained).
pub struct MqttNotifier {
    config: MqttNotifierConfig,
    client: Client,
    stopping: Arc<AtomicBool>,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttNotifier {
    pub fn connect(config: MqttNotifierConfig) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let tls = TlsMaterials::load(
            config.ca_path.as_ref(),
            config.client_cert_path.as_ref(),
            config.client_key_path.as_ref(),
        )?;

        let mut options = MqttOptions::new(&config.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = config.username.as_deref() {
            options.set_credentials(user, config.password.as_deref().unwrap_or_default());
        }
        options.set_transport(build_transport(&endpoint, &tls)?);

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        log::info!(
            "MQTT notifier configured for {}:{} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            config.username.is_some()
        );
        let stopping = Arc::new(AtomicBool::new(false));
        let connection_handle = spawn_connection(connection, Arc::clone(&stopping));
        Ok(Self {
            config,
            client,
            stopping,
            connection_handle: Some(connection_handle),
        })
    }

    /// Queue a publish without blocking; the connection thread delivers it
    /// once the broker is reachable.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .with_context(|| format!("failed to queue publish to {}", topic))?;
        Ok(())
    }
}

/// Drive the event loop until the notifier is dropped. Connection errors
/// are logged and retried with capped exponential backoff; rumqttc
/// reconnects on the next poll.
fn spawn_connection(
    mut connection: Connection,
    stopping: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut backoff = RECONNECT_BACKOFF_MIN;
        let mut failures = 0u64;
        for event in connection.iter() {
            if stopping.load(Ordering::Relaxed) {
                break;
            }
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {
                    if failures > 0 {
                        log::info!("MQTT connection restored after {} failed attempts", failures);
                        failures = 0;
                        backoff = RECONNECT_BACKOFF_MIN;
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures == 1 || failures % 20 == 0 {
                        log::warn!(
                            "MQTT connection error (attempt {}): {}; retrying in {:?}",
                            failures,
                            e,
                            backoff
                        );
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                }
            }
        }
        log::debug!("MQTT connection thread stopped");
    })
}

impl Notifier for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn notify(&mut self, notification: &AlertNotification) -> Result<()> {
        let payload = notification.to_json()?;
        self.publish(&self.config.alerts_topic(), &payload)?;
        self.publish(&self.config.zone_topic(&notification.zone), &payload)?;
        Ok(())
    }
}

impl Drop for MqttNotifier {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::Relaxed);
        if let Err(err) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect failed: {}", err);
        }
        // The connection thread exits on its next event; it is not joined so a
        // dead broker cannot stall shutdown.
        drop(self.connection_handle.take());
    }
}

fn sanitize_topic_segment(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

pub fn validate_loopback_addr(endpoint: &MqttEndpoint, original: &str) -> Result<()> {
    let host = endpoint.host.as_str();
    if host == "localhost" || host == "127.0.0.1" || host == "::1" {
        return Ok(());
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        if ip.is_loopback() {
            return Ok(());
        }
    }
    Err(anyhow!(
        "MQTT broker must be loopback: {} (set allow_remote_broker to override)",
        original
    ))
}

pub fn build_transport(endpoint: &MqttEndpoint, tls: &TlsMaterials) -> Result<Transport> {
    if !endpoint.use_tls {
        if tls.ca.is_some() || tls.client_auth.is_some() {
            return Err(anyhow!(
                "MQTT TLS materials provided but TLS is disabled (use mqtts://)"
            ));
        }
        return Ok(Transport::tcp());
    }

    if tls.ca.is_none() && tls.client_auth.is_none() {
        return Ok(Transport::tls_with_default_config());
    }

    let ca = tls.ca.clone().ok_or_else(|| {
        anyhow!("MQTT TLS CA certificate is required when providing client certificates")
    })?;
    Ok(Transport::tls(ca, tls.client_auth.clone(), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schemes_and_ipv6() {
        let ep = parse_mqtt_endpoint("mqtts://broker.local:8883", false).unwrap();
        assert_eq!(
            ep,
            MqttEndpoint {
                host: "broker.local".to_string(),
                port: 8883,
                use_tls: true
            }
        );
        let ep = parse_mqtt_endpoint("[::1]:1883", false).unwrap();
        assert_eq!(ep.host, "::1");
        assert!(!ep.use_tls);
        assert!(parse_mqtt_endpoint("ws://host:80", false).is_err());
        assert!(parse_mqtt_endpoint("localhost", false).is_err());
    }

    #[test]
    fn broker_rejects_non_loopback_without_flag() {
        let mut config = MqttNotifierConfig::new("192.168.1.10:1883");
        let err = config.endpoint().unwrap_err();
        assert!(format!("{err}").contains("loopback"));
        config.allow_remote = true;
        assert!(config.endpoint().is_ok());
    }

    #[test]
    fn broker_accepts_loopback_hosts() {
        for addr in ["127.0.0.1:1883", "localhost:1883", "[::1]:1883"] {
            assert!(MqttNotifierConfig::new(addr).endpoint().is_ok(), "{addr}");
        }
    }

    #[test]
    fn tls_materials_require_tls() {
        let endpoint = parse_mqtt_endpoint("127.0.0.1:1883", false).unwrap();
        let tls = TlsMaterials {
            ca: Some(b"pem".to_vec()),
            client_auth: None,
        };
        assert!(build_transport(&endpoint, &tls).is_err());
        assert!(build_transport(&endpoint, &TlsMaterials::default()).is_ok());
    }

    fn sample_notification() -> AlertNotification {
        AlertNotification {
            clip_path: "outputs/clips/alert_20240301_120000.avi".to_string(),
            manifest_path: None,
            labels: vec!["person".to_string()],
            zone: "Zone1".to_string(),
            triggered_at: "2024-03-01T12:00:00+00:00".to_string(),
            frames: 300,
            sha256: "00".repeat(32),
        }
    }

    #[test]
    fn notify_keeps_queueing_after_refused_connection() {
        // Nothing listens on port 1: the first connect attempt is refused.
        let mut notifier = MqttNotifier::connect(MqttNotifierConfig::new("127.0.0.1:1")).unwrap();
        std::thread::sleep(Duration::from_millis(800));

        let n = sample_notification();
        for _ in 0..3 {
            notifier.notify(&n).unwrap();
        }
        let handle = notifier.connection_handle.as_ref().unwrap();
        assert!(!handle.is_finished());
    }

    #[test]
    fn topics_are_prefixed_and_sanitized() {
        let config = MqttNotifierConfig::new("127.0.0.1:1883");
        assert_eq!(config.alerts_topic(), "zone_sentry/alerts");
        assert_eq!(config.zone_topic("Front door"), "zone_sentry/zone/Front_door/alert");
        assert_eq!(config.zone_topic("a/b#"), "zone_sentry/zone/a_b_/alert");
    }
}
