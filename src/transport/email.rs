//! SMTP alert email with the evidence clip attached.
//!
//! The settings type is always available so configuration can be parsed and
//! validated; the sender itself needs the `notify-email` feature.

use anyhow::{anyhow, Result};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SMTP_PORT: u16 = 587;
/// Clips larger than this are announced by path only.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;
#[cfg_attr(not(feature = "notify-email"), allow(dead_code))]
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);
#[cfg_attr(not(feature = "notify-email"), allow(dead_code))]
const CLIP_CONTENT_TYPE: &str = "video/x-msvideo";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS (port 587).
    #[default]
    StartTls,
    /// Implicit TLS (port 465).
    Tls,
    /// No encryption; local relays only.
    Plain,
}

impl FromStr for SmtpSecurity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "starttls" => Ok(Self::StartTls),
            "tls" | "ssl" => Ok(Self::Tls),
            "none" | "plain" => Ok(Self::Plain),
            other => Err(anyhow!(
                "unknown SMTP security '{}': expected 'starttls', 'tls' or 'none'",
                other
            )),
        }
    }
}

/// Settings for `EmailNotifier`.
#[derive(Clone, Debug)]
pub struct EmailNotifierConfig {
    pub smtp_host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub sender: String,
    pub receiver: String,
    /// Login name; the sender address is used when absent.
    pub username: Option<String>,
    pub password: Option<String>,
    pub attach_clip: bool,
    pub max_attachment_bytes: u64,
}

impl EmailNotifierConfig {
    pub fn new(
        smtp_host: impl Into<String>,
        sender: impl Into<String>,
        receiver: impl Into<String>,
    ) -> Self {
        Self {
            smtp_host: smtp_host.into(),
            port: DEFAULT_SMTP_PORT,
            security: SmtpSecurity::default(),
            sender: sender.into(),
            receiver: receiver.into(),
            username: None,
            password: None,
            attach_clip: true,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.smtp_host.trim().is_empty() {
            return Err(anyhow!("email notifications need an SMTP host"));
        }
        if self.port == 0 {
            return Err(anyhow!("SMTP port must be non-zero"));
        }
        for (role, address) in [("sender", &self.sender), ("receiver", &self.receiver)] {
            if !looks_like_address(address) {
                return Err(anyhow!("invalid email {} address: '{}'", role, address));
            }
        }
        if self.username.is_some() && self.password.is_none() {
            return Err(anyhow!(
                "SMTP username given without a password (set SENTRY_SMTP_PASSWORD)"
            ));
        }
        Ok(())
    }
}

fn looks_like_address(address: &str) -> bool {
    match address.trim().rsplit_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.ends_with('.'),
        None => false,
    }
}

#[cfg(feature = "notify-email")]
pub use smtp::EmailNotifier;

#[cfg(feature = "notify-email")]
mod smtp {
    use anyhow::{anyhow, Context, Result};
    use lettre::message::header::ContentType;
    use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{Message, SmtpTransport, Transport};
    use std::fs;
    use std::path::Path;

    use super::{EmailNotifierConfig, SmtpSecurity, CLIP_CONTENT_TYPE, SMTP_TIMEOUT};
    use crate::transport::{AlertNotification, Notifier};

    /// Sends one email per alert, with the clip attached when it fits.
    pub struct EmailNotifier {
        config: EmailNotifierConfig,
        from: Mailbox,
        to: Mailbox,
        transport: SmtpTransport,
    }

    impl EmailNotifier {
        pub fn new(config: EmailNotifierConfig) -> Result<Self> {
            config.validate()?;
            let from: Mailbox = config
                .sender
                .trim()
                .parse()
                .map_err(|e| anyhow!("invalid sender address '{}': {}", config.sender, e))?;
            let to: Mailbox = config
                .receiver
                .trim()
                .parse()
                .map_err(|e| anyhow!("invalid receiver address '{}': {}", config.receiver, e))?;

            let host = config.smtp_host.trim();
            let builder = match config.security {
                SmtpSecurity::StartTls => SmtpTransport::starttls_relay(host)
                    .with_context(|| format!("invalid SMTP relay {}", host))?,
                SmtpSecurity::Tls => SmtpTransport::relay(host)
                    .with_context(|| format!("invalid SMTP relay {}", host))?,
                SmtpSecurity::Plain => SmtpTransport::builder_dangerous(host),
            };
            let mut builder = builder.port(config.port).timeout(Some(SMTP_TIMEOUT));
            if let Some(password) = config.password.as_ref() {
                let user = config
                    .username
                    .clone()
                    .unwrap_or_else(|| config.sender.trim().to_string());
                builder = builder.credentials(Credentials::new(user, password.clone()));
            }

            log::info!(
                "email notifier configured for {}:{} ({:?}) -> {}",
                host,
                config.port,
                config.security,
                config.receiver
            );
            Ok(Self {
                transport: builder.build(),
                config,
                from,
                to,
            })
        }

        pub fn build_message(&self, notification: &AlertNotification) -> Result<Message> {
            let attachment = if self.config.attach_clip {
                self.clip_attachment(&notification.clip_path)?
            } else {
                None
            };

            let mut body = format!(
                "{} at {}.\n\nFrames: {}\nClip: {}\nSHA-256: {}\n",
                notification.subject(),
                notification.triggered_at,
                notification.frames,
                notification.clip_path,
                notification.sha256
            );
            if self.config.attach_clip && attachment.is_none() {
                body.push_str("\nThe clip exceeds the attachment limit and is not attached.\n");
            }

            let builder = Message::builder()
                .from(self.from.clone())
                .to(self.to.clone())
                .subject(format!("Security alert: {}", notification.subject()));
            let message = match attachment {
                Some(clip) => builder.multipart(
                    MultiPart::mixed()
                        .singlepart(SinglePart::plain(body))
                        .singlepart(clip),
                ),
                None => builder.header(ContentType::TEXT_PLAIN).body(body),
            }
            .context("failed to build alert email")?;
            Ok(message)
        }

        fn clip_attachment(&self, clip_path: &str) -> Result<Option<SinglePart>> {
            let path = Path::new(clip_path);
            let size = fs::metadata(path)
                .with_context(|| format!("clip {} is not readable", path.display()))?
                .len();
            if size > self.config.max_attachment_bytes {
                log::warn!(
                    "clip {} is {} bytes (limit {}); sending alert without attachment",
                    path.display(),
                    size,
                    self.config.max_attachment_bytes
                );
                return Ok(None);
            }
            let bytes =
                fs::read(path).with_context(|| format!("failed to read clip {}", path.display()))?;
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("clip.avi")
                .to_string();
            let content_type = ContentType::parse(CLIP_CONTENT_TYPE)
                .map_err(|_| anyhow!("invalid attachment content type {}", CLIP_CONTENT_TYPE))?;
            Ok(Some(Attachment::new(filename).body(bytes, content_type)))
        }
    }

    impl Notifier for EmailNotifier {
        fn name(&self) -> &'static str {
            "email"
        }

        fn notify(&mut self, notification: &AlertNotification) -> Result<()> {
            let message = self.build_message(notification)?;
            self.transport
                .send(&message)
                .with_context(|| format!("SMTP delivery via {} failed", self.config.smtp_host))?;
            log::info!("alert email sent to {}", self.config.receiver);
            Ok(())
        }
    }

}
