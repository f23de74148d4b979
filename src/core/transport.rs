use std::sync::Arc;
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport as _};
use serde::Serialize;

use crate::channel::{self, Channel, ChannelKind};
use crate::dispatch::{Transport, TransportError, TransportResolver};
use crate::error::{Error, Result};
use crate::rules::{NotificationIntent, Severity};
use crate::template::RenderedMessage;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(format!("pipecraft/{}", VERSION))
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| Error::internal_io(e.to_string(), Some("create HTTP client".to_string())))
}

fn classify_http(err: reqwest::Error) -> TransportError {
    if err.is_timeout() || err.is_connect() {
        return TransportError::transient(err.to_string());
    }
    TransportError::permanent(err.to_string())
}

fn classify_status(status: reqwest::StatusCode) -> Option<TransportError> {
    if status.is_success() {
        return None;
    }
    let message = format!("endpoint returned {}", status);
    if status.is_server_error() {
        Some(TransportError::transient(message))
    } else {
        Some(TransportError::permanent(message))
    }
}

/// Chat webhook delivery (Slack-compatible payload shape).
#[derive(Debug)]
struct ChatWebhookTransport {
    client: reqwest::blocking::Client,
    endpoint: String,
    username: Option<String>,
}

impl Transport for ChatWebhookTransport {
    fn send(&self, intent: &NotificationIntent) -> std::result::Result<(), TransportError> {
        let message = &intent.message;
        let mut payload = serde_json::json!({
            "text": format!("*{}*\n{}", message.title, message.body),
        });
        if let Some(username) = &self.username {
            payload["username"] = serde_json::Value::String(username.clone());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .map_err(classify_http)?;

        match classify_status(response.status()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Generic webhook delivery: full structured event payload, optional bearer
/// token read from the environment at send time.
#[derive(Debug)]
struct GenericWebhookTransport {
    client: reqwest::blocking::Client,
    endpoint: String,
    method: reqwest::Method,
    auth_token: Option<String>,
}

/// Wire shape of a generic webhook delivery. Carries the severity and dedupe
/// key alongside the message so the receiver can drop a retried dispatch it
/// has already handled.
#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    message: &'a RenderedMessage,
    severity: Severity,
    dedupe_key: &'a str,
}

impl<'a> WebhookPayload<'a> {
    fn from_intent(intent: &'a NotificationIntent) -> Self {
        Self {
            message: &intent.message,
            severity: intent.severity,
            dedupe_key: &intent.dedupe_key,
        }
    }
}

impl Transport for GenericWebhookTransport {
    fn send(&self, intent: &NotificationIntent) -> std::result::Result<(), TransportError> {
        let mut request = self
            .client
            .request(self.method.clone(), &self.endpoint)
            .json(&WebhookPayload::from_intent(intent));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(classify_http)?;
        match classify_status(response.status()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// SMTP delivery via lettre. Credentials come from the environment at send
/// time; unauthenticated relay is used when they are unset.
#[derive(Debug)]
struct EmailTransport {
    smtp_host: String,
    smtp_port: u16,
    from: String,
    to: Vec<String>,
}

impl EmailTransport {
    fn mailer(&self) -> std::result::Result<SmtpTransport, TransportError> {
        let mut builder = SmtpTransport::starttls_relay(&self.smtp_host)
            .map_err(|e| TransportError::permanent(e.to_string()))?
            .port(self.smtp_port)
            .timeout(Some(HTTP_TIMEOUT));

        let username = std::env::var(channel::SMTP_USERNAME_VAR).ok();
        let password = std::env::var(channel::SMTP_PASSWORD_VAR).ok();
        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(builder.build())
    }
}

impl Transport for EmailTransport {
    fn send(&self, intent: &NotificationIntent) -> std::result::Result<(), TransportError> {
        let message = &intent.message;
        let from = self
            .from
            .parse()
            .map_err(|_| TransportError::permanent(format!("invalid sender '{}'", self.from)))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(message.title.clone())
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.to {
            let to = recipient.parse().map_err(|_| {
                TransportError::permanent(format!("invalid recipient '{}'", recipient))
            })?;
            builder = builder.to(to);
        }

        let email = builder
            .body(message.body.clone())
            .map_err(|e| TransportError::permanent(e.to_string()))?;

        match self.mailer()?.send(&email) {
            Ok(_) => Ok(()),
            Err(e) if e.is_permanent() => Err(TransportError::permanent(e.to_string())),
            Err(e) => Err(TransportError::transient(e.to_string())),
        }
    }
}

/// Builds live transports from channel configuration. Endpoint references and
/// credentials are resolved here, at send time, so secrets never touch the
/// persisted document.
pub struct LiveTransports {
    channels: Vec<Channel>,
}

impl LiveTransports {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    fn build(&self, config: &Channel) -> Result<Arc<dyn Transport>> {
        match &config.kind {
            ChannelKind::Email {
                smtp_host,
                smtp_port,
                from,
                to,
            } => Ok(Arc::new(EmailTransport {
                smtp_host: smtp_host.clone(),
                smtp_port: *smtp_port,
                from: from.clone(),
                to: to.clone(),
            })),
            ChannelKind::ChatWebhook { endpoint, username } => Ok(Arc::new(ChatWebhookTransport {
                client: http_client()?,
                endpoint: channel::resolve_endpoint(endpoint)?,
                username: username.clone(),
            })),
            ChannelKind::GenericWebhook {
                endpoint,
                method,
                auth_token_env,
            } => {
                let method = method.parse::<reqwest::Method>().map_err(|_| {
                    Error::config_invalid_value(
                        format!("channels.{}.method", config.id),
                        Some(method.clone()),
                        "Not a valid HTTP method",
                    )
                })?;
                let auth_token = match auth_token_env {
                    Some(var) => Some(std::env::var(var).map_err(|_| {
                        Error::config_missing_key(
                            var,
                            Some("environment variable referenced by auth_token_env".to_string()),
                        )
                    })?),
                    None => None,
                };
                Ok(Arc::new(GenericWebhookTransport {
                    client: http_client()?,
                    endpoint: channel::resolve_endpoint(endpoint)?,
                    method,
                    auth_token,
                }))
            }
        }
    }
}

impl TransportResolver for LiveTransports {
    fn resolve(&self, channel_id: &str) -> Result<Arc<dyn Transport>> {
        let config = channel::find(&self.channels, channel_id)?;
        self.build(config)
    }
}
