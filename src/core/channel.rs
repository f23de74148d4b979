use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Env var prefix for credential references in endpoint fields.
const ENV_REF_PREFIX: &str = "env:";

/// SMTP credential variables, read at send time. Credentials are never stored
/// in the notification document.
pub const SMTP_USERNAME_VAR: &str = "PIPECRAFT_SMTP_USERNAME";
pub const SMTP_PASSWORD_VAR: &str = "PIPECRAFT_SMTP_PASSWORD";

fn default_smtp_port() -> u16 {
    587
}

fn default_method() -> String {
    "POST".to_string()
}

/// Channel transport configuration, tagged by type. Unknown types are
/// rejected when the document is loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelKind {
    Email {
        smtp_host: String,
        #[serde(default = "default_smtp_port")]
        smtp_port: u16,
        from: String,
        to: Vec<String>,
    },
    ChatWebhook {
        endpoint: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    GenericWebhook {
        endpoint: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_token_env: Option<String>,
    },
}

impl ChannelKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ChannelKind::Email { .. } => "email",
            ChannelKind::ChatWebhook { .. } => "chat_webhook",
            ChannelKind::GenericWebhook { .. } => "generic_webhook",
        }
    }
}

/// A configured notification destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub enabled: bool,
    /// Per-channel cooldown override in seconds; falls back to the global
    /// window when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
    #[serde(flatten)]
    pub kind: ChannelKind,
}

/// Resolve an endpoint that may be a credential reference (`env:VAR_NAME`).
///
/// Secret webhook URLs are stored as references so the persisted document
/// never carries them in plaintext; the actual URL is read from the
/// environment at send time.
pub fn resolve_endpoint(endpoint: &str) -> Result<String> {
    if let Some(var) = endpoint.strip_prefix(ENV_REF_PREFIX) {
        return std::env::var(var).map_err(|_| {
            Error::config_missing_key(
                var,
                Some("environment variable referenced by channel endpoint".to_string()),
            )
        });
    }
    Ok(endpoint.to_string())
}

/// Validate a channel list as loaded from or about to be saved to the
/// document: unique non-empty ids, required per-type fields present.
pub fn validate_channels(channels: &[Channel]) -> Result<()> {
    let mut seen: Vec<&str> = Vec::new();
    for channel in channels {
        if channel.id.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "channels.id",
                None,
                "Channel id cannot be empty",
            ));
        }
        if seen.contains(&channel.id.as_str()) {
            return Err(Error::channel_duplicate_id(&channel.id));
        }
        seen.push(&channel.id);

        match &channel.kind {
            ChannelKind::Email {
                smtp_host, from, to, ..
            } => {
                if smtp_host.trim().is_empty() {
                    return Err(Error::config_invalid_value(
                        format!("channels.{}.smtp_host", channel.id),
                        None,
                        "SMTP host cannot be empty",
                    ));
                }
                if from.trim().is_empty() {
                    return Err(Error::config_invalid_value(
                        format!("channels.{}.from", channel.id),
                        None,
                        "Sender address cannot be empty",
                    ));
                }
                if to.is_empty() {
                    return Err(Error::config_invalid_value(
                        format!("channels.{}.to", channel.id),
                        None,
                        "Email channel needs at least one recipient",
                    ));
                }
            }
            ChannelKind::ChatWebhook { endpoint, .. }
            | ChannelKind::GenericWebhook { endpoint, .. } => {
                if endpoint.trim().is_empty() {
                    return Err(Error::config_invalid_value(
                        format!("channels.{}.endpoint", channel.id),
                        None,
                        "Webhook endpoint cannot be empty",
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Find a channel by id.
pub fn find<'a>(channels: &'a [Channel], id: &str) -> Result<&'a Channel> {
    channels
        .iter()
        .find(|c| c.id == id)
        .ok_or_else(|| Error::channel_not_found(id))
}

/// Channels eligible for notification delivery.
pub fn enabled<'a>(channels: &'a [Channel]) -> Vec<&'a Channel> {
    channels.iter().filter(|c| c.enabled).collect()
}
