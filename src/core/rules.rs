use chrono::Duration;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::channel::Channel;
use crate::config::NotifyDoc;
use crate::event::{Event, EventKind};
use crate::history::HistoryStore;
use crate::template::{self, Notice, RenderedMessage};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A decided-but-not-yet-sent notification, scoped to one channel. Lives only
/// for the duration of one dispatch cycle.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct NotificationIntent {
    pub channel_id: String,
    pub severity: Severity,
    pub message: RenderedMessage,
    pub dedupe_key: String,
}

/// Stable key so a retried dispatch of the same intent is idempotent from the
/// receiver's perspective.
pub fn dedupe_key(event: &Event) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.pipeline_id.as_bytes());
    hasher.update([0]);
    hasher.update(event.kind.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(event.build_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn effective_window(channel: &Channel, doc: &NotifyDoc) -> Duration {
    let seconds = channel.cooldown_seconds.unwrap_or(doc.cooldown_seconds);
    Duration::seconds(seconds as i64)
}

/// Decide which notifications a freshly recorded event produces.
///
/// Pure over its inputs; call after `HistoryStore::record` so the event
/// carries its seq. Policy, in priority order:
///
/// 1. `failed` always produces a critical intent for every enabled channel.
///    Failures are exempt from cooldown and are never silently suppressed.
/// 2. `succeeded` produces an info recovery intent only when the immediately
///    preceding event for that pipeline was `failed`.
/// 3. `started` produces nothing.
/// 4. Non-failed intents are suppressed per channel when an event of the same
///    kind was recorded within that channel's cooldown window.
pub fn decide(event: &Event, history: &HistoryStore, doc: &NotifyDoc) -> Vec<NotificationIntent> {
    if !doc.enabled {
        return Vec::new();
    }

    let decision = match event.kind {
        EventKind::Failed => Some((Notice::Failure, Severity::Critical, true)),
        EventKind::Succeeded => {
            let prior_failed = history
                .predecessor(event)
                .map(|prior| prior.kind == EventKind::Failed)
                .unwrap_or(false);
            if prior_failed {
                Some((Notice::Recovery, Severity::Info, false))
            } else {
                None
            }
        }
        // Engine-emitted recovery event: route like a derived recovery.
        EventKind::Recovered => Some((Notice::Recovery, Severity::Info, false)),
        EventKind::Started => None,
    };

    let Some((notice, severity, cooldown_exempt)) = decision else {
        return Vec::new();
    };

    let message = template::render(notice, event);
    let key = dedupe_key(event);

    crate::channel::enabled(&doc.channels)
        .into_iter()
        .filter(|channel| {
            cooldown_exempt
                || !history.within_cooldown(
                    &event.pipeline_id,
                    event.kind,
                    event.seq,
                    event.timestamp,
                    effective_window(channel, doc),
                )
        })
        .map(|channel| NotificationIntent {
            channel_id: channel.id.clone(),
            severity,
            message: message.clone(),
            dedupe_key: key.clone(),
        })
        .collect()
}
