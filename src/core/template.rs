use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::{Event, EventKind};

/// What a notification is about. Only failures and recoveries are routed by
/// the default rule set; steady-state successes and starts produce nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Failure,
    Recovery,
}

/// A message rendered for delivery, carrying enough event context for
/// transports to build structured payloads.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RenderedMessage {
    pub title: String,
    pub body: String,
    pub pipeline_id: String,
    pub build_id: String,
    pub event_kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

/// Render the message for a notice about the given event.
pub fn render(notice: Notice, event: &Event) -> RenderedMessage {
    let (title, mut body) = match notice {
        Notice::Failure => (
            format!("Pipeline failed: {}", event.pipeline_id),
            format!(
                "Build {} of pipeline '{}' failed. Check the logs for details.",
                event.build_id, event.pipeline_id
            ),
        ),
        Notice::Recovery => (
            format!("Pipeline recovered: {}", event.pipeline_id),
            format!(
                "Pipeline '{}' is passing again as of build {}.",
                event.pipeline_id, event.build_id
            ),
        ),
    };

    if let Some(detail) = &event.detail {
        body.push_str("\n\n");
        body.push_str(detail);
    }

    RenderedMessage {
        title,
        body,
        pipeline_id: event.pipeline_id.clone(),
        build_id: event.build_id.clone(),
        event_kind: event.kind,
        timestamp: event.timestamp,
    }
}
