use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pipeline lifecycle event kinds.
///
/// The set is closed: an unrecognized kind is rejected at ingestion rather than
/// silently dropped, since a dropped event could suppress a real failure
/// notification downstream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Succeeded,
    Failed,
    Recovered,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Started => "started",
            EventKind::Succeeded => "succeeded",
            EventKind::Failed => "failed",
            EventKind::Recovered => "recovered",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "started" => Ok(EventKind::Started),
            "succeeded" => Ok(EventKind::Succeeded),
            "failed" => Ok(EventKind::Failed),
            "recovered" => Ok(EventKind::Recovered),
            other => Err(Error::event_invalid_kind(other)),
        }
    }
}

/// A single pipeline lifecycle occurrence. Immutable once created.
///
/// `seq` is the per-pipeline logical counter assigned by the history store at
/// record time; events constructed by callers carry `seq = 0` until recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Event {
    pub pipeline_id: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub build_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip)]
    pub seq: u64,
}

impl Event {
    pub fn new(
        pipeline_id: impl Into<String>,
        kind: EventKind,
        timestamp: DateTime<Utc>,
        build_id: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            kind,
            timestamp,
            build_id: build_id.into(),
            detail,
            seq: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_kinds() {
        assert_eq!(EventKind::parse("started").unwrap(), EventKind::Started);
        assert_eq!(EventKind::parse("succeeded").unwrap(), EventKind::Succeeded);
        assert_eq!(EventKind::parse("failed").unwrap(), EventKind::Failed);
        assert_eq!(EventKind::parse("recovered").unwrap(), EventKind::Recovered);
    }

    #[test]
    fn parse_rejects_unknown_kind() {
        let err = EventKind::parse("deployed").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::EventInvalidKind);
    }

    #[test]
    fn kind_round_trips_through_serde() {
        let json = serde_json::to_string(&EventKind::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
        let back: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventKind::Failed);
    }

    #[test]
    fn unknown_kind_fails_strict_deserialization() {
        let result: std::result::Result<EventKind, _> = serde_json::from_str("\"rollback\"");
        assert!(result.is_err());
    }
}
