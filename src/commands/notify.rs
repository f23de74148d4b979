use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Subcommand};
use pipecraft::log_status;
use serde::Serialize;

use pipecraft::channel::{self, Channel};
use pipecraft::config::{ConfigStore, NotifyDoc};
use pipecraft::dispatch::{self, DispatchOutcome, RetryPolicy};
use pipecraft::event::{Event, EventKind};
use pipecraft::rules::{self, NotificationIntent, Severity};
use pipecraft::template::{self, Notice};
use pipecraft::transport::LiveTransports;

use super::CmdResult;

#[derive(Args)]
pub struct NotifyArgs {
    #[command(subcommand)]
    command: NotifyCommand,
}

#[derive(Subcommand)]
enum NotifyCommand {
    /// Write the notification configuration document
    Setup {
        /// JSON document (positional, supports @file and - for stdin)
        spec: Option<String>,

        /// Explicit JSON document (takes precedence over positional)
        #[arg(long, value_name = "JSON")]
        json: Option<String>,
    },
    /// Show notification configuration and recorded history
    Status,
    /// Send a test notification without recording history
    Test {
        /// Target a single channel instead of all enabled channels
        #[arg(long)]
        channel: Option<String>,

        /// Event kind to simulate (failed, succeeded, recovered)
        #[arg(long, default_value = "failed")]
        kind: String,
    },
    /// Disable notifications globally or for one channel
    Disable {
        /// Disable only this channel
        #[arg(long)]
        channel: Option<String>,
    },
    /// Record a pipeline event and deliver the resulting notifications
    Event {
        /// Pipeline identifier
        #[arg(long)]
        pipeline: String,

        /// Event kind (started, succeeded, failed, recovered)
        #[arg(long)]
        kind: String,

        /// Build identifier
        #[arg(long)]
        build: String,

        /// Free-form detail appended to the notification body
        #[arg(long)]
        detail: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct ChannelSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
}

impl ChannelSummary {
    fn from_channel(channel: &Channel) -> Self {
        Self {
            id: channel.id.clone(),
            channel_type: channel.kind.type_name().to_string(),
            enabled: channel.enabled,
            cooldown_seconds: channel.cooldown_seconds,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PipelineSummary {
    pub pipeline_id: String,
    pub events: usize,
    pub latest_kind: String,
    pub latest_build: String,
    pub latest_timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct IntentSummary {
    pub channel_id: String,
    pub severity: Severity,
    pub title: String,
    pub dedupe_key: String,
}

impl IntentSummary {
    fn from_intent(intent: &NotificationIntent) -> Self {
        Self {
            channel_id: intent.channel_id.clone(),
            severity: intent.severity,
            title: intent.message.title.clone(),
            dedupe_key: intent.dedupe_key.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct NotifyOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cooldown_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<Vec<ChannelSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipelines: Option<Vec<PipelineSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    intents: Option<Vec<IntentSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcomes: Option<Vec<DispatchOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disabled: Option<Vec<String>>,
}

pub fn run(args: NotifyArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<NotifyOutput> {
    let store = ConfigStore::default_root()?;
    match args.command {
        NotifyCommand::Setup { spec, json } => setup(&store, json.or(spec)),
        NotifyCommand::Status => status(&store),
        NotifyCommand::Test { channel, kind } => test(&store, channel, &kind),
        NotifyCommand::Disable { channel } => disable(&store, channel),
        NotifyCommand::Event {
            pipeline,
            kind,
            build,
            detail,
        } => event(&store, &pipeline, &kind, &build, detail),
    }
}

fn channel_summaries(doc: &NotifyDoc) -> Vec<ChannelSummary> {
    doc.channels.iter().map(ChannelSummary::from_channel).collect()
}

fn setup(store: &ConfigStore, spec: Option<String>) -> CmdResult<NotifyOutput> {
    let spec = spec.ok_or_else(|| {
        pipecraft::Error::validation_invalid_argument(
            "json",
            "Missing configuration document: pass it inline, via @file, or via '-' for stdin",
            None,
        )
    })?;

    let raw = crate::commands::read_json_spec_to_string(&spec)?;
    let mut doc: NotifyDoc = serde_json::from_str(&raw).map_err(|e| {
        pipecraft::Error::validation_invalid_json(
            e,
            Some("parse notification configuration".to_string()),
        )
    })?;

    // Re-running setup replaces channels and settings but keeps recorded
    // history unless the incoming document carries its own.
    if doc.history.is_empty() && store.exists() {
        match store.load() {
            Ok(existing) => doc.history = existing.history,
            Err(e) => {
                log_status!(
                    "notify",
                    "Existing document could not be read ({}); recorded history was not preserved",
                    e.message
                );
            }
        }
    }

    store.save(&doc)?;
    log_status!("notify", "Wrote {}", store.path().display());

    Ok((
        NotifyOutput {
            command: "notify.setup".to_string(),
            path: Some(store.path().display().to_string()),
            enabled: Some(doc.enabled),
            cooldown_seconds: Some(doc.cooldown_seconds),
            channels: Some(channel_summaries(&doc)),
            ..Default::default()
        },
        0,
    ))
}

fn status(store: &ConfigStore) -> CmdResult<NotifyOutput> {
    let doc = store.load()?;
    let history = doc.history_store();

    let pipelines = history
        .pipeline_ids()
        .into_iter()
        .filter_map(|id| {
            history.latest(id).map(|latest| PipelineSummary {
                pipeline_id: id.to_string(),
                events: history.events(id).len(),
                latest_kind: latest.kind.as_str().to_string(),
                latest_build: latest.build_id.clone(),
                latest_timestamp: latest.timestamp,
            })
        })
        .collect();

    Ok((
        NotifyOutput {
            command: "notify.status".to_string(),
            path: Some(store.path().display().to_string()),
            enabled: Some(doc.enabled),
            cooldown_seconds: Some(doc.cooldown_seconds),
            channels: Some(channel_summaries(&doc)),
            pipelines: Some(pipelines),
            ..Default::default()
        },
        0,
    ))
}

fn test(store: &ConfigStore, channel_id: Option<String>, kind: &str) -> CmdResult<NotifyOutput> {
    let doc = store.load()?;
    let kind = EventKind::parse(kind)?;

    let notice = match kind {
        EventKind::Failed => Notice::Failure,
        EventKind::Succeeded | EventKind::Recovered => Notice::Recovery,
        EventKind::Started => {
            return Err(pipecraft::Error::validation_invalid_argument(
                "kind",
                "Started events never produce notifications; use failed, succeeded, or recovered",
                Some("started".to_string()),
            ));
        }
    };
    let severity = match kind {
        EventKind::Failed => Severity::Critical,
        _ => Severity::Info,
    };

    let event = Event::new(
        "pipecraft-test",
        kind,
        Utc::now(),
        "0",
        Some("Test notification".to_string()),
    );
    let message = template::render(notice, &event);
    let key = rules::dedupe_key(&event);

    // Explicit --channel targets even a disabled channel so a destination can
    // be verified before it is switched on.
    let targets: Vec<&Channel> = match &channel_id {
        Some(id) => vec![channel::find(&doc.channels, id)?],
        None => channel::enabled(&doc.channels),
    };

    let intents: Vec<NotificationIntent> = targets
        .iter()
        .map(|channel| NotificationIntent {
            channel_id: channel.id.clone(),
            severity,
            message: message.clone(),
            dedupe_key: key.clone(),
        })
        .collect();

    log_status!("notify", "Sending test notification to {} channel(s)", intents.len());
    let resolver = Arc::new(LiveTransports::new(doc.channels.clone()));
    let outcomes = dispatch::dispatch(&intents, resolver, RetryPolicy::default());

    // Nothing is recorded or persisted for a test send.
    let exit_code = if outcomes.iter().all(|o| o.success) { 0 } else { 1 };
    Ok((
        NotifyOutput {
            command: "notify.test".to_string(),
            intents: Some(intents.iter().map(IntentSummary::from_intent).collect()),
            outcomes: Some(outcomes),
            ..Default::default()
        },
        exit_code,
    ))
}

fn disable(store: &ConfigStore, channel_id: Option<String>) -> CmdResult<NotifyOutput> {
    let mut doc = store.load()?;

    let disabled = match &channel_id {
        Some(id) => {
            channel::find(&doc.channels, id)?;
            for channel in &mut doc.channels {
                if &channel.id == id {
                    channel.enabled = false;
                }
            }
            vec![id.clone()]
        }
        None => {
            doc.enabled = false;
            vec!["*".to_string()]
        }
    };

    store.save(&doc)?;
    Ok((
        NotifyOutput {
            command: "notify.disable".to_string(),
            enabled: Some(doc.enabled),
            channels: Some(channel_summaries(&doc)),
            disabled: Some(disabled),
            ..Default::default()
        },
        0,
    ))
}

fn event(
    store: &ConfigStore,
    pipeline: &str,
    kind: &str,
    build: &str,
    detail: Option<String>,
) -> CmdResult<NotifyOutput> {
    let mut doc = store.load()?;
    let kind = EventKind::parse(kind)?;

    let mut history = doc.history_store();
    let event = history.record(Event::new(pipeline, kind, Utc::now(), build, detail));
    let intents = rules::decide(&event, &history, &doc);

    // History is persisted before delivery: an event is on record even when
    // every channel is unreachable.
    doc.set_history(&history);
    store.save(&doc)?;

    log_status!(
        "event",
        "Recorded {} for pipeline {} ({} notification(s))",
        event.kind.as_str(),
        event.pipeline_id,
        intents.len()
    );

    let outcomes = if intents.is_empty() {
        Vec::new()
    } else {
        let resolver = Arc::new(LiveTransports::new(doc.channels.clone()));
        dispatch::dispatch(&intents, resolver, RetryPolicy::default())
    };

    Ok((
        NotifyOutput {
            command: "notify.event".to_string(),
            event: Some(event),
            intents: Some(intents.iter().map(IntentSummary::from_intent).collect()),
            outcomes: Some(outcomes),
            ..Default::default()
        },
        0,
    ))
}
