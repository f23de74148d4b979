use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;
use crate::rules::NotificationIntent;

/// Delivery failure, classified so the dispatcher knows whether retrying can
/// help. Connection resets, timeouts, and 5xx responses are transient;
/// rejected payloads and bad endpoints are permanent.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub transient: bool,
    pub message: String,
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }
}

/// A concrete delivery mechanism for one channel. Takes the whole intent so
/// structured receivers get the severity and dedupe key, not just the
/// rendered text.
pub trait Transport: Send + Sync + std::fmt::Debug {
    fn send(&self, intent: &NotificationIntent) -> std::result::Result<(), TransportError>;
}

/// Maps a channel id to its transport. The live resolver builds transports
/// from channel configuration; tests substitute mocks.
pub trait TransportResolver: Send + Sync {
    fn resolve(&self, channel_id: &str) -> Result<Arc<dyn Transport>>;
}

/// Retry schedule for transient delivery failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), doubling each time.
    fn delay_before(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry - 1)
    }
}

/// Per-intent delivery result. One failed channel never aborts the others.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DispatchOutcome {
    pub channel_id: String,
    pub success: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Deliver every intent, each on its own thread so one slow endpoint does not
/// stall the rest. Always returns one outcome per intent, in input order; a
/// panicked delivery thread becomes a failed outcome for that intent, never a
/// lost sibling.
pub fn dispatch(
    intents: &[NotificationIntent],
    resolver: Arc<dyn TransportResolver>,
    policy: RetryPolicy,
) -> Vec<DispatchOutcome> {
    if intents.len() <= 1 {
        if let Some(intent) = intents.first() {
            return vec![deliver_one(intent.clone(), resolver.as_ref(), policy)];
        }
        return Vec::new();
    }

    use std::thread;

    let handles: Vec<_> = intents
        .iter()
        .map(|intent| {
            let intent = intent.clone();
            let resolver = Arc::clone(&resolver);
            thread::spawn(move || deliver_one(intent, resolver.as_ref(), policy))
        })
        .collect();

    intents
        .iter()
        .zip(handles)
        .map(|(intent, handle)| {
            handle.join().unwrap_or_else(|_| DispatchOutcome {
                channel_id: intent.channel_id.clone(),
                success: false,
                attempts: 0,
                error: Some("delivery thread panicked".to_string()),
            })
        })
        .collect()
}

fn deliver_one(
    intent: NotificationIntent,
    resolver: &dyn TransportResolver,
    policy: RetryPolicy,
) -> DispatchOutcome {
    let transport = match resolver.resolve(&intent.channel_id) {
        Ok(t) => t,
        Err(e) => {
            return DispatchOutcome {
                channel_id: intent.channel_id,
                success: false,
                attempts: 0,
                error: Some(e.message),
            };
        }
    };

    let mut attempts = 0;
    loop {
        attempts += 1;
        match transport.send(&intent) {
            Ok(()) => {
                return DispatchOutcome {
                    channel_id: intent.channel_id,
                    success: true,
                    attempts,
                    error: None,
                };
            }
            Err(e) if e.transient && attempts < policy.max_attempts => {
                crate::log_status!(
                    "notify",
                    "Channel {}: transient failure ({}), retrying",
                    intent.channel_id,
                    e.message
                );
                std::thread::sleep(policy.delay_before(attempts));
            }
            Err(e) => {
                return DispatchOutcome {
                    channel_id: intent.channel_id,
                    success: false,
                    attempts,
                    error: Some(e.message),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::event::{Event, EventKind};
    use crate::rules::Severity;
    use crate::template::{self, Notice};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn intent(channel_id: &str) -> NotificationIntent {
        let event = Event::new(
            "p1",
            EventKind::Failed,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            "9",
            None,
        );
        NotificationIntent {
            channel_id: channel_id.to_string(),
            severity: Severity::Critical,
            message: template::render(Notice::Failure, &event),
            dedupe_key: crate::rules::dedupe_key(&event),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    /// Fails the first `failures` sends, classified per `transient`.
    #[derive(Debug)]
    struct FlakyTransport {
        failures: u32,
        transient: bool,
        calls: AtomicU32,
    }

    impl Transport for FlakyTransport {
        fn send(&self, _intent: &NotificationIntent) -> std::result::Result<(), TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if self.transient {
                    Err(TransportError::transient("connection reset"))
                } else {
                    Err(TransportError::permanent("endpoint returned 404"))
                }
            } else {
                Ok(())
            }
        }
    }

    /// Records the dedupe key of every intent it is handed.
    #[derive(Debug)]
    struct RecordingTransport {
        seen: Mutex<Vec<String>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, intent: &NotificationIntent) -> std::result::Result<(), TransportError> {
            self.seen.lock().unwrap().push(intent.dedupe_key.clone());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct PanickyTransport;

    impl Transport for PanickyTransport {
        fn send(&self, _intent: &NotificationIntent) -> std::result::Result<(), TransportError> {
            panic!("transport blew up");
        }
    }

    struct MapResolver {
        transports: HashMap<String, Arc<dyn Transport>>,
    }

    impl TransportResolver for MapResolver {
        fn resolve(&self, channel_id: &str) -> Result<Arc<dyn Transport>> {
            self.transports
                .get(channel_id)
                .cloned()
                .ok_or_else(|| Error::channel_not_found(channel_id))
        }
    }

    fn resolver(entries: Vec<(&str, Arc<dyn Transport>)>) -> Arc<dyn TransportResolver> {
        Arc::new(MapResolver {
            transports: entries
                .into_iter()
                .map(|(id, t)| (id.to_string(), t))
                .collect(),
        })
    }

    #[test]
    fn every_intent_gets_an_outcome() {
        let resolver = resolver(vec![
            (
                "ok",
                Arc::new(FlakyTransport {
                    failures: 0,
                    transient: false,
                    calls: AtomicU32::new(0),
                }),
            ),
            (
                "broken",
                Arc::new(FlakyTransport {
                    failures: 10,
                    transient: false,
                    calls: AtomicU32::new(0),
                }),
            ),
        ]);

        let outcomes = dispatch(&[intent("ok"), intent("broken")], resolver, fast_policy());
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].channel_id, "ok");
        assert!(outcomes[0].success);
        assert_eq!(outcomes[1].channel_id, "broken");
        assert!(!outcomes[1].success);
        assert!(outcomes[1].error.as_deref().unwrap().contains("404"));
    }

    #[test]
    fn transports_receive_the_full_intent() {
        let recording = Arc::new(RecordingTransport {
            seen: Mutex::new(Vec::new()),
        });
        let resolver = resolver(vec![("rec", recording.clone() as Arc<dyn Transport>)]);

        let sent = intent("rec");
        let outcomes = dispatch(&[sent.clone()], resolver, fast_policy());

        assert!(outcomes[0].success);
        let seen = recording.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[sent.dedupe_key]);
    }

    #[test]
    fn panicked_thread_becomes_failed_outcome_without_losing_siblings() {
        let resolver = resolver(vec![
            ("boom", Arc::new(PanickyTransport)),
            (
                "ok",
                Arc::new(FlakyTransport {
                    failures: 0,
                    transient: false,
                    calls: AtomicU32::new(0),
                }),
            ),
        ]);

        let outcomes = dispatch(&[intent("boom"), intent("ok")], resolver, fast_policy());
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_deref().unwrap().contains("panicked"));
        assert!(outcomes[1].success);
    }

    #[test]
    fn transient_failure_is_retried_until_success() {
        let resolver = resolver(vec![(
            "flaky",
            Arc::new(FlakyTransport {
                failures: 1,
                transient: true,
                calls: AtomicU32::new(0),
            }),
        )]);

        let outcomes = dispatch(&[intent("flaky")], resolver, fast_policy());
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].attempts, 2);
    }

    #[test]
    fn transient_failure_gives_up_after_max_attempts() {
        let resolver = resolver(vec![(
            "down",
            Arc::new(FlakyTransport {
                failures: 10,
                transient: true,
                calls: AtomicU32::new(0),
            }),
        )]);

        let outcomes = dispatch(&[intent("down")], resolver, fast_policy());
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].attempts, 3);
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let resolver = resolver(vec![(
            "rejecting",
            Arc::new(FlakyTransport {
                failures: 10,
                transient: false,
                calls: AtomicU32::new(0),
            }),
        )]);

        let outcomes = dispatch(&[intent("rejecting")], resolver, fast_policy());
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].attempts, 1);
    }

    #[test]
    fn unresolvable_channel_is_reported_not_fatal() {
        let resolver = resolver(vec![]);
        let outcomes = dispatch(&[intent("ghost")], resolver, fast_policy());
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].attempts, 0);
    }

    #[test]
    fn empty_intent_list_dispatches_nothing() {
        let resolver = resolver(vec![]);
        assert!(dispatch(&[], resolver, fast_policy()).is_empty());
    }

    #[test]
    fn backoff_delay_doubles_per_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::from_millis(500));
        assert_eq!(policy.delay_before(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(3), Duration::from_millis(2000));
    }
}
