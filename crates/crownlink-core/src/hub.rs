// ── Metric subscription hub ──
//
// Fan-out registry: each metric kind maps to a list of handlers, every one
// of which sees every decoded update for that kind, in registration order.
// The original single-callback-per-kind shape was a known limitation, not
// a contract worth preserving.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{MetricKind, MetricUpdate};

type Handler = Arc<dyn Fn(&MetricUpdate) + Send + Sync>;

/// Registry of per-kind metric handlers.
#[derive(Default)]
pub struct SubscriptionHub {
    handlers: DashMap<MetricKind, Vec<Handler>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `kind`. Handlers accumulate — registering never
    /// replaces previously registered handlers for the same kind.
    pub fn register<F>(&self, kind: MetricKind, handler: F)
    where
        F: Fn(&MetricUpdate) + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    /// Decode `raw` according to `kind`'s schema and deliver the decoded
    /// update to every handler registered for that kind.
    ///
    /// A decode failure abandons this payload only: no handler runs, the
    /// error is reported, and neither other kinds nor subsequent payloads
    /// for the same kind are affected.
    pub fn dispatch(&self, kind: &MetricKind, raw: &Value) -> Result<(), CoreError> {
        let update = MetricUpdate::decode(kind, raw).inspect_err(|e| {
            warn!(kind = %kind, error = %e, "metric payload dropped");
        })?;

        // Snapshot the handler list so a handler may register further
        // handlers without deadlocking the registry.
        let handlers: Vec<Handler> = self
            .handlers
            .get(kind)
            .map(|entry| entry.clone())
            .unwrap_or_default();

        for handler in &handlers {
            handler(&update);
        }
        Ok(())
    }

    /// Number of handlers currently registered for `kind`.
    pub fn handler_count(&self, kind: &MetricKind) -> usize {
        self.handlers.get(kind).map_or(0, |entry| entry.len())
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.iter().all(|entry| entry.is_empty())
    }

    /// Drop every registered handler. Called on logout.
    pub fn clear(&self) {
        self.handlers.clear();
        debug!("subscription registry cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn probability(p: f64) -> Value {
        json!({ "probability": p })
    }

    #[test]
    fn every_handler_sees_every_update_in_registration_order() {
        let hub = SubscriptionHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            hub.register(MetricKind::Calm, move |update| {
                let MetricUpdate::Probability { probability, .. } = update else {
                    panic!("calm must decode to a probability");
                };
                seen.lock().unwrap().push((tag, *probability));
            });
        }

        hub.dispatch(&MetricKind::Calm, &probability(0.5)).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 0.5), ("second", 0.5), ("third", 0.5)]
        );
    }

    #[test]
    fn malformed_payload_invokes_no_handler_and_is_not_sticky() {
        let hub = SubscriptionHub::new();
        let calm_hits = Arc::new(Mutex::new(0u32));
        let focus_hits = Arc::new(Mutex::new(0u32));

        {
            let calm_hits = Arc::clone(&calm_hits);
            hub.register(MetricKind::Calm, move |_| *calm_hits.lock().unwrap() += 1);
        }
        {
            let focus_hits = Arc::clone(&focus_hits);
            hub.register(MetricKind::Focus, move |_| *focus_hits.lock().unwrap() += 1);
        }

        let err = hub
            .dispatch(&MetricKind::Calm, &json!({"probability": "not a number"}))
            .unwrap_err();
        assert!(matches!(err, CoreError::Decode { .. }));
        assert_eq!(*calm_hits.lock().unwrap(), 0);

        // Other kinds unaffected, and the next well-formed calm payload
        // still goes through.
        hub.dispatch(&MetricKind::Focus, &probability(0.3)).unwrap();
        hub.dispatch(&MetricKind::Calm, &probability(0.9)).unwrap();
        assert_eq!(*calm_hits.lock().unwrap(), 1);
        assert_eq!(*focus_hits.lock().unwrap(), 1);
    }

    #[test]
    fn dispatch_without_handlers_is_a_quiet_success() {
        let hub = SubscriptionHub::new();
        hub.dispatch(&MetricKind::Focus, &probability(0.1)).unwrap();
    }

    #[test]
    fn clear_empties_the_registry() {
        let hub = SubscriptionHub::new();
        hub.register(MetricKind::Calm, |_| {});
        hub.register(MetricKind::Kinesis("leftArm".into()), |_| {});
        assert_eq!(hub.handler_count(&MetricKind::Calm), 1);

        hub.clear();

        assert!(hub.is_empty());
        assert_eq!(hub.handler_count(&MetricKind::Calm), 0);
    }
}
