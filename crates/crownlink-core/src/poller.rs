// ── Status poller ──
//
// Periodic snapshot fetches of the bound device's status node. The backend
// offers snapshots only, not a live subscription, so freshness comes from
// cadence — and the cadence is external ("call tick once per interval").
// A tick that fails, stalls, or decodes badly is skipped outright: prior
// telemetry is retained, never cleared, and there is no retry or backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crownlink_store::{Backend, paths};

use crate::model::{DeviceStatus, MetricScores, Telemetry};

pub(crate) struct StatusPoller {
    /// Unbound (`None`) until a device is selected.
    device: watch::Sender<Option<String>>,
    telemetry: watch::Sender<Telemetry>,
    ceiling: Duration,
}

impl StatusPoller {
    pub(crate) fn new(ceiling: Duration) -> Self {
        let (device, _) = watch::channel(None);
        let (telemetry, _) = watch::channel(Telemetry::default());
        Self {
            device,
            telemetry,
            ceiling,
        }
    }

    pub(crate) fn bind(&self, device_id: String) {
        self.device.send_replace(Some(device_id));
    }

    pub(crate) fn unbind(&self) {
        self.device.send_replace(None);
    }

    pub(crate) fn device(&self) -> Option<String> {
        self.device.borrow().clone()
    }

    pub(crate) fn reset(&self) {
        self.telemetry.send_replace(Telemetry::default());
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Telemetry> {
        self.telemetry.subscribe()
    }

    pub(crate) fn snapshot(&self) -> Telemetry {
        self.telemetry.borrow().clone()
    }

    /// One poll tick against the bound device.
    ///
    /// `generation` is re-checked after the fetch: a snapshot that arrives
    /// for a session generation other than `expected` belongs to a torn-down
    /// session and is discarded without mutating anything.
    pub(crate) async fn tick<B: Backend + Sync>(
        &self,
        backend: &B,
        generation: &AtomicU64,
        expected: u64,
        scores: &watch::Sender<MetricScores>,
    ) {
        let Some(device_id) = self.device() else {
            return; // unbound
        };

        let status_path = paths::device_status(&device_id);
        let raw = match tokio::time::timeout(self.ceiling, backend.get(&status_path)).await {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => {
                // Empty snapshots happen transiently around login/logout.
                debug!(device_id, "empty status snapshot, tick skipped");
                return;
            }
            Ok(Err(e)) => {
                debug!(device_id, error = %e, "status fetch failed, tick skipped");
                return;
            }
            Err(_) => {
                debug!(device_id, "status fetch stalled past the ceiling, tick skipped");
                return;
            }
        };

        let status: DeviceStatus = match serde_json::from_value(raw) {
            Ok(status) => status,
            Err(e) => {
                warn!(device_id, error = %e, "malformed status snapshot, tick skipped");
                return;
            }
        };

        // Stale-completion gate: the session may have been torn down (or
        // rebound to another device) while the fetch was in flight.
        if generation.load(Ordering::SeqCst) != expected {
            debug!(device_id, "status snapshot outlived its session, discarded");
            return;
        }
        if self.device().as_deref() != Some(device_id.as_str()) {
            return;
        }

        let reported = status.reported_state();

        if status.sleep_mode {
            // A sleeping device streams nothing; stale scores read as zero.
            scores.send_replace(MetricScores::default());
        }

        self.telemetry.send_modify(|t| {
            t.state = Some(reported);
            t.sleeping = status.sleep_mode;
            t.claimed_by = status.claimed_by.clone();
            t.last_heartbeat = status.last_heartbeat_time();
            // A non-transmitting device reports outdated battery data;
            // keep the last trustworthy reading instead.
            if reported.is_transmitting() {
                if let Some(battery) = status.battery {
                    t.battery = Some(battery);
                }
            }
        });
    }
}
