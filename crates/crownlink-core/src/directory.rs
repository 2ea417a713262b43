// ── Device directory ──
//
// Resolves the set of devices registered to the account and caches the
// result for the lifetime of the session. The per-device info fetches run
// against a backend that can stall forever on an invalid id, so each one
// is raced against a fixed ceiling and skipped if the ceiling wins — one
// bad registration entry must never gut the whole listing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tracing::{debug, warn};

use crownlink_store::{Backend, paths};

use crate::error::CoreError;
use crate::model::DeviceRecord;

/// The outcome of one directory fetch.
///
/// `skipped` counts registered ids whose info fetch failed, stalled past
/// the ceiling, or decoded badly. Callers can thereby tell "no devices"
/// apart from "some devices dropped by timeout".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryListing {
    pub devices: Vec<DeviceRecord>,
    pub skipped: usize,
}

impl DirectoryListing {
    pub fn by_nickname(&self, nickname: &str) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.device_nickname == nickname)
    }

    pub fn by_id(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }
}

pub(crate) struct DeviceDirectory {
    /// Either empty or fully populated; replaced wholesale, never merged.
    cache: ArcSwapOption<DirectoryListing>,
    /// Bumped by `invalidate`. A listing started under an older epoch must
    /// not repopulate the cache after teardown.
    epoch: AtomicU64,
    fetch_ceiling: Duration,
}

impl DeviceDirectory {
    pub(crate) fn new(fetch_ceiling: Duration) -> Self {
        Self {
            cache: ArcSwapOption::empty(),
            epoch: AtomicU64::new(0),
            fetch_ceiling,
        }
    }

    /// Empty the cache and retire any in-flight listing.
    pub(crate) fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cache.store(None);
    }

    /// List the devices registered to `user_id`.
    ///
    /// Cache-first unless `force`: a populated cache is returned without
    /// any backend call. A fresh fetch lists the registered ids, then
    /// fetches each id's info record under the bounded wait. Fails only if
    /// the top-level id listing itself cannot be obtained; an account with
    /// zero devices yields an empty listing.
    pub(crate) async fn list<B: Backend + Sync>(
        &self,
        backend: &B,
        user_id: &str,
        force: bool,
    ) -> Result<Arc<DirectoryListing>, CoreError> {
        if !force {
            if let Some(cached) = self.cache.load_full() {
                debug!(devices = cached.devices.len(), "directory cache hit");
                return Ok(cached);
            }
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let listing = self.fetch(backend, user_id).await?;
        let listing = Arc::new(listing);

        // Only a listing from the current epoch may populate the cache.
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.cache.store(Some(Arc::clone(&listing)));
        }

        Ok(listing)
    }

    async fn fetch<B: Backend + Sync>(
        &self,
        backend: &B,
        user_id: &str,
    ) -> Result<DirectoryListing, CoreError> {
        let registry_path = paths::user_devices(user_id);
        let registry = tokio::time::timeout(self.fetch_ceiling, backend.get(&registry_path))
            .await
            .map_err(|_| CoreError::Fetch {
                message: format!("device registry fetch stalled past the ceiling ({registry_path})"),
            })??;

        // Absent or non-map registry node: an account with no devices.
        let Some(serde_json::Value::Object(registered)) = registry else {
            debug!(user_id, "no registered devices");
            return Ok(DirectoryListing::default());
        };

        let mut devices = Vec::with_capacity(registered.len());
        let mut skipped = 0usize;

        // Discovery order is the registry's key order. The backend is known
        // to hand out registries containing invalid ids whose info fetch
        // never settles; those lose the race and are skipped, not retried.
        for device_id in registered.keys() {
            let info_path = paths::device_info(device_id);
            match tokio::time::timeout(self.fetch_ceiling, backend.get(&info_path)).await {
                Ok(Ok(Some(raw))) => match serde_json::from_value::<DeviceRecord>(raw) {
                    Ok(record) => devices.push(record),
                    Err(e) => {
                        warn!(device_id, error = %e, "malformed device info record, skipping");
                        skipped += 1;
                    }
                },
                Ok(Ok(None)) => {
                    warn!(device_id, "registered device has no info record, skipping");
                    skipped += 1;
                }
                Ok(Err(e)) => {
                    warn!(device_id, error = %e, "device info fetch failed, skipping");
                    skipped += 1;
                }
                Err(_) => {
                    warn!(device_id, "device info fetch stalled past the ceiling, skipping");
                    skipped += 1;
                }
            }
        }

        debug!(devices = devices.len(), skipped, "device directory fetched");
        Ok(DirectoryListing { devices, skipped })
    }
}
