// ── Session manager ──
//
// Full lifecycle management for one headset session: authentication,
// device selection, subscription activation, status polling cadence, and
// teardown. Cheaply cloneable via `Arc<Inner>`; constructed explicitly by
// the composition root and handed to consumers — there is no process-wide
// singleton.
//
// The backend's calls can stall forever with no fault raised, so every
// await against it is raced with a deadline, and every completion that
// writes back first proves it still belongs to the live session via the
// generation counter. Logout abandons in-flight calls; it never waits for
// them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crownlink_store::{AuthToken, Backend, paths};

use crate::credentials::{Credential, CredentialStore};
use crate::directory::{DeviceDirectory, DirectoryListing};
use crate::error::CoreError;
use crate::hub::SubscriptionHub;
use crate::model::{DeviceRecord, DeviceState, MetricKind, MetricScores, MetricUpdate, Telemetry};
use crate::poller::StatusPoller;

// ── SessionConfig ────────────────────────────────────────────────

/// Tuning knobs for a session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ceiling for the login call itself.
    pub login_timeout: Duration,
    /// Per-item ceiling inside fan-out fetches (device info records,
    /// subscription markers).
    pub fetch_ceiling: Duration,
    /// Ceiling for one status snapshot fetch.
    pub status_ceiling: Duration,
    /// Ceiling for each backend-side release call during logout.
    pub teardown_ceiling: Duration,
    /// Cadence of the built-in poll driver.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_timeout: Duration::from_secs(30),
            fetch_ceiling: Duration::from_secs(1),
            status_ceiling: Duration::from_secs(5),
            teardown_ceiling: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// Live session state. Exists only between a successful login and the
/// next logout; `subscribed` can only be true while this exists.
struct Session {
    token: AuthToken,
    email: String,
    secret: SecretString,
    client_id: String,
    remembered: bool,
    selected: Option<DeviceRecord>,
    subscribed: bool,
    /// Subscription markers written to the store, removed at logout.
    subscription_paths: Vec<String>,
}

// ── SessionManager ───────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Owns the device directory cache, the status poller, and the metric
/// subscription hub, and is the only component that touches
/// authentication. At most one live session exists per instance.
pub struct SessionManager<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for SessionManager<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<B> {
    backend: B,
    config: SessionConfig,
    /// Re-entrancy guard: one login/logout sequence at a time. The status
    /// poller also checks it (without holding it) to skip ticks that would
    /// race a lifecycle transition.
    lifecycle: tokio::sync::Mutex<()>,
    /// Bumped on every login and logout. Completion paths compare against
    /// their snapshot of this before writing anything back.
    generation: AtomicU64,
    session: RwLock<Option<Session>>,
    directory: DeviceDirectory,
    poller: StatusPoller,
    hub: SubscriptionHub,
    scores: Arc<watch::Sender<MetricScores>>,
    poll_cancel: Mutex<CancellationToken>,
}

impl<B> Inner<B> {
    fn session_read(&self) -> std::sync::RwLockReadGuard<'_, Option<Session>> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn session_write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll_token(&self) -> CancellationToken {
        self.poll_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fresh token for a new session. The previous token is left
    /// uncancelled so a poll driver spawned before login keeps running
    /// into the session.
    fn issue_poll_token(&self) {
        *self
            .poll_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
    }

    /// Cancel the live token at logout. The cancelled token stays
    /// installed until the next login so a driver that re-reads it
    /// between ticks still observes the stop.
    fn cancel_poll_token(&self) {
        self.poll_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

impl<B: Backend + Send + Sync + 'static> SessionManager<B> {
    /// Create a session manager over `backend`. Does NOT authenticate --
    /// call [`login()`](Self::login) to open a session.
    pub fn new(backend: B, config: SessionConfig) -> Self {
        let (scores, _) = watch::channel(MetricScores::default());
        let directory = DeviceDirectory::new(config.fetch_ceiling);
        let poller = StatusPoller::new(config.status_ceiling);

        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                lifecycle: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                session: RwLock::new(None),
                directory,
                poller,
                hub: SubscriptionHub::new(),
                scores: Arc::new(scores),
                poll_cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn with_defaults(backend: B) -> Self {
        Self::new(backend, SessionConfig::default())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Authenticate and open a session.
    ///
    /// Rejected concurrently with another login/logout, and while a
    /// session is already live. Invalidates any prior directory cache.
    pub async fn login(&self, email: &str, secret: SecretString) -> Result<(), CoreError> {
        let _guard = self
            .inner
            .lifecycle
            .try_lock()
            .map_err(|_| CoreError::LifecycleInFlight)?;

        if self.inner.session_read().is_some() {
            return Err(CoreError::AlreadyLoggedIn);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.directory.invalidate();
        self.inner.poller.reset();
        self.inner.scores.send_replace(MetricScores::default());

        let token = match timeout(
            self.inner.config.login_timeout,
            self.inner.backend.login(email, &secret),
        )
        .await
        {
            Ok(Ok(token)) => token,
            Ok(Err(e)) => {
                return Err(CoreError::Auth {
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(CoreError::Auth {
                    message: format!(
                        "login did not settle within {:?}",
                        self.inner.config.login_timeout
                    ),
                });
            }
        };

        self.inner.issue_poll_token();

        let user_id = token.user_id.clone();
        *self.inner.session_write() = Some(Session {
            token,
            email: email.to_owned(),
            secret,
            client_id: format!("crownlink-{generation}"),
            remembered: false,
            selected: None,
            subscribed: false,
            subscription_paths: Vec::new(),
        });

        info!(user_id, "logged in");
        Ok(())
    }

    /// Tear the session down.
    ///
    /// Local state is cleared unconditionally and first: the generation
    /// flips, the poller unbinds, the hub and directory empty. Only then
    /// is the backend asked to release its side, each call bounded -- a
    /// stalled or failing release yields [`CoreError::Teardown`] but never
    /// resurrects the session. Safe to call with fetches still in flight;
    /// they are abandoned, and their completions are discarded by the
    /// generation check.
    pub async fn logout(&self) -> Result<(), CoreError> {
        let _guard = self
            .inner
            .lifecycle
            .try_lock()
            .map_err(|_| CoreError::LifecycleInFlight)?;

        let Some(session) = self.inner.session_write().take() else {
            return Ok(()); // already logged out
        };

        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel_poll_token();
        self.inner.poller.unbind();
        self.inner.poller.reset();
        self.inner.hub.clear();
        self.inner.directory.invalidate();
        self.inner.scores.send_replace(MetricScores::default());
        info!("session cleared");

        let mut failures: Vec<String> = Vec::new();

        for path in &session.subscription_paths {
            match timeout(
                self.inner.config.teardown_ceiling,
                self.inner.backend.remove(path),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(path, error = %e, "failed to remove subscription marker");
                    failures.push(format!("{path}: {e}"));
                }
                Err(_) => {
                    warn!(path, "subscription marker removal stalled, abandoned");
                    failures.push(format!("{path}: stalled"));
                }
            }
        }

        match timeout(
            self.inner.config.teardown_ceiling,
            self.inner.backend.logout(),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "backend logout failed (local state already cleared)");
                failures.push(format!("logout: {e}"));
            }
            Err(_) => {
                warn!("backend logout stalled, abandoned");
                failures.push("logout: stalled".into());
            }
        }

        drop(session);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Teardown {
                message: failures.join("; "),
            })
        }
    }

    // ── Device directory ─────────────────────────────────────────

    /// List the devices registered to the logged-in account.
    ///
    /// Cache-first unless `force`. The listing's `skipped` field counts
    /// registered ids dropped by per-item failures or timeouts.
    pub async fn list_devices(&self, force: bool) -> Result<Arc<DirectoryListing>, CoreError> {
        let (user_id, _) = self.session_user()?;
        self.inner
            .directory
            .list(&self.inner.backend, &user_id, force)
            .await
    }

    /// Resolve `nickname` against the directory and bind the poller and
    /// hub to the matched device.
    pub async fn select_device(&self, nickname: &str) -> Result<DeviceRecord, CoreError> {
        let (user_id, generation) = self.session_user()?;

        let listing = self
            .inner
            .directory
            .list(&self.inner.backend, &user_id, false)
            .await?;

        let record = listing
            .by_nickname(nickname)
            .cloned()
            .ok_or_else(|| CoreError::DeviceNotFound {
                nickname: nickname.to_owned(),
            })?;

        self.bind_device(record, generation)
    }

    /// Unregister a device from the account: drops its claim marker and
    /// its registration entry, then invalidates the directory cache.
    pub async fn remove_device(&self, device_id: &str) -> Result<(), CoreError> {
        let (user_id, _) = self.session_user()?;

        for path in [
            paths::device_claimed_by(device_id),
            paths::user_device(&user_id, device_id),
        ] {
            match timeout(
                self.inner.config.fetch_ceiling,
                self.inner.backend.remove(&path),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(CoreError::Fetch {
                        message: format!("remove stalled at {path}"),
                    });
                }
            }
        }

        self.inner.directory.invalidate();

        let mut guard = self.inner.session_write();
        if let Some(session) = guard.as_mut() {
            let was_selected = session
                .selected
                .as_ref()
                .is_some_and(|d| d.device_id == device_id);
            if was_selected {
                session.selected = None;
                self.inner.poller.unbind();
                self.inner.poller.reset();
            }
        }

        info!(device_id, "device removed from account");
        Ok(())
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Activate metric streaming for exactly `kinds`.
    ///
    /// Idempotent: a second call while subscribed is a no-op. Requires a
    /// selected device. Individual marker writes that fail or stall are
    /// absorbed (the stream for that kind just stays quiet); the markers
    /// are still remembered so logout can clear late arrivals. A call
    /// overtaken by a logout mid-flight registers nothing, releases any
    /// markers it already wrote, and returns [`CoreError::NotLoggedIn`].
    pub async fn subscribe(&self, kinds: &[MetricKind]) -> Result<(), CoreError> {
        let (device_id, client_id, generation) = {
            let guard = self.inner.session_read();
            let Some(session) = guard.as_ref() else {
                return Err(CoreError::NotLoggedIn);
            };
            if session.subscribed {
                debug!("already subscribed, ignoring");
                return Ok(());
            }
            let Some(selected) = session.selected.as_ref() else {
                return Err(CoreError::NoDeviceSelected);
            };
            (
                selected.device_id.clone(),
                session.client_id.clone(),
                self.inner.generation.load(Ordering::SeqCst),
            )
        };

        let mut written = Vec::with_capacity(kinds.len());
        for kind in kinds {
            // A logout that lands between marker writes owns teardown now;
            // stop issuing markers for the dead session.
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                break;
            }

            let path = paths::device_subscription(&device_id, &client_id, kind.label());
            let marker = json!({
                "metric": kind.family(),
                "labels": [kind.label()],
                "atomic": false,
            });

            match timeout(
                self.inner.config.fetch_ceiling,
                self.inner.backend.set(&path, marker),
            )
            .await
            {
                Ok(Ok(())) => debug!(kind = %kind, "subscription marker written"),
                Ok(Err(e)) => warn!(kind = %kind, error = %e, "subscription activation failed"),
                Err(_) => warn!(kind = %kind, "subscription activation stalled, abandoned"),
            }

            // A stalled write may still land later; track the path either
            // way so it can be removed.
            written.push(path);
        }

        // Same-session check before anything is registered or recorded: a
        // logout while a marker write was in flight already cleared the hub,
        // and nothing may repopulate it. Score trackers are registered under
        // the session lock so they can never race that teardown.
        {
            let mut guard = self.inner.session_write();
            if let Some(session) = guard.as_mut() {
                if self.inner.generation.load(Ordering::SeqCst) == generation {
                    for kind in kinds {
                        self.register_score_tracker(kind);
                    }
                    session.subscribed = true;
                    session.subscription_paths = written;
                    info!(kinds = kinds.len(), "metric subscriptions active");
                    return Ok(());
                }
            }
        }

        // The session this subscribe belonged to is gone. Its markers were
        // never recorded there, so release them here, best effort.
        self.remove_markers(&written).await;
        Err(CoreError::NotLoggedIn)
    }

    /// Best-effort removal of subscription markers, each call bounded.
    async fn remove_markers(&self, paths: &[String]) {
        for path in paths {
            match timeout(
                self.inner.config.teardown_ceiling,
                self.inner.backend.remove(path),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(path, error = %e, "orphaned subscription marker could not be removed");
                }
                Err(_) => warn!(path, "orphaned subscription marker removal stalled, abandoned"),
            }
        }
    }

    /// Register a fan-out handler for `kind`. Entries only accumulate
    /// while a session is active; logout clears them all.
    pub fn register_handler<F>(&self, kind: MetricKind, handler: F) -> Result<(), CoreError>
    where
        F: Fn(&MetricUpdate) + Send + Sync + 'static,
    {
        if self.inner.session_read().is_none() {
            return Err(CoreError::NotLoggedIn);
        }
        self.inner.hub.register(kind, handler);
        Ok(())
    }

    /// Feed one raw metric payload through the hub. The transport that
    /// receives pushed payloads from the store calls this.
    pub fn dispatch_metric(&self, kind: &MetricKind, raw: &serde_json::Value) -> Result<(), CoreError> {
        if self.inner.session_read().is_none() {
            return Err(CoreError::NotLoggedIn);
        }
        self.inner.hub.dispatch(kind, raw)
    }

    /// Number of handlers currently registered for `kind`.
    pub fn handler_count(&self, kind: &MetricKind) -> usize {
        self.inner.hub.handler_count(kind)
    }

    // ── Status polling ───────────────────────────────────────────

    /// One status poll tick. Skipped silently when no device is bound,
    /// no session is live, or a login/logout is mid-flight.
    pub async fn poll_status(&self) {
        // Probe the lifecycle guard without holding it across the fetch:
        // a logout arriving mid-tick must find it free.
        if self.inner.lifecycle.try_lock().is_err() {
            return;
        }

        let generation = {
            let guard = self.inner.session_read();
            if guard.is_none() {
                return;
            }
            self.inner.generation.load(Ordering::SeqCst)
        };

        self.inner
            .poller
            .tick(
                &self.inner.backend,
                &self.inner.generation,
                generation,
                &self.inner.scores,
            )
            .await;
    }

    /// Spawn the built-in fixed-interval poll driver.
    ///
    /// May be spawned before login -- ticks without a session are no-ops,
    /// and the driver picks up each session's token as it appears. The
    /// task stops when a session logs out (the token is cancelled, not
    /// awaited -- a tick stalled inside the backend is abandoned
    /// mid-flight).
    pub fn spawn_poll_driver(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let interval = self.inner.config.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // consume the immediate first tick

            loop {
                // Re-read each iteration: login installs a fresh token and
                // logout cancels it, and the driver must follow both.
                let cancel = manager.inner.poll_token();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => manager.poll_status().await,
                }
            }
            debug!("poll driver stopped");
        })
    }

    // ── Credential persistence ───────────────────────────────────

    /// Record the user's remember-me preference on the live session.
    pub fn remember(&self, remembered: bool) -> Result<(), CoreError> {
        let mut guard = self.inner.session_write();
        let Some(session) = guard.as_mut() else {
            return Err(CoreError::NotLoggedIn);
        };
        session.remembered = remembered;
        Ok(())
    }

    pub fn is_remembered(&self) -> bool {
        self.inner
            .session_read()
            .as_ref()
            .is_some_and(|s| s.remembered)
    }

    /// Save-at-shutdown: persist the live credential if the user asked to
    /// be remembered, otherwise wipe whatever the store holds. A no-op
    /// without a live session.
    pub fn persist_credentials<S: CredentialStore>(&self, store: &S) -> Result<(), CoreError> {
        let guard = self.inner.session_read();
        let Some(session) = guard.as_ref() else {
            return Ok(());
        };

        if session.remembered {
            store.save(&Credential {
                email: session.email.clone(),
                secret: session.secret.clone(),
                device_id: session.selected.as_ref().map(|d| d.device_id.clone()),
                remember: true,
            })
        } else {
            store.clear()
        }
    }

    /// Load-at-startup: log in with a remembered credential and reselect
    /// the stored device when it is still registered. Returns `false`
    /// when nothing usable is stored.
    pub async fn login_remembered<S: CredentialStore>(&self, store: &S) -> Result<bool, CoreError> {
        let Some(credential) = store.load()? else {
            return Ok(false);
        };
        if !credential.remember {
            return Ok(false);
        }

        self.login(&credential.email, credential.secret.clone())
            .await?;
        self.remember(true)?;

        if let Some(device_id) = credential.device_id {
            let (user_id, generation) = self.session_user()?;
            let listing = self
                .inner
                .directory
                .list(&self.inner.backend, &user_id, false)
                .await?;
            if let Some(record) = listing.by_id(&device_id).cloned() {
                self.bind_device(record, generation)?;
            } else {
                warn!(device_id, "remembered device is no longer registered");
            }
        }

        Ok(true)
    }

    // ── Polled read-only properties ──────────────────────────────

    pub fn is_logged_in(&self) -> bool {
        self.inner.session_read().is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner
            .session_read()
            .as_ref()
            .is_some_and(|s| s.subscribed)
    }

    pub fn is_online(&self) -> bool {
        self.inner.poller.snapshot().is_online()
    }

    pub fn device_state(&self) -> Option<DeviceState> {
        self.inner.poller.snapshot().state
    }

    pub fn battery(&self) -> Option<f64> {
        self.inner.poller.snapshot().battery
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner
            .session_read()
            .as_ref()
            .map(|s| s.token.user_id.clone())
    }

    pub fn email(&self) -> Option<String> {
        self.inner.session_read().as_ref().map(|s| s.email.clone())
    }

    pub fn selected_device(&self) -> Option<DeviceRecord> {
        self.inner
            .session_read()
            .as_ref()
            .and_then(|s| s.selected.clone())
    }

    /// Observe telemetry changes.
    pub fn telemetry(&self) -> watch::Receiver<Telemetry> {
        self.inner.poller.subscribe()
    }

    pub fn telemetry_snapshot(&self) -> Telemetry {
        self.inner.poller.snapshot()
    }

    /// Observe live score changes.
    pub fn scores(&self) -> watch::Receiver<MetricScores> {
        self.inner.scores.subscribe()
    }

    pub fn scores_snapshot(&self) -> MetricScores {
        *self.inner.scores.borrow()
    }

    // ── Helpers ──────────────────────────────────────────────────

    /// The logged-in user id plus the generation it was read under.
    fn session_user(&self) -> Result<(String, u64), CoreError> {
        let guard = self.inner.session_read();
        let Some(session) = guard.as_ref() else {
            return Err(CoreError::NotLoggedIn);
        };
        Ok((
            session.token.user_id.clone(),
            self.inner.generation.load(Ordering::SeqCst),
        ))
    }

    /// Bind `record` as the selected device, provided the session that
    /// initiated the lookup is still the live one.
    fn bind_device(
        &self,
        record: DeviceRecord,
        generation: u64,
    ) -> Result<DeviceRecord, CoreError> {
        let mut guard = self.inner.session_write();
        let Some(session) = guard.as_mut() else {
            return Err(CoreError::NotLoggedIn);
        };
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            return Err(CoreError::NotLoggedIn);
        }

        session.selected = Some(record.clone());
        self.inner.poller.bind(record.device_id.clone());

        info!(
            device_id = record.device_id,
            nickname = record.device_nickname,
            "device selected"
        );
        Ok(record)
    }

    /// Track scalar and motion updates into the zeroable score aggregate.
    /// Registered through the hub like any other handler, so gameplay
    /// consumers and the aggregate see identical fan-out.
    fn register_score_tracker(&self, kind: &MetricKind) {
        let scores = Arc::clone(&self.inner.scores);
        match kind {
            MetricKind::Calm => self.inner.hub.register(MetricKind::Calm, move |update| {
                if let MetricUpdate::Probability { probability, .. } = update {
                    scores.send_modify(|s| s.calm = *probability);
                }
            }),
            MetricKind::Focus => self.inner.hub.register(MetricKind::Focus, move |update| {
                if let MetricUpdate::Probability { probability, .. } = update {
                    scores.send_modify(|s| s.focus = *probability);
                }
            }),
            MetricKind::Accelerometer => {
                self.inner
                    .hub
                    .register(MetricKind::Accelerometer, move |update| {
                        if let MetricUpdate::Motion(reading) = update {
                            scores.send_modify(|s| s.motion = *reading);
                        }
                    });
            }
            // No aggregate for these; consumers register their own handlers.
            MetricKind::PowerByBand | MetricKind::Kinesis(_) => {}
        }
    }
}
