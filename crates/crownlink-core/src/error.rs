// ── Core error types ──
//
// User-facing errors from crownlink-core. Consumers never see raw store
// errors; the `From<StoreError>` impl translates collaborator failures
// into domain-appropriate variants. The presentation layer owns rendering —
// nothing here is meant for end users verbatim.

use thiserror::Error;

use crownlink_store::StoreError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session lifecycle ────────────────────────────────────────────
    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("a session is already active -- log out first")]
    AlreadyLoggedIn,

    #[error("another login or logout is already in flight")]
    LifecycleInFlight,

    #[error("not logged in")]
    NotLoggedIn,

    // ── Device resolution ────────────────────────────────────────────
    #[error("no device selected")]
    NoDeviceSelected,

    #[error("no registered device named '{nickname}'")]
    DeviceNotFound { nickname: String },

    // ── Data errors ──────────────────────────────────────────────────
    /// The top-level device listing could not be obtained. Per-device
    /// fetch failures never surface here — they degrade the listing.
    #[error("device listing failed: {message}")]
    Fetch { message: String },

    /// A payload did not match its kind's schema. Reported and skipped;
    /// never fatal to the subscription pipeline.
    #[error("failed to decode {context}: {message}")]
    Decode { context: String, message: String },

    // ── Teardown ─────────────────────────────────────────────────────
    /// The backend-side release failed during logout. Local session state
    /// is already cleared when this is returned.
    #[error("logout left backend-side state behind: {message}")]
    Teardown { message: String },

    // ── Credential store ─────────────────────────────────────────────
    #[error("credential store error: {message}")]
    Credential { message: String },
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AuthRejected { message } => CoreError::Auth { message },
            StoreError::PermissionDenied { path } => CoreError::Fetch {
                message: format!("permission denied at {path}"),
            },
            StoreError::Unavailable { message } | StoreError::Backend { message } => {
                CoreError::Fetch { message }
            }
        }
    }
}
