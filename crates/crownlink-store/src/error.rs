use thiserror::Error;

/// Failure modes of the remote store collaborator.
///
/// Note that the worst failure mode of the real backend is not represented
/// here at all: a call that never settles. The vendor SDK raises no fault,
/// cancellation, or exception for it, so it cannot surface as an error value.
/// Callers bound every store call with their own timeout and treat the
/// elapsed timer as the missing signal.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Credentials rejected at login.
    #[error("authentication rejected: {message}")]
    AuthRejected { message: String },

    /// The store refused access to a path for this account.
    #[error("permission denied at {path}")]
    PermissionDenied { path: String },

    /// The backend connection could not be established or was lost.
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    /// Any other backend-reported failure.
    #[error("backend error: {message}")]
    Backend { message: String },
}
