// Remote store trait
//
// The vendor ships its device telemetry through a hosted hierarchical
// key-value store. This trait is the whole of what the rest of the
// workspace knows about it: authenticate, then get/set/remove by path.

use secrecy::SecretString;
use serde_json::Value;

use crate::error::StoreError;

/// Handle returned by a successful [`Backend::login`].
///
/// Carries the account identifier the store scopes user paths by. The
/// session layer treats it as opaque beyond that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub user_id: String,
}

/// Asynchronous client for the vendor's hierarchical store.
///
/// Every method may never settle: the real backend is known to drop
/// requests without raising any fault (see [`StoreError`]). Callers must
/// race each call against their own deadline and abandon the future if the
/// deadline wins. An abandoned call's eventual effect must be ignorable —
/// implementations must not require the caller to poll it to completion.
#[trait_variant::make(Backend: Send)]
pub trait LocalBackend {
    /// Authenticate an account. Only the session manager calls this.
    async fn login(&self, email: &str, secret: &SecretString) -> Result<AuthToken, StoreError>;

    /// Release the backend-side session.
    async fn logout(&self) -> Result<(), StoreError>;

    /// Read the value at `path`, or `None` if the node is absent.
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Write `value` at `path`, creating intermediate nodes as needed.
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Delete the node at `path`. Deleting an absent node is not an error.
    async fn remove(&self, path: &str) -> Result<(), StoreError>;
}

// Shared ownership of a backend is itself a backend. Lets one store handle
// serve both the session layer and whatever else needs direct path access.
impl<B: Backend + Sync> Backend for std::sync::Arc<B> {
    async fn login(&self, email: &str, secret: &SecretString) -> Result<AuthToken, StoreError> {
        B::login(self, email, secret).await
    }

    async fn logout(&self) -> Result<(), StoreError> {
        B::logout(self).await
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        B::get(self, path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        B::set(self, path, value).await
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        B::remove(self, path).await
    }
}
