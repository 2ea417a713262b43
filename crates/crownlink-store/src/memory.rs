// In-memory backend
//
// A faithful stand-in for the hosted store, used by tests and local
// development. Besides plain path storage it can misbehave on demand:
// individual paths can be made to fail, or to stall forever the way the
// real backend does. Call counters let tests assert caching behavior.

use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::backend::{AuthToken, Backend};
use crate::error::StoreError;

#[derive(Clone)]
struct Account {
    password: String,
    user_id: String,
}

/// In-memory [`Backend`] implementation.
#[derive(Default)]
pub struct MemoryBackend {
    tree: DashMap<String, Value>,
    accounts: DashMap<String, Account>,
    stalled: DashMap<String, ()>,
    failing: DashMap<String, ()>,
    get_calls: DashMap<String, usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account that `login` will accept.
    pub fn register_account(&self, email: &str, password: &str, user_id: &str) {
        self.accounts.insert(
            email.to_owned(),
            Account {
                password: password.to_owned(),
                user_id: user_id.to_owned(),
            },
        );
    }

    /// Seed a value at `path` without going through [`Backend::set`].
    pub fn put(&self, path: &str, value: Value) {
        self.tree.insert(path.to_owned(), value);
    }

    /// Make every `get` of `path` pend forever, like the real backend does
    /// for invalid device ids.
    pub fn stall(&self, path: &str) {
        self.stalled.insert(path.to_owned(), ());
    }

    /// Make every operation on `path` fail with [`StoreError::Unavailable`].
    pub fn fail(&self, path: &str) {
        self.failing.insert(path.to_owned(), ());
    }

    /// Number of `get` calls issued against `path`.
    pub fn get_count(&self, path: &str) -> usize {
        self.get_calls.get(path).map_or(0, |c| *c)
    }

    fn check_injected(&self, path: &str) -> Result<(), StoreError> {
        if self.failing.contains_key(path) {
            return Err(StoreError::Unavailable {
                message: format!("injected failure at {path}"),
            });
        }
        Ok(())
    }

    async fn stall_if_marked(&self, path: &str) {
        if self.stalled.contains_key(path) {
            std::future::pending::<()>().await;
        }
    }
}

impl Backend for MemoryBackend {
    async fn login(&self, email: &str, secret: &SecretString) -> Result<AuthToken, StoreError> {
        let Some(account) = self.accounts.get(email).map(|a| a.clone()) else {
            return Err(StoreError::AuthRejected {
                message: format!("unknown account {email}"),
            });
        };
        if account.password != secret.expose_secret() {
            return Err(StoreError::AuthRejected {
                message: "wrong password".into(),
            });
        }
        Ok(AuthToken {
            user_id: account.user_id,
        })
    }

    async fn logout(&self) -> Result<(), StoreError> {
        self.check_injected("logout")
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        *self.get_calls.entry(path.to_owned()).or_insert(0) += 1;
        self.stall_if_marked(path).await;
        self.check_injected(path)?;
        Ok(self.tree.get(path).map(|v| v.clone()))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.stall_if_marked(path).await;
        self.check_injected(path)?;
        self.tree.insert(path.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.stall_if_marked(path).await;
        self.check_injected(path)?;
        // Remove the node and its entire subtree.
        let prefix = format!("{path}/");
        self.tree.retain(|k, _| k != path && !k.starts_with(&prefix));
        Ok(())
    }
}
