// ── Credential persistence boundary ──
//
// The core never touches disk. Whatever stores credentials at rest (the
// config crate ships a keyring-backed implementation) hides behind this
// trait, and the core only calls it at startup (load) and shutdown (save).

use secrecy::SecretString;

use crate::error::CoreError;

/// One account's stored login data.
#[derive(Clone)]
pub struct Credential {
    pub email: String,
    pub secret: SecretString,
    /// The device the user last selected, if any.
    pub device_id: Option<String>,
    /// Whether the user asked to be remembered between runs.
    pub remember: bool,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("email", &self.email)
            .field("secret", &"[REDACTED]")
            .field("device_id", &self.device_id)
            .field("remember", &self.remember)
            .finish()
    }
}

/// Opaque load/save of a credential record, encrypted at rest by the
/// implementation. The core never inspects the storage format.
pub trait CredentialStore {
    /// Load the stored credential, if one exists.
    fn load(&self) -> Result<Option<Credential>, CoreError>;

    /// Persist `credential`, replacing any previous record.
    fn save(&self, credential: &Credential) -> Result<(), CoreError>;

    /// Remove any stored credential.
    fn clear(&self) -> Result<(), CoreError>;
}
