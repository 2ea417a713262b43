//! Configuration and credential storage for Crownlink applications.
//!
//! TOML settings with environment overrides, translation to
//! `crownlink_core::SessionConfig`, and a keyring-backed
//! [`CredentialStore`] implementation for remember-me logins: the secret
//! goes to the OS keyring, everything else to a TOML record file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crownlink_core::{CoreError, Credential, CredentialStore, SessionConfig};

const KEYRING_SERVICE: &str = "crownlink";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to parse credential record: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        CoreError::Credential {
            message: err.to_string(),
        }
    }
}

// ── TOML settings ───────────────────────────────────────────────────

/// Top-level TOML settings.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub device: DeviceSettings,
}

/// Session timing knobs, in the units the TOML file spells out.
#[derive(Debug, Deserialize, Serialize)]
pub struct SessionSettings {
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,

    /// Per-item ceiling for device info and subscription-marker calls.
    #[serde(default = "default_fetch_ceiling_ms")]
    pub fetch_ceiling_ms: u64,

    #[serde(default = "default_status_ceiling_ms")]
    pub status_ceiling_ms: u64,

    #[serde(default = "default_teardown_ceiling_ms")]
    pub teardown_ceiling_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            login_timeout_secs: default_login_timeout_secs(),
            fetch_ceiling_ms: default_fetch_ceiling_ms(),
            status_ceiling_ms: default_status_ceiling_ms(),
            teardown_ceiling_ms: default_teardown_ceiling_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_login_timeout_secs() -> u64 {
    30
}
fn default_fetch_ceiling_ms() -> u64 {
    1_000
}
fn default_status_ceiling_ms() -> u64 {
    5_000
}
fn default_teardown_ceiling_ms() -> u64 {
    2_000
}
fn default_poll_interval_ms() -> u64 {
    1_000
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DeviceSettings {
    /// Nickname to select automatically after login, if set.
    pub default_nickname: Option<String>,
}

impl Settings {
    /// Translate into the core's session tuning.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            login_timeout: Duration::from_secs(self.session.login_timeout_secs),
            fetch_ceiling: Duration::from_millis(self.session.fetch_ceiling_ms),
            status_ceiling: Duration::from_millis(self.session.status_ceiling_ms),
            teardown_ceiling: Duration::from_millis(self.session.teardown_ceiling_ms),
            poll_interval: Duration::from_millis(self.session.poll_interval_ms),
        }
    }
}

// ── Config file paths ───────────────────────────────────────────────

/// Resolve the settings file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_file("config.toml")
}

/// Resolve the credential record path. The secret itself never lives
/// here — only the email, remembered device, and the remember flag.
pub fn credential_path() -> PathBuf {
    project_file("credential.toml")
}

fn project_file(name: &str) -> PathBuf {
    ProjectDirs::from("com", "crownlink", "crownlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push(name);
            p
        },
        |dirs| dirs.config_dir().join(name),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("crownlink");
    p
}

// ── Settings loading / saving ───────────────────────────────────────

/// Load settings from the canonical path plus `CROWNLINK_` env overrides.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(&config_path())
}

/// Load settings from an explicit path plus `CROWNLINK_` env overrides
/// (double underscore separates nesting: `CROWNLINK_SESSION__POLL_INTERVAL_MS`).
pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CROWNLINK_").split("__"));

    let settings: Settings = figment.extract()?;
    Ok(settings)
}

/// Load settings, falling back to defaults when nothing is configured.
pub fn load_settings_or_default() -> Settings {
    load_settings().unwrap_or_default()
}

/// Serialize settings to TOML at the canonical path.
pub fn save_settings(settings: &Settings) -> Result<(), ConfigError> {
    save_settings_to(&config_path(), settings)
}

pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(settings)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Keyring-backed credential store ─────────────────────────────────

/// On-disk record of the non-secret half of a remembered credential.
#[derive(Debug, Deserialize, Serialize)]
struct CredentialRecord {
    email: String,
    device_id: Option<String>,
    remember: bool,
}

/// [`CredentialStore`] backed by the OS keyring.
///
/// The password goes to the keyring under the `crownlink` service keyed
/// by email; the record file holds only what is safe in plaintext.
pub struct KeyringCredentialStore {
    record_path: PathBuf,
}

impl KeyringCredentialStore {
    /// Store rooted at the platform config directory.
    pub fn new() -> Self {
        Self {
            record_path: credential_path(),
        }
    }

    /// Store with an explicit record path. The keyring half is still the
    /// real OS keyring.
    pub fn at_path(record_path: PathBuf) -> Self {
        Self { record_path }
    }

    fn load_inner(&self) -> Result<Option<Credential>, ConfigError> {
        let raw = match std::fs::read_to_string(&self.record_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: CredentialRecord = toml::from_str(&raw)?;

        let entry = keyring::Entry::new(KEYRING_SERVICE, &record.email)?;
        let secret = match entry.get_password() {
            Ok(secret) => SecretString::from(secret),
            // Record without a keyring entry: treat as nothing stored.
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(Credential {
            email: record.email,
            secret,
            device_id: record.device_id,
            remember: record.remember,
        }))
    }

    fn save_inner(&self, credential: &Credential) -> Result<(), ConfigError> {
        let record = CredentialRecord {
            email: credential.email.clone(),
            device_id: credential.device_id.clone(),
            remember: credential.remember,
        };

        if let Some(parent) = self.record_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.record_path, toml::to_string_pretty(&record)?)?;

        let entry = keyring::Entry::new(KEYRING_SERVICE, &credential.email)?;
        entry.set_password(credential.secret.expose_secret())?;
        Ok(())
    }

    fn clear_inner(&self) -> Result<(), ConfigError> {
        let raw = match std::fs::read_to_string(&self.record_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        std::fs::remove_file(&self.record_path)?;

        if let Ok(record) = toml::from_str::<CredentialRecord>(&raw) {
            let entry = keyring::Entry::new(KEYRING_SERVICE, &record.email)?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<Credential>, CoreError> {
        self.load_inner().map_err(Into::into)
    }

    fn save(&self, credential: &Credential) -> Result<(), CoreError> {
        self.save_inner(credential).map_err(Into::into)
    }

    fn clear(&self) -> Result<(), CoreError> {
        self.clear_inner().map_err(Into::into)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_the_documented_timings() {
        let settings = Settings::default();
        let config = settings.session_config();

        assert_eq!(config.login_timeout, Duration::from_secs(30));
        assert_eq!(config.fetch_ceiling, Duration::from_secs(1));
        assert_eq!(config.status_ceiling, Duration::from_secs(5));
        assert_eq!(config.teardown_ceiling, Duration::from_secs(2));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn settings_round_trip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.session.poll_interval_ms = 250;
        settings.device.default_nickname = Some("Lab Headset".into());

        save_settings_to(&path, &settings).unwrap();
        let loaded = load_settings_from(&path).unwrap();

        assert_eq!(loaded.session.poll_interval_ms, 250);
        assert_eq!(
            loaded.device.default_nickname.as_deref(),
            Some("Lab Headset")
        );
        // Untouched fields keep their defaults.
        assert_eq!(loaded.session.status_ceiling_ms, 5_000);
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_settings_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.session.login_timeout_secs, 30);
    }

    #[test]
    fn credential_record_excludes_the_secret() {
        let record = CredentialRecord {
            email: "player@example.com".into(),
            device_id: Some("crown-1".into()),
            remember: true,
        };
        let toml_str = toml::to_string_pretty(&record).unwrap();

        assert!(toml_str.contains("player@example.com"));
        assert!(!toml_str.to_lowercase().contains("password"));
        assert!(!toml_str.to_lowercase().contains("secret"));
    }

    #[test]
    fn loading_without_a_record_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyringCredentialStore::at_path(dir.path().join("credential.toml"));
        assert!(store.load().unwrap().is_none());
        // Clearing an empty store is harmless.
        store.clear().unwrap();
    }
}
