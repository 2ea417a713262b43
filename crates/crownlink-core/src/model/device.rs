// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device operational state.
///
/// A closed enumeration: every consumer matches exhaustively, so a state
/// can never be silently mishandled the way string comparisons allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
pub enum DeviceState {
    Online,
    Offline,
    Booting,
    ShuttingOff,
    Updating,
    Charging,
}

impl DeviceState {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }

    /// Whether a device in this state is actually sending fresh data.
    /// Battery readings from a non-transmitting device are stale and are
    /// suppressed by the status poller.
    pub fn is_transmitting(self) -> bool {
        !matches!(self, Self::Offline | Self::Booting | Self::ShuttingOff)
    }
}

/// Why a sleeping device went to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
pub enum SleepReason {
    Updating,
    Charging,
}

impl SleepReason {
    /// The operational state reported while the device sleeps for this reason.
    pub fn as_state(self) -> DeviceState {
        match self {
            Self::Updating => DeviceState::Updating,
            Self::Charging => DeviceState::Charging,
        }
    }
}

/// Static info record for a registered device. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    pub device_nickname: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub channel_names: Vec<String>,
    #[serde(default)]
    pub sampling_rate: Option<u32>,
}

/// One point-in-time status snapshot, replaced wholesale on every
/// successful poll and never partially merged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub state: DeviceState,
    #[serde(default)]
    pub sleep_mode: bool,
    #[serde(default)]
    pub sleep_mode_reason: Option<SleepReason>,
    /// Battery percentage 0–100. The backend omits it around boot.
    #[serde(default)]
    pub battery: Option<f64>,
    #[serde(default)]
    pub claimed_by: Option<String>,
    /// Epoch milliseconds of the device's last heartbeat.
    #[serde(default)]
    pub last_heartbeat: Option<i64>,
}

impl DeviceStatus {
    /// The state to report to consumers: the sleep reason while sleeping,
    /// the decoded operational state otherwise.
    pub fn reported_state(&self) -> DeviceState {
        if self.sleep_mode {
            self.sleep_mode_reason
                .map_or(self.state, SleepReason::as_state)
        } else {
            self.state
        }
    }

    pub fn last_heartbeat_time(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat.and_then(DateTime::from_timestamp_millis)
    }
}

/// The polled read-only view the session exposes to consumers.
///
/// `battery` survives snapshots that omit it and states in which the
/// device is not transmitting — the last trustworthy reading is retained
/// rather than zeroed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    pub state: Option<DeviceState>,
    pub battery: Option<f64>,
    pub sleeping: bool,
    pub claimed_by: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Telemetry {
    pub fn is_online(&self) -> bool {
        self.state.is_some_and(DeviceState::is_online)
    }
}
