//! Session, device, and metric-stream management for Crown headsets.
//!
//! The pieces compose around [`SessionManager`]: it authenticates against a
//! [`Backend`](crownlink_store::Backend), resolves the account's device
//! directory, polls the selected device's status at a fixed cadence, and
//! fans decoded metric updates out to registered handlers.

pub mod credentials;
pub mod directory;
pub mod error;
pub mod hub;
pub mod model;
pub mod session;

mod poller;

pub use credentials::{Credential, CredentialStore};
pub use directory::DirectoryListing;
pub use error::CoreError;
pub use hub::SubscriptionHub;
pub use model::{
    BandPowers, DeviceRecord, DeviceState, DeviceStatus, MetricKind, MetricScores, MetricUpdate,
    MotionReading, PowerByBand, SleepReason, Telemetry,
};
pub use session::{SessionConfig, SessionManager};
