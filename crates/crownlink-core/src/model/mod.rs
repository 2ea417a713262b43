// ── Domain model ──
//
// Canonical types for everything the session layer reads off the remote
// store. Wire structs mirror the vendor database's camelCase schemas;
// they are external contracts, not ours to reshape.

pub mod device;
pub mod metrics;

pub use device::{DeviceRecord, DeviceState, DeviceStatus, SleepReason, Telemetry};
pub use metrics::{
    BandPowers, MetricKind, MetricScores, MetricUpdate, MotionReading, PowerByBand,
};
