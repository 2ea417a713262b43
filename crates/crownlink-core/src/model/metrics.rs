// ── Metric types ──
//
// Payload schemas are dictated by the vendor: a scalar probability for the
// awareness metrics, named sub-band arrays for brainwave power, and a small
// fixed set of named scalars for the accelerometer. Each kind's schema is
// known at registration time; there is no dynamic discovery.

use serde::Deserialize;
use serde_json::Value;

use crate::error::CoreError;

/// A metric stream a client can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Calm,
    Focus,
    PowerByBand,
    Accelerometer,
    /// Trained-thought probability, labeled by the trained action
    /// (e.g. `leftArm`).
    Kinesis(String),
}

impl MetricKind {
    /// The vendor's metric family this kind belongs to.
    pub fn family(&self) -> &'static str {
        match self {
            Self::Calm | Self::Focus => "awareness",
            Self::PowerByBand => "brainwaves",
            Self::Accelerometer => "accelerometer",
            Self::Kinesis(_) => "kinesis",
        }
    }

    /// The label the subscription marker is filed under.
    pub fn label(&self) -> &str {
        match self {
            Self::Calm => "calm",
            Self::Focus => "focus",
            Self::PowerByBand => "powerByBand",
            Self::Accelerometer => "accelerometer",
            Self::Kinesis(label) => label,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Scalar probability payload shared by the awareness and kinesis metrics.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ProbabilityPayload {
    #[serde(default)]
    label: Option<String>,
    probability: f64,
}

/// Per-band brainwave power arrays, one entry per channel.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BandPowers {
    #[serde(default)]
    pub alpha: Vec<f64>,
    #[serde(default)]
    pub beta: Vec<f64>,
    #[serde(default)]
    pub delta: Vec<f64>,
    #[serde(default)]
    pub gamma: Vec<f64>,
    #[serde(default)]
    pub theta: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PowerByBand {
    #[serde(default)]
    pub label: Option<String>,
    pub data: BandPowers,
}

/// Orientation and acceleration reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionReading {
    #[serde(default)]
    pub acceleration: f64,
    #[serde(default)]
    pub inclination: f64,
    #[serde(default)]
    pub orientation: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub roll: f64,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// A decoded metric payload. Constructed on arrival, handed to every
/// registered handler, then discarded — the core never retains these.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricUpdate {
    Probability { label: String, probability: f64 },
    PowerByBand(PowerByBand),
    Motion(MotionReading),
}

impl MetricUpdate {
    /// Decode a raw payload according to its kind's schema.
    pub fn decode(kind: &MetricKind, raw: &Value) -> Result<Self, CoreError> {
        let decode_err = |e: serde_json::Error| CoreError::Decode {
            context: format!("{} payload", kind.label()),
            message: e.to_string(),
        };

        match kind {
            MetricKind::Calm | MetricKind::Focus | MetricKind::Kinesis(_) => {
                let payload: ProbabilityPayload =
                    serde_json::from_value(raw.clone()).map_err(decode_err)?;
                Ok(Self::Probability {
                    label: payload.label.unwrap_or_else(|| kind.label().to_owned()),
                    probability: payload.probability,
                })
            }
            MetricKind::PowerByBand => {
                let payload: PowerByBand =
                    serde_json::from_value(raw.clone()).map_err(decode_err)?;
                Ok(Self::PowerByBand(payload))
            }
            MetricKind::Accelerometer => {
                let payload: MotionReading =
                    serde_json::from_value(raw.clone()).map_err(decode_err)?;
                Ok(Self::Motion(payload))
            }
        }
    }
}

/// Live zeroable aggregate of the latest scalar scores and motion reading.
///
/// Reset to all-zero whenever the device enters sleep mode and on logout,
/// so gameplay consumers read neutral values instead of stale ones.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricScores {
    pub calm: f64,
    pub focus: f64,
    pub motion: MotionReading,
}
