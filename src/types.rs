use serde::{Deserialize, Serialize};
use std::{fmt, time::SystemTime};

/// Discrete stage of a repetition as reported by the trainer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementPhase {
    /// No movement in progress
    Idle,
    /// Lifting phase, muscle shortening under load
    Concentric,
    /// Static hold at the top of the movement
    Hold,
    /// Lowering phase, muscle lengthening under load
    Eccentric,
    /// Phase byte outside the known range
    Unknown,
}

impl MovementPhase {
    /// Decode a phase byte. Out-of-range values decode to `Unknown` so a
    /// telemetry frame never fails on the phase field alone.
    #[must_use]
    pub const fn from_wire(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Concentric,
            2 => Self::Hold,
            3 => Self::Eccentric,
            _ => Self::Unknown,
        }
    }

    /// Wire byte for this phase. `Unknown` maps to 0xFF, which the decoder
    /// maps back to `Unknown`, keeping the codec round-trip exact.
    #[must_use]
    pub const fn as_wire(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Concentric => 1,
            Self::Hold => 2,
            Self::Eccentric => 3,
            Self::Unknown => 0xFF,
        }
    }
}

impl fmt::Display for MovementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Concentric => write!(f, "Concentric"),
            Self::Hold => write!(f, "Hold"),
            Self::Eccentric => write!(f, "Eccentric"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Device-level resistance behavior profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrainingMode {
    /// No mode engaged
    Idle = 0,
    /// Constant-load weight training
    WeightTraining = 1,
    /// Rowing resistance curve
    Rowing = 2,
    /// Fixed-position isometric hold
    Isometric = 3,
}

impl TrainingMode {
    /// Decode a mode byte. Unrecognized values fall back to `Idle` rather
    /// than failing; the trainer occasionally reports transitional values
    /// that mean "no mode engaged".
    #[must_use]
    pub const fn from_wire(value: u8) -> Self {
        match value {
            1 => Self::WeightTraining,
            2 => Self::Rowing,
            3 => Self::Isometric,
            _ => Self::Idle,
        }
    }

    /// Wire byte for this mode
    #[must_use]
    pub const fn as_wire(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::WeightTraining => write!(f, "Weight Training"),
            Self::Rowing => write!(f, "Rowing"),
            Self::Isometric => write!(f, "Isometric"),
        }
    }
}

/// One sampled instant of trainer sensor data
///
/// Produced by the codec from a 30-byte telemetry notification, or by the
/// encode path when simulating device traffic. `timestamp` records when the
/// frame was decoded and is deliberately excluded from equality so the
/// encode/decode round trip compares only wire-visible fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Monotonic sample counter within one connection epoch
    pub sequence: u16,
    /// Current repetition phase
    pub phase: MovementPhase,
    /// Cable position in millimeters
    pub position: u16,
    /// Applied force in newtons, signed (negative on assisted release)
    pub force: i16,
    /// Cable velocity in millimeters per second
    pub velocity: u16,
    /// Capture time of this frame
    pub timestamp: SystemTime,
}

impl fmt::Display for TelemetryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}: {} mm, {} N, {} mm/s",
            self.sequence, self.phase, self.position, self.force, self.velocity
        )
    }
}

impl PartialEq for TelemetryFrame {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
            && self.phase == other.phase
            && self.position == other.position
            && self.force == other.force
            && self.velocity == other.velocity
    }
}

/// Last known resistance configuration of the trainer
///
/// Every field is optional: the cache starts empty at connect and fields are
/// overwritten individually as `settings_update` notifications arrive or
/// local set-commands succeed. The same type doubles as the partial update
/// decoded from a multi-param notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Base resistance in kilograms
    pub base_weight: Option<u16>,
    /// Chain load added through the concentric phase, kilograms
    pub chains: Option<u16>,
    /// Chain load removed through the concentric phase, kilograms
    pub inverse_chains: Option<u16>,
    /// Eccentric overload as a percentage of base weight
    pub eccentric: Option<u16>,
    /// Active training mode
    pub training_mode: Option<TrainingMode>,
}

impl DeviceSettings {
    /// Merge a partial update into this cache. Only populated fields
    /// overwrite; absent fields leave the cached value untouched.
    pub fn merge(&mut self, update: &Self) {
        if let Some(v) = update.base_weight {
            self.base_weight = Some(v);
        }
        if let Some(v) = update.chains {
            self.chains = Some(v);
        }
        if let Some(v) = update.inverse_chains {
            self.inverse_chains = Some(v);
        }
        if let Some(v) = update.eccentric {
            self.eccentric = Some(v);
        }
        if let Some(v) = update.training_mode {
            self.training_mode = Some(v);
        }
    }

    /// Whether the update carries no fields at all
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.base_weight.is_none()
            && self.chains.is_none()
            && self.inverse_chains.is_none()
            && self.eccentric.is_none()
            && self.training_mode.is_none()
    }
}

/// Session-level timing and reconnect configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed wait after the identity write; the device's auth acknowledgment
    /// is advisory, so the timeout itself is the synchronization point
    pub auth_timeout_ms: u64,
    /// Delay after each initialization command. The device drops writes sent
    /// too quickly after the previous one.
    pub init_command_delay_ms: u64,
    /// Auto-reconnect behavior after an unexpected link drop
    pub reconnect: crate::reconnect::ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_timeout_ms: 1_000,
            init_command_delay_ms: 150,
            reconnect: crate::reconnect::ReconnectConfig::default(),
        }
    }
}
