use thiserror::Error;

/// Errors that can occur when working with a resistance trainer
#[derive(Error, Debug)]
pub enum TrainerError {
    /// Connecting to the device failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// The link dropped while the session believed it was connected
    #[error("Connection lost")]
    ConnectionLost,

    /// An operation did not complete within its allotted time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Operation requires an active connection
    #[error("Device not connected")]
    NotConnected,

    /// A connect was requested while already connected
    #[error("Device already connected")]
    AlreadyConnected,

    /// Authentication handshake failed
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A requested setting value is outside the device's supported set
    #[error("Invalid setting value {value} for {family}; supported: {supported:?}")]
    InvalidSetting {
        /// Setting family name (weight, chains, ...)
        family: &'static str,
        /// The rejected value
        value: i64,
        /// Every value the device accepts for this family
        supported: Vec<i64>,
    },

    /// A wire command could not be delivered
    #[error("Command failed: {command}")]
    CommandFailed {
        /// Name of the command that failed
        command: &'static str,
    },

    /// A connection-state change violated the transition table
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// State the machine was in
        from: String,
        /// State that was requested
        to: String,
    },

    /// Telemetry payload could not be decoded
    #[error("Failed to decode telemetry: {0}")]
    TelemetryDecode(String),

    /// No usable Bluetooth adapter on this host
    #[error("Bluetooth unavailable: {0}")]
    BluetoothUnavailable(String),

    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),
}

/// Result type for trainer operations
pub type Result<T> = std::result::Result<T, TrainerError>;

impl TrainerError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::ConnectionLost
                | Self::NotConnected
                | Self::BluetoothUnavailable(_)
                | Self::Ble(_)
        )
    }

    /// Check if this error is recoverable by retrying
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ConnectionLost | Self::CommandFailed { .. }
        )
    }
}

/// Reclassify a transport failure raised during connect/auth/init.
///
/// Transport adapters surface their own error text; the session boundary maps
/// it onto the lifecycle error kinds by inspecting the message. The original
/// text is retained inside the classified error.
#[must_use]
pub fn classify_connect_error(err: &TrainerError) -> TrainerError {
    match err {
        TrainerError::Timeout(msg) => TrainerError::Timeout(msg.clone()),
        TrainerError::AuthFailed(msg) => TrainerError::AuthFailed(msg.clone()),
        other => {
            let text = other.to_string();
            let lowered = text.to_lowercase();
            if lowered.contains("timeout") || lowered.contains("timed out") {
                TrainerError::Timeout(text)
            } else if lowered.contains("auth") {
                TrainerError::AuthFailed(text)
            } else {
                TrainerError::ConnectionFailed(text)
            }
        }
    }
}
