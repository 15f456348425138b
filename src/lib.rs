#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # LiftLink
//!
//! A Rust library for controlling cable resistance trainers via Bluetooth
//! Low Energy.
//!
//! The library drives the full session lifecycle for one or more trainers:
//! scanning, the connect/authenticate/initialize handshake, live telemetry
//! decoding, resistance and training-mode control through pre-computed
//! command tables, set recording, and bounded auto-reconnect after an
//! unexpected link drop.
//!
//! Each device session exposes a typed event stream; a fleet coordinator
//! merges the streams of several trainers when an application drives more
//! than one unit.
//!
//! ## Safety Warning
//!
//! ⚠️ **Important**: This library controls physical exercise equipment under
//! load. Always ensure:
//! - The trainer's mechanical safety stops are configured
//! - Users understand how to safely release the handle under resistance
//! - Proper error handling is implemented in your application
//!
//! ## Quick Start
//!
//! ```no_run
//! use liftlink::{BleCentral, DeviceEvent, TrainerDevice, TrainingMode};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover a trainer and open its transport
//!     let central = BleCentral::new().await?;
//!     let found = central.scan(Duration::from_secs(5)).await?;
//!     let descriptor = found.first().ok_or("no trainer found")?.clone();
//!     let transport = central.open(&descriptor).await?;
//!
//!     // Connect and configure
//!     let device = TrainerDevice::new(transport, descriptor);
//!     let mut events = device.subscribe();
//!     device.connect().await?;
//!     device.set_training_mode(TrainingMode::WeightTraining).await?;
//!     device.set_weight(40).await?;
//!
//!     // Record one set, watching live telemetry
//!     device.start_recording().await?;
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             DeviceEvent::Frame(frame) => println!("{frame}"),
//!             DeviceEvent::SetComplete => break,
//!             _ => {}
//!         }
//!     }
//!     device.stop_recording().await?;
//!     device.disconnect().await?;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy transport implementation
pub mod ble;
/// Pre-computed command lookup tables and session command constants
pub mod commands;
/// Main device session interface
pub mod device;
/// Error types and handling
pub mod error;
/// Typed device events and notification dispatch
pub mod events;
/// Multi-device fleet coordination
pub mod manager;
/// Wire protocol encoding and decoding
pub mod protocol;
/// Bounded auto-reconnect loop
pub mod reconnect;
/// Connection and recording state machines
pub mod state;
/// Transport capability trait and device descriptors
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use ble::{BleCentral, BleTransport};
pub use device::TrainerDevice;
pub use error::{Result, TrainerError};
pub use events::DeviceEvent;
pub use manager::TrainerManager;
pub use reconnect::{CancelGuard, ReconnectConfig, ReconnectOutcome, ReconnectState};
pub use state::{ConnectionState, EnforcementMode, RecordingState};
pub use transport::{ConnectOptions, DeviceDescriptor, LinkState, Transport};
pub use types::{
    DeviceSettings, MovementPhase, SessionConfig, TelemetryFrame, TrainingMode,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Trainer BLE service UUID
///
/// Primary communication service advertised by the trainer; scanning filters
/// on this UUID. All command and notification traffic runs through its two
/// characteristics.
pub const TRAINER_SERVICE_UUID: &str = "7A310001-94C6-4BDE-8A51-E2C0D3C7B911";

/// Command characteristic UUID for app-to-device writes
///
/// All commands are written here without response; the trainer never
/// acknowledges a write on the GATT layer.
pub const TRAINER_COMMAND_CHAR_UUID: &str = "7A310002-94C6-4BDE-8A51-E2C0D3C7B911";

/// Notify characteristic UUID for device-to-app notifications
///
/// The trainer streams telemetry frames, rep/set boundary markers, settings
/// updates, and status frames through this characteristic.
pub const TRAINER_NOTIFY_CHAR_UUID: &str = "7A310003-94C6-4BDE-8A51-E2C0D3C7B911";
