use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A device found during scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable identifier (platform peripheral id or MAC)
    pub id: String,
    /// Advertised name
    pub name: String,
    /// Signal strength at scan time
    pub rssi: i16,
}

/// Options applied when establishing the link
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Bytes written immediately after the link comes up, before anything
    /// else. Some firmware revisions require a wake write inside the
    /// connection window.
    pub immediate_write: Option<Vec<u8>>,
}

/// Raw link state as reported by the transport, independent of the
/// session's own lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// The transport holds an open link
    Connected,
    /// The transport holds no link
    Disconnected,
}

/// Narrow capability interface the core requires from a transport.
///
/// The session owns exactly one transport handle; handles are never shared
/// between sessions. A hung call is the transport's responsibility to
/// bound; the core adds no timeout beyond its own fixed waits.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the link
    async fn connect(&self, options: &ConnectOptions) -> Result<()>;

    /// Write one command without response
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Tear the link down
    async fn disconnect(&self) -> Result<()>;

    /// Whether the transport currently holds an open link
    async fn is_connected(&self) -> bool;

    /// Current raw link state
    async fn link_state(&self) -> LinkState {
        if self.is_connected().await {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }

    /// Subscribe to raw notification bytes, in delivery order
    async fn subscribe_notifications(&self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>>;

    /// Subscribe to link-state changes
    async fn link_events(&self) -> Result<mpsc::UnboundedReceiver<LinkState>>;
}
