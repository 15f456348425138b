use crate::device::TrainerDevice;
use crate::error::Result;
use crate::events::{DeviceEvent, EVENT_CHANNEL_CAPACITY};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Coordinator for several independent device sessions.
///
/// Purely compositional: every session keeps its own state, transport, and
/// event channel. The manager adds a registry keyed by caller-chosen id and
/// a merged event stream that tags each event with the id of the session it
/// came from.
///
/// # Examples
///
/// ```no_run
/// use liftlink::{BleCentral, TrainerDevice, TrainerManager};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let central = BleCentral::new().await?;
///     let manager = TrainerManager::new();
///
///     for descriptor in central.scan(Duration::from_secs(5)).await? {
///         let transport = central.open(&descriptor).await?;
///         let device = TrainerDevice::new(transport, descriptor.clone());
///         manager.add(descriptor.id.clone(), device).await;
///     }
///
///     let mut events = manager.subscribe();
///     manager.connect_all().await;
///     while let Ok((id, event)) = events.recv().await {
///         println!("{id}: {event:?}");
///     }
///     Ok(())
/// }
/// ```
pub struct TrainerManager {
    devices: Arc<Mutex<HashMap<String, Entry>>>,
    events: broadcast::Sender<(String, DeviceEvent)>,
}

struct Entry {
    device: TrainerDevice,
    forwarder: JoinHandle<()>,
}

impl TrainerManager {
    /// Create an empty manager
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            devices: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Subscribe to the merged event stream of every managed session. Each
    /// event is tagged with the id it was registered under.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<(String, DeviceEvent)> {
        self.events.subscribe()
    }

    /// Register a session under `id` and start forwarding its events into
    /// the merged stream.
    ///
    /// Registering an id that is already present replaces the old session;
    /// the replaced session is shut down first so its tasks stop.
    pub async fn add(&self, id: String, device: TrainerDevice) {
        let forwarder = self.spawn_forwarder(id.clone(), &device);
        let previous = self.devices.lock().await.insert(
            id.clone(),
            Entry { device, forwarder },
        );

        if let Some(old) = previous {
            warn!("Replacing already-registered device {id}");
            old.forwarder.abort();
            old.device.shutdown().await;
        } else {
            info!("Registered device {id}");
        }
    }

    fn spawn_forwarder(&self, id: String, device: &TrainerDevice) -> JoinHandle<()> {
        let mut rx = device.subscribe();
        let tx = self.events.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = tx.send((id.clone(), event));
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Event forwarder for {id} lagged, skipped {missed} event(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Remove the session registered under `id`, disconnecting it first.
    /// Returns the removed session, or `None` if the id was not registered.
    pub async fn remove(&self, id: &str) -> Option<TrainerDevice> {
        let entry = self.devices.lock().await.remove(id)?;
        info!("Removing device {id}");
        if let Err(e) = entry.device.disconnect().await {
            warn!("Disconnect during removal of {id} failed: {e}");
        }
        entry.forwarder.abort();
        Some(entry.device)
    }

    /// Session registered under `id`, if any
    pub async fn get(&self, id: &str) -> Option<TrainerDevice> {
        self.devices
            .lock()
            .await
            .get(id)
            .map(|entry| entry.device.clone())
    }

    /// Every registered id, ascending
    pub async fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.lock().await.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.devices.lock().await.len()
    }

    /// Whether no session is registered
    pub async fn is_empty(&self) -> bool {
        self.devices.lock().await.is_empty()
    }

    /// Connect every registered session, in registration-id order.
    ///
    /// One session failing does not stop the others; each failure is
    /// returned alongside its id.
    pub async fn connect_all(&self) -> Vec<(String, Result<()>)> {
        let targets = self.snapshot().await;
        let mut results = Vec::with_capacity(targets.len());
        for (id, device) in targets {
            let result = device.connect().await;
            if let Err(e) = &result {
                warn!("connect_all: {id} failed: {e}");
            }
            results.push((id, result));
        }
        results
    }

    /// Disconnect every registered session
    pub async fn disconnect_all(&self) {
        for (id, device) in self.snapshot().await {
            if let Err(e) = device.disconnect().await {
                warn!("disconnect_all: {id} failed: {e}");
            }
        }
    }

    async fn snapshot(&self) -> Vec<(String, TrainerDevice)> {
        let mut sessions: Vec<(String, TrainerDevice)> = self
            .devices
            .lock()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.device.clone()))
            .collect();
        sessions.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        sessions
    }
}

impl Default for TrainerManager {
    fn default() -> Self {
        Self::new()
    }
}
