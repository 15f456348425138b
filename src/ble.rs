use btleplug::{
    api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Manager, Peripheral},
};
use futures::stream::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, TrainerError},
    transport::{ConnectOptions, DeviceDescriptor, LinkState, Transport},
    TRAINER_COMMAND_CHAR_UUID, TRAINER_NOTIFY_CHAR_UUID, TRAINER_SERVICE_UUID,
};

/// How often the link watcher samples the peripheral's connection state
const LINK_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| TrainerError::BluetoothUnavailable(format!("invalid {what} UUID: {e}")))
}

/// Entry point to the system Bluetooth stack.
///
/// Wraps the platform BLE manager; produces [`BleTransport`] handles that a
/// session can own.
pub struct BleCentral {
    manager: Manager,
}

impl BleCentral {
    /// Initialize the Bluetooth stack
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::Ble`] if the Bluetooth adapter cannot be
    /// initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    /// Scan for trainers advertising the trainer service.
    ///
    /// Scans for the full `timeout` window, then returns every matching
    /// device found, strongest signal first.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::BluetoothUnavailable`] if no Bluetooth
    /// adapter is present, or [`TrainerError::Ble`] for other Bluetooth
    /// errors.
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>> {
        info!("Scanning for trainers...");

        let adapters = self.manager.adapters().await?;
        let central = adapters.first().ok_or_else(|| {
            TrainerError::BluetoothUnavailable("no Bluetooth adapters found".to_string())
        })?;

        let service_uuid = parse_uuid(TRAINER_SERVICE_UUID, "service")?;
        central
            .start_scan(ScanFilter {
                services: vec![service_uuid],
            })
            .await?;
        tokio::time::sleep(timeout).await;
        central.stop_scan().await?;

        let mut found = Vec::new();
        for peripheral in central.peripherals().await? {
            if let Ok(Some(properties)) = peripheral.properties().await {
                if !properties.services.contains(&service_uuid) {
                    continue;
                }
                let descriptor = DeviceDescriptor {
                    id: peripheral.address().to_string(),
                    name: properties
                        .local_name
                        .unwrap_or_else(|| "Unknown trainer".to_string()),
                    rssi: properties.rssi.unwrap_or(0),
                };
                info!("Found trainer: {} ({})", descriptor.name, descriptor.id);
                found.push(descriptor);
            }
        }

        found.sort_by_key(|d| std::cmp::Reverse(d.rssi));
        info!("Scan completed, {} trainer(s) found", found.len());
        Ok(found)
    }

    /// Open a transport handle for a previously scanned device.
    ///
    /// The handle is not yet connected; the owning session drives the
    /// connect sequence.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::ConnectionFailed`] if the device is no longer
    /// known to the adapter, or [`TrainerError::Ble`] for Bluetooth errors.
    pub async fn open(&self, descriptor: &DeviceDescriptor) -> Result<Arc<BleTransport>> {
        let adapters = self.manager.adapters().await?;
        let central = adapters.first().ok_or_else(|| {
            TrainerError::BluetoothUnavailable("no Bluetooth adapters found".to_string())
        })?;

        for peripheral in central.peripherals().await? {
            if peripheral.address().to_string() == descriptor.id {
                return Ok(Arc::new(BleTransport::new(peripheral)));
            }
        }

        Err(TrainerError::ConnectionFailed(format!(
            "device {} not found; scan again",
            descriptor.id
        )))
    }
}

struct TransportInner {
    command_char: Option<Characteristic>,
    notify_char: Option<Characteristic>,
    pump: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

/// One trainer's BLE link: GATT connection, characteristic lookup,
/// write-without-response commands, and raw notification fan-in
pub struct BleTransport {
    peripheral: Peripheral,
    inner: Mutex<TransportInner>,
}

impl BleTransport {
    fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            inner: Mutex::new(TransportInner {
                command_char: None,
                notify_char: None,
                pump: None,
                watcher: None,
            }),
        }
    }

    async fn resolve_characteristics(&self) -> Result<(Characteristic, Characteristic)> {
        let service_uuid = parse_uuid(TRAINER_SERVICE_UUID, "service")?;
        let command_uuid = parse_uuid(TRAINER_COMMAND_CHAR_UUID, "command characteristic")?;
        let notify_uuid = parse_uuid(TRAINER_NOTIFY_CHAR_UUID, "notify characteristic")?;

        let services = self.peripheral.services();
        let service = services
            .iter()
            .find(|s| s.uuid == service_uuid)
            .ok_or_else(|| {
                TrainerError::ConnectionFailed("trainer service not found".to_string())
            })?;

        let command_char = service
            .characteristics
            .iter()
            .find(|c| c.uuid == command_uuid)
            .ok_or_else(|| {
                TrainerError::ConnectionFailed("command characteristic not found".to_string())
            })?
            .clone();

        let notify_char = service
            .characteristics
            .iter()
            .find(|c| c.uuid == notify_uuid)
            .ok_or_else(|| {
                TrainerError::ConnectionFailed("notify characteristic not found".to_string())
            })?
            .clone();

        Ok((command_char, notify_char))
    }
}

#[async_trait::async_trait]
impl Transport for BleTransport {
    async fn connect(&self, options: &ConnectOptions) -> Result<()> {
        self.peripheral
            .connect()
            .await
            .map_err(|e| TrainerError::ConnectionFailed(e.to_string()))?;

        self.peripheral.discover_services().await?;
        let (command_char, notify_char) = self.resolve_characteristics().await?;

        self.peripheral.subscribe(&notify_char).await?;

        if let Some(bytes) = &options.immediate_write {
            // Some firmware revisions only accept the wake write inside a
            // short window after the link comes up.
            self.peripheral
                .write(&command_char, bytes, WriteType::WithoutResponse)
                .await?;
        }

        let mut inner = self.inner.lock().await;
        inner.command_char = Some(command_char);
        inner.notify_char = Some(notify_char);
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let command_char = {
            let inner = self.inner.lock().await;
            inner
                .command_char
                .clone()
                .ok_or(TrainerError::NotConnected)?
        };

        debug!("Writing command: {data:02X?}");
        self.peripheral
            .write(&command_char, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(pump) = inner.pump.take() {
                pump.abort();
            }
            if let Some(watcher) = inner.watcher.take() {
                watcher.abort();
            }
            inner.command_char = None;
            inner.notify_char = None;
        }
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn subscribe_notifications(&self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let notify_uuid = {
            let inner = self.inner.lock().await;
            inner
                .notify_char
                .as_ref()
                .ok_or(TrainerError::NotConnected)?
                .uuid
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = self.peripheral.notifications().await?;

        let task = tokio::spawn(async move {
            while let Some(data) = stream.next().await {
                if data.uuid != notify_uuid {
                    continue;
                }
                if tx.send(data.value).is_err() {
                    break;
                }
            }
        });

        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.pump.take() {
            old.abort();
        }
        inner.pump = Some(task);
        Ok(rx)
    }

    async fn link_events(&self) -> Result<mpsc::UnboundedReceiver<LinkState>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peripheral = self.peripheral.clone();

        let task = tokio::spawn(async move {
            let mut last = LinkState::Connected;
            loop {
                tokio::time::sleep(LINK_POLL_INTERVAL).await;
                let state = if peripheral.is_connected().await.unwrap_or(false) {
                    LinkState::Connected
                } else {
                    LinkState::Disconnected
                };
                if state != last {
                    warn!("Link state changed: {last:?} -> {state:?}");
                    last = state;
                    if tx.send(state).is_err() {
                        break;
                    }
                }
            }
        });

        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.watcher.take() {
            old.abort();
        }
        inner.watcher = Some(task);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_constants_parse() {
        assert!(Uuid::parse_str(TRAINER_SERVICE_UUID).is_ok());
        assert!(Uuid::parse_str(TRAINER_COMMAND_CHAR_UUID).is_ok());
        assert!(Uuid::parse_str(TRAINER_NOTIFY_CHAR_UUID).is_ok());
    }

    #[test]
    fn test_characteristic_uuids_share_service_base() {
        let service = Uuid::parse_str(TRAINER_SERVICE_UUID).unwrap();
        let command = Uuid::parse_str(TRAINER_COMMAND_CHAR_UUID).unwrap();
        let notify = Uuid::parse_str(TRAINER_NOTIFY_CHAR_UUID).unwrap();
        // Same 128-bit base, distinct short ids.
        assert_eq!(service.as_bytes()[4..], command.as_bytes()[4..]);
        assert_eq!(service.as_bytes()[4..], notify.as_bytes()[4..]);
        assert_ne!(command, notify);
    }
}
