use crate::protocol::DecodeResult;
use crate::types::{DeviceSettings, TelemetryFrame, TrainingMode};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the per-session event channel. Telemetry arrives at device
/// sample rate; slow subscribers lag rather than block the session.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Typed event delivered to session subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// The connect sequence completed
    Connected,
    /// The session settled back into the disconnected state
    Disconnected,
    /// A lifecycle error, broadcast in parallel with being returned to the
    /// direct caller
    Error(String),
    /// One telemetry sample
    Frame(TelemetryFrame),
    /// The device finished a repetition
    RepComplete,
    /// The device finished a full set
    SetComplete,
    /// The device confirmed a training mode
    ModeConfirmed(TrainingMode),
    /// The cached settings changed; carries the merged snapshot
    SettingsUpdated(DeviceSettings),
    /// Battery level report, percent
    Battery(u8),
    /// A reconnect attempt is starting
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
        /// Configured attempt limit
        max_attempts: u32,
    },
    /// Every reconnect attempt failed
    ReconnectFailed,
}

/// Route one decode result to its event, merging settings updates into the
/// cached snapshot first.
///
/// Exactly one event is emitted per known variant. `Unknown` results are
/// dropped after a debug log; the telemetry stream stays resilient to the
/// occasional unparseable notification. Send failures mean no subscriber is
/// listening and are ignored.
pub fn dispatch(
    result: DecodeResult,
    settings: &mut DeviceSettings,
    sender: &broadcast::Sender<DeviceEvent>,
) {
    let event = match result {
        DecodeResult::Frame(frame) => DeviceEvent::Frame(frame),
        DecodeResult::RepBoundary => DeviceEvent::RepComplete,
        DecodeResult::SetBoundary => DeviceEvent::SetComplete,
        DecodeResult::ModeConfirmation(mode) => DeviceEvent::ModeConfirmed(mode),
        DecodeResult::SettingsUpdate(update) => {
            settings.merge(&update);
            DeviceEvent::SettingsUpdated(settings.clone())
        }
        DecodeResult::DeviceStatus { battery } => DeviceEvent::Battery(battery),
        DecodeResult::Unknown(raw) => {
            debug!("Dropping unrecognized notification: {raw:02X?}");
            return;
        }
    };

    let _ = sender.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MovementPhase;
    use std::time::SystemTime;

    fn channel() -> (
        broadcast::Sender<DeviceEvent>,
        broadcast::Receiver<DeviceEvent>,
    ) {
        broadcast::channel(EVENT_CHANNEL_CAPACITY)
    }

    #[test]
    fn test_frame_routes_to_frame_event() {
        let (tx, mut rx) = channel();
        let mut settings = DeviceSettings::default();
        let frame = TelemetryFrame {
            sequence: 1,
            phase: MovementPhase::Concentric,
            position: 10,
            force: 20,
            velocity: 30,
            timestamp: SystemTime::now(),
        };

        dispatch(DecodeResult::Frame(frame), &mut settings, &tx);
        assert_eq!(rx.try_recv().unwrap(), DeviceEvent::Frame(frame));
    }

    #[test]
    fn test_boundaries_route_to_markers() {
        let (tx, mut rx) = channel();
        let mut settings = DeviceSettings::default();

        dispatch(DecodeResult::RepBoundary, &mut settings, &tx);
        dispatch(DecodeResult::SetBoundary, &mut settings, &tx);
        assert_eq!(rx.try_recv().unwrap(), DeviceEvent::RepComplete);
        assert_eq!(rx.try_recv().unwrap(), DeviceEvent::SetComplete);
    }

    #[test]
    fn test_settings_update_merges_then_emits_snapshot() {
        let (tx, mut rx) = channel();
        let mut settings = DeviceSettings {
            base_weight: Some(50),
            chains: Some(10),
            ..Default::default()
        };

        let update = DeviceSettings {
            base_weight: Some(75),
            ..Default::default()
        };
        dispatch(DecodeResult::SettingsUpdate(update), &mut settings, &tx);

        assert_eq!(settings.base_weight, Some(75));
        assert_eq!(settings.chains, Some(10));
        match rx.try_recv().unwrap() {
            DeviceEvent::SettingsUpdated(snapshot) => {
                assert_eq!(snapshot, settings);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_is_dropped_silently() {
        let (tx, mut rx) = channel();
        let mut settings = DeviceSettings::default();

        dispatch(
            DecodeResult::Unknown(vec![0xDE, 0xAD]),
            &mut settings,
            &tx,
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_without_subscribers_is_a_no_op() {
        let (tx, rx) = channel();
        drop(rx);
        let mut settings = DeviceSettings::default();
        dispatch(DecodeResult::RepBoundary, &mut settings, &tx);
    }

    #[test]
    fn test_battery_and_mode_events() {
        let (tx, mut rx) = channel();
        let mut settings = DeviceSettings::default();

        dispatch(
            DecodeResult::DeviceStatus { battery: 42 },
            &mut settings,
            &tx,
        );
        dispatch(
            DecodeResult::ModeConfirmation(TrainingMode::Isometric),
            &mut settings,
            &tx,
        );
        assert_eq!(rx.try_recv().unwrap(), DeviceEvent::Battery(42));
        assert_eq!(
            rx.try_recv().unwrap(),
            DeviceEvent::ModeConfirmed(TrainingMode::Isometric)
        );
    }
}
