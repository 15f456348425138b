use crate::types::{DeviceSettings, MovementPhase, TelemetryFrame, TrainingMode};
use bytes::BufMut;
use std::time::SystemTime;

/// Telemetry frame size in bytes. Shorter buffers are silently dropped; BLE
/// MTU fragmentation makes truncated frames an expected artifact.
pub const FRAME_SIZE: usize = 30;

/// 4-byte header opening every telemetry stream frame
pub const HEADER_TELEMETRY: [u8; 4] = [0xF0, 0xA1, 0x00, 0x01];
/// 4-byte header of a repetition-complete marker (no payload)
pub const HEADER_REP_SUMMARY: [u8; 4] = [0xF0, 0xA2, 0x00, 0x01];
/// 4-byte header of a set-complete marker (no payload)
pub const HEADER_SET_SUMMARY: [u8; 4] = [0xF0, 0xA3, 0x00, 0x01];
/// 4-byte header of a general status notification
pub const HEADER_STATUS_UPDATE: [u8; 4] = [0xF0, 0xA4, 0x00, 0x01];

/// 2-byte header of a training-mode confirmation
pub const HEADER_MODE_CONFIRMATION: [u8; 2] = [0xE1, 0x01];
/// 2-byte header of a multi-parameter notification
pub const HEADER_MULTI_PARAM: [u8; 2] = [0xE1, 0x02];
/// 2-byte header of a settings-update notification
pub const HEADER_SETTINGS_UPDATE: [u8; 2] = [0xE1, 0x03];
/// 2-byte header of the post-boot device-init status frame
pub const HEADER_DEVICE_INIT: [u8; 2] = [0xE2, 0x01];
/// 2-byte header of the periodic battery status frame
pub const HEADER_STATUS_BATTERY: [u8; 2] = [0xE2, 0x02];

// Telemetry field offsets, shared by encoder and decoder.
const SEQUENCE_OFFSET: usize = 4;
const PHASE_OFFSET: usize = 6;
const POSITION_OFFSET: usize = 8;
const FORCE_OFFSET: usize = 10;
const VELOCITY_OFFSET: usize = 12;

/// Minimum length of a mode-confirmation message
const MODE_CONFIRMATION_MIN_LEN: usize = 4;
/// Offset of the mode byte within a mode-confirmation message
const MODE_VALUE_OFFSET: usize = 3;

/// Offset of the parameter-count byte in a settings update
const PARAM_COUNT_OFFSET: usize = 2;
/// Offset of the first (param id, value) pair
const PARAM_LIST_OFFSET: usize = 3;
/// Upper bound on parameters read from one message, regardless of what the
/// count byte claims
const MAX_PARAMS_PER_MESSAGE: usize = 16;

/// Minimum length of a `device_init` status frame
const DEVICE_INIT_MIN_LEN: usize = 8;
/// Battery byte offset within a `device_init` frame
const DEVICE_INIT_BATTERY_OFFSET: usize = 6;
/// Minimum length of a `status_battery` frame
const STATUS_BATTERY_MIN_LEN: usize = 4;
/// Battery byte offset within a `status_battery` frame
const STATUS_BATTERY_OFFSET: usize = 2;

/// Parameter id for base weight (wide, 2-byte value)
pub const PARAM_BASE_WEIGHT: u16 = 0x0001;
/// Parameter id for chains (1-byte value)
pub const PARAM_CHAINS: u16 = 0x0002;
/// Parameter id for inverse chains (1-byte value)
pub const PARAM_INVERSE_CHAINS: u16 = 0x0003;
/// Parameter id for eccentric overload (wide, 2-byte value)
pub const PARAM_ECCENTRIC: u16 = 0x0004;
/// Parameter id for training mode (1-byte value)
pub const PARAM_TRAINING_MODE: u16 = 0x0005;

/// Parameter ids whose value occupies two bytes (little-endian). Every other
/// id, including unknown ones, consumes a single byte.
const WIDE_PARAM_IDS: [u16; 2] = [PARAM_BASE_WEIGHT, PARAM_ECCENTRIC];

/// Category of one raw notification, identified from its header bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// 30-byte telemetry frame
    TelemetryStream,
    /// Repetition boundary marker
    RepSummary,
    /// Set boundary marker
    SetSummary,
    /// Device status (init, battery, or the general 4-byte layout)
    StatusUpdate,
    /// Training-mode confirmation
    ModeConfirmation,
    /// Multi-parameter notification
    MultiParam,
    /// Settings-update notification
    SettingsUpdate,
    /// Post-boot init status
    DeviceInit,
    /// No known header matched
    Unknown,
}

/// Tagged outcome of decoding one notification
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeResult {
    /// One telemetry sample
    Frame(TelemetryFrame),
    /// The device finished a repetition
    RepBoundary,
    /// The device finished a full set
    SetBoundary,
    /// The device confirmed a training mode
    ModeConfirmation(TrainingMode),
    /// A partial settings update; absent fields were not present on the wire
    SettingsUpdate(DeviceSettings),
    /// Device status with battery level (percent)
    DeviceStatus {
        /// Battery charge, 0-100
        battery: u8,
    },
    /// A status-category frame in an unrecognized layout, surfaced raw so
    /// higher layers can log it
    Unknown(Vec<u8>),
}

/// Identify a notification's category from its header bytes.
///
/// Exact byte equality only: 4-byte headers are checked first, then 2-byte
/// headers. Any buffer shorter than 4 bytes identifies as `Unknown` — every
/// real message is at least that long, including the 2-byte-header kinds,
/// so a shorter buffer is a fragment regardless of how it starts.
#[must_use]
pub fn identify_message_type(data: &[u8]) -> MessageType {
    if data.len() < 4 {
        return MessageType::Unknown;
    }

    if data[..4] == HEADER_TELEMETRY {
        return MessageType::TelemetryStream;
    }
    if data[..4] == HEADER_REP_SUMMARY {
        return MessageType::RepSummary;
    }
    if data[..4] == HEADER_SET_SUMMARY {
        return MessageType::SetSummary;
    }
    if data[..4] == HEADER_STATUS_UPDATE {
        return MessageType::StatusUpdate;
    }

    if data[..2] == HEADER_MODE_CONFIRMATION {
        return MessageType::ModeConfirmation;
    }
    if data[..2] == HEADER_MULTI_PARAM {
        return MessageType::MultiParam;
    }
    if data[..2] == HEADER_SETTINGS_UPDATE {
        return MessageType::SettingsUpdate;
    }
    if data[..2] == HEADER_DEVICE_INIT {
        return MessageType::DeviceInit;
    }
    if data[..2] == HEADER_STATUS_BATTERY {
        return MessageType::StatusUpdate;
    }

    MessageType::Unknown
}

fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Decode a 30-byte telemetry frame.
///
/// Returns `None` for any buffer under 30 bytes; truncated frames are an
/// expected artifact of BLE delivery and must not interrupt the stream. The
/// header is assumed already identified by [`identify_message_type`].
#[must_use]
pub fn decode_telemetry_frame(data: &[u8]) -> Option<TelemetryFrame> {
    if data.len() < FRAME_SIZE {
        return None;
    }

    Some(TelemetryFrame {
        sequence: read_u16_le(data, SEQUENCE_OFFSET),
        phase: MovementPhase::from_wire(data[PHASE_OFFSET]),
        position: read_u16_le(data, POSITION_OFFSET),
        force: i16::from_le_bytes([data[FORCE_OFFSET], data[FORCE_OFFSET + 1]]),
        velocity: read_u16_le(data, VELOCITY_OFFSET),
        timestamp: SystemTime::now(),
    })
}

/// Encode a telemetry frame to its exact wire representation.
///
/// Inverse of [`decode_telemetry_frame`]; exists so a simulator can produce
/// wire-identical traffic without a real device. For every representable
/// frame, `decode(encode(f)) == f`.
#[must_use]
pub fn encode_telemetry_frame(frame: &TelemetryFrame) -> [u8; FRAME_SIZE] {
    let mut out = [0u8; FRAME_SIZE];
    out[..4].copy_from_slice(&HEADER_TELEMETRY);
    out[SEQUENCE_OFFSET..SEQUENCE_OFFSET + 2].copy_from_slice(&frame.sequence.to_le_bytes());
    out[PHASE_OFFSET] = frame.phase.as_wire();
    out[POSITION_OFFSET..POSITION_OFFSET + 2].copy_from_slice(&frame.position.to_le_bytes());
    out[FORCE_OFFSET..FORCE_OFFSET + 2].copy_from_slice(&frame.force.to_le_bytes());
    out[VELOCITY_OFFSET..VELOCITY_OFFSET + 2].copy_from_slice(&frame.velocity.to_le_bytes());
    out
}

/// Decode a training-mode confirmation.
///
/// Returns `None` only when the message is shorter than the fixed layout.
/// An unrecognized mode byte decodes to [`TrainingMode::Idle`]; the device
/// reports transitional values that mean "no mode engaged".
#[must_use]
pub fn decode_mode_confirmation(data: &[u8]) -> Option<DecodeResult> {
    if data.len() < MODE_CONFIRMATION_MIN_LEN {
        return None;
    }
    Some(DecodeResult::ModeConfirmation(TrainingMode::from_wire(
        data[MODE_VALUE_OFFSET],
    )))
}

/// Cursor over the `(param id, value)` pairs of a settings update.
///
/// Each read is bounds-checked before the cursor advances; running out of
/// buffer ends iteration early instead of failing, which protects against
/// truncated notifications.
struct ParamCursor<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: usize,
}

impl Iterator for ParamCursor<'_> {
    type Item = (u16, u16);

    fn next(&mut self) -> Option<(u16, u16)> {
        if self.remaining == 0 || self.pos + 2 > self.data.len() {
            return None;
        }
        self.remaining -= 1;

        let id = read_u16_le(self.data, self.pos);
        self.pos += 2;

        let value = if WIDE_PARAM_IDS.contains(&id) {
            if self.pos + 2 > self.data.len() {
                return None;
            }
            let v = read_u16_le(self.data, self.pos);
            self.pos += 2;
            v
        } else {
            if self.pos + 1 > self.data.len() {
                return None;
            }
            let v = u16::from(self.data[self.pos]);
            self.pos += 1;
            v
        };

        Some((id, value))
    }
}

/// Decode a settings-update or multi-param notification into a partial
/// settings snapshot.
///
/// Unknown parameter ids are skipped (the cursor still advances by the
/// single-byte width rule) without failing the decode. At most
/// [`MAX_PARAMS_PER_MESSAGE`] entries are read even if the count byte claims
/// more.
#[must_use]
pub fn decode_settings_update(data: &[u8]) -> DecodeResult {
    let mut update = DeviceSettings::default();

    if data.len() <= PARAM_LIST_OFFSET {
        return DecodeResult::SettingsUpdate(update);
    }

    let declared = usize::from(data[PARAM_COUNT_OFFSET]);
    let cursor = ParamCursor {
        data,
        pos: PARAM_LIST_OFFSET,
        remaining: declared.min(MAX_PARAMS_PER_MESSAGE),
    };

    for (id, value) in cursor {
        match id {
            PARAM_BASE_WEIGHT => update.base_weight = Some(value),
            PARAM_CHAINS => update.chains = Some(value),
            PARAM_INVERSE_CHAINS => update.inverse_chains = Some(value),
            PARAM_ECCENTRIC => update.eccentric = Some(value),
            PARAM_TRAINING_MODE => {
                update.training_mode = Some(TrainingMode::from_wire(value as u8));
            }
            unknown => {
                tracing::debug!("Skipping unknown settings parameter {unknown:#06X}");
            }
        }
    }

    DecodeResult::SettingsUpdate(update)
}

/// Decode a device-status frame.
///
/// Two wire layouts exist, distinguished by 2-byte header and minimum
/// length, each with its own battery offset. Anything else in the status
/// category is surfaced as [`DecodeResult::Unknown`] so callers can log it,
/// unlike telemetry which is dropped outright.
#[must_use]
pub fn decode_device_status(data: &[u8]) -> DecodeResult {
    if data.len() >= DEVICE_INIT_MIN_LEN && data[..2] == HEADER_DEVICE_INIT {
        return DecodeResult::DeviceStatus {
            battery: data[DEVICE_INIT_BATTERY_OFFSET],
        };
    }
    if data.len() >= STATUS_BATTERY_MIN_LEN && data[..2] == HEADER_STATUS_BATTERY {
        return DecodeResult::DeviceStatus {
            battery: data[STATUS_BATTERY_OFFSET],
        };
    }
    DecodeResult::Unknown(data.to_vec())
}

/// Decode one raw notification into its typed result.
///
/// Top-level dispatch: identify the category, then route to the matching
/// decoder. Rep/set summaries carry no payload and decode straight to their
/// boundary markers. Returns `None` when the buffer cannot be decoded at
/// all (unknown header, or a truncated telemetry frame).
#[must_use]
pub fn decode_notification(data: &[u8]) -> Option<DecodeResult> {
    match identify_message_type(data) {
        MessageType::TelemetryStream => decode_telemetry_frame(data).map(DecodeResult::Frame),
        MessageType::RepSummary => Some(DecodeResult::RepBoundary),
        MessageType::SetSummary => Some(DecodeResult::SetBoundary),
        MessageType::ModeConfirmation => decode_mode_confirmation(data),
        MessageType::MultiParam | MessageType::SettingsUpdate => {
            Some(decode_settings_update(data))
        }
        MessageType::StatusUpdate | MessageType::DeviceInit => Some(decode_device_status(data)),
        MessageType::Unknown => None,
    }
}

/// Build a settings-update notification. Test and simulator helper: produces
/// the same wire layout the trainer emits.
#[must_use]
pub fn encode_settings_update(params: &[(u16, u16)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(PARAM_LIST_OFFSET + params.len() * 4);
    out.put_slice(&HEADER_SETTINGS_UPDATE);
    out.put_u8(params.len() as u8);
    for &(id, value) in params {
        out.put_u16_le(id);
        if WIDE_PARAM_IDS.contains(&id) {
            out.put_u16_le(value);
        } else {
            out.put_u8(value as u8);
        }
    }
    out
}
