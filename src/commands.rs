use crate::protocol::{
    PARAM_BASE_WEIGHT, PARAM_CHAINS, PARAM_ECCENTRIC, PARAM_INVERSE_CHAINS, PARAM_TRAINING_MODE,
};
use crate::types::TrainingMode;
use std::collections::HashMap;

/// Fixed device-identity payload written during authentication.
///
/// The device's acknowledgment is advisory; the session waits a fixed
/// timeout after this write instead of parsing a response.
pub const AUTH_IDENTITY: [u8; 8] = [0xC0, 0x01, 0x4C, 0x4B, 0x01, 0x00, 0x00, 0x00];

/// Ordered initialization sequence run after authentication. Each command is
/// followed by a fixed inter-command delay; the device drops writes sent too
/// quickly after the previous one.
pub const INIT_SEQUENCE: [[u8; 4]; 3] = [
    [0xC1, 0x01, 0x00, 0x00], // enable notification stream
    [0xC1, 0x02, 0x00, 0x00], // request settings snapshot
    [0xC1, 0x03, 0x00, 0x00], // request device status
];

/// Command that arms the device for a recording set
pub const CMD_START_RECORDING: [u8; 4] = [0xC2, 0x01, 0x00, 0x00];

/// Command that ends the active recording set
pub const CMD_STOP_RECORDING: [u8; 4] = [0xC2, 0x02, 0x00, 0x00];

/// On-demand status request. Same command the init sequence ends with; the
/// device answers with a status notification.
pub const CMD_STATUS_REQUEST: [u8; 4] = [0xC1, 0x03, 0x00, 0x00];

const FAMILY_WEIGHT: u8 = 0x01;
const FAMILY_CHAINS: u8 = 0x02;
const FAMILY_INVERSE_CHAINS: u8 = 0x03;
const FAMILY_ECCENTRIC: u8 = 0x04;
const FAMILY_TRAINING_MODE: u8 = 0x05;

const SET_COMMAND_MARKER: u8 = 0xC5;

/// Supported base weights: 5 to 200 kg in 5 kg steps
const WEIGHT_RANGE: (u16, u16, u16) = (5, 200, 5);
/// Supported chain loads: 0 to 100 kg in 5 kg steps
const CHAINS_RANGE: (u16, u16, u16) = (0, 100, 5);
/// Supported eccentric overloads: 0 to 150 % in 10 % steps
const ECCENTRIC_RANGE: (u16, u16, u16) = (0, 150, 10);

const TRAINING_MODES: [TrainingMode; 4] = [
    TrainingMode::Idle,
    TrainingMode::WeightTraining,
    TrainingMode::Rowing,
    TrainingMode::Isometric,
];

fn set_command(family: u8, param_id: u16, value: u16) -> Vec<u8> {
    let pid = param_id.to_le_bytes();
    let val = value.to_le_bytes();
    vec![SET_COMMAND_MARKER, family, pid[0], pid[1], val[0], val[1]]
}

fn build_family(range: (u16, u16, u16), family: u8, param_id: u16) -> HashMap<u16, Vec<u8>> {
    let (min, max, step) = range;
    (min..=max)
        .step_by(usize::from(step))
        .map(|value| (value, set_command(family, param_id, value)))
        .collect()
}

/// Static mapping from each supported discrete setting value to its exact
/// pre-computed wire command.
///
/// Built once at session startup and read-only thereafter; no arithmetic
/// encoding happens at request time. The table is authoritative and
/// exhaustive for protocol v1: a lookup miss means the device does not
/// support the value, and the session layer reports the full supported set
/// in the resulting error.
#[derive(Debug)]
pub struct CommandTable {
    weight: HashMap<u16, Vec<u8>>,
    chains: HashMap<u16, Vec<u8>>,
    inverse_chains: HashMap<u16, Vec<u8>>,
    eccentric: HashMap<u16, Vec<u8>>,
    training_mode: HashMap<TrainingMode, Vec<u8>>,
}

impl CommandTable {
    /// Build the lookup tables for protocol v1
    #[must_use]
    pub fn new() -> Self {
        Self {
            weight: build_family(WEIGHT_RANGE, FAMILY_WEIGHT, PARAM_BASE_WEIGHT),
            chains: build_family(CHAINS_RANGE, FAMILY_CHAINS, PARAM_CHAINS),
            inverse_chains: build_family(CHAINS_RANGE, FAMILY_INVERSE_CHAINS, PARAM_INVERSE_CHAINS),
            eccentric: build_family(ECCENTRIC_RANGE, FAMILY_ECCENTRIC, PARAM_ECCENTRIC),
            training_mode: TRAINING_MODES
                .iter()
                .map(|&mode| {
                    (
                        mode,
                        set_command(
                            FAMILY_TRAINING_MODE,
                            PARAM_TRAINING_MODE,
                            u16::from(mode.as_wire()),
                        ),
                    )
                })
                .collect(),
        }
    }

    /// Wire command for a base weight, or `None` if unsupported
    #[must_use]
    pub fn weight_command(&self, kg: u16) -> Option<&[u8]> {
        self.weight.get(&kg).map(Vec::as_slice)
    }

    /// Wire command for a chain load, or `None` if unsupported
    #[must_use]
    pub fn chains_command(&self, kg: u16) -> Option<&[u8]> {
        self.chains.get(&kg).map(Vec::as_slice)
    }

    /// Wire command for an inverse chain load, or `None` if unsupported
    #[must_use]
    pub fn inverse_chains_command(&self, kg: u16) -> Option<&[u8]> {
        self.inverse_chains.get(&kg).map(Vec::as_slice)
    }

    /// Wire command for an eccentric overload percentage, or `None` if unsupported
    #[must_use]
    pub fn eccentric_command(&self, percent: u16) -> Option<&[u8]> {
        self.eccentric.get(&percent).map(Vec::as_slice)
    }

    /// Wire command engaging a training mode. Every mode is supported, so
    /// this lookup cannot miss.
    #[must_use]
    pub fn training_mode_command(&self, mode: TrainingMode) -> &[u8] {
        &self.training_mode[&mode]
    }

    /// Every base weight the device accepts, ascending
    #[must_use]
    pub fn available_weights(&self) -> Vec<u16> {
        Self::sorted_keys(&self.weight)
    }

    /// Every chain load the device accepts, ascending
    #[must_use]
    pub fn available_chains(&self) -> Vec<u16> {
        Self::sorted_keys(&self.chains)
    }

    /// Every inverse chain load the device accepts, ascending
    #[must_use]
    pub fn available_inverse_chains(&self) -> Vec<u16> {
        Self::sorted_keys(&self.inverse_chains)
    }

    /// Every eccentric overload percentage the device accepts, ascending
    #[must_use]
    pub fn available_eccentric(&self) -> Vec<u16> {
        Self::sorted_keys(&self.eccentric)
    }

    /// Every training mode the device accepts
    #[must_use]
    pub fn available_training_modes(&self) -> Vec<TrainingMode> {
        TRAINING_MODES.to_vec()
    }

    fn sorted_keys(map: &HashMap<u16, Vec<u8>>) -> Vec<u16> {
        let mut keys: Vec<u16> = map.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_available_weight_has_a_command() {
        let table = CommandTable::new();
        let weights = table.available_weights();
        assert!(weights.contains(&5));
        assert!(weights.contains(&200));

        for weight in weights {
            let command = table.weight_command(weight).expect("command must exist");
            assert!(!command.is_empty());
        }
    }

    #[test]
    fn test_unsupported_values_miss() {
        let table = CommandTable::new();
        assert!(table.weight_command(3).is_none());
        assert!(table.weight_command(999).is_none());
        // 0 is below the weight floor even though it is a valid chain load.
        assert!(table.weight_command(0).is_none());
        assert!(table.chains_command(0).is_some());
        assert!(table.chains_command(101).is_none());
        assert!(table.eccentric_command(155).is_none());
    }

    #[test]
    fn test_command_encodes_value_little_endian() {
        let table = CommandTable::new();
        let command = table.weight_command(200).unwrap();
        assert_eq!(command[0], SET_COMMAND_MARKER);
        assert_eq!(command[1], FAMILY_WEIGHT);
        assert_eq!(&command[4..6], &200u16.to_le_bytes());
    }

    #[test]
    fn test_training_mode_commands_are_distinct() {
        let table = CommandTable::new();
        let idle = table.training_mode_command(TrainingMode::Idle).to_vec();
        let rowing = table.training_mode_command(TrainingMode::Rowing).to_vec();
        assert_ne!(idle, rowing);
        assert_eq!(table.available_training_modes().len(), 4);
    }

    #[test]
    fn test_available_lists_sorted() {
        let table = CommandTable::new();
        let weights = table.available_weights();
        assert!(weights.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(weights.first(), Some(&5));
        assert_eq!(weights.last(), Some(&200));
    }
}
