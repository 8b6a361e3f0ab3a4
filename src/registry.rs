use serde::Serialize;
use strum_macros::{Display, EnumString};

use crate::controller::ControllerError;
use crate::io::gpio::{Level, LEVEL_HIGH, LEVEL_LOW};

/// BCM line offset on the board's GPIO chip.
pub type PinId = u32;

/// Every pin the controller will claim, in sweep order.
pub const PIN_REGISTRY: [PinId; 17] = [4, 17, 27, 22, 5, 6, 13, 19, 26, 21, 20, 16, 12, 25, 24, 23, 18];

pub fn is_registered(pin: PinId) -> bool {
    PIN_REGISTRY.contains(&pin)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum PinMode {
    Input,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum PinState {
    On,
    Off,
}

impl PinState {
    /// Only an exact high reading counts as on. Anything else, including
    /// out of range values from a misbehaving backend, reads as off.
    pub fn from_level(level: Level) -> Self {
        if level == LEVEL_HIGH {
            PinState::On
        } else {
            PinState::Off
        }
    }

    pub fn level(&self) -> Level {
        match self {
            PinState::On => LEVEL_HIGH,
            PinState::Off => LEVEL_LOW,
        }
    }

    /// Lower case form used in template file names.
    pub fn file_suffix(&self) -> &'static str {
        match self {
            PinState::On => "on",
            PinState::Off => "off",
        }
    }
}

// Numeric encodings used by the board tooling: Input=1 Output=0, On=1 Off=0.
// `agent.trigger_state` accepts the numeric state form. The mode form is
// kept so both encodings decode the same way.
impl TryFrom<u8> for PinMode {
    type Error = ControllerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PinMode::Input),
            0 => Ok(PinMode::Output),
            other => Err(ControllerError::InvalidMode(other.to_string())),
        }
    }
}

impl TryFrom<u8> for PinState {
    type Error = ControllerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PinState::On),
            0 => Ok(PinState::Off),
            other => Err(ControllerError::InvalidState(other.to_string())),
        }
    }
}
