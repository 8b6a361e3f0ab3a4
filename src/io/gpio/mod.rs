use std::fmt::{Display, Formatter};

use crate::registry::{PinId, PinMode};

#[cfg(target_os = "linux")]
pub mod cdev;
pub mod dummy;

#[cfg(target_family = "unix")]
pub mod sysfs_gpio;

/// Raw electrical level as reported by a backend. Only `1` is treated as on.
pub type Level = u8;

pub const LEVEL_HIGH: Level = 1;
pub const LEVEL_LOW: Level = 0;

#[derive(Debug)]
pub enum GPIOError {
    PinNotSetup(PinId),
    PinInIncorrectMode { pin: PinId, required_mode: PinMode },
    Released,
    Io(std::io::Error),
    Other(String),
}

impl Display for GPIOError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GPIOError::PinNotSetup(pin) => write!(f, "Pin {} has not been claimed", pin),
            GPIOError::PinInIncorrectMode { pin, required_mode } => {
                write!(f, "Pin {} must be claimed as {:?}", pin, required_mode)
            }
            GPIOError::Released => write!(f, "GPIO chip has already been released"),
            GPIOError::Io(e) => write!(f, "IO Error: {}", e),
            GPIOError::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for GPIOError {}

impl From<std::io::Error> for GPIOError {
    fn from(err: std::io::Error) -> Self {
        GPIOError::Io(err)
    }
}

/// Low level access to the GPIO chip. Implementations own the chip handle
/// and know nothing about the pin registry or cached state.
pub trait GPIOManager: Send {
    /// (Re-)claims the line for `pin` in the given mode, dropping any
    /// previous claim first.
    fn claim(&mut self, pin: PinId, mode: PinMode) -> Result<(), GPIOError>;

    fn read(&self, pin: PinId) -> Result<Level, GPIOError>;

    fn write(&mut self, pin: PinId, level: Level) -> Result<(), GPIOError>;

    /// Releases every claimed line and the chip handle itself.
    fn release(&mut self) -> Result<(), GPIOError>;
}

impl<G> GPIOManager for Box<G>
where
    G: GPIOManager + ?Sized,
{
    fn claim(&mut self, pin: PinId, mode: PinMode) -> Result<(), GPIOError> {
        (**self).claim(pin, mode)
    }

    fn read(&self, pin: PinId) -> Result<Level, GPIOError> {
        (**self).read(pin)
    }

    fn write(&mut self, pin: PinId, level: Level) -> Result<(), GPIOError> {
        (**self).write(pin, level)
    }

    fn release(&mut self) -> Result<(), GPIOError> {
        (**self).release()
    }
}
