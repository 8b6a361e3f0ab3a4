use std::collections::HashMap;

use log::{debug, warn};
use sysfs_gpio::{Direction, Error, Pin};

use crate::io::gpio::{GPIOError, GPIOManager, Level};
use crate::registry::{PinId, PinMode};

/// GPIO access through the legacy `/sys/class/gpio` interface, for kernels
/// or containers without the character device.
pub struct SysFsGPIO {
    gpios: HashMap<PinId, (PinMode, Pin)>,
    released: bool,
}

impl SysFsGPIO {
    pub fn new() -> SysFsGPIO {
        SysFsGPIO {
            gpios: HashMap::new(),
            released: false,
        }
    }

    fn get(&self, pin_id: PinId) -> Result<&(PinMode, Pin), GPIOError> {
        if self.released {
            return Err(GPIOError::Released);
        }
        self.gpios.get(&pin_id).ok_or(GPIOError::PinNotSetup(pin_id))
    }
}

impl GPIOManager for SysFsGPIO {
    fn claim(&mut self, pin_id: PinId, mode: PinMode) -> Result<(), GPIOError> {
        if self.released {
            return Err(GPIOError::Released);
        }
        debug!("Setting up pin {} as {}", pin_id, mode);
        let pin = Pin::new(pin_id as u64);
        pin.export().map_err(map_sysfs_err)?;
        let direction = match mode {
            PinMode::Input => Direction::In,
            // Low both sets the direction and drives the line off in one step.
            PinMode::Output => Direction::Low,
        };
        pin.set_direction(direction).map_err(map_sysfs_err)?;
        self.gpios.insert(pin_id, (mode, pin));
        Ok(())
    }

    fn read(&self, pin_id: PinId) -> Result<Level, GPIOError> {
        let (_, pin) = self.get(pin_id)?;
        pin.get_value().map_err(map_sysfs_err)
    }

    fn write(&mut self, pin_id: PinId, level: Level) -> Result<(), GPIOError> {
        let (mode, pin) = self.get(pin_id)?;
        if *mode != PinMode::Output {
            return Err(GPIOError::PinInIncorrectMode {
                pin: pin_id,
                required_mode: PinMode::Output,
            });
        }
        pin.set_value(level).map_err(map_sysfs_err)
    }

    fn release(&mut self) -> Result<(), GPIOError> {
        if self.released {
            return Err(GPIOError::Released);
        }
        self.released = true;
        for (pin_id, (_, pin)) in self.gpios.drain() {
            if let Err(e) = pin.unexport() {
                warn!("Failed to unexport pin {}: {}", pin_id, e);
            }
        }
        Ok(())
    }
}

fn map_sysfs_err(err: sysfs_gpio::Error) -> GPIOError {
    match err {
        Error::Io(err) => GPIOError::Io(err),
        Error::Unexpected(s) => GPIOError::Other(s),
        Error::InvalidPath(s) => GPIOError::Other(s),
        Error::Unsupported(s) => GPIOError::Other(s),
    }
}
