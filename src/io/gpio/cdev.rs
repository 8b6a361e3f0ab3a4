use std::collections::HashMap;
use std::path::Path;

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use log::{debug, info};

use crate::io::gpio::{GPIOError, GPIOManager, Level, LEVEL_LOW};
use crate::registry::{PinId, PinMode};

const HANDLE_NAME: &str = "gpio-agent";

/// GPIO access through the Linux character device (`/dev/gpiochipN`).
pub struct CDevGPIO {
    chip: Option<Chip>,
    held_gpios: HashMap<PinId, (PinMode, LineHandle)>,
}

impl CDevGPIO {
    pub fn open(path: &Path) -> Result<CDevGPIO, GPIOError> {
        info!("Opening GPIO chip {:?}", path);
        let chip = Chip::new(path).map_err(map_cdev_err)?;
        Ok(CDevGPIO {
            chip: Some(chip),
            held_gpios: HashMap::new(),
        })
    }

    fn handle(&self, pin: PinId) -> Result<&(PinMode, LineHandle), GPIOError> {
        if self.chip.is_none() {
            return Err(GPIOError::Released);
        }
        self.held_gpios.get(&pin).ok_or(GPIOError::PinNotSetup(pin))
    }
}

impl GPIOManager for CDevGPIO {
    /// On failure the pin is left unclaimed, callers re-claim it if they
    /// still need it.
    fn claim(&mut self, pin: PinId, mode: PinMode) -> Result<(), GPIOError> {
        // The kernel refuses a second request for a line we still hold.
        if self.held_gpios.remove(&pin).is_some() {
            debug!("Dropped previous claim on pin {}", pin);
        }
        let chip = self.chip.as_mut().ok_or(GPIOError::Released)?;
        let line = chip.get_line(pin).map_err(map_cdev_err)?;
        let flags = match mode {
            PinMode::Input => LineRequestFlags::INPUT,
            PinMode::Output => LineRequestFlags::OUTPUT,
        };
        let handle = line.request(flags, LEVEL_LOW, HANDLE_NAME).map_err(map_cdev_err)?;
        self.held_gpios.insert(pin, (mode, handle));
        Ok(())
    }

    fn read(&self, pin: PinId) -> Result<Level, GPIOError> {
        let (_, handle) = self.handle(pin)?;
        handle.get_value().map_err(map_cdev_err)
    }

    fn write(&mut self, pin: PinId, level: Level) -> Result<(), GPIOError> {
        let (mode, handle) = self.handle(pin)?;
        if *mode != PinMode::Output {
            return Err(GPIOError::PinInIncorrectMode {
                pin,
                required_mode: PinMode::Output,
            });
        }
        handle.set_value(level).map_err(map_cdev_err)
    }

    fn release(&mut self) -> Result<(), GPIOError> {
        if self.chip.is_none() {
            return Err(GPIOError::Released);
        }
        // Dropping the handles hands the lines back to the kernel.
        self.held_gpios.clear();
        self.chip = None;
        Ok(())
    }
}

fn map_cdev_err(err: gpio_cdev::errors::Error) -> GPIOError {
    GPIOError::Other(format!("gpio-cdev: {}", err))
}
