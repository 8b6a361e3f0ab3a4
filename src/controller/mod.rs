use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::io::gpio::{GPIOError, GPIOManager, LEVEL_LOW};
use crate::registry::{PinId, PinMode, PinState, PIN_REGISTRY};


#[derive(Debug)]
pub enum ControllerError {
    InvalidPin(PinId),
    InvalidState(String),
    InvalidMode(String),
    WrongMode { pin: PinId, mode: PinMode },
    HardwareInit { pin: PinId, error: GPIOError },
    Hardware { pin: PinId, error: GPIOError },
}

impl Display for ControllerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::InvalidPin(pin) => write!(f, "Invalid GPIO pin number: {}", pin),
            ControllerError::InvalidState(state) => write!(f, "Invalid state: {}", state),
            ControllerError::InvalidMode(mode) => write!(f, "Invalid mode: {}", mode),
            ControllerError::WrongMode { pin, mode } => write!(
                f,
                "Cannot set state of pin {} because it is in {} mode, not Output",
                pin, mode
            ),
            ControllerError::HardwareInit { pin, error } => {
                write!(f, "Failed to claim GPIO pin {} at startup: {}", pin, error)
            }
            ControllerError::Hardware { pin, error } => {
                write!(f, "GPIO failure on pin {}: {}", pin, error)
            }
        }
    }
}

impl std::error::Error for ControllerError {}

#[derive(Clone, Copy, Debug)]
struct PinEntry {
    mode: PinMode,
    /// Authoritative for Output pins. For Input pins only as fresh as the
    /// last [PinController::refresh_all].
    state: PinState,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PinReport {
    pub pin: PinId,
    pub mode: PinMode,
    pub state: PinState,
}

/// Owns the GPIO chip for the lifetime of the process and enforces the
/// mode/state rules for every pin in [PIN_REGISTRY].
pub struct PinController<G: GPIOManager> {
    gpio: G,
    pins: HashMap<PinId, PinEntry>,
}

impl<G: GPIOManager> PinController<G> {
    /// Claims every registry pin as an input. Any claim failure is fatal.
    pub fn new(mut gpio: G) -> Result<Self, ControllerError> {
        let mut pins = HashMap::with_capacity(PIN_REGISTRY.len());
        for pin in PIN_REGISTRY {
            debug!("Claiming GPIO pin {} as input", pin);
            if let Err(error) = gpio.claim(pin, PinMode::Input) {
                if let Err(e) = gpio.release() {
                    warn!("Failed to release GPIO after failed startup: {}", e);
                }
                return Err(ControllerError::HardwareInit { pin, error });
            }
            pins.insert(
                pin,
                PinEntry {
                    mode: PinMode::Input,
                    state: PinState::Off,
                },
            );
        }
        info!("Claimed {} GPIO pins as inputs", pins.len());
        Ok(Self { gpio, pins })
    }

    pub fn registry(&self) -> &'static [PinId] {
        &PIN_REGISTRY
    }

    /// Re-claims the pin under `mode`. An output pin is driven off before it
    /// is let go, and the cached state always ends up off. If the new claim
    /// fails the pin is claimed again in its previous mode.
    pub fn claim(&mut self, pin: PinId, mode: PinMode) -> Result<(), ControllerError> {
        let entry = self.pins.get_mut(&pin).ok_or(ControllerError::InvalidPin(pin))?;

        if entry.mode == PinMode::Output {
            self.gpio
                .write(pin, LEVEL_LOW)
                .map_err(|error| ControllerError::Hardware { pin, error })?;
        }
        if let Err(error) = self.gpio.claim(pin, mode) {
            // Backends may have let go of the line before the failed request.
            if let Err(e) = self.gpio.claim(pin, entry.mode) {
                warn!("Failed to restore pin {} as {}: {}", pin, entry.mode, e);
            }
            entry.state = PinState::Off;
            return Err(ControllerError::Hardware { pin, error });
        }

        entry.mode = mode;
        entry.state = PinState::Off;
        debug!("Pin {} claimed as {}", pin, mode);
        Ok(())
    }

    pub fn mode(&self, pin: PinId) -> Result<PinMode, ControllerError> {
        self.entry(pin).map(|entry| entry.mode)
    }

    pub fn write(&mut self, pin: PinId, state: PinState) -> Result<(), ControllerError> {
        let entry = self.pins.get_mut(&pin).ok_or(ControllerError::InvalidPin(pin))?;
        if entry.mode != PinMode::Output {
            return Err(ControllerError::WrongMode {
                pin,
                mode: entry.mode,
            });
        }
        self.gpio
            .write(pin, state.level())
            .map_err(|error| ControllerError::Hardware { pin, error })?;
        entry.state = state;
        Ok(())
    }

    /// Output pins answer from the cache, input pins are sampled.
    pub fn read(&self, pin: PinId) -> Result<PinState, ControllerError> {
        let entry = self.entry(pin)?;
        match entry.mode {
            PinMode::Output => Ok(entry.state),
            PinMode::Input => self
                .gpio
                .read(pin)
                .map(PinState::from_level)
                .map_err(|error| ControllerError::Hardware { pin, error }),
        }
    }

    /// Re-reads every registry pin into the cache.
    pub fn refresh_all(&mut self) -> Result<(), ControllerError> {
        for pin in PIN_REGISTRY {
            let state = self.read(pin)?;
            if let Some(entry) = self.pins.get_mut(&pin) {
                entry.state = state;
            }
        }
        Ok(())
    }

    /// Refreshes the cached state of *every* pin, then describes `pin`.
    pub fn describe(&mut self, pin: PinId) -> Result<String, ControllerError> {
        self.entry(pin)?;
        self.refresh_all()?;
        self.describe_cached(pin)
    }

    /// Describes `pin` from the cache without touching the hardware.
    pub fn describe_cached(&self, pin: PinId) -> Result<String, ControllerError> {
        let entry = self.entry(pin)?;
        Ok(format!(
            "Pin {} is in {} mode and is {}.",
            pin, entry.mode, entry.state
        ))
    }

    pub fn snapshot(&self) -> Vec<PinReport> {
        PIN_REGISTRY
            .iter()
            .filter_map(|pin| {
                self.pins.get(pin).map(|entry| PinReport {
                    pin: *pin,
                    mode: entry.mode,
                    state: entry.state,
                })
            })
            .collect()
    }

    /// Drives every registry pin off, whatever its mode, then releases the
    /// chip. Failures are logged and never stop the remaining pins or the
    /// release. Consumes the controller so this can only happen once.
    pub fn shutdown(mut self) {
        info!("Cleaning up GPIO...");
        let mut failures = 0;
        for pin in PIN_REGISTRY {
            let mode = self.pins.get(&pin).map(|entry| entry.mode);
            if mode != Some(PinMode::Output) {
                if let Err(e) = self.gpio.claim(pin, PinMode::Output) {
                    error!("Failed to claim pin {} as output during shutdown: {}", pin, e);
                    failures += 1;
                    continue;
                }
            }
            if let Err(e) = self.gpio.write(pin, LEVEL_LOW) {
                error!("Failed to turn off pin {} during shutdown: {}", pin, e);
                failures += 1;
            }
        }
        if let Err(e) = self.gpio.release() {
            error!("Failed to release GPIO chip: {}", e);
        }
        if failures == 0 {
            info!("All GPIO pins off and released.");
        } else {
            warn!("GPIO released with {} pin(s) not confirmed off.", failures);
        }
    }

    fn entry(&self, pin: PinId) -> Result<&PinEntry, ControllerError> {
        self.pins.get(&pin).ok_or(ControllerError::InvalidPin(pin))
    }
}
