use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use log::debug;

use crate::io::gpio::{GPIOError, GPIOManager, Level, LEVEL_LOW};
use crate::registry::{PinId, PinMode};

/// In memory stand in for the GPIO chip. Input levels are injected and
/// writes observed through a [DummyHandle].
pub struct Dummy {
    lines: Arc<Mutex<DummyLines>>,
}

#[derive(Default)]
struct DummyLines {
    modes: HashMap<PinId, PinMode>,
    levels: HashMap<PinId, Level>,
    writes: Vec<(PinId, Level)>,
    released: bool,
}

#[derive(Clone)]
pub struct DummyHandle {
    lines: Arc<Mutex<DummyLines>>,
}

impl Dummy {
    pub fn create() -> (Dummy, DummyHandle) {
        let lines = Arc::new(Mutex::new(DummyLines::default()));
        let handle = DummyHandle {
            lines: lines.clone(),
        };
        (Dummy { lines }, handle)
    }

    fn lines(&self) -> MutexGuard<'_, DummyLines> {
        lock(&self.lines)
    }
}

fn lock(lines: &Mutex<DummyLines>) -> MutexGuard<'_, DummyLines> {
    lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GPIOManager for Dummy {
    fn claim(&mut self, pin: PinId, mode: PinMode) -> Result<(), GPIOError> {
        let mut lines = self.lines();
        if lines.released {
            return Err(GPIOError::Released);
        }
        lines.modes.insert(pin, mode);
        if mode == PinMode::Output {
            lines.levels.insert(pin, LEVEL_LOW);
        }
        Ok(())
    }

    fn read(&self, pin: PinId) -> Result<Level, GPIOError> {
        let lines = self.lines();
        if lines.released {
            return Err(GPIOError::Released);
        }
        if !lines.modes.contains_key(&pin) {
            return Err(GPIOError::PinNotSetup(pin));
        }
        Ok(lines.levels.get(&pin).copied().unwrap_or(LEVEL_LOW))
    }

    fn write(&mut self, pin: PinId, level: Level) -> Result<(), GPIOError> {
        let mut lines = self.lines();
        if lines.released {
            return Err(GPIOError::Released);
        }
        match lines.modes.get(&pin) {
            None => return Err(GPIOError::PinNotSetup(pin)),
            Some(PinMode::Input) => {
                return Err(GPIOError::PinInIncorrectMode {
                    pin,
                    required_mode: PinMode::Output,
                })
            }
            Some(PinMode::Output) => {}
        }
        debug!("{} Dummy pin {} driven to {}", Utc::now().format("%H:%M:%S"), pin, level);
        lines.levels.insert(pin, level);
        lines.writes.push((pin, level));
        Ok(())
    }

    fn release(&mut self) -> Result<(), GPIOError> {
        let mut lines = self.lines();
        if lines.released {
            return Err(GPIOError::Released);
        }
        lines.modes.clear();
        lines.released = true;
        Ok(())
    }
}

impl DummyHandle {
    /// Simulates an external driver on an input line.
    pub fn set_input_level(&self, pin: PinId, level: Level) {
        lock(&self.lines).levels.insert(pin, level);
    }

    #[cfg(test)]
    pub fn level(&self, pin: PinId) -> Option<Level> {
        lock(&self.lines).levels.get(&pin).copied()
    }

    #[cfg(test)]
    pub fn mode(&self, pin: PinId) -> Option<PinMode> {
        lock(&self.lines).modes.get(&pin).copied()
    }

    #[cfg(test)]
    pub fn writes(&self) -> Vec<(PinId, Level)> {
        lock(&self.lines).writes.clone()
    }

    #[cfg(test)]
    pub fn is_released(&self) -> bool {
        lock(&self.lines).released
    }
}
