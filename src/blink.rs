use std::time::Duration;

use log::{debug, info};

use crate::config::BlinkConfig;
use crate::controller::{ControllerError, PinController};
use crate::io::gpio::GPIOManager;
use crate::registry::{PinId, PinMode, PinState};
use crate::shutdown::ShutdownSignal;

/// Blinks one output pin until shutdown, then cleans up the whole registry.
/// Returns the number of completed on/off cycles.
pub async fn run<G: GPIOManager>(
    mut controller: PinController<G>,
    config: &BlinkConfig,
    mut shutdown: ShutdownSignal,
) -> Result<u64, ControllerError> {
    let pin = config.get_pin();
    let result = match controller.claim(pin, PinMode::Output) {
        Ok(()) => {
            info!(
                "Blinking pin {} ({}s on, {}s off)",
                pin,
                config.get_on_time().as_secs_f32(),
                config.get_off_time().as_secs_f32()
            );
            blink(&mut controller, pin, config, &mut shutdown).await
        }
        Err(e) => Err(e),
    };
    controller.shutdown();
    result
}

async fn blink<G: GPIOManager>(
    controller: &mut PinController<G>,
    pin: PinId,
    config: &BlinkConfig,
    shutdown: &mut ShutdownSignal,
) -> Result<u64, ControllerError> {
    let mut cycles = 0;
    loop {
        if shutdown.is_triggered() {
            return Ok(cycles);
        }
        controller.write(pin, PinState::On)?;
        debug!("Pin {} on", pin);
        if sleep_or_shutdown(*config.get_on_time(), shutdown).await {
            return Ok(cycles);
        }
        controller.write(pin, PinState::Off)?;
        debug!("Pin {} off", pin);
        if sleep_or_shutdown(*config.get_off_time(), shutdown).await {
            return Ok(cycles);
        }
        cycles += 1;
    }
}

/// True if shutdown was requested before `duration` elapsed.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut ShutdownSignal) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.wait() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
