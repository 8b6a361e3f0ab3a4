use std::time::Duration;

use log::info;

use crate::agent::Agent;
use crate::config::Config;
use crate::controller::{ControllerError, PinController};
use crate::io::gpio::dummy::{Dummy, DummyHandle};
use crate::io::gpio::{LEVEL_HIGH, LEVEL_LOW};
use crate::jobs::dry_run::DryRunDispatcher;
use crate::registry::PinId;
use crate::shutdown::ShutdownSignal;
use crate::time_util::mytime::RealTimeProvider;

const SIMULATED_PIN: PinId = 17;
const PRESS_EVERY: Duration = Duration::from_secs(20);
const PRESS_FOR: Duration = Duration::from_secs(1);

/// Runs the agent against in-memory GPIO and a dry-run dispatcher, pressing
/// pin 17 every so often. Job templates still come from the configured dir.
pub async fn simulate(config: &Config, shutdown: ShutdownSignal) -> Result<(), ControllerError> {
    let (gpio, handle) = Dummy::create();
    let controller = PinController::new(gpio)?;
    let dispatcher = DryRunDispatcher::new(config.get_jobs().preparer());

    info!(
        "Simulating: pin {} pressed every {}s, templates from {:?}",
        SIMULATED_PIN,
        PRESS_EVERY.as_secs(),
        config.get_jobs().get_dir()
    );
    let presser = tokio::spawn(press_periodically(handle));

    let agent = Agent::new(controller, dispatcher, config.get_agent(), config.get_jobs());
    agent.run(shutdown, &RealTimeProvider::default()).await;

    presser.abort();
    Ok(())
}

async fn press_periodically(handle: DummyHandle) {
    loop {
        tokio::time::sleep(PRESS_EVERY).await;
        info!("## Pressing pin {}", SIMULATED_PIN);
        handle.set_input_level(SIMULATED_PIN, LEVEL_HIGH);
        tokio::time::sleep(PRESS_FOR).await;
        info!("## Releasing pin {}", SIMULATED_PIN);
        handle.set_input_level(SIMULATED_PIN, LEVEL_LOW);
    }
}
