use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use itertools::Itertools;
use log::{error, info};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use tokio::runtime::{Builder, Runtime};

use crate::agent::Agent;
use crate::config::{Config, GpioBackend, GpioConfig};
use crate::controller::PinController;
use crate::io::gpio::dummy::Dummy;
use crate::io::gpio::{GPIOError, GPIOManager};
use crate::jobs::dispatcher::JobDispatcher;
use crate::jobs::dry_run::DryRunDispatcher;
use crate::jobs::kubernetes::KubernetesDispatcher;
use crate::shutdown::{install_signal_handler, shutdown_channel, ShutdownSignal};
use crate::time_util::mytime::RealTimeProvider;

mod agent;
mod blink;
mod config;
mod controller;
mod io;
mod jobs;
mod logging;
mod page;
mod registry;
mod shutdown;
mod simulate;
mod time_util;

const CONFIG_FILE: &str = "gpio_agent.toml";
const CONFIG_FILE_ENV: &str = "GPIO_AGENT_CONFIG";

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;

type BoxedController = PinController<Box<dyn GPIOManager>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
enum Mode {
    Agent,
    Page,
    Blink,
    Simulate,
}

fn main() -> ExitCode {
    let mode = match std::env::args().nth(1) {
        None => Mode::Agent,
        Some(arg) => match Mode::from_str(&arg) {
            Ok(mode) => mode,
            Err(_) => {
                eprintln!("Unknown mode '{}', expected one of: {}", arg, Mode::iter().join(", "));
                return ExitCode::from(EXIT_USAGE);
            }
        },
    };

    let logging_handle = match logging::init_logging() {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    info!("Preparing {} mode...", mode);

    let config_path = std::env::var(CONFIG_FILE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE));
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config from {:?}: {}", config_path, e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let rt = match build_runtime(mode) {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build runtime: {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let (trigger, signal) = shutdown_channel();
    {
        let _guard = rt.enter();
        if let Err(e) = install_signal_handler(trigger) {
            error!("{}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
        #[cfg(unix)]
        logging::reload_on_hangup(logging_handle.reload_handle());
    }

    let code = run(mode, &config, &rt, signal);
    // Stop the signal listeners before the log writer goes away.
    drop(rt);
    drop(logging_handle);
    code
}

fn build_runtime(mode: Mode) -> std::io::Result<Runtime> {
    match mode {
        Mode::Page => Builder::new_multi_thread().worker_threads(2).enable_all().build(),
        Mode::Agent | Mode::Blink | Mode::Simulate => Builder::new_current_thread().enable_all().build(),
    }
}

fn run(mode: Mode, config: &Config, rt: &Runtime, signal: ShutdownSignal) -> ExitCode {
    match mode {
        Mode::Simulate => match rt.block_on(simulate::simulate(config, signal)) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Simulation failed: {}", e);
                ExitCode::from(EXIT_FAILURE)
            }
        },
        Mode::Agent => {
            let preparer = config.get_jobs().preparer();
            if config.get_jobs().is_dry_run() {
                info!("Dry run enabled, jobs will only be logged");
                let dispatcher = DryRunDispatcher::new(preparer);
                return run_agent(config, rt, dispatcher, signal);
            }
            match KubernetesDispatcher::create(config.get_orchestrator(), preparer) {
                Ok(dispatcher) => run_agent(config, rt, dispatcher, signal),
                Err(e) => {
                    error!("Failed to set up job dispatcher: {}", e);
                    ExitCode::from(EXIT_FAILURE)
                }
            }
        }
        Mode::Page => {
            let Some(controller) = start_controller(config.get_gpio()) else {
                return ExitCode::from(EXIT_FAILURE);
            };
            let bind = *config.get_page().get_bind();
            match rt.block_on(page::run(controller, bind, signal)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("Pin page server failed: {}", e);
                    ExitCode::from(EXIT_FAILURE)
                }
            }
        }
        Mode::Blink => {
            let Some(controller) = start_controller(config.get_gpio()) else {
                return ExitCode::from(EXIT_FAILURE);
            };
            match rt.block_on(blink::run(controller, config.get_blink(), signal)) {
                Ok(cycles) => {
                    info!("Blinked {} times", cycles);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Blink failed: {}", e);
                    ExitCode::from(EXIT_FAILURE)
                }
            }
        }
    }
}

fn run_agent<D: JobDispatcher>(config: &Config, rt: &Runtime, dispatcher: D, signal: ShutdownSignal) -> ExitCode {
    let Some(controller) = start_controller(config.get_gpio()) else {
        return ExitCode::from(EXIT_FAILURE);
    };
    let agent = Agent::new(controller, dispatcher, config.get_agent(), config.get_jobs());
    rt.block_on(agent.run(signal, &RealTimeProvider::default()));
    ExitCode::SUCCESS
}

/// Opens the configured backend and claims the registry. On failure, waits
/// out the grace delay so the failure can be inspected before the restart.
fn start_controller(config: &GpioConfig) -> Option<BoxedController> {
    let result = open_gpio(config)
        .map_err(|e| e.to_string())
        .and_then(|gpio| PinController::new(gpio).map_err(|e| e.to_string()));
    match result {
        Ok(controller) => Some(controller),
        Err(e) => {
            let delay = config.get_init_failure_delay();
            error!("Failed to initialise GPIO: {}. Exiting in {}s", e, delay.as_secs());
            std::thread::sleep(*delay);
            None
        }
    }
}

fn open_gpio(config: &GpioConfig) -> Result<Box<dyn GPIOManager>, GPIOError> {
    info!("Using {:?} GPIO backend", config.get_backend());
    match config.get_backend() {
        GpioBackend::Cdev => open_cdev(config),
        GpioBackend::Sysfs => open_sysfs(),
        GpioBackend::Dummy => {
            let (gpio, _handle) = Dummy::create();
            Ok(Box::new(gpio))
        }
    }
}

#[cfg(target_os = "linux")]
fn open_cdev(config: &GpioConfig) -> Result<Box<dyn GPIOManager>, GPIOError> {
    let gpio = io::gpio::cdev::CDevGPIO::open(config.get_chip())?;
    Ok(Box::new(gpio))
}

#[cfg(not(target_os = "linux"))]
fn open_cdev(_config: &GpioConfig) -> Result<Box<dyn GPIOManager>, GPIOError> {
    Err(GPIOError::Other("The cdev GPIO backend is only available on Linux".into()))
}

#[cfg(unix)]
fn open_sysfs() -> Result<Box<dyn GPIOManager>, GPIOError> {
    Ok(Box::new(io::gpio::sysfs_gpio::SysFsGPIO::new()))
}

#[cfg(not(unix))]
fn open_sysfs() -> Result<Box<dyn GPIOManager>, GPIOError> {
    Err(GPIOError::Other("The sysfs GPIO backend is only available on Unix".into()))
}
