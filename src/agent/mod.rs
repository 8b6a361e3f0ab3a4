use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::{debug, error, info, warn};

use crate::config::{AgentConfig, JobsConfig};
use crate::controller::{ControllerError, PinController};
use crate::io::gpio::GPIOManager;
use crate::jobs::dispatcher::{DispatchOutcome, JobDispatcher};
use crate::jobs::rate_limit::{RateLimitDecision, RateLimiter};
use crate::jobs::{load_template, TemplateError};
use crate::registry::{PinId, PinMode, PinState};
use crate::shutdown::ShutdownSignal;
use crate::time_util::mytime::TimeProvider;

#[cfg(test)]
mod test;

const STILL_ALIVE_EVERY: u64 = 600;

/// What happened to a single pin during one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    Idle,
    NoTemplate,
    RateLimited,
    Dispatched { job: String },
    DispatchFailed { job: String },
}

#[derive(Debug)]
pub enum PinFailure {
    Controller(ControllerError),
    Template(TemplateError),
}

impl Display for PinFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PinFailure::Controller(e) => write!(f, "{}", e),
            PinFailure::Template(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PinFailure {}

impl From<ControllerError> for PinFailure {
    fn from(e: ControllerError) -> Self {
        PinFailure::Controller(e)
    }
}

impl From<TemplateError> for PinFailure {
    fn from(e: TemplateError) -> Self {
        PinFailure::Template(e)
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    results: Vec<(PinId, Result<PinOutcome, PinFailure>)>,
}

impl SweepReport {
    #[cfg(test)]
    pub fn get(&self, pin: PinId) -> Option<&Result<PinOutcome, PinFailure>> {
        self.results
            .iter()
            .find(|(p, _)| *p == pin)
            .map(|(_, result)| result)
    }

    pub fn dispatched(&self) -> Vec<PinId> {
        self.results
            .iter()
            .filter(|(_, result)| matches!(result, Ok(PinOutcome::Dispatched { .. })))
            .map(|(pin, _)| *pin)
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|(_, result)| result.is_err()).count()
    }
}

/// Polls the pin registry and turns triggered pins into orchestrator jobs.
pub struct Agent<G: GPIOManager, D: JobDispatcher> {
    controller: PinController<G>,
    dispatcher: D,
    rate_limiter: RateLimiter,
    job_dir: PathBuf,
    trigger_state: PinState,
    poll_interval: Duration,
}

impl<G: GPIOManager, D: JobDispatcher> Agent<G, D> {
    pub fn new(
        controller: PinController<G>,
        dispatcher: D,
        agent_config: &AgentConfig,
        jobs_config: &JobsConfig,
    ) -> Self {
        let cooldown = chrono::Duration::from_std(*jobs_config.get_cooldown()).unwrap_or_else(|e| {
            warn!("Job cooldown out of range ({}), using the maximum", e);
            chrono::Duration::max_value()
        });
        Self {
            controller,
            dispatcher,
            rate_limiter: RateLimiter::new(cooldown),
            job_dir: jobs_config.get_dir().to_owned(),
            trigger_state: agent_config.get_trigger_state(),
            poll_interval: *agent_config.get_poll_interval(),
        }
    }

    /// Visits every registry pin once. A failing pin is logged and never
    /// stops the rest of the sweep.
    pub async fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        for pin in self.controller.registry() {
            let result = self.process_pin(*pin, now).await;
            if let Err(e) = &result {
                error!("Error processing pin {}: {}", pin, e);
            }
            report.results.push((*pin, result));
        }
        report
    }

    async fn process_pin(&mut self, pin: PinId, now: DateTime<Utc>) -> Result<PinOutcome, PinFailure> {
        let state = self.controller.read(pin)?;
        if state != self.trigger_state {
            return Ok(PinOutcome::Idle);
        }

        let template = match load_template(&self.job_dir, pin, state)? {
            Some(template) => template,
            None => return Ok(PinOutcome::NoTemplate),
        };
        info!("Found configuration for pin {}, triggering job...", pin);
        debug!("Job definition from {:?}: {}", template.source(), template.document());

        if self.rate_limiter.check_and_update(template.source(), now) == RateLimitDecision::Suppressed {
            debug!(
                "Job at {:?} cannot be triggered due to rate limit, please wait {} seconds between jobs",
                template.source(),
                self.rate_limiter.cooldown().num_seconds()
            );
            return Ok(PinOutcome::RateLimited);
        }

        match self.dispatcher.dispatch(template).await {
            DispatchOutcome::Created { name, .. } => {
                if self.controller.mode(pin)? == PinMode::Output {
                    self.controller.write(pin, PinState::Off)?;
                    debug!("Reset output pin {} after creating {}", pin, name);
                }
                Ok(PinOutcome::Dispatched { job: name })
            }
            DispatchOutcome::Failed { name, .. } => Ok(PinOutcome::DispatchFailed { job: name }),
        }
    }

    /// Sweeps until `shutdown` fires, then drives every pin off and releases
    /// the chip.
    pub async fn run(mut self, mut shutdown: ShutdownSignal, time: &impl TimeProvider) {
        info!(
            "Beginning main loop, polling {} pins every {}ms",
            self.controller.registry().len(),
            self.poll_interval.as_millis()
        );
        let mut sweeps: u64 = 0;
        let mut failures = 0;
        loop {
            let report = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                report = self.sweep(time.get_utc_time()) => report,
            };
            let dispatched = report.dispatched();
            if !dispatched.is_empty() {
                info!("Dispatched jobs for pin(s) {}", dispatched.iter().join(", "));
            }
            failures += report.failures();
            sweeps += 1;
            if sweeps % STILL_ALIVE_EVERY == 0 {
                info!("Still alive.. ({} sweeps, {} pin failures)", sweeps, failures);
            }
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("Stopping safely...");
        self.controller.shutdown();
        info!("Stopped safely.");
    }
}
