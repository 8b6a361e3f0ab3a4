use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::TimeZone;
use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::io::gpio::dummy::{Dummy, DummyHandle};
use crate::io::gpio::{LEVEL_HIGH, LEVEL_LOW};
use crate::jobs::dispatcher::{DispatchError, JobPreparer, NamespacePolicy, PreparedJob};
use crate::jobs::JobTemplate;
use crate::shutdown::shutdown_channel;
use crate::time_util::mytime::DummyTimeProvider;

#[derive(Clone)]
struct RecordingDispatcher {
    preparer: JobPreparer,
    jobs: Arc<Mutex<Vec<PreparedJob>>>,
    reject: bool,
    hang: bool,
}

impl RecordingDispatcher {
    fn new() -> Self {
        Self {
            preparer: JobPreparer::new("pass-creator-job".into(), "default".into(), NamespacePolicy::Template),
            jobs: Arc::new(Mutex::new(Vec::new())),
            reject: false,
            hang: false,
        }
    }

    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::new()
        }
    }

    /// Records the job, then never answers.
    fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new()
        }
    }

    fn jobs(&self) -> Vec<PreparedJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, template: JobTemplate) -> DispatchOutcome {
        let job = self.preparer.prepare(template);
        self.jobs.lock().unwrap().push(job.clone());
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.reject {
            return DispatchOutcome::Failed {
                name: job.name().to_owned(),
                error: DispatchError::Rejected {
                    status: 403,
                    body: "forbidden".into(),
                },
            };
        }
        DispatchOutcome::Created {
            name: job.name().to_owned(),
            namespace: job.namespace().to_owned(),
        }
    }
}

struct Setup {
    agent: Agent<Dummy, RecordingDispatcher>,
    handle: DummyHandle,
    dispatcher: RecordingDispatcher,
    _dir: TempDir,
}

fn setup_with(
    dispatcher: RecordingDispatcher,
    trigger_state: PinState,
    prepare: impl FnOnce(&mut PinController<Dummy>, &std::path::Path),
) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let (gpio, handle) = Dummy::create();
    let mut controller = PinController::new(gpio).unwrap();
    prepare(&mut controller, dir.path());

    let agent_config = AgentConfig::new(Duration::from_millis(5), trigger_state);
    let jobs_config = JobsConfig::new(dir.path().to_owned(), Duration::from_secs(30));
    let agent = Agent::new(controller, dispatcher.clone(), &agent_config, &jobs_config);
    Setup {
        agent,
        handle,
        dispatcher,
        _dir: dir,
    }
}

fn write_job(dir: &std::path::Path, file: &str) {
    let template = json!({"metadata": {}, "spec": {"backoffLimit": 2}});
    fs::write(dir.join(file), template.to_string()).unwrap();
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

fn is_generated_name(name: &str) -> bool {
    let suffix = match name.strip_prefix("pass-creator-job-") {
        Some(suffix) => suffix,
        None => return false,
    };
    suffix.len() == 8 && suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[test_log::test(tokio::test)]
async fn test_triggered_pin_dispatches_job() {
    let mut setup = setup_with(RecordingDispatcher::new(), PinState::On, |_, dir| {
        write_job(dir, "output_pin_17.json");
    });
    setup.handle.set_input_level(17, LEVEL_HIGH);

    let report = setup.agent.sweep(start_time()).await;

    assert_eq!(report.dispatched(), vec![17]);
    assert_eq!(report.failures(), 0);
    let jobs = setup.dispatcher.jobs();
    assert_eq!(jobs.len(), 1);
    assert!(is_generated_name(jobs[0].name()), "{}", jobs[0].name());
    assert_eq!(jobs[0].namespace(), "default");
    assert_eq!(jobs[0].body()["metadata"]["name"], json!(jobs[0].name()));
    assert_eq!(jobs[0].body()["spec"]["backoffLimit"], json!(2));

    // Input pins are never written.
    assert!(setup.handle.writes().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_idle_and_unconfigured_pins() {
    let mut setup = setup_with(RecordingDispatcher::new(), PinState::On, |_, dir| {
        write_job(dir, "output_pin_17.json");
    });
    setup.handle.set_input_level(27, LEVEL_HIGH);

    let report = setup.agent.sweep(start_time()).await;

    assert!(matches!(report.get(17), Some(Ok(PinOutcome::Idle))));
    assert!(matches!(report.get(27), Some(Ok(PinOutcome::NoTemplate))));
    assert!(report.get(2).is_none());
    assert!(setup.dispatcher.jobs().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_malformed_template_does_not_stop_sweep() {
    let mut setup = setup_with(RecordingDispatcher::new(), PinState::On, |_, dir| {
        fs::write(dir.join("output_pin_4.json"), "{ not json").unwrap();
        write_job(dir, "output_pin_17.json");
    });
    setup.handle.set_input_level(4, LEVEL_HIGH);
    setup.handle.set_input_level(17, LEVEL_HIGH);

    let report = setup.agent.sweep(start_time()).await;

    assert!(matches!(
        report.get(4),
        Some(Err(PinFailure::Template(TemplateError::Parse { .. })))
    ));
    assert_eq!(report.failures(), 1);
    assert_eq!(report.dispatched(), vec![17]);
}

#[test_log::test(tokio::test)]
async fn test_state_specific_template_is_preferred() {
    let mut setup = setup_with(RecordingDispatcher::new(), PinState::On, |_, dir| {
        write_job(dir, "output_pin_17.json");
        let template = json!({"metadata": {"namespace": "parking"}});
        fs::write(dir.join("output_pin_17_on.json"), template.to_string()).unwrap();
    });
    setup.handle.set_input_level(17, LEVEL_HIGH);

    setup.agent.sweep(start_time()).await;

    let jobs = setup.dispatcher.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].namespace(), "parking");
}

#[test_log::test(tokio::test)]
async fn test_rate_limit_across_sweeps() {
    let mut setup = setup_with(RecordingDispatcher::new(), PinState::On, |_, dir| {
        write_job(dir, "output_pin_17.json");
    });
    setup.handle.set_input_level(17, LEVEL_HIGH);
    let mut time = DummyTimeProvider::new(start_time());

    let first = setup.agent.sweep(time.get_utc_time()).await;
    assert_eq!(first.dispatched(), vec![17]);

    time.advance(chrono::Duration::seconds(10));
    let second = setup.agent.sweep(time.get_utc_time()).await;
    assert!(matches!(second.get(17), Some(Ok(PinOutcome::RateLimited))));

    // Exactly the cooldown after the first dispatch is still too soon.
    time.advance(chrono::Duration::seconds(20));
    let third = setup.agent.sweep(time.get_utc_time()).await;
    assert!(matches!(third.get(17), Some(Ok(PinOutcome::RateLimited))));

    time.advance(chrono::Duration::seconds(1));
    let fourth = setup.agent.sweep(time.get_utc_time()).await;
    assert_eq!(fourth.dispatched(), vec![17]);

    assert_eq!(setup.dispatcher.jobs().len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_output_pin_reset_after_dispatch() {
    let mut setup = setup_with(RecordingDispatcher::new(), PinState::On, |controller, dir| {
        write_job(dir, "output_pin_22.json");
        controller.claim(22, PinMode::Output).unwrap();
        controller.write(22, PinState::On).unwrap();
    });

    let report = setup.agent.sweep(start_time()).await;

    assert_eq!(report.dispatched(), vec![22]);
    assert_eq!(setup.handle.level(22), Some(LEVEL_LOW));
    assert_eq!(setup.handle.writes(), vec![(22, LEVEL_HIGH), (22, LEVEL_LOW)]);

    // Now off, so the next sweep leaves it alone.
    let report = setup.agent.sweep(start_time() + chrono::Duration::minutes(5)).await;
    assert!(matches!(report.get(22), Some(Ok(PinOutcome::Idle))));
}

#[test_log::test(tokio::test)]
async fn test_failed_dispatch_keeps_output_pin_on() {
    let mut setup = setup_with(RecordingDispatcher::rejecting(), PinState::On, |controller, dir| {
        write_job(dir, "output_pin_22.json");
        controller.claim(22, PinMode::Output).unwrap();
        controller.write(22, PinState::On).unwrap();
    });

    let report = setup.agent.sweep(start_time()).await;

    assert!(matches!(report.get(22), Some(Ok(PinOutcome::DispatchFailed { .. }))));
    assert_eq!(setup.handle.level(22), Some(LEVEL_HIGH));
}

#[test_log::test(tokio::test)]
async fn test_off_trigger_polarity() {
    let mut setup = setup_with(RecordingDispatcher::new(), PinState::Off, |_, dir| {
        write_job(dir, "output_pin_5.json");
        write_job(dir, "output_pin_6.json");
    });
    setup.handle.set_input_level(6, LEVEL_HIGH);

    let report = setup.agent.sweep(start_time()).await;

    assert_eq!(report.dispatched(), vec![5]);
    assert!(matches!(report.get(6), Some(Ok(PinOutcome::Idle))));
}

#[test_log::test(tokio::test)]
async fn test_run_stops_on_shutdown_and_releases() {
    let setup = setup_with(RecordingDispatcher::new(), PinState::On, |_, dir| {
        write_job(dir, "output_pin_17.json");
    });
    setup.handle.set_input_level(17, LEVEL_HIGH);
    let (trigger, signal) = shutdown_channel();
    let time = DummyTimeProvider::new(start_time());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    });
    tokio::time::timeout(Duration::from_secs(5), setup.agent.run(signal, &time))
        .await
        .expect("agent should stop once shutdown is triggered");

    assert!(setup.handle.is_released());
    // Same simulated instant on every sweep, so only one job got through.
    assert_eq!(setup.dispatcher.jobs().len(), 1);
    for pin in crate::registry::PIN_REGISTRY {
        assert_eq!(setup.handle.level(pin), Some(LEVEL_LOW), "pin {}", pin);
    }
}

#[test_log::test(tokio::test)]
async fn test_run_with_shutdown_already_requested() {
    let setup = setup_with(RecordingDispatcher::new(), PinState::On, |_, dir| {
        write_job(dir, "output_pin_17.json");
    });
    setup.handle.set_input_level(17, LEVEL_HIGH);
    let (trigger, signal) = shutdown_channel();
    trigger.trigger();

    setup.agent.run(signal, &DummyTimeProvider::new(start_time())).await;

    assert!(setup.dispatcher.jobs().is_empty());
    assert!(setup.handle.is_released());
}

#[test_log::test(tokio::test)]
async fn test_shutdown_interrupts_stuck_sweep() {
    let setup = setup_with(RecordingDispatcher::hanging(), PinState::On, |controller, dir| {
        write_job(dir, "output_pin_22.json");
        controller.claim(22, PinMode::Output).unwrap();
        controller.write(22, PinState::On).unwrap();
    });
    let (trigger, signal) = shutdown_channel();
    let time = DummyTimeProvider::new(start_time());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    });
    tokio::time::timeout(Duration::from_secs(5), setup.agent.run(signal, &time))
        .await
        .expect("shutdown should abandon a sweep stuck in dispatch");

    // The sweep reached the dispatcher and was dropped there.
    assert_eq!(setup.dispatcher.jobs().len(), 1);
    assert!(setup.handle.is_released());
    for pin in crate::registry::PIN_REGISTRY {
        assert_eq!(setup.handle.level(pin), Some(LEVEL_LOW), "pin {}", pin);
    }
}
