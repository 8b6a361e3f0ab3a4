use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::watch;

/// Raised from the process signal handler. Raising it more than once is
/// harmless.
#[derive(Clone)]
pub struct ShutdownTrigger {
    sender: Arc<watch::Sender<bool>>,
}

/// Awaited by the long running loops to learn that they should stop.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        ShutdownTrigger {
            sender: Arc::new(sender),
        },
        ShutdownSignal { receiver },
    )
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        if self.sender.send_replace(true) {
            warn!("Shutdown already in progress.");
        }
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown has been requested, or if every trigger is gone.
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Debug)]
pub enum SignalHandlerError {
    Interrupt(ctrlc::Error),
    Terminate(std::io::Error),
}

impl Display for SignalHandlerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalHandlerError::Interrupt(e) => write!(f, "Failed to attach SIGINT handler: {}", e),
            SignalHandlerError::Terminate(e) => write!(f, "Failed to attach SIGTERM handler: {}", e),
        }
    }
}

impl std::error::Error for SignalHandlerError {}

/// Routes SIGINT and SIGTERM to `trigger`. Nothing else stops the process,
/// SIGHUP in particular is left to the log level reload.
/// Must be called from within a tokio runtime.
pub fn install_signal_handler(trigger: ShutdownTrigger) -> Result<(), SignalHandlerError> {
    #[cfg(unix)]
    listen_for_terminate(trigger.clone())?;

    ctrlc::set_handler(move || {
        info!("Caught interrupt signal.");
        trigger.trigger();
    })
    .map_err(SignalHandlerError::Interrupt)
}

#[cfg(unix)]
fn listen_for_terminate(trigger: ShutdownTrigger) -> Result<(), SignalHandlerError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).map_err(SignalHandlerError::Terminate)?;
    tokio::spawn(async move {
        if terminate.recv().await.is_some() {
            info!("Caught termination signal.");
            trigger.trigger();
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let (trigger, mut signal) = shutdown_channel();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn(async move {
            signal.wait().await;
            signal.is_triggered()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.trigger();

        let triggered = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("wait should resolve once triggered")
            .unwrap();
        assert!(triggered);
    }

    #[tokio::test]
    async fn test_wait_after_trigger_returns_immediately() {
        let (trigger, mut signal) = shutdown_channel();
        trigger.trigger();
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), signal.wait())
            .await
            .expect("already triggered");
        // Still triggered for every later waiter.
        tokio::time::timeout(Duration::from_secs(5), signal.wait())
            .await
            .expect("still triggered");
    }

    // The only test in the crate that installs process signal handlers,
    // ctrlc accepts a single handler per process.
    #[cfg(unix)]
    #[test_log::test(tokio::test)]
    async fn test_hangup_reloads_logging_without_shutdown() {
        use tokio::signal::unix::{signal, SignalKind};
        use tracing_subscriber::{reload, EnvFilter, Registry};

        let (trigger, mut shutdown) = shutdown_channel();
        install_signal_handler(trigger).unwrap();

        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("warn"));
        crate::logging::reload_on_hangup(handle.clone());
        let mut hangups = signal(SignalKind::hangup()).unwrap();

        send_signal("-HUP");
        tokio::time::timeout(Duration::from_secs(5), hangups.recv())
            .await
            .expect("SIGHUP should be delivered");
        // logging.env at the crate root holds "info".
        let reloaded = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let filter = handle.with_current(|filter| filter.to_string()).unwrap();
                if !filter.contains("warn") {
                    return filter;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("SIGHUP should reload the filter");
        assert!(reloaded.contains("info"), "{}", reloaded);
        assert!(!shutdown.is_triggered());

        send_signal("-TERM");
        tokio::time::timeout(Duration::from_secs(5), shutdown.wait())
            .await
            .expect("SIGTERM should trigger shutdown");
        assert!(shutdown.is_triggered());
    }

    #[cfg(unix)]
    fn send_signal(signal: &str) {
        let status = std::process::Command::new("kill")
            .arg(signal)
            .arg(std::process::id().to_string())
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_dropped_trigger_releases_waiters() {
        let (trigger, mut signal) = shutdown_channel();
        drop(trigger);
        tokio::time::timeout(Duration::from_secs(5), signal.wait())
            .await
            .expect("wait should not hang without a trigger");
    }
}
