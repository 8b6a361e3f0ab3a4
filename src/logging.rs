use std::fs;
use std::path::Path;

use time::UtcOffset;
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{reload::Handle, EnvFilter};

const LOGGING_ENV_FILE: &str = "logging.env";

pub fn init_logging() -> Result<LoggingHandle<EnvFilter, impl Subscriber>, String> {
    init_tracing_logger()
}

#[derive(Debug)]
pub enum ReloadLogLevelError {
    InvalidFilter(String),
    ReloadFailed(tracing_subscriber::reload::Error),
}

impl std::fmt::Display for ReloadLogLevelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReloadLogLevelError::InvalidFilter(e) => write!(f, "{}", e),
            ReloadLogLevelError::ReloadFailed(e) => write!(f, "Failed to reload filter: {}", e),
        }
    }
}

pub fn reload_log_level<S: Subscriber>(handle: &Handle<EnvFilter, S>) -> Result<String, ReloadLogLevelError> {
    let new_filter = read_env_filter(Path::new(LOGGING_ENV_FILE)).map_err(ReloadLogLevelError::InvalidFilter)?;

    let filter_string = format!("{}", new_filter);

    handle
        .reload(new_filter)
        .map_err(ReloadLogLevelError::ReloadFailed)?;

    Ok(filter_string)
}

fn init_tracing_logger() -> Result<LoggingHandle<EnvFilter, impl Subscriber>, String> {
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        UtcOffset::current_local_offset().unwrap_or_else(|err| {
            eprintln!("Failed to get timezone: {}", err);
            UtcOffset::UTC
        }),
        time::macros::format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second] +[offset_hour]"
        ),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let env_filter = read_env_filter(Path::new(LOGGING_ENV_FILE)).unwrap_or_else(|err| {
        eprintln!(
            "Failed to read env filter, using environment variable or default: {}",
            err
        );
        EnvFilter::builder()
            .with_default_directive(Level::INFO.into())
            .from_env_lossy()
    });

    println!("Env Filter: {}", env_filter);

    let builder = tracing_subscriber::fmt()
        .with_timer(timer)
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_filter_reloading();

    let handle = builder.reload_handle();

    tracing::subscriber::set_global_default(builder.finish())
        .map_err(|err| format!("failed to initialize logger: {}", err))?;
    // Everything outside this file logs through the `log` macros.
    tracing_log::LogTracer::init().map_err(|err| format!("failed to bridge log records: {}", err))?;

    Ok(LoggingHandle {
        _non_blocking_guard: guard,
        handle,
    })
}

fn read_env_filter(path: &Path) -> Result<EnvFilter, String> {
    let s = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read file {:?}: {}", path, err))?;
    let first_line = s
        .lines()
        .next()
        .ok_or_else(|| format!("{:?} is empty", path))?;
    EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .parse(first_line.trim())
        .map_err(|err| format!("Failed to parse env filter: {}", err))
}

/// Must be held until the process exits, otherwise buffered lines are lost.
pub struct LoggingHandle<L, S> {
    _non_blocking_guard: WorkerGuard,
    handle: Handle<L, S>,
}

impl<L, S> LoggingHandle<L, S> {
    pub fn reload_handle(&self) -> Handle<L, S> {
        self.handle.clone()
    }
}

/// Re-reads the filter from `logging.env` whenever the process gets SIGHUP.
/// Must be called from within a tokio runtime.
#[cfg(unix)]
pub fn reload_on_hangup<S>(handle: Handle<EnvFilter, S>)
where
    S: Subscriber + Send + Sync + 'static,
{
    use log::{error, info};
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(hangups) => hangups,
        Err(e) => {
            error!("Failed to listen for SIGHUP, log level reloading disabled: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            match reload_log_level(&handle) {
                Ok(filter) => info!("Reloaded log filter: {}", filter),
                Err(e) => error!("Failed to reload log filter: {}", e),
            }
        }
    });
}
