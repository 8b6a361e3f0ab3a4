use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_with::serde_as;
use serde_with::{DeserializeAs, DurationMilliSeconds, DurationSeconds};
use std::fmt::{Display, Formatter};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::jobs::dispatcher::{JobPreparer, NamespacePolicy};
use crate::registry::{is_registered, PinId, PinState};

const DEFAULT_API_SERVER: &str = "https://kubernetes.default.svc";
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, error: std::io::Error },
    Parse { path: PathBuf, error: toml::de::Error },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, error } => write!(f, "Unable to read config {:?}: {}", path, error),
            ConfigError::Parse { path, error } => write!(f, "Error reading config {:?}: {}", path, error),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    gpio: GpioConfig,
    #[serde(default)]
    agent: AgentConfig,
    #[serde(default)]
    jobs: JobsConfig,
    #[serde(default)]
    orchestrator: OrchestratorConfig,
    #[serde(default)]
    page: PageConfig,
    #[serde(default)]
    blink: BlinkConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_owned(),
            error,
        })?;
        let config: Config = toml::from_str(&config).map_err(|error| ConfigError::Parse {
            path: path.to_owned(),
            error,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !is_registered(self.blink.pin) {
            return Err(ConfigError::Invalid(format!(
                "blink pin {} is not a registered GPIO pin",
                self.blink.pin
            )));
        }
        if self.jobs.name_prefix.is_empty() {
            return Err(ConfigError::Invalid("jobs.name_prefix must not be empty".into()));
        }
        if self.jobs.default_namespace.is_empty() {
            return Err(ConfigError::Invalid("jobs.default_namespace must not be empty".into()));
        }
        Ok(())
    }

    pub fn get_gpio(&self) -> &GpioConfig {
        &self.gpio
    }

    pub fn get_agent(&self) -> &AgentConfig {
        &self.agent
    }

    pub fn get_jobs(&self) -> &JobsConfig {
        &self.jobs
    }

    pub fn get_orchestrator(&self) -> &OrchestratorConfig {
        &self.orchestrator
    }

    pub fn get_page(&self) -> &PageConfig {
        &self.page
    }

    pub fn get_blink(&self) -> &BlinkConfig {
        &self.blink
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GpioBackend {
    Cdev,
    Sysfs,
    Dummy,
}

#[serde_as]
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GpioConfig {
    backend: GpioBackend,
    /// Character device of the chip, only used by the cdev backend.
    chip: PathBuf,
    /// How long to stay up after the chip could not be claimed, so the
    /// failure can be inspected before the container restarts.
    #[serde_as(as = "DurationSeconds")]
    init_failure_delay_secs: Duration,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            backend: GpioBackend::Cdev,
            chip: PathBuf::from("/dev/gpiochip0"),
            init_failure_delay_secs: Duration::from_secs(30),
        }
    }
}

impl GpioConfig {
    pub fn get_backend(&self) -> GpioBackend {
        self.backend
    }

    pub fn get_chip(&self) -> &Path {
        &self.chip
    }

    pub fn get_init_failure_delay(&self) -> &Duration {
        &self.init_failure_delay_secs
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct AgentConfig {
    /// Delay between full sweeps of the registry.
    #[serde_as(as = "DurationMilliSeconds")]
    poll_interval_ms: Duration,
    /// The pin state that fires a job. Boards wired with pull-ups and a
    /// switch to ground read Off when pressed.
    #[serde_as(as = "PinStateNameOrNumber")]
    trigger_state: PinState,
}

/// Accepts a state name ("On", "off") or the numeric encoding (1, 0).
struct PinStateNameOrNumber;

impl<'de> DeserializeAs<'de, PinState> for PinStateNameOrNumber {
    fn deserialize_as<D: Deserializer<'de>>(deserializer: D) -> Result<PinState, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u8),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => PinState::try_from(n).map_err(D::Error::custom),
            Raw::Name(name) => PinState::from_str(&name).map_err(D::Error::custom),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Duration::from_millis(100),
            trigger_state: PinState::On,
        }
    }
}

impl AgentConfig {
    #[cfg(test)]
    pub fn new(poll_interval: Duration, trigger_state: PinState) -> Self {
        Self {
            poll_interval_ms: poll_interval,
            trigger_state,
        }
    }

    pub fn get_poll_interval(&self) -> &Duration {
        &self.poll_interval_ms
    }

    pub fn get_trigger_state(&self) -> PinState {
        self.trigger_state
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct JobsConfig {
    /// Directory holding the `output_pin_<id>.json` templates.
    dir: PathBuf,
    /// Minimum time between two dispatches of the same template. Zero disables.
    #[serde_as(as = "DurationSeconds")]
    cooldown_secs: Duration,
    name_prefix: String,
    default_namespace: String,
    namespace_policy: NamespacePolicy,
    /// Log prepared jobs instead of submitting them.
    dry_run: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/app/jobs"),
            cooldown_secs: Duration::from_secs(30),
            name_prefix: "pass-creator-job".to_owned(),
            default_namespace: "default".to_owned(),
            namespace_policy: NamespacePolicy::Template,
            dry_run: false,
        }
    }
}

impl JobsConfig {
    #[cfg(test)]
    pub fn new(dir: PathBuf, cooldown: Duration) -> Self {
        Self {
            dir,
            cooldown_secs: cooldown,
            ..Default::default()
        }
    }

    pub fn get_dir(&self) -> &Path {
        &self.dir
    }

    pub fn get_cooldown(&self) -> &Duration {
        &self.cooldown_secs
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn preparer(&self) -> JobPreparer {
        JobPreparer::new(
            self.name_prefix.clone(),
            self.default_namespace.clone(),
            self.namespace_policy,
        )
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Falls back to the in-cluster service environment, then the well known
    /// service name.
    api_server: Option<String>,
    token_path: PathBuf,
    /// Defaults to the service account bundle when that file exists.
    ca_cert_path: Option<PathBuf>,
    #[serde_as(as = "DurationSeconds")]
    request_timeout_secs: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_server: None,
            token_path: Path::new(SERVICE_ACCOUNT_DIR).join("token"),
            ca_cert_path: None,
            request_timeout_secs: Duration::from_secs(10),
        }
    }
}

impl OrchestratorConfig {
    #[cfg(test)]
    pub fn new(
        api_server: Option<String>,
        token_path: PathBuf,
        ca_cert_path: Option<PathBuf>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            api_server,
            token_path,
            ca_cert_path,
            request_timeout_secs: request_timeout,
        }
    }

    pub fn resolve_api_server(&self) -> String {
        if let Some(api_server) = &self.api_server {
            return api_server.clone();
        }
        let host = std::env::var("KUBERNETES_SERVICE_HOST").ok();
        let port = std::env::var("KUBERNETES_SERVICE_PORT").ok();
        api_server_from_env(host.as_deref(), port.as_deref())
    }

    pub fn get_token_path(&self) -> &Path {
        &self.token_path
    }

    pub fn resolve_ca_cert_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.ca_cert_path {
            return Some(path.clone());
        }
        let default = Path::new(SERVICE_ACCOUNT_DIR).join("ca.crt");
        default.exists().then_some(default)
    }

    pub fn get_request_timeout(&self) -> &Duration {
        &self.request_timeout_secs
    }
}

fn api_server_from_env(host: Option<&str>, port: Option<&str>) -> String {
    match (host, port) {
        (Some(host), Some(port)) if !host.is_empty() && !port.is_empty() => {
            if host.contains(':') {
                format!("https://[{}]:{}", host, port)
            } else {
                format!("https://{}:{}", host, port)
            }
        }
        _ => DEFAULT_API_SERVER.to_owned(),
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PageConfig {
    bind: SocketAddr,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }
}

impl PageConfig {
    pub fn get_bind(&self) -> &SocketAddr {
        &self.bind
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BlinkConfig {
    pin: PinId,
    #[serde_as(as = "DurationSeconds")]
    on_secs: Duration,
    #[serde_as(as = "DurationSeconds")]
    off_secs: Duration,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            pin: 4,
            on_secs: Duration::from_secs(5),
            off_secs: Duration::from_secs(10),
        }
    }
}

impl BlinkConfig {
    #[cfg(test)]
    pub fn new(pin: PinId, on_time: Duration, off_time: Duration) -> Self {
        Self {
            pin,
            on_secs: on_time,
            off_secs: off_time,
        }
    }

    pub fn get_pin(&self) -> PinId {
        self.pin
    }

    pub fn get_on_time(&self) -> &Duration {
        &self.on_secs
    }

    pub fn get_off_time(&self) -> &Duration {
        &self.off_secs
    }
}
