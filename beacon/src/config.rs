use anyhow::{Context, Result};
use serde::Deserialize;
use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};
use tokio::time::Duration;

use crate::error::ReportError;

const DEFAULT_ENVIRONMENTS: [&str; 4] = ["development", "test", "staging", "production"];
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

// Parses a duration string (e.g., "5s", "1m") into a `tokio::time::Duration`.
// Used for deserializing duration values from the config file.
fn parse_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Which deployment environments may send reports.
/// Corresponds to the [enable] section; entries are merged over the defaults.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(from = "BTreeMap<String, bool>")]
pub struct EnablePolicy {
    environments: BTreeMap<String, bool>,
}

impl EnablePolicy {
    /// Sets the flag for `environment`, or for every known environment when
    /// none is given.
    pub fn enable(&mut self, environment: Option<&str>, flag: bool) {
        match environment {
            Some(environment) => {
                self.environments.insert(environment.to_string(), flag);
            }
            None => self.environments.values_mut().for_each(|v| *v = flag),
        }
    }

    /// Unknown environments are disabled.
    pub fn is_enabled(&self, environment: &str) -> bool {
        self.environments.get(environment).copied().unwrap_or(false)
    }
}

impl Default for EnablePolicy {
    fn default() -> Self {
        Self {
            environments: DEFAULT_ENVIRONMENTS
                .iter()
                .map(|env| (env.to_string(), true))
                .collect(),
        }
    }
}

impl From<BTreeMap<String, bool>> for EnablePolicy {
    fn from(overrides: BTreeMap<String, bool>) -> Self {
        let mut policy = Self::default();
        policy.environments.extend(overrides);
        policy
    }
}

/// Background system used to deliver reports.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueSelection {
    /// Send synchronously from the calling task.
    #[default]
    None,
    /// Enqueue a `RunReport` job.
    Resque,
    /// Schedule a deferred call to the sender.
    DelayedJob,
}

impl FromStr for QueueSelection {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "resque" => Ok(Self::Resque),
            "delayed_job" => Ok(Self::DelayedJob),
            other => Err(ReportError::configuration(format!(
                "unsupported queue system: {other}"
            ))),
        }
    }
}

impl fmt::Display for QueueSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Resque => "resque",
            Self::DelayedJob => "delayed_job",
        })
    }
}

/// Remote collector settings.
/// Corresponds to the [service] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "ServiceConfig::default_url")]
    pub url: String,

    #[serde(default = "ServiceConfig::default_test_url")]
    pub test_url: String,

    // Use plain http against `test_url` when set.
    #[serde(default)]
    pub test_mode: bool,

    pub app: Option<String>,

    pub token: Option<String>,

    // Full base URL; takes precedence over app/url/environment.
    pub endpoint: Option<String>,

    #[serde(
        default = "ServiceConfig::default_timeout",
        deserialize_with = "parse_duration"
    )]
    pub timeout: Duration,

    // Print reports to stdout instead of posting them.
    #[serde(default)]
    pub debug: bool,
}

impl ServiceConfig {
    fn default_url() -> String {
        "beacon.io".to_string()
    }

    fn default_test_url() -> String {
        "beacon.test".to_string()
    }

    fn default_timeout() -> Duration {
        DEFAULT_TIMEOUT
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            test_url: Self::default_test_url(),
            test_mode: false,
            app: None,
            token: None,
            endpoint: None,
            timeout: Self::default_timeout(),
            debug: false,
        }
    }
}

/// Configuration of the in-process job queue.
/// Corresponds to the [worker] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "WorkerConfig::default_num_instance")]
    pub num_instance: usize,
}

impl WorkerConfig {
    fn default_num_instance() -> usize {
        4
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_instance: Self::default_num_instance(),
        }
    }
}

/// How the acting user and group are identified in reports.
/// Corresponds to the [identity] section in the TOML config file.
///
/// Both are reported as `{"id": .., "display": ..}`. Without a display
/// accessor the display is the text of the value itself when it is a
/// scalar, or the text of its id otherwise.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    // Accessor on the watched instance that yields the user.
    #[serde(default = "IdentityConfig::default_user_call")]
    pub user_call: String,

    #[serde(default = "IdentityConfig::default_id")]
    pub user_id: String,

    pub user_display: Option<String>,

    // Accessor on the watched instance that yields the group; no group
    // unless set.
    pub group_call: Option<String>,

    #[serde(default = "IdentityConfig::default_id")]
    pub group_id: String,

    pub group_display: Option<String>,
}

impl IdentityConfig {
    fn default_user_call() -> String {
        "user".to_string()
    }

    fn default_id() -> String {
        "id".to_string()
    }

    /// Names the user model. Reports read the user through the accessor of
    /// the same name in lowercase, `User` -> `user`.
    pub fn user(&mut self, model: &str) -> &mut Self {
        self.user_call = model.to_lowercase();
        self
    }

    /// Accessor on the user that identifies it.
    pub fn id(&mut self, accessor: impl Into<String>) -> &mut Self {
        self.user_id = accessor.into();
        self
    }

    /// Accessor on the user that names it for display.
    pub fn display(&mut self, accessor: impl Into<String>) -> &mut Self {
        self.user_display = Some(accessor.into());
        self
    }

    /// Accessor on the watched instance that yields the group.
    pub fn group(&mut self, accessor: impl Into<String>) -> &mut Self {
        self.group_call = Some(accessor.into());
        self
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_call: Self::default_user_call(),
            user_id: Self::default_id(),
            user_display: None,
            group_call: None,
            group_id: Self::default_id(),
            group_display: None,
        }
    }
}

/// Represents the overall configuration, loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "Config::default_environment")]
    pub environment: String,

    // `None` when the file leaves the queue unset; it can then be chosen
    // once at startup.
    #[serde(default)]
    pub queue: Option<QueueSelection>,

    #[serde(default)]
    pub enable: EnablePolicy,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub identity: IdentityConfig,
}

impl Config {
    pub fn new(config_path: &Path) -> Result<Self> {
        Self::load_from_file(config_path)
    }

    fn load_from_file(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)?;
        let config = toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        tracing::debug!("config: {:?}", config);
        Ok(config)
    }

    fn default_environment() -> String {
        "development".to_string()
    }

    /// The selected queue system, `none` when unset.
    pub fn queue_selection(&self) -> QueueSelection {
        self.queue.unwrap_or_default()
    }

    /// Whether reports may be sent from the configured environment.
    pub fn enabled(&self) -> bool {
        self.enable.is_enabled(&self.environment)
    }

    /// Base URL reports are posted under.
    pub fn base_url(&self) -> crate::Result<String> {
        if let Some(endpoint) = &self.service.endpoint {
            return Ok(endpoint.trim_end_matches('/').to_string());
        }
        let app = self.service.app.as_deref().ok_or_else(|| {
            ReportError::configuration("service.app is required to build the collector url")
        })?;
        let (scheme, host) = if self.service.test_mode {
            ("http", &self.service.test_url)
        } else {
            ("https", &self.service.url)
        };
        Ok(format!("{scheme}://{app}.{host}/{}", self.environment))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Self::default_environment(),
            queue: None,
            enable: EnablePolicy::default(),
            service: ServiceConfig::default(),
            worker: WorkerConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    // Helper function to create a temporary config file with given content.
    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
environment = "staging"
queue = "resque"

[enable]
staging = false

[service]
app = "acme"
token = "secret"
timeout = "10s"

[worker]
num_instance = 2

[identity]
user_call = "author"
user_display = "login"
group_call = "company"
"#;
        let temp_file = create_temp_config(config_content);
        let config = Config::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.environment, "staging");
        assert_eq!(config.queue, Some(QueueSelection::Resque));
        assert!(!config.enabled());
        assert!(config.enable.is_enabled("production"));
        assert_eq!(config.service.timeout, Duration::from_secs(10));
        assert_eq!(config.service.token.as_deref(), Some("secret"));
        assert_eq!(config.worker.num_instance, 2);
        assert_eq!(config.base_url().unwrap(), "https://acme.beacon.io/staging");
        assert_eq!(config.identity.user_call, "author");
        assert_eq!(config.identity.user_id, "id");
        assert_eq!(config.identity.user_display.as_deref(), Some("login"));
        assert_eq!(config.identity.group_call.as_deref(), Some("company"));
        assert_eq!(config.identity.group_id, "id");
    }

    #[test]
    fn test_bundled_config_loads() {
        let config_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/beacon.toml");
        let config = Config::new(&config_path).unwrap();
        assert!(config.service.debug);
        assert!(!config.enable.is_enabled("test"));
        assert_eq!(config.base_url().unwrap(), "http://acme.beacon.test/development");
    }

    #[test]
    fn test_load_empty_config_uses_defaults() {
        let temp_file = create_temp_config("");
        let config = Config::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.environment, "development");
        assert_eq!(config.queue, None);
        assert_eq!(config.queue_selection(), QueueSelection::None);
        assert_eq!(config.enable, EnablePolicy::default());
        assert_eq!(config.identity, IdentityConfig::default());
        assert_eq!(config.service.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.worker.num_instance, WorkerConfig::default_num_instance());
        assert!(config.enabled());
    }

    #[test]
    fn test_explicit_none_queue_is_kept() {
        let temp_file = create_temp_config(r#"queue = "none""#);
        let config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.queue, Some(QueueSelection::None));
    }

    #[test]
    fn test_identity_builder_methods() {
        let mut identity = IdentityConfig::default();
        identity.user("Member").id("uid").display("nickname").group("team");
        assert_eq!(identity.user_call, "member");
        assert_eq!(identity.user_id, "uid");
        assert_eq!(identity.user_display.as_deref(), Some("nickname"));
        assert_eq!(identity.group_call.as_deref(), Some("team"));
    }

    #[test]
    fn test_unsupported_queue_fails_to_load() {
        let temp_file = create_temp_config(r#"queue = "sidekiq""#);
        let err = Config::load_from_file(temp_file.path()).unwrap_err();
        let found = err.chain().any(|e| e.is::<toml::de::Error>());
        assert!(found, "Error should be toml::de::Error");
    }

    #[test]
    fn test_load_config_with_invalid_duration() {
        let temp_file = create_temp_config("[service]\ntimeout = \"5xyz\"\n");
        let err = Config::load_from_file(temp_file.path()).unwrap_err();
        let found = err.chain().any(|e| e.is::<toml::de::Error>());
        assert!(found, "Error should be toml::de::Error");
    }

    #[test]
    fn test_load_non_existent_file() {
        let config_path = PathBuf::from("non_existent_config_file.toml");
        let err = Config::load_from_file(&config_path).unwrap_err();
        let io_err = err
            .downcast_ref::<std::io::Error>()
            .expect("Error should be std::io::Error");
        assert_eq!(io_err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_enable_single_and_all_environments() {
        let mut policy = EnablePolicy::default();
        policy.enable(Some("test"), false);
        assert!(!policy.is_enabled("test"));
        assert!(policy.is_enabled("production"));

        policy.enable(None, false);
        for env in DEFAULT_ENVIRONMENTS {
            assert!(!policy.is_enabled(env));
        }

        policy.enable(Some("review"), true);
        assert!(policy.is_enabled("review"));
        assert!(!policy.is_enabled("unknown"));
    }

    #[test]
    fn test_queue_selection_from_str() {
        assert_eq!("resque".parse::<QueueSelection>().unwrap(), QueueSelection::Resque);
        assert_eq!(
            "delayed_job".parse::<QueueSelection>().unwrap(),
            QueueSelection::DelayedJob
        );
        assert!(matches!(
            "sidekiq".parse::<QueueSelection>(),
            Err(ReportError::Configuration(_))
        ));
    }

    #[test]
    fn test_base_url() {
        let mut config = Config::default();
        assert!(matches!(config.base_url(), Err(ReportError::Configuration(_))));

        config.service.app = Some("acme".to_string());
        config.service.test_mode = true;
        assert_eq!(config.base_url().unwrap(), "http://acme.beacon.test/development");

        config.service.endpoint = Some("http://127.0.0.1:8080/".to_string());
        assert_eq!(config.base_url().unwrap(), "http://127.0.0.1:8080");
    }
}
