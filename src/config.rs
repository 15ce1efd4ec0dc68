//! Configuration for the workflow engine
//!
//! Values come from the process environment (a `.env` file is loaded by the
//! binary before this runs). Every setting has a default so an empty
//! environment yields a usable configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_COMMAND_INACTIVITY_TIMEOUT_SECS, DEFAULT_COMMAND_TIMEOUT_SECS,
    DEFAULT_HISTORY_MAX_RECORD_LENGTH, DEFAULT_MAX_HITS, DEFAULT_SSH_PORT, DEFAULT_SSH_USER,
};

/// Errors raised while reading configuration values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Connection settings for the remote shell box
#[derive(Clone, Debug, PartialEq)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Password authentication, used when no key file is given
    pub password: Option<String>,
    /// Private key authentication, takes precedence over the password
    pub key_file: Option<PathBuf>,
    /// Absolute limit for one command
    pub command_timeout: Duration,
    /// Limit for the time between two received lines
    pub inactivity_timeout: Duration,
}

impl SshConfig {
    /// Create settings for `host` with default port, user and timeouts
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: DEFAULT_SSH_USER.to_string(),
            password: None,
            key_file: None,
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            inactivity_timeout: Duration::from_secs(DEFAULT_COMMAND_INACTIVITY_TIMEOUT_SECS),
        }
    }
}

/// Engine configuration structure
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Directory searched for `*.wf.md` documents
    pub workflows_dir: PathBuf,

    /// Directory receiving history snapshots (None disables snapshots)
    pub output_dir: Option<PathBuf>,

    /// Loop guard: how often a single activity may run
    pub max_hits: u32,

    /// Maximum length of a single history record
    pub history_max_record_length: usize,

    /// Program started for the local persistent shell
    pub shell: String,

    /// Optional timeout for a local shell command (None waits forever)
    pub shell_command_timeout: Option<Duration>,

    /// Remote shell box, selects the SSH executor when present
    pub ssh: Option<SshConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            workflows_dir: PathBuf::from("./workflows"),
            output_dir: Some(PathBuf::from("./output")),
            max_hits: DEFAULT_MAX_HITS,
            history_max_record_length: DEFAULT_HISTORY_MAX_RECORD_LENGTH,
            shell: default_shell(),
            shell_command_timeout: None,
            ssh: None,
        }
    }

    /// Load the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::new();

        if let Some(dir) = get("WORKFLOWS_DIR") {
            config.workflows_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("OUTPUT_DIR") {
            config.output_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = get("MAX_HITS") {
            config.max_hits = parse_value("MAX_HITS", &value)?;
        }
        if let Some(value) = get("HISTORY_MAX_RECORD_LENGTH") {
            config.history_max_record_length = parse_value("HISTORY_MAX_RECORD_LENGTH", &value)?;
        }
        if let Some(shell) = get("SHELL") {
            config.shell = shell;
        }
        if let Some(value) = get("SHELL_COMMAND_TIMEOUT") {
            config.shell_command_timeout =
                Some(Duration::from_secs(parse_value("SHELL_COMMAND_TIMEOUT", &value)?));
        }

        if let Some(host) = get("SHELLBOX_HOST") {
            let mut ssh = SshConfig::new(host);
            if let Some(value) = get("SHELLBOX_PORT") {
                ssh.port = parse_value("SHELLBOX_PORT", &value)?;
            }
            if let Some(user) = get("SHELLBOX_USER") {
                ssh.user = user;
            }
            ssh.password = get("SHELLBOX_PASSWORD");
            ssh.key_file = get("SHELLBOX_SSH_KEYFILE").map(|path| expand_home(&path));
            if let Some(value) = get("COMMAND_TIMEOUT") {
                ssh.command_timeout = Duration::from_secs(parse_value("COMMAND_TIMEOUT", &value)?);
            }
            if let Some(value) = get("COMMAND_INACTIVITY_TIMEOUT") {
                ssh.inactivity_timeout =
                    Duration::from_secs(parse_value("COMMAND_INACTIVITY_TIMEOUT", &value)?);
            }
            config.ssh = Some(ssh);
        }

        Ok(config)
    }
}

fn default_shell() -> String {
    if cfg!(target_os = "windows") {
        "cmd".to_string()
    } else {
        "/bin/sh".to_string()
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
