//! Configuration for ssh-iam-bridge
//!
//! Config file location: /etc/ssh-iam-bridge.toml
//!
//! Example config:
//! ```toml
//! group_prefix = "system-"
//!
//! [aws]
//! region = "eu-west-1"
//!
//! [accounts]
//! shell = "/bin/zsh"
//! ```

use crate::{Error, Result, DEFAULT_GROUP_PREFIX, NAME};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file read when no explicit path is given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ssh-iam-bridge.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Directory groups whose name starts with this prefix are mirrored locally
    #[serde(default = "default_group_prefix")]
    pub group_prefix: String,

    #[serde(default)]
    pub aws: AwsConfig,

    #[serde(default)]
    pub accounts: AccountsConfig,

    #[serde(default)]
    pub install: InstallConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_group_prefix() -> String {
    DEFAULT_GROUP_PREFIX.to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            group_prefix: default_group_prefix(),
            aws: AwsConfig::default(),
            accounts: AccountsConfig::default(),
            install: InstallConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            Error::InvalidConfig(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Load from `path`, or from [`DEFAULT_CONFIG_PATH`] when it exists, then
    /// apply environment overrides and validate
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH)?,
            None => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override values from `SSH_IAM_BRIDGE_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(prefix) = var("SSH_IAM_BRIDGE_GROUP_PREFIX") {
            self.group_prefix = prefix;
        }
        if let Some(region) = var("SSH_IAM_BRIDGE_REGION") {
            self.aws.region = Some(region);
        }
        if let Some(profile) = var("SSH_IAM_BRIDGE_AWS_PROFILE") {
            self.aws.profile = Some(profile);
        }
        if let Some(resolve) = var("SSH_IAM_BRIDGE_RESOLVE_HOST_ROLE") {
            self.aws.resolve_host_role = resolve == "true" || resolve == "1";
        }
        if let Some(shell) = var("SSH_IAM_BRIDGE_SHELL") {
            self.accounts.shell = shell;
        }
        if let Some(dir) = var("SSH_IAM_BRIDGE_LOCK_DIR") {
            self.accounts.lock_dir = PathBuf::from(dir);
        }
        if let Some(level) = var("SSH_IAM_BRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_group_prefix(&self.group_prefix)?;

        if !self.accounts.lock_dir.is_absolute() {
            return Err(Error::InvalidConfig(format!(
                "lock_dir must be an absolute path, got {:?}",
                self.accounts.lock_dir
            )));
        }
        if self.accounts.shell.is_empty() {
            return Err(Error::InvalidConfig("shell must not be empty".into()));
        }
        if self.install.command_user.is_empty() {
            return Err(Error::InvalidConfig("command_user must not be empty".into()));
        }

        Ok(())
    }
}

/// IAM group names are limited to alphanumerics and `+=,.@_-`. The comma is
/// refused here since it separates members in the group file.
pub fn validate_group_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(Error::InvalidConfig("group_prefix must not be empty".into()));
    }
    if let Some(c) = prefix
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || "+=.@_-".contains(*c)))
    {
        return Err(Error::InvalidConfig(format!(
            "group_prefix {:?} contains invalid character {:?}",
            prefix, c
        )));
    }
    Ok(())
}

/// AWS client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// Region override, otherwise resolved by the SDK
    #[serde(default)]
    pub region: Option<String>,

    /// Named profile from the shared AWS config files
    #[serde(default)]
    pub profile: Option<String>,

    /// Look up the instance role to also match role-scoped groups
    #[serde(default = "default_true")]
    pub resolve_host_role: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            resolve_host_role: true,
        }
    }
}

/// Settings for local accounts created on first login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_true")]
    pub create_home: bool,

    /// Directory holding the per-user creation lock files
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from(format!("/run/{}", NAME))
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            create_home: true,
            lock_dir: default_lock_dir(),
        }
    }
}

/// Files touched by the `install` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    #[serde(default = "default_sshd_config")]
    pub sshd_config: PathBuf,

    #[serde(default = "default_pam_sshd")]
    pub pam_sshd: PathBuf,

    #[serde(default = "default_cron_file")]
    pub cron_file: PathBuf,

    /// Account sshd runs the AuthorizedKeysCommand as
    #[serde(default = "default_command_user")]
    pub command_user: String,

    /// Cron schedule of the periodic group sync
    #[serde(default = "default_sync_schedule")]
    pub sync_schedule: String,
}

fn default_sshd_config() -> PathBuf {
    PathBuf::from("/etc/ssh/sshd_config")
}

fn default_pam_sshd() -> PathBuf {
    PathBuf::from("/etc/pam.d/sshd")
}

fn default_cron_file() -> PathBuf {
    PathBuf::from(format!("/etc/cron.d/{}", NAME))
}

fn default_command_user() -> String {
    NAME.to_string()
}

fn default_sync_schedule() -> String {
    "*/10 * * * *".to_string()
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            sshd_config: default_sshd_config(),
            pam_sshd: default_pam_sshd(),
            cron_file: default_cron_file(),
            command_user: default_command_user(),
            sync_schedule: default_sync_schedule(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
