//! CLI command implementations

pub mod authorized_keys;
pub mod install;
pub mod pam_create_user;
pub mod sync_groups;

use bridge_accounts::{AccountStore, SystemAccounts};
use bridge_core::{BridgeConfig, NAME};
use bridge_directory::{Directory, IamDirectory};
use std::sync::Arc;

/// Context passed to all commands
pub struct CommandContext {
    pub config: BridgeConfig,
}

impl CommandContext {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// IAM-backed directory built from the configured AWS settings
    pub async fn directory(&self) -> Arc<dyn Directory> {
        Arc::new(IamDirectory::from_config(&self.config.aws).await)
    }

    pub fn accounts(&self) -> Arc<dyn AccountStore> {
        Arc::new(SystemAccounts::new(&self.config.accounts))
    }

    /// Print error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}: {}", NAME, msg);
    }
}
