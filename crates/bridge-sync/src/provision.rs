//! First-login account provisioning
//!
//! sshd runs this from the PAM auth stack (via `pam_exec`) for every login
//! attempt. When the user has no local account yet, the account is created from
//! the directory and the attempt is failed with [`EX_TEMPFAIL`]: sshd looked the
//! user up before the account existed, so only a new connection can succeed.

use crate::groups::{GroupSyncEngine, SyncReport};
use bridge_accounts::{AccountLock, AccountStore};
use bridge_core::types::{validate_name, LocalAccount};
use bridge_core::{BridgeConfig, Error, Result, EX_NOPERM, EX_TEMPFAIL, NAME};
use bridge_directory::Directory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// How a provisioning attempt ended
#[derive(Debug)]
pub enum ProvisionOutcome {
    /// No user name was supplied by PAM
    MissingUser,
    /// The account exists, so an earlier attempt created it
    AlreadyProvisioned,
    /// The account was created; group sync ran afterwards
    Created {
        account: LocalAccount,
        group_sync: Result<SyncReport>,
    },
}

impl ProvisionOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            ProvisionOutcome::MissingUser | ProvisionOutcome::AlreadyProvisioned => EX_NOPERM,
            ProvisionOutcome::Created { .. } => EX_TEMPFAIL,
        }
    }

    /// Text shown to the connecting user
    pub fn message(&self) -> Option<String> {
        match self {
            ProvisionOutcome::MissingUser => Some("Unable to find pam user in the environment".to_string()),
            ProvisionOutcome::AlreadyProvisioned => None,
            ProvisionOutcome::Created { .. } => Some(format!(
                "{name}: Your user has been created but you must reconnect for it to be active.\n\
                 {name}: Connect again to log in to your account.",
                name = NAME
            )),
        }
    }
}

/// Exit status for the PAM caller. Failed attempts are never worth retrying
/// from PAM's point of view, whatever the cause.
pub fn exit_code(result: &Result<ProvisionOutcome>) -> u8 {
    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(_) => EX_NOPERM,
    }
}

pub struct ProvisionFlow {
    directory: Arc<dyn Directory>,
    accounts: Arc<dyn AccountStore>,
    group_prefix: String,
    lock_dir: Option<PathBuf>,
}

impl ProvisionFlow {
    pub fn new(
        directory: Arc<dyn Directory>,
        accounts: Arc<dyn AccountStore>,
        group_prefix: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            accounts,
            group_prefix: group_prefix.into(),
            lock_dir: None,
        }
    }

    pub fn from_config(
        directory: Arc<dyn Directory>,
        accounts: Arc<dyn AccountStore>,
        config: &BridgeConfig,
    ) -> Self {
        Self::new(directory, accounts, config.group_prefix.clone())
            .with_lock_dir(config.accounts.lock_dir.clone())
    }

    /// Serialise account creation through lock files in `dir`
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Provision `username` if it has no local account yet.
    ///
    /// Errors from the directory user lookup or from account creation abort the
    /// flow. A failed group sync is logged and reported on the outcome only.
    pub async fn run(&self, username: Option<&str>) -> Result<ProvisionOutcome> {
        let username = match username.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => {
                warn!("No user name supplied");
                return Ok(ProvisionOutcome::MissingUser);
            }
        };
        validate_name("user", username)?;

        let account = {
            let _lock = match &self.lock_dir {
                Some(dir) => Some(AccountLock::user(dir, username).await?),
                None => None,
            };

            if self.accounts.user_exists(username).await? {
                info!("User {} already exists locally", username);
                return Ok(ProvisionOutcome::AlreadyProvisioned);
            }

            let user = match self.directory.find_user(username).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    error!("User {} does not exist in the directory", username);
                    return Err(Error::UserNotFound(username.to_string()));
                }
                Err(e) => {
                    error!("Directory lookup of {} failed: {}", username, e);
                    return Err(e);
                }
            };

            let account = LocalAccount {
                username: username.to_string(),
                ..LocalAccount::from_directory(&user)
            };
            self.accounts.create_user(&account).await?;
            info!("Provisioned {} with uid {}", account.username, account.uid);
            account
        };

        let engine = GroupSyncEngine::new(self.directory.clone(), self.accounts.clone());
        let group_sync = engine.sync(&self.group_prefix).await;
        if let Err(e) = &group_sync {
            warn!("Group sync after creating {} failed: {}", username, e);
        }

        Ok(ProvisionOutcome::Created { account, group_sync })
    }
}
