//! Local account management for ssh-iam-bridge
//!
//! Provides:
//! - [`AccountStore`]: the operations the bridge performs on local users and groups
//! - [`SystemAccounts`]: shadow-utils and the group file
//! - [`MemoryAccounts`]: in-process store with failure injection
//! - [`AccountLock`]: advisory locks around account creation and group file writes

mod lock;
mod memory;
mod system;

pub use lock::AccountLock;
pub use memory::MemoryAccounts;
pub use system::SystemAccounts;

use async_trait::async_trait;
use bridge_core::types::{GroupChange, LocalAccount, LocalGroup};
use bridge_core::Result;

/// Local user and group operations
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Whether a user with this name resolves on the host
    async fn user_exists(&self, username: &str) -> Result<bool>;

    /// Create a login account with the given uid and comment
    async fn create_user(&self, account: &LocalAccount) -> Result<()>;

    /// Create a system account without home directory or login shell
    async fn create_service_user(&self, username: &str) -> Result<()>;

    async fn find_group(&self, name: &str) -> Result<Option<LocalGroup>>;

    /// Create the group if missing and make its member list equal `group.members`
    async fn ensure_group(&self, group: &LocalGroup) -> Result<GroupChange>;
}
