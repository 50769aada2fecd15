//! Identity directory access for ssh-iam-bridge
//!
//! The [`Directory`] trait is the only view the rest of the bridge has of the
//! directory. Implementations:
//! - [`IamDirectory`]: AWS IAM plus EC2 instance metadata for the host role
//! - [`MemoryDirectory`]: in-process directory with failure injection

mod iam;
mod keys;
mod memory;

pub use iam::IamDirectory;
pub use keys::authorized_keys;
pub use memory::MemoryDirectory;

use async_trait::async_trait;
use bridge_core::types::{DirectoryGroup, DirectoryUser, SshPublicKey};
use bridge_core::Result;

/// Read-only view of the identity directory
#[async_trait]
pub trait Directory: Send + Sync {
    /// Role of the host this process runs on, if it has one
    async fn host_role(&self) -> Result<Option<String>>;

    /// All groups whose name starts with any of `prefixes`
    async fn list_groups(&self, prefixes: &[String]) -> Result<Vec<DirectoryGroup>>;

    /// User names of the members of `group`
    async fn group_members(&self, group: &DirectoryGroup) -> Result<Vec<String>>;

    /// Look up a user, `Ok(None)` when the directory has no such user
    async fn find_user(&self, username: &str) -> Result<Option<DirectoryUser>>;

    /// SSH public keys registered for a user, active or not, in directory order
    async fn ssh_public_keys(&self, username: &str) -> Result<Vec<SshPublicKey>>;

    /// OpenSSH-encoded body of a single public key
    async fn ssh_public_key_body(&self, username: &str, key_id: &str) -> Result<String>;
}
