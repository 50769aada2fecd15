//! Directory to host reconciliation for ssh-iam-bridge
//!
//! - [`GroupSyncEngine`] mirrors prefixed directory groups onto local groups
//! - [`ProvisionFlow`] creates a local account on a user's first login attempt

pub mod groups;
pub mod provision;

pub use groups::{group_prefixes, GroupSyncEngine, ReconciledGroup, SyncReport};
pub use provision::{exit_code, ProvisionFlow, ProvisionOutcome};
