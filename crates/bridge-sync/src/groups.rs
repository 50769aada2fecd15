//! Group synchronisation
//!
//! Every directory group whose name starts with the configured prefix, or with
//! `<prefix><host role>-` when the host has a role, is mirrored onto a local
//! group of the same name. The local gid is derived from the directory group id
//! and the local member list is replaced by the directory's.

use bridge_accounts::AccountStore;
use bridge_core::types::{validate_name, GroupChange, LocalGroup};
use bridge_core::Result;
use bridge_directory::Directory;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Group names matched for `prefix` on a host with an optional role
pub fn group_prefixes(prefix: &str, role: Option<&str>) -> Vec<String> {
    match role.map(str::trim).filter(|r| !r.is_empty()) {
        Some(role) => vec![prefix.to_string(), format!("{}{}-", prefix, role)],
        None => vec![prefix.to_string()],
    }
}

/// A local group brought in line with the directory
#[derive(Debug, Clone)]
pub struct ReconciledGroup {
    pub name: String,
    pub gid: u32,
    pub change: GroupChange,
}

/// Result of one synchronisation run
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub prefixes: Vec<String>,
    pub reconciled: Vec<ReconciledGroup>,
    /// Groups left untouched because their membership could not be read
    pub skipped: Vec<String>,
}

impl SyncReport {
    /// Number of groups created or with changed membership
    pub fn changed(&self) -> usize {
        self.reconciled.iter().filter(|g| !g.change.is_noop()).count()
    }

    pub fn is_noop(&self) -> bool {
        self.changed() == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} groups reconciled ({} changed), {} skipped, prefixes {:?}",
            self.reconciled.len(),
            self.changed(),
            self.skipped.len(),
            self.prefixes
        )
    }
}

pub struct GroupSyncEngine {
    directory: Arc<dyn Directory>,
    accounts: Arc<dyn AccountStore>,
}

impl GroupSyncEngine {
    pub fn new(directory: Arc<dyn Directory>, accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            directory,
            accounts,
        }
    }

    /// Reconcile local groups with the directory groups matching `prefix`.
    ///
    /// Failing to resolve the host role or to read one group's members is logged
    /// and skipped. Listing the groups or writing a local group aborts the run.
    pub async fn sync(&self, prefix: &str) -> Result<SyncReport> {
        let role = match self.directory.host_role().await {
            Ok(role) => role,
            Err(e) => {
                warn!("Failed to resolve host role (continuing): {}", e);
                None
            }
        };

        let prefixes = group_prefixes(prefix, role.as_deref());
        let groups = self.directory.list_groups(&prefixes).await?;
        info!("Syncing {} groups matching {:?}", groups.len(), prefixes);

        let mut report = SyncReport {
            prefixes,
            ..Default::default()
        };

        for group in groups {
            if let Err(e) = validate_name("group", &group.group_name) {
                warn!("Skipping group (continuing): {}", e);
                report.skipped.push(group.group_name);
                continue;
            }

            let members = match self.directory.group_members(&group).await {
                Ok(members) => members,
                Err(e) => {
                    warn!(
                        "Failed to get members of group {} (continuing): {}",
                        group.group_name, e
                    );
                    report.skipped.push(group.group_name);
                    continue;
                }
            };

            let members = members.into_iter().filter(|m| match validate_name("user", m) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Leaving member out of {}: {}", group.group_name, e);
                    false
                }
            });

            let desired = LocalGroup::from_directory(&group, members);
            let change = self.accounts.ensure_group(&desired).await?;
            debug!("Group {} (gid {}): {:?}", desired.name, desired.gid, change);

            report.reconciled.push(ReconciledGroup {
                name: desired.name,
                gid: desired.gid,
                change,
            });
        }

        info!("Group sync finished: {}", report.summary());
        Ok(report)
    }
}
