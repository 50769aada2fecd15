//! In-memory account store

use crate::AccountStore;
use async_trait::async_trait;
use bridge_core::types::{validate_name, GroupChange, LocalAccount, LocalGroup};
use bridge_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

#[derive(Default)]
pub struct MemoryAccounts {
    state: Mutex<State>,
    mutations: Mutex<Vec<String>>,
}

#[derive(Default)]
struct State {
    users: BTreeMap<String, LocalAccount>,
    service_users: HashSet<String>,
    groups: BTreeMap<String, LocalGroup>,
    user_creation_fails: bool,
    failing_groups: HashSet<String>,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing account without recording a mutation
    pub fn insert_user(&self, account: LocalAccount) {
        self.state
            .lock()
            .users
            .insert(account.username.clone(), account);
    }

    /// Seed an existing group without recording a mutation
    pub fn insert_group(&self, group: LocalGroup) {
        self.state.lock().groups.insert(group.name.clone(), group);
    }

    pub fn user(&self, username: &str) -> Option<LocalAccount> {
        self.state.lock().users.get(username).cloned()
    }

    pub fn group(&self, name: &str) -> Option<LocalGroup> {
        self.state.lock().groups.get(name).cloned()
    }

    pub fn fail_user_creation(&self) {
        self.state.lock().user_creation_fails = true;
    }

    pub fn fail_group_writes(&self, name: &str) {
        self.state.lock().failing_groups.insert(name.to_string());
    }

    /// Changes applied so far, as `operation(target)`
    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().clone()
    }

    fn record(&self, operation: &str, target: &str) {
        self.mutations
            .lock()
            .push(format!("{}({})", operation, target));
    }
}

#[async_trait]
impl AccountStore for MemoryAccounts {
    async fn user_exists(&self, username: &str) -> Result<bool> {
        validate_name("user", username)?;
        let state = self.state.lock();
        Ok(state.users.contains_key(username) || state.service_users.contains(username))
    }

    async fn create_user(&self, account: &LocalAccount) -> Result<()> {
        validate_name("user", &account.username)?;
        {
            let mut state = self.state.lock();
            if state.user_creation_fails {
                return Err(Error::account("useradd", &account.username, "useradd exited with 1"));
            }
            if state.users.contains_key(&account.username) {
                return Err(Error::account(
                    "useradd",
                    &account.username,
                    "user already exists",
                ));
            }
            state
                .users
                .insert(account.username.clone(), account.clone());
        }
        self.record("useradd", &account.username);
        Ok(())
    }

    async fn create_service_user(&self, username: &str) -> Result<()> {
        validate_name("user", username)?;
        self.state.lock().service_users.insert(username.to_string());
        self.record("useradd --system", username);
        Ok(())
    }

    async fn find_group(&self, name: &str) -> Result<Option<LocalGroup>> {
        validate_name("group", name)?;
        Ok(self.group(name))
    }

    async fn ensure_group(&self, group: &LocalGroup) -> Result<GroupChange> {
        validate_name("group", &group.name)?;

        let mut change = GroupChange::default();
        {
            let mut state = self.state.lock();
            if state.failing_groups.contains(&group.name) {
                return Err(Error::account("groupadd", &group.name, "group file is locked"));
            }

            let current = state
                .groups
                .entry(group.name.clone())
                .or_insert_with(|| {
                    change.created = true;
                    LocalGroup::new(&group.name, group.gid)
                });

            let (added, removed) = current.membership_delta(group);
            current.members = group.members.clone();
            change.added = added;
            change.removed = removed;
        }

        if change.created {
            self.record("groupadd", &group.name);
        }
        if !change.added.is_empty() || !change.removed.is_empty() {
            self.record("set members", &group.name);
        }
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_group_lifecycle() {
        let accounts = MemoryAccounts::new();

        let desired = LocalGroup::new("system-admins", 2100).with_members(["alice"]);
        let change = accounts.ensure_group(&desired).await.unwrap();
        assert!(change.created);
        assert_eq!(change.added, vec!["alice"]);

        let change = accounts.ensure_group(&desired).await.unwrap();
        assert!(change.is_noop());

        assert_eq!(
            accounts.mutations(),
            vec!["groupadd(system-admins)", "set members(system-admins)"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let accounts = MemoryAccounts::new();
        let account = LocalAccount {
            username: "alice".into(),
            uid: 17312,
            comment: String::new(),
        };

        accounts.create_user(&account).await.unwrap();
        assert!(accounts.user_exists("alice").await.unwrap());
        assert!(accounts.create_user(&account).await.is_err());
    }

    #[tokio::test]
    async fn test_service_user_exists() {
        let accounts = MemoryAccounts::new();
        accounts.create_service_user("ssh-iam-bridge").await.unwrap();

        assert!(accounts.user_exists("ssh-iam-bridge").await.unwrap());
        assert_eq!(accounts.mutations(), vec!["useradd --system(ssh-iam-bridge)"]);
    }
}
