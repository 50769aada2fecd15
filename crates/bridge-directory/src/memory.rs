//! In-memory directory
//!
//! Holds users, groups and keys in process and records every request made
//! against it. Individual lookups can be made to fail.

use crate::Directory;
use async_trait::async_trait;
use bridge_core::types::{DirectoryGroup, DirectoryUser, KeyStatus, SshPublicKey};
use bridge_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
    calls: Mutex<Vec<String>>,
}

#[derive(Default)]
struct State {
    role: Option<String>,
    role_fails: bool,
    users: BTreeMap<String, DirectoryUser>,
    user_lookup_fails: bool,
    groups: Vec<(DirectoryGroup, Vec<String>)>,
    failing_groups: HashSet<String>,
    keys: BTreeMap<String, Vec<(SshPublicKey, String)>>,
    failing_keys: HashSet<String>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_name: &str, user_id: &str) -> DirectoryUser {
        let user = DirectoryUser {
            user_name: user_name.to_string(),
            user_id: user_id.to_string(),
            arn: format!("arn:aws:iam::123456789012:user/{}", user_name),
        };
        self.state
            .lock()
            .users
            .insert(user_name.to_string(), user.clone());
        user
    }

    /// Add a group, or replace the members of an existing one
    pub fn set_group(&self, group_name: &str, group_id: &str, members: &[&str]) -> DirectoryGroup {
        let group = DirectoryGroup::new(group_name, group_id);
        let members: Vec<String> = members.iter().map(|m| m.to_string()).collect();

        let mut state = self.state.lock();
        match state.groups.iter_mut().find(|(g, _)| g.group_name == group_name) {
            Some(entry) => *entry = (group.clone(), members),
            None => state.groups.push((group.clone(), members)),
        }
        group
    }

    pub fn add_key(&self, user_name: &str, key_id: &str, status: KeyStatus, body: &str) {
        let key = SshPublicKey {
            user_name: user_name.to_string(),
            key_id: key_id.to_string(),
            status,
        };
        self.state
            .lock()
            .keys
            .entry(user_name.to_string())
            .or_default()
            .push((key, body.to_string()));
    }

    pub fn set_role(&self, role: Option<&str>) {
        self.state.lock().role = role.map(str::to_string);
    }

    pub fn fail_role_lookup(&self) {
        self.state.lock().role_fails = true;
    }

    pub fn fail_user_lookup(&self) {
        self.state.lock().user_lookup_fails = true;
    }

    pub fn fail_members_of(&self, group_name: &str) {
        self.state.lock().failing_groups.insert(group_name.to_string());
    }

    pub fn fail_key_body(&self, key_id: &str) {
        self.state.lock().failing_keys.insert(key_id.to_string());
    }

    /// Requests received so far, as `Operation(target)`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, operation: &str, target: &str) {
        self.calls.lock().push(format!("{}({})", operation, target));
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn host_role(&self) -> Result<Option<String>> {
        self.record("GetInstanceRole", "");
        let state = self.state.lock();
        if state.role_fails {
            return Err(Error::directory("GetInstanceRole", "instance metadata", "unreachable"));
        }
        Ok(state.role.clone())
    }

    async fn list_groups(&self, prefixes: &[String]) -> Result<Vec<DirectoryGroup>> {
        self.record("ListGroups", &prefixes.join(","));
        Ok(self
            .state
            .lock()
            .groups
            .iter()
            .map(|(g, _)| g.clone())
            .filter(|g| g.matches_any(prefixes))
            .collect())
    }

    async fn group_members(&self, group: &DirectoryGroup) -> Result<Vec<String>> {
        self.record("GetGroup", &group.group_name);
        let state = self.state.lock();
        if state.failing_groups.contains(&group.group_name) {
            return Err(Error::directory("GetGroup", &group.group_name, "access denied"));
        }
        state
            .groups
            .iter()
            .find(|(g, _)| g.group_name == group.group_name)
            .map(|(_, members)| members.clone())
            .ok_or_else(|| Error::directory("GetGroup", &group.group_name, "no such group"))
    }

    async fn find_user(&self, username: &str) -> Result<Option<DirectoryUser>> {
        self.record("GetUser", username);
        let state = self.state.lock();
        if state.user_lookup_fails {
            return Err(Error::directory("GetUser", username, "throttled"));
        }
        Ok(state.users.get(username).cloned())
    }

    async fn ssh_public_keys(&self, username: &str) -> Result<Vec<SshPublicKey>> {
        self.record("ListSSHPublicKeys", username);
        Ok(self
            .state
            .lock()
            .keys
            .get(username)
            .map(|keys| keys.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default())
    }

    async fn ssh_public_key_body(&self, username: &str, key_id: &str) -> Result<String> {
        self.record("GetSSHPublicKey", key_id);
        let state = self.state.lock();
        if state.failing_keys.contains(key_id) {
            return Err(Error::directory("GetSSHPublicKey", key_id, "internal failure"));
        }
        state
            .keys
            .get(username)
            .and_then(|keys| keys.iter().find(|(k, _)| k.key_id == key_id))
            .map(|(_, body)| body.clone())
            .ok_or_else(|| Error::directory("GetSSHPublicKey", key_id, "no such key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_group_listing_by_prefix() {
        let dir = MemoryDirectory::new();
        dir.set_group("system-admins", "AGPA1", &["alice"]);
        dir.set_group("system-web-deploy", "AGPA2", &["bob"]);
        dir.set_group("finance", "AGPA3", &["carol"]);

        let groups = dir.list_groups(&["system-".to_string()]).await.unwrap();
        let names: Vec<_> = groups.iter().map(|g| g.group_name.as_str()).collect();
        assert_eq!(names, vec!["system-admins", "system-web-deploy"]);

        // Replacing members keeps the group's position
        dir.set_group("system-admins", "AGPA1", &["alice", "dave"]);
        let members = dir.group_members(&groups[0]).await.unwrap();
        assert_eq!(members, vec!["alice", "dave"]);
    }

    #[tokio::test]
    async fn test_failure_injection_and_call_log() {
        let dir = MemoryDirectory::new();
        let group = dir.set_group("system-admins", "AGPA1", &["alice"]);
        dir.fail_members_of("system-admins");
        dir.fail_role_lookup();

        assert!(dir.group_members(&group).await.is_err());
        assert!(dir.host_role().await.is_err());
        assert_eq!(dir.find_user("nobody").await.unwrap(), None);

        assert_eq!(
            dir.calls(),
            vec!["GetGroup(system-admins)", "GetInstanceRole()", "GetUser(nobody)"]
        );
        dir.clear_calls();
        assert!(dir.calls().is_empty());
    }
}
