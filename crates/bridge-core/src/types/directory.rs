//! Records read from the identity directory

/// A user as known to the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub user_name: String,
    /// Stable identifier assigned by the directory
    pub user_id: String,
    /// Ownership tag, stored in the local account comment
    pub arn: String,
}

/// A group as listed by the directory, before its membership is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryGroup {
    pub group_name: String,
    /// Stable identifier assigned by the directory
    pub group_id: String,
}

impl DirectoryGroup {
    pub fn new(group_name: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            group_id: group_id.into(),
        }
    }

    /// True when the group name starts with any of the prefixes
    pub fn matches_any(&self, prefixes: &[String]) -> bool {
        prefixes.iter().any(|p| self.group_name.starts_with(p.as_str()))
    }
}

/// Status of an uploaded SSH public key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Active,
    Inactive,
}

/// Metadata of an SSH public key registered for a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshPublicKey {
    pub user_name: String,
    pub key_id: String,
    pub status: KeyStatus,
}

impl SshPublicKey {
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }
}
