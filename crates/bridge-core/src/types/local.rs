//! Local operating-system accounts and groups

use crate::idmap::derive_local_id;
use crate::types::{DirectoryGroup, DirectoryUser};
use crate::{Error, Result};
use std::collections::BTreeSet;

/// A local user account created from a directory user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAccount {
    pub username: String,
    pub uid: u32,
    /// GECOS comment, carries the directory ARN
    pub comment: String,
}

impl LocalAccount {
    pub fn from_directory(user: &DirectoryUser) -> Self {
        Self {
            username: user.user_name.clone(),
            uid: derive_local_id(&user.user_id),
            comment: user.arn.clone(),
        }
    }
}

/// A local group and its member list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalGroup {
    pub name: String,
    pub gid: u32,
    pub members: BTreeSet<String>,
}

impl LocalGroup {
    pub fn new(name: impl Into<String>, gid: u32) -> Self {
        Self {
            name: name.into(),
            gid,
            members: BTreeSet::new(),
        }
    }

    /// Desired local state of a directory group
    pub fn from_directory<I, S>(group: &DirectoryGroup, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: group.group_name.clone(),
            gid: derive_local_id(&group.group_id),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members = members.into_iter().map(Into::into).collect();
        self
    }

    /// Members to add and to remove so that `self` ends up with `desired`'s members
    pub fn membership_delta(&self, desired: &LocalGroup) -> (Vec<String>, Vec<String>) {
        let added = desired.members.difference(&self.members).cloned().collect();
        let removed = self.members.difference(&desired.members).cloned().collect();
        (added, removed)
    }
}

/// What reconciling a single group changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupChange {
    pub created: bool,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl GroupChange {
    pub fn is_noop(&self) -> bool {
        !self.created && self.added.is_empty() && self.removed.is_empty()
    }
}

/// Reject names that shadow-utils would misparse or that could be taken as options.
///
/// `kind` names the thing being checked ("user", "group") in the error message.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName(format!("{} name is empty", kind)));
    }
    if name.starts_with('-') {
        return Err(Error::InvalidName(format!("{} name {:?} starts with '-'", kind, name)));
    }
    if name.len() > 64 {
        return Err(Error::InvalidName(format!("{} name {:?} is too long", kind, name)));
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || matches!(c, ':' | ',' | '/'))
    {
        return Err(Error::InvalidName(format!(
            "{} name {:?} contains {:?}",
            kind, name, c
        )));
    }
    Ok(())
}
