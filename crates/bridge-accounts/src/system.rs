//! Host accounts through shadow-utils
//!
//! Users are looked up with `getent` and created with `useradd`. Groups are
//! created with `groupadd`; their member lists are rewritten in the group file
//! directly because `gpasswd -M` rejects members without a local account, and
//! directory users only get one on their first login.
//!
//! Each command that writes the group file runs under [`AccountLock::group_file`],
//! so a member rewrite never replaces the file with a snapshot that predates
//! another bridge process's change.

use crate::{AccountLock, AccountStore};
use async_trait::async_trait;
use bridge_core::config::AccountsConfig;
use bridge_core::types::{validate_name, GroupChange, LocalAccount, LocalGroup};
use bridge_core::{Error, Result};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

const DEFAULT_GROUP_FILE: &str = "/etc/group";
const NOLOGIN_SHELL: &str = "/usr/sbin/nologin";

pub struct SystemAccounts {
    shell: String,
    create_home: bool,
    group_file: PathBuf,
    lock_dir: PathBuf,
}

impl SystemAccounts {
    pub fn new(config: &AccountsConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            create_home: config.create_home,
            group_file: PathBuf::from(DEFAULT_GROUP_FILE),
            lock_dir: config.lock_dir.clone(),
        }
    }

    pub fn with_group_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.group_file = path.into();
        self
    }

    fn useradd_args(&self, account: &LocalAccount) -> Vec<String> {
        let mut args = vec![
            "--uid".to_string(),
            account.uid.to_string(),
            "--comment".to_string(),
            account.comment.clone(),
            "--shell".to_string(),
            self.shell.clone(),
            "--user-group".to_string(),
        ];
        if self.create_home {
            args.push("--create-home".to_string());
        }
        args.push(account.username.clone());
        args
    }
}

#[async_trait]
impl AccountStore for SystemAccounts {
    async fn user_exists(&self, username: &str) -> Result<bool> {
        validate_name("user", username)?;

        let output = Command::new("getent")
            .arg("passwd")
            .arg(username)
            .output()
            .await
            .map_err(|e| Error::account("getent", username, e))?;

        // getent exits with 2 when the key is not found
        match output.status.code() {
            Some(0) => Ok(true),
            Some(2) => Ok(false),
            _ => Err(Error::account(
                "getent",
                username,
                format!("getent passwd exited with {}", output.status),
            )),
        }
    }

    async fn create_user(&self, account: &LocalAccount) -> Result<()> {
        validate_name("user", &account.username)?;

        // --user-group adds a line to the group file
        let _lock = AccountLock::group_file(&self.lock_dir).await?;
        run("useradd", &account.username, &self.useradd_args(account)).await?;
        info!("Created user {} with uid {}", account.username, account.uid);
        Ok(())
    }

    async fn create_service_user(&self, username: &str) -> Result<()> {
        validate_name("user", username)?;

        let args = [
            "--system",
            "--no-create-home",
            "--shell",
            NOLOGIN_SHELL,
            username,
        ]
        .map(String::from);

        let _lock = AccountLock::group_file(&self.lock_dir).await?;
        run("useradd", username, &args).await?;
        info!("Created service user {}", username);
        Ok(())
    }

    async fn find_group(&self, name: &str) -> Result<Option<LocalGroup>> {
        validate_name("group", name)?;

        let content = read_group_file(&self.group_file, name).await?;
        for line in content.lines() {
            match parse_group_line(line) {
                Ok(Some(group)) if group.name == name => return Ok(Some(group)),
                Ok(_) => {}
                Err(e) => warn!("Skipping entry in {}: {}", self.group_file.display(), e),
            }
        }

        Ok(None)
    }

    async fn ensure_group(&self, group: &LocalGroup) -> Result<GroupChange> {
        validate_name("group", &group.name)?;
        for member in &group.members {
            validate_name("user", member)?;
        }

        let mut change = GroupChange::default();

        // Held from reading the current entry until the rewritten file is in place
        let _lock = AccountLock::group_file(&self.lock_dir).await?;

        let current = match self.find_group(&group.name).await? {
            Some(current) => {
                if current.gid != group.gid {
                    warn!(
                        "Group {} has gid {}, expected {}; keeping the existing gid",
                        group.name, current.gid, group.gid
                    );
                }
                current
            }
            None => {
                let args = ["--gid".to_string(), group.gid.to_string(), group.name.clone()];
                run("groupadd", &group.name, &args).await?;
                info!("Created group {} with gid {}", group.name, group.gid);
                change.created = true;
                LocalGroup::new(&group.name, group.gid)
            }
        };

        let (added, removed) = current.membership_delta(group);
        if !added.is_empty() || !removed.is_empty() {
            rewrite_members(&self.group_file, &group.name, &group.members).await?;
            debug!(
                "Group {}: added {:?}, removed {:?}",
                group.name, added, removed
            );
        }

        change.added = added;
        change.removed = removed;
        Ok(change)
    }
}

/// Run a shadow-utils command, failing with its stderr on a non-zero exit
async fn run(program: &'static str, target: &str, args: &[String]) -> Result<()> {
    debug!("Running {} {:?}", program, args);

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::account(program, target, format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(Error::account(
            program,
            target,
            format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    Ok(())
}

async fn read_group_file(path: &Path, target: &str) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map_err(|e| Error::account("read group file", target, format!("{}: {}", path.display(), e)))
}

/// Parse a `name:password:gid:member,member` line. Comments and blank lines yield `None`.
fn parse_group_line(line: &str) -> std::result::Result<Option<LocalGroup>, String> {
    let line = line.trim_end();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 4 {
        return Err(format!("malformed group entry {:?}", line));
    }

    let gid = fields[2]
        .parse()
        .map_err(|_| format!("invalid gid in group entry {:?}", line))?;

    let members: BTreeSet<String> = fields[3]
        .split(',')
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect();

    Ok(Some(LocalGroup {
        name: fields[0].to_string(),
        gid,
        members,
    }))
}

/// Replace the member field of group `name` in the group file.
///
/// The new content is written to a fresh temp file next to the group file and
/// renamed over it, so readers never see a partially written file. Callers hold
/// the group file lock.
async fn rewrite_members(path: &Path, name: &str, members: &BTreeSet<String>) -> Result<()> {
    let content = read_group_file(path, name).await?;
    let rewritten = replace_members(&content, name, members).ok_or_else(|| {
        Error::account(
            "rewrite group members",
            name,
            format!("no entry in {}", path.display()),
        )
    })?;

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || replace_file(&target, &rewritten))
        .await
        .map_err(|e| Error::Other(e.into()))?
        .map_err(|e| {
            Error::account(
                "rewrite group members",
                name,
                format!("{}: {}", path.display(), e),
            )
        })
}

/// Group file content with the member field of `name` set to `members`,
/// `None` when the file has no entry for `name`
fn replace_members(content: &str, name: &str, members: &BTreeSet<String>) -> Option<String> {
    let member_list = members.iter().cloned().collect::<Vec<_>>().join(",");

    let mut found = false;
    let mut rewritten = String::with_capacity(content.len() + member_list.len());
    for line in content.lines() {
        let mut fields: Vec<&str> = line.split(':').collect();
        if fields.len() == 4 && fields[0] == name {
            fields[3] = &member_list;
            rewritten.push_str(&fields.join(":"));
            found = true;
        } else {
            rewritten.push_str(line);
        }
        rewritten.push('\n');
    }

    found.then_some(rewritten)
}

fn replace_file(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let permissions = std::fs::metadata(path)?.permissions();

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const GROUP_FILE: &str = "root:x:0:\n\
                              # managed by ssh-iam-bridge\n\
                              wheel:x:10:admin\n\
                              system-admins:x:17312:alice,bob\n\
                              system-web-deploy:x:22116:\n";

    fn group_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), GROUP_FILE).unwrap();
        file
    }

    fn accounts(file: &tempfile::NamedTempFile, locks: &tempfile::TempDir) -> SystemAccounts {
        let config = AccountsConfig {
            lock_dir: locks.path().to_path_buf(),
            ..Default::default()
        };
        SystemAccounts::new(&config).with_group_file(file.path())
    }

    #[test]
    fn test_parse_group_line() {
        let group = parse_group_line("system-admins:x:17312:alice,bob").unwrap().unwrap();
        assert_eq!(group.name, "system-admins");
        assert_eq!(group.gid, 17312);
        assert_eq!(group.members.len(), 2);
        assert!(group.members.contains("bob"));

        let empty = parse_group_line("wheel:x:10:").unwrap().unwrap();
        assert!(empty.members.is_empty());

        assert!(parse_group_line("# comment").unwrap().is_none());
        assert!(parse_group_line("").unwrap().is_none());
        assert!(parse_group_line("broken:x:10").is_err());
        assert!(parse_group_line("broken:x:abc:").is_err());
    }

    #[test]
    fn test_useradd_args() {
        let accounts = SystemAccounts::new(&AccountsConfig::default());
        let account = LocalAccount {
            username: "alice".into(),
            uid: 17312,
            comment: "arn:aws:iam::123456789012:user/alice".into(),
        };

        let args = accounts.useradd_args(&account);
        assert_eq!(args[..2], ["--uid", "17312"]);
        assert!(args.contains(&"--create-home".to_string()));
        assert!(args.contains(&"arn:aws:iam::123456789012:user/alice".to_string()));
        assert_eq!(args.last().unwrap(), "alice");

        let config = AccountsConfig {
            create_home: false,
            ..Default::default()
        };
        let args = SystemAccounts::new(&config).useradd_args(&account);
        assert!(!args.contains(&"--create-home".to_string()));
    }

    #[tokio::test]
    async fn test_find_group() {
        let file = group_file();
        let locks = tempfile::tempdir().unwrap();
        let accounts = accounts(&file, &locks);

        let group = accounts.find_group("system-admins").await.unwrap().unwrap();
        assert_eq!(group.gid, 17312);
        assert_eq!(group.members.iter().collect::<Vec<_>>(), vec!["alice", "bob"]);

        assert!(accounts.find_group("system").await.unwrap().is_none());
        assert!(accounts.find_group("bad:name").await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_existing_group_replaces_members() {
        let file = group_file();
        let locks = tempfile::tempdir().unwrap();
        let accounts = accounts(&file, &locks);

        let desired = LocalGroup::new("system-admins", 17312).with_members(["bob", "carol"]);
        let change = accounts.ensure_group(&desired).await.unwrap();

        assert!(!change.created);
        assert_eq!(change.added, vec!["carol"]);
        assert_eq!(change.removed, vec!["alice"]);

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains("system-admins:x:17312:bob,carol\n"));
        assert!(content.contains("wheel:x:10:admin\n"));
        assert!(content.contains("# managed by ssh-iam-bridge\n"));

        // Second run finds nothing to change
        let change = accounts.ensure_group(&desired).await.unwrap();
        assert!(change.is_noop());
    }

    #[tokio::test]
    async fn test_ensure_group_can_empty_members() {
        let file = group_file();
        let locks = tempfile::tempdir().unwrap();
        let accounts = accounts(&file, &locks);

        let desired = LocalGroup::new("system-admins", 17312);
        let change = accounts.ensure_group(&desired).await.unwrap();
        assert_eq!(change.removed, vec!["alice", "bob"]);

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains("system-admins:x:17312:\n"));
    }

    #[tokio::test]
    async fn test_rewrite_missing_group_fails() {
        let file = group_file();
        let members: BTreeSet<String> = ["alice".to_string()].into();
        let err = rewrite_members(file.path(), "missing", &members).await.unwrap_err();
        assert_eq!(err.code(), "AccountError");
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), GROUP_FILE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_member_updates_are_kept() {
        let file = group_file();
        let locks = tempfile::tempdir().unwrap();
        // Two stores over one group file, as when cron and a PAM login sync at once
        let first = Arc::new(accounts(&file, &locks));
        let second = Arc::new(accounts(&file, &locks));

        for round in 0..50 {
            let admins = LocalGroup::new("system-admins", 17312).with_members([format!("admin{}", round)]);
            let deploy =
                LocalGroup::new("system-web-deploy", 22116).with_members([format!("deploy{}", round)]);

            let (a, b) = (first.clone(), second.clone());
            let (ra, rb) = tokio::join!(
                tokio::spawn(async move { a.ensure_group(&admins).await }),
                tokio::spawn(async move { b.ensure_group(&deploy).await }),
            );
            ra.unwrap().unwrap();
            rb.unwrap().unwrap();

            let content = std::fs::read_to_string(file.path()).unwrap();
            assert!(
                content.contains(&format!("system-admins:x:17312:admin{}\n", round)),
                "round {}: {}",
                round,
                content
            );
            assert!(
                content.contains(&format!("system-web-deploy:x:22116:deploy{}\n", round)),
                "round {}: {}",
                round,
                content
            );
        }
    }

    #[tokio::test]
    async fn test_rewrite_error_names_group_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("group");
        let members: BTreeSet<String> = ["alice".to_string()].into();

        let err = rewrite_members(&missing, "system-admins", &members).await.unwrap_err();
        let message = err.to_string();
        assert_eq!(err.code(), "AccountError");
        assert!(message.contains("system-admins"), "{}", message);
        assert!(message.contains(&missing.display().to_string()), "{}", message);
    }

    #[test]
    fn test_replace_file_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let file = group_file();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        replace_file(file.path(), "root:x:0:\n").unwrap();
        let meta = std::fs::metadata(file.path()).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o644);
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "root:x:0:\n");
    }
}
