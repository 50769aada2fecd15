//! authorized_keys rendering for sshd's AuthorizedKeysCommand

use crate::Directory;
use bridge_core::Result;
use std::fmt::Write;
use tracing::debug;

/// Render the active SSH keys of `username` in authorized_keys format.
///
/// Each key becomes a `# Key id: <id>` comment followed by the key line, in the
/// order the directory lists them. Inactive keys are skipped. Any failed lookup
/// fails the whole call so that sshd never sees a truncated key list.
pub async fn authorized_keys(directory: &dyn Directory, username: &str) -> Result<String> {
    let keys = directory.ssh_public_keys(username).await?;
    let active: Vec<_> = keys.iter().filter(|k| k.is_active()).collect();

    let mut out = String::new();
    for key in &active {
        let body = directory
            .ssh_public_key_body(&key.user_name, &key.key_id)
            .await?;

        // Writing to a String cannot fail
        let _ = writeln!(out, "# Key id: {}", key.key_id);
        let _ = writeln!(out, "{}", body.trim_end());
    }

    debug!("Rendered {} of {} keys for {}", active.len(), keys.len(), username);
    Ok(out)
}
