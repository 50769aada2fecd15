//! install command - wire the bridge into sshd, PAM and cron
//!
//! Every edit is idempotent: running `install` again rewrites the same lines
//! in place and leaves files that are already correct untouched.

use super::CommandContext;
use anyhow::{Context, Result};
use bridge_core::NAME;
use colored::Colorize;
use std::fs;
use std::io;
use std::path::Path;

pub async fn execute(ctx: &CommandContext, user: Option<String>) -> Result<()> {
    let install = &ctx.config.install;
    let user = user.unwrap_or_else(|| install.command_user.clone());

    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    let exe = exe.display().to_string();

    println!("{}", format!("Installing {}", exe).bold());

    let accounts = ctx.accounts();
    if accounts.user_exists(&user).await? {
        status(&format!("command user {}", user), false);
    } else {
        accounts
            .create_service_user(&user)
            .await
            .with_context(|| format!("Failed to create command user {}", user))?;
        status(&format!("command user {}", user), true);
    }

    let directives = sshd_directives(&exe, &user);
    let changed = update_file(&install.sshd_config, false, |content| {
        set_sshd_directives(content, &directives)
    })?;
    status(&install.sshd_config.display().to_string(), changed);

    let hook = pam_hook(&exe);
    let changed = update_file(&install.pam_sshd, false, |content| add_pam_hook(content, &hook))?;
    status(&install.pam_sshd.display().to_string(), changed);

    let entry = cron_entry(&install.sync_schedule, &exe);
    let changed = update_file(&install.cron_file, true, |_| entry.clone())?;
    status(&install.cron_file.display().to_string(), changed);

    println!();
    println!(
        "{} must be owned by root and not writable by other users.",
        exe.cyan()
    );
    println!("Restart sshd for the changes to take effect.");

    Ok(())
}

fn status(what: &str, changed: bool) {
    if changed {
        println!("  {} {}", "updated".green(), what);
    } else {
        println!("  {} {}", "unchanged".dimmed(), what);
    }
}

fn sshd_directives(exe: &str, user: &str) -> Vec<(&'static str, String)> {
    vec![
        ("AuthorizedKeysCommand", format!("{} authorized_keys %u", exe)),
        ("AuthorizedKeysCommandUser", user.to_string()),
        ("UsePAM", "yes".to_string()),
        ("ChallengeResponseAuthentication", "yes".to_string()),
    ]
}

fn pam_hook(exe: &str) -> String {
    format!("auth requisite pam_exec.so stdout {} pam_create_user", exe)
}

fn cron_entry(schedule: &str, exe: &str) -> String {
    format!(
        "# Installed by {}: mirror IAM groups onto local groups\n{} root {} sync_groups\n",
        NAME, schedule, exe
    )
}

/// Set each directive in the global section of an sshd_config.
///
/// The first global occurrence of a keyword is rewritten and later ones are
/// dropped. Keywords that do not appear are added before the first `Match`
/// block, since anything after it would only apply to that block.
fn set_sshd_directives(content: &str, directives: &[(&str, String)]) -> String {
    let mut lines = Vec::new();
    let mut written = vec![false; directives.len()];
    let mut in_match = false;

    for line in content.lines() {
        let keyword = sshd_keyword(line);

        if !in_match && keyword.is_some_and(|k| k.eq_ignore_ascii_case("Match")) {
            push_missing(&mut lines, directives, &mut written);
            in_match = true;
        }

        if !in_match {
            let found = keyword.and_then(|k| {
                directives
                    .iter()
                    .position(|(name, _)| name.eq_ignore_ascii_case(k))
            });
            if let Some(i) = found {
                if !written[i] {
                    lines.push(format!("{} {}", directives[i].0, directives[i].1));
                    written[i] = true;
                }
                continue;
            }
        }

        lines.push(line.to_string());
    }
    push_missing(&mut lines, directives, &mut written);

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn push_missing(lines: &mut Vec<String>, directives: &[(&str, String)], written: &mut [bool]) {
    for (i, (name, value)) in directives.iter().enumerate() {
        if !written[i] {
            lines.push(format!("{} {}", name, value));
            written[i] = true;
        }
    }
}

fn sshd_keyword(line: &str) -> Option<&str> {
    let line = line.trim_start();
    if line.starts_with('#') {
        return None;
    }
    line.split(|c: char| c.is_whitespace() || c == '=')
        .next()
        .filter(|k| !k.is_empty())
}

/// Put `hook` first in the PAM stack, replacing a hook from an earlier install
fn add_pam_hook(content: &str, hook: &str) -> String {
    let mut lines: Vec<String> = content
        .lines()
        .filter(|line| !is_pam_hook(line))
        .map(str::to_string)
        .collect();

    // Leading comments such as `#%PAM-1.0` stay on top
    let at = lines
        .iter()
        .position(|line| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .unwrap_or(lines.len());
    lines.insert(at, hook.to_string());

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn is_pam_hook(line: &str) -> bool {
    let line = line.trim();
    !line.starts_with('#') && line.contains("pam_exec.so") && line.ends_with("pam_create_user")
}

/// Apply `edit` to the file at `path` and write the result when it differs.
///
/// The new content goes to a sibling temp file that replaces the original,
/// keeping its permissions. Returns whether the file changed.
fn update_file(path: &Path, create: bool, edit: impl FnOnce(&str) -> String) -> Result<bool> {
    let current = match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if create && e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    let updated = edit(current.as_deref().unwrap_or_default());
    if current.as_deref() == Some(updated.as_str()) {
        return Ok(false);
    }

    let tmp = path.with_extension("bridge-tmp");
    fs::write(&tmp, &updated).with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(&tmp, meta.permissions())
            .with_context(|| format!("Failed to set permissions on {}", tmp.display()))?;
    }
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(true)
}
