//! sync_groups command - mirror prefixed IAM groups onto local groups

use super::CommandContext;
use anyhow::{Context, Result};
use bridge_core::config::validate_group_prefix;
use bridge_sync::GroupSyncEngine;

pub async fn execute(ctx: &CommandContext, prefix: Option<String>) -> Result<()> {
    let prefix = prefix.unwrap_or_else(|| ctx.config.group_prefix.clone());
    validate_group_prefix(&prefix)?;

    let engine = GroupSyncEngine::new(ctx.directory().await, ctx.accounts());
    let report = engine
        .sync(&prefix)
        .await
        .with_context(|| format!("Failed to sync groups matching {}", prefix))?;

    // cron mails any output
    if !report.is_noop() {
        eprintln!("{}", report.summary());
    }

    Ok(())
}
