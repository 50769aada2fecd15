//! authorized_keys command - print a user's active IAM SSH keys for sshd

use super::CommandContext;
use anyhow::{Context, Result};
use bridge_directory::authorized_keys;
use tokio::io::{stdout, AsyncWriteExt};

pub async fn execute(ctx: &CommandContext, user: &str) -> Result<()> {
    let directory = ctx.directory().await;

    let keys = authorized_keys(directory.as_ref(), user)
        .await
        .with_context(|| format!("Failed to get authorized keys for {}", user))?;

    let mut stdout = stdout();
    stdout.write_all(keys.as_bytes()).await?;
    stdout.flush().await?;

    Ok(())
}
