//! pam_create_user command - provision the PAM user on first login
//!
//! Run by `pam_exec` with the user in `PAM_USER`. The exit status is the
//! whole answer to PAM: 75 when the account was just created and the user
//! should reconnect, 77 otherwise.

use super::CommandContext;
use bridge_sync::{exit_code, ProvisionFlow, ProvisionOutcome};

pub async fn execute(ctx: &CommandContext, user: Option<&str>) -> u8 {
    let flow = ProvisionFlow::from_config(ctx.directory().await, ctx.accounts(), &ctx.config);
    let result = flow.run(user).await;

    match &result {
        // pam_exec's `stdout` option relays this to the connecting client
        Ok(outcome @ ProvisionOutcome::Created { .. }) => {
            if let Some(message) = outcome.message() {
                println!("{}", message);
            }
        }
        Ok(outcome @ ProvisionOutcome::MissingUser) => {
            if let Some(message) = outcome.message() {
                ctx.error(&message);
            }
        }
        Ok(ProvisionOutcome::AlreadyProvisioned) => {}
        Err(e) => ctx.error(&e.to_string()),
    }

    exit_code(&result)
}
