//! ssh-iam-bridge - SSH logins backed by AWS IAM
//!
//! sshd calls `authorized_keys` as its AuthorizedKeysCommand and
//! `pam_create_user` from the PAM auth stack; cron calls `sync_groups`.

mod commands;

use bridge_core::{BridgeConfig, EX_NOPERM, NAME};
use clap::{Parser, Subcommand};
use commands::CommandContext;
use std::ffi::OsString;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ssh-iam-bridge")]
#[command(version = bridge_core::VERSION)]
#[command(about = "Authenticate SSH users and provision local accounts from AWS IAM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SSH_IAM_BRIDGE_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install this program to authenticate SSH connections and create users
    Install {
        /// The user under which to run the AuthorizedKeysCommand, will be created if it doesn't exist
        user: Option<String>,
    },

    /// Get the authorized_keys from IAM for user
    #[command(name = "authorized_keys")]
    AuthorizedKeys {
        /// The IAM username for which to get keys
        user: String,
    },

    /// Sync the IAM groups with the local system groups
    #[command(name = "sync_groups")]
    SyncGroups {
        /// Group name prefix, overriding the configured one
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Create a user from the env during the sshd pam phase
    #[command(name = "pam_create_user")]
    PamCreateUser {
        /// User to provision
        #[arg(long, env = "PAM_USER")]
        user: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match parse_cli(std::env::args_os()) {
        Ok(cli) => cli,
        Err(code) => return ExitCode::from(code),
    };

    // PAM only understands the documented exit statuses
    let failure = if matches!(cli.command, Commands::PamCreateUser { .. }) {
        ExitCode::from(EX_NOPERM)
    } else {
        ExitCode::FAILURE
    };

    let mut config = match BridgeConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", NAME, e);
            return failure;
        }
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging.level);
    debug!("{} {} using group prefix {}", NAME, bridge_core::VERSION, config.group_prefix);

    let ctx = CommandContext::new(config);

    let result = match cli.command {
        Commands::PamCreateUser { user } => {
            return ExitCode::from(commands::pam_create_user::execute(&ctx, user.as_deref()).await);
        }
        Commands::Install { user } => commands::install::execute(&ctx, user).await,
        Commands::AuthorizedKeys { user } => commands::authorized_keys::execute(&ctx, &user).await,
        Commands::SyncGroups { prefix } => commands::sync_groups::execute(&ctx, prefix).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ctx.error(&format!("{:#}", e));
            failure
        }
    }
}

/// Parse the command line, mapping a failure to the exit status to use.
///
/// Under PAM any status other than 75 or 77 is misread, so a bad
/// `pam_create_user` invocation (an unknown flag, a non-UTF-8 `PAM_USER`)
/// rejects the attempt with 77 instead of clap's usage status.
fn parse_cli<I, T>(args: I) -> Result<Cli, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();

    Cli::try_parse_from(&args).map_err(|e| {
        let _ = e.print();
        if !e.use_stderr() {
            // --help and --version
            0
        } else if args.iter().skip(1).any(|a| a == "pam_create_user") {
            EX_NOPERM
        } else {
            u8::try_from(e.exit_code()).unwrap_or(1)
        }
    })
}

/// Logs go to stderr; stdout carries key material and messages for the user
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
