//! ssh-iam-bridge core library
//!
//! Shared types, configuration, errors and the identifier mapping used by the
//! directory, account and sync crates.

pub mod config;
pub mod error;
pub mod idmap;
pub mod types;

pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use idmap::derive_local_id;

/// Program name, used as a prefix for user-facing messages
pub const NAME: &str = "ssh-iam-bridge";

/// ssh-iam-bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default prefix of directory groups mirrored onto the host
pub const DEFAULT_GROUP_PREFIX: &str = "system-";

/// Exit status telling PAM the attempt failed but a retry is expected to succeed
pub const EX_TEMPFAIL: u8 = 75;

/// Exit status telling PAM to reject the attempt
pub const EX_NOPERM: u8 = 77;
