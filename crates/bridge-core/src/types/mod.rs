//! Type definitions for ssh-iam-bridge

mod directory;
mod local;

pub use directory::*;
pub use local::*;
