//! Shared types for the JetBrains token keeper

mod clock;
mod error;

pub use clock::{describe_expiry, now_secs};
pub use error::{Error, Result};
