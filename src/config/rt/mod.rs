//! The runtime configuration
//!
//! This is what the system actually uses. Paths are absolute and validated; watch rules are
//! compiled; defaults are resolved.

mod core;
mod dev;
mod watch;

pub use core::*;
pub use dev::*;
pub use watch::*;
