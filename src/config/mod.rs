//! Vorma config.
//!
//! There are three types of structs: Command Line, Serialization, and Runtime.
//!
//! The command line structs are based on [`clap`] and live in [`crate::cmd`]; most of their
//! fields are optional overrides of the configuration document. The serialization structs in
//! [`models`] are the project model the user writes as `vorma.json`, based on [`serde`] and
//! carrying a [`schemars`] schema. The runtime structs in [`rt`] contain all the information a
//! command requires to execute, in the form the command requires it: absolute paths, compiled
//! globs, resolved defaults.

pub mod models;
pub mod rt;

pub use models::{CONFIG_FILE, Configuration, load};
