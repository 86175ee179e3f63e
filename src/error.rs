//! The error taxonomy of the dev engine.
//!
//! Components return their own typed error so callers can decide between
//! "fatal at startup" (config), "log and keep previous state" (assets, CSS,
//! routes) and "fall back per strategy" (reload endpoints). Everything is
//! still `anyhow`-compatible at the orchestrator layer.

use std::path::PathBuf;
use thiserror::Error;

/// A fatal configuration problem. Raised at startup only.
#[derive(Debug, Error)]
pub enum ConfigInvalid {
    #[error("required config field missing: {0}")]
    MissingField(&'static str),
    #[error(
        "watched file {pattern:?} is runOnChangeOnly but declares a {timing} command hook; only pre-timed command hooks are allowed"
    )]
    NonPreHookOnChangeOnly { pattern: String, timing: String },
    #[error("bundler config requires a package manager command")]
    MissingPackageManager,
    #[error("invalid public path prefix {0:?}")]
    BadPublicPrefix(String),
    #[error("invalid glob pattern {pattern:?}: {source}")]
    BadGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// Asset store failure. The previous file map is retained by callers.
#[derive(Debug, Error)]
pub enum AssetStoreError {
    #[error("error walking public asset dir {0:?}")]
    Walk(PathBuf, #[source] std::io::Error),
    #[error("error hashing asset {0:?}")]
    Hash(PathBuf, #[source] std::io::Error),
    #[error("error writing asset artifact {0:?}")]
    Write(PathBuf, #[source] std::io::Error),
    #[error("error encoding file map snapshot")]
    Encode(#[source] bincode::Error),
    #[error("error encoding file map sidecar")]
    EncodeJson(#[source] serde_json::Error),
}

/// CSS bundling failure. The previous bundle is retained by callers.
#[derive(Debug, Error)]
pub enum CssBuildError {
    #[error("css bundler error in {entry:?}: {message}")]
    Bundle { entry: PathBuf, message: String },
    #[error("error writing css output {0:?}")]
    Write(PathBuf, #[source] std::io::Error),
}

/// Route registry failure. The previous paths are retained by callers.
#[derive(Debug, Error)]
pub enum RouteRegistryError {
    #[error("error reading route definitions file {0:?}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("syntax error in route definitions file {file:?}: {message}")]
    Syntax { file: PathBuf, message: String },
    #[error("route {pattern:?} references missing component file {file:?}")]
    MissingComponent { pattern: String, file: PathBuf },
    #[error("error writing route artifact {0:?}")]
    Write(PathBuf, #[source] std::io::Error),
    #[error("typescript generation failed: {0}")]
    TypeGen(String),
}

/// Compile or spawn failure in the app supervisor. In dev the previous
/// binary keeps running; in prod this is fatal.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("go compile failed with {status}")]
    Compile { status: std::process::ExitStatus },
    #[error("error spawning {name}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("app failed healthcheck at {url} within {timeout:?}")]
    Unhealthy {
        url: String,
        timeout: std::time::Duration,
    },
}

/// A dev-reload endpoint call that did not return 2xx. Triggers the
/// strategy's fallback action.
#[derive(Debug, Error)]
pub enum ReloadEndpointError {
    #[error("reload endpoint {url} returned {status}: {body}")]
    BadStatus {
        url: String,
        status: u16,
        body: String,
    },
    #[error("reload endpoint {url} transport error")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}
