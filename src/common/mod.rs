//! Common functionality and types.

use anyhow::{Context, Result, bail};
use base64::{Engine, engine::general_purpose};
use console::Emoji;
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

pub static BUILDING: Emoji = Emoji("📦 ", "");
pub static SUCCESS: Emoji = Emoji("✅ ", "");
pub static ERROR: Emoji = Emoji("❌ ", "");
pub static SERVER: Emoji = Emoji("📡 ", "");
pub static RELOAD: Emoji = Emoji("🔄 ", "");
pub static STARTING: Emoji = Emoji("🚀 ", "");

/// Trim the project root from a path for log output. Paths outside the project (a global
/// cache, an absolute exclude) come back unchanged.
pub fn project_rel<'a>(path: &'a Path, project_root: &Path) -> &'a Path {
    path.strip_prefix(project_root).unwrap_or(path)
}

/// Whether a path exists on disk. Only "not found" maps to `false`; other IO failures are
/// surfaced.
pub async fn path_exists(path: impl AsRef<Path>) -> Result<bool> {
    match tokio::fs::metadata(path.as_ref()).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => {
            Err(err).with_context(|| format!("error checking whether {:?} exists", path.as_ref()))
        }
    }
}

/// Delete a dist subtree if it exists.
///
/// Deletion goes through the `remove_dir_all` crate on a blocking thread; plain
/// `fs::remove_dir_all` can fail spuriously on Windows while the app process still holds
/// handles into the tree we are clearing.
pub async fn clear_dir(dir: PathBuf) -> Result<()> {
    match tokio::fs::metadata(&dir).await {
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("error inspecting {dir:?} before removal"));
        }
        Ok(_) => {}
    }
    tokio::task::spawn_blocking(move || {
        ::remove_dir_all::remove_dir_all(&dir)
            .with_context(|| format!("error clearing dist tree {dir:?}"))
    })
    .await
    .context("error joining dist clearing task")?
}

/// Write a file atomically: write the full contents to a temp sibling, then rename over the
/// destination. A running app process never observes a torn read of a generated artifact.
pub async fn atomic_write(dest: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
    let dest = dest.as_ref();
    let Some(parent) = dest.parent() else {
        bail!("cannot atomically write to path without parent: {dest:?}");
    };
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("error creating parent dir for {dest:?}"))?;

    let tmp = parent.join(format!(
        ".{}.tmp",
        dest.file_name().unwrap_or_default().to_string_lossy()
    ));
    tokio::fs::write(&tmp, contents.as_ref())
        .await
        .with_context(|| format!("error writing temp file {tmp:?}"))?;
    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("error renaming {tmp:?} into place at {dest:?}"))?;
    Ok(())
}

/// Content hash of a byte slice, truncated to 12 hex chars.
pub fn truncated_hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = format!("{digest:x}");
    out.truncate(12);
    out
}

/// Content hash of a byte slice, truncated to 8 base64url chars.
pub fn truncated_hash_b64(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = general_purpose::URL_SAFE_NO_PAD.encode(digest);
    out.truncate(8);
    out
}

/// Render a relative path with forward slashes.
///
/// `FileMap` lookup keys, route `srcPath` values, and every generated URL use this form, so
/// the on-disk artifacts come out identical regardless of the host OS path separator.
pub fn forward_slash_path(path: impl AsRef<Path>) -> String {
    let mut out = String::new();
    for component in path.as_ref().iter() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.to_string_lossy());
    }
    out
}

/// Recursively collect all files under `dir`, sorted for deterministic output.
pub async fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = vec![];
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut read_dir = tokio::fs::read_dir(&current)
            .await
            .with_context(|| format!("error reading dir {current:?}"))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .context("error reading next dir entry")?
        {
            if entry.file_type().await?.is_dir() {
                stack.push(entry.path());
            } else {
                out.push(entry.path());
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Run a user-configured build-hook command line through the platform shell, streaming its
/// output to the terminal. A non-zero exit is an error.
#[tracing::instrument(level = "trace", skip(working_dir))]
pub async fn run_shell(cmd_line: &str, working_dir: impl AsRef<Path> + Debug) -> Result<()> {
    #[cfg(unix)]
    let (shell, flag) = ("sh", "-c");
    #[cfg(windows)]
    let (shell, flag) = ("cmd", "/C");

    let status = Command::new(shell)
        .arg(flag)
        .arg(cmd_line)
        .current_dir(working_dir.as_ref())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .with_context(|| format!("error running build hook {cmd_line:?}"))?;

    if !status.success() {
        bail!("build hook {cmd_line:?} exited with {status}");
    }
    Ok(())
}
