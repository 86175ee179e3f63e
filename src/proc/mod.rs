//! Child-process supervision: the compiled app and the bundler sidecar.

pub mod app;
pub mod bundler;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;

/// Process-wide app port. The first call fixes the port; later calls observe the same value.
static APP_PORT: OnceCell<u16> = OnceCell::new();

/// Resolve the app port once: the preferred port if given, otherwise a free one.
pub fn init_app_port(preferred: Option<u16>) -> Result<u16> {
    APP_PORT
        .get_or_try_init(|| match preferred {
            Some(port) => Ok(port),
            None => free_port(),
        })
        .copied()
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
        .context("error binding to an ephemeral port")?;
    Ok(listener
        .local_addr()
        .context("error reading ephemeral port")?
        .port())
}

/// Send a termination signal to a child and wait for it to exit, escalating to a kill after
/// the given grace period.
pub(crate) async fn terminate(
    child: &mut tokio::process::Child,
    grace: std::time::Duration,
) -> Result<()> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return Ok(());
        }
        tracing::warn!(pid, "child ignored SIGTERM; killing");
    }
    #[cfg(not(unix))]
    let _ = grace;

    child.kill().await.context("error killing child process")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_port_is_fixed_after_first_init() {
        let first = init_app_port(None).unwrap();
        // later preferences are ignored: one-shot initialization
        let second = init_app_port(Some(1)).unwrap();
        assert_eq!(first, second);
    }
}
