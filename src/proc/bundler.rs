//! The bundler sidecar supervisor.
//!
//! Optionally runs the external JS bundler's dev server as a long-running child with its
//! stdio streamed. Readiness is either a successful TCP connect to the configured port or a
//! known log-line signature. The sidecar is cycled whenever generated files it reads have been
//! rewritten, and always stopped before the dev server exits.

use crate::config::rt::RtcBundler;
use crate::error::ProcessError;
use anyhow::{Context, Result};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};

/// Cap on waiting for bundler readiness.
const READY_TIMEOUT: Duration = Duration::from_secs(30);
/// Interval between readiness polls.
const READY_INTERVAL: Duration = Duration::from_millis(250);
/// Grace period between SIGTERM and kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

struct Running {
    child: Child,
    /// Set to true by the stdout forwarder once the ready log line was seen.
    saw_ready_line: watch::Receiver<bool>,
}

pub struct BundlerSupervisor {
    cfg: Option<Arc<RtcBundler>>,
    running: Mutex<Option<Running>>,
}

impl BundlerSupervisor {
    pub fn new(cfg: Option<Arc<RtcBundler>>) -> Self {
        Self {
            cfg,
            running: Mutex::new(None),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.cfg.is_some()
    }

    /// Spawn the bundler dev server. A no-op when no bundler is configured.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn start(&self) -> Result<()> {
        let Some(cfg) = &self.cfg else {
            return Ok(());
        };
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            tracing::debug!("bundler already running");
            return Ok(());
        }

        let mut child = Command::new(&cfg.package_manager)
            .args(&cfg.dev_args)
            .current_dir(&cfg.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| ProcessError::Spawn {
                name: format!("{} {}", cfg.package_manager, cfg.dev_args.join(" ")),
                source: err,
            })?;

        let (ready_tx, saw_ready_line) = watch::channel(false);
        if let Some(stdout) = child.stdout.take() {
            let signature = cfg.ready_log_line.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(signature) = &signature {
                        if line.contains(signature.as_str()) {
                            let _ = ready_tx.send(true);
                        }
                    }
                    tracing::info!(target: "bundler", "{line}");
                }
            });
        }

        tracing::info!(pid = child.id(), "bundler sidecar started");
        *guard = Some(Running {
            child,
            saw_ready_line,
        });
        Ok(())
    }

    /// Barrier: returns once the bundler looks ready, or fails after the bounded timeout.
    ///
    /// Readiness is a successful TCP connect when a port is configured, the ready log line
    /// when one is, and otherwise immediate.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn wait_for_bundler(&self) -> Result<()> {
        let Some(cfg) = &self.cfg else {
            return Ok(());
        };

        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        loop {
            let ready = match cfg.port {
                Some(port) => tokio::net::TcpStream::connect(("127.0.0.1", port))
                    .await
                    .is_ok(),
                None => match &cfg.ready_log_line {
                    Some(_) => {
                        let guard = self.running.lock().await;
                        guard
                            .as_ref()
                            .map(|running| *running.saw_ready_line.borrow())
                            .unwrap_or(false)
                    }
                    None => true,
                },
            };
            if ready {
                tracing::debug!("bundler ready");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("bundler did not become ready within {READY_TIMEOUT:?}");
            }
            tokio::time::sleep(READY_INTERVAL).await;
        }
    }

    /// Stop the bundler. A no-op when nothing runs.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.running.lock().await;
        let Some(mut running) = guard.take() else {
            return Ok(());
        };
        tracing::debug!(pid = running.child.id(), "stopping bundler sidecar");
        super::terminate(&mut running.child, STOP_GRACE).await
    }

    /// Stop and restart the bundler so it re-reads generated files, then wait for readiness.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn cycle(&self) -> Result<()> {
        if !self.is_configured() {
            return Ok(());
        }
        self.stop().await?;
        self.start().await?;
        self.wait_for_bundler().await
    }

    /// Run the bundler's one-shot production build to completion, output streamed.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn run_prod_build(&self) -> Result<()> {
        let Some(cfg) = &self.cfg else {
            return Ok(());
        };
        let cmd_line = format!("{} {}", cfg.package_manager, cfg.prod_args.join(" "));
        tracing::info!(command = %cmd_line, "running bundler production build");

        let status = Command::new(&cfg.package_manager)
            .args(&cfg.prod_args)
            .current_dir(&cfg.working_dir)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("error spawning bundler production build ({cmd_line})"))?;

        if !status.success() {
            anyhow::bail!("bundler production build ({cmd_line}) exited with {status}");
        }
        Ok(())
    }
}
