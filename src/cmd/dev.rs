use crate::{
    config::{
        self,
        rt::{DevOptions, RtcDev},
    },
    dev::{DevSeams, DevSystem},
};
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tokio::{select, sync::broadcast};

/// Grace period for the supervisors to tear down after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Watch the project, supervise the app, and push reloads to the browser.
#[derive(Clone, Args)]
#[command(name = "dev")]
#[command(next_help_heading = "Dev")]
pub struct Dev {
    /// The port the app binds [default: an ephemeral free port]
    #[arg(long, env = "VORMA_APP_PORT")]
    pub port: Option<u16>,
    /// The port of the refresh websocket [default: 10000]
    #[arg(long, env = "VORMA_REFRESH_PORT")]
    pub refresh_port: Option<u16>,
    /// Open a browser tab once the app passes its first healthcheck [default: false]
    #[arg(long, env = "VORMA_OPEN")]
    pub open: bool,
}

impl Dev {
    #[tracing::instrument(level = "trace", skip(self, config))]
    pub async fn run(self, config: Option<PathBuf>) -> Result<()> {
        let (cfg, working_directory) = config::load(config).await?;
        let cfg = RtcDev::new(
            cfg,
            working_directory,
            DevOptions {
                refresh_port: self.refresh_port,
                app_port: self.port,
                open: self.open,
            },
        )?;

        let (shutdown_tx, _) = broadcast::channel(1);

        let system = DevSystem::new(cfg, DevSeams::default(), shutdown_tx.clone())?;
        let mut system_handle = tokio::spawn(system.run());

        let signalled = select! {
            _ = shutdown_signal() => {
                tracing::debug!("received shutdown signal");
                shutdown_tx.send(()).ok();
                true
            }
            r = &mut system_handle => {
                r.context("error awaiting system shutdown")??;
                false
            }
        };
        drop(shutdown_tx);

        // Give the supervisors a bounded window to tear down after a signal.
        if signalled {
            match tokio::time::timeout(SHUTDOWN_GRACE, system_handle).await {
                Ok(r) => r.context("error awaiting system shutdown")??,
                Err(_) => tracing::warn!("teardown timed out; exiting anyway"),
            }
        }

        tracing::debug!("Exiting dev main");

        Ok(())
    }
}

/// Completes on Ctrl-C, or on SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(err) => {
                tracing::error!("unable to listen for SIGTERM: {err}");
                let _ = ctrl_c.await;
                return;
            }
        };
        select! {
            _ = ctrl_c => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
