//! The app process supervisor.
//!
//! Compiles the Go entry point into the dist binary, spawns it as a child with the bound port
//! in its environment, polls its healthcheck endpoint until it answers, and stops it with a
//! termination signal. At most one child exists at a time; a failed compile keeps the previous
//! binary (and any running child) untouched.

use crate::common::{BUILDING, SUCCESS, project_rel};
use crate::config::rt::RtcCore;
use crate::error::{ProcessError, ReloadEndpointError};
use crate::runtime::DEV_MODE_ENV;
use anyhow::{Context, Result};
use backon::{ConstantBuilder, Retryable};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Cap on waiting for the first healthy response after a start.
const HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(30);
/// Interval between healthcheck polls.
const HEALTHCHECK_INTERVAL: Duration = Duration::from_millis(250);
/// Grace period between SIGTERM and kill.
const STOP_GRACE: Duration = Duration::from_secs(5);
/// Context timeout for dev-reload endpoint calls.
const RELOAD_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AppSupervisor {
    core: Arc<RtcCore>,
    app_port: u16,
    refresh_port: u16,
    healthcheck_path: String,
    dev_mode: bool,
    client: reqwest::Client,
    child: Mutex<Option<Child>>,
}

impl AppSupervisor {
    pub fn new(
        core: Arc<RtcCore>,
        app_port: u16,
        refresh_port: u16,
        healthcheck_path: String,
        dev_mode: bool,
    ) -> Self {
        Self {
            core,
            app_port,
            refresh_port,
            healthcheck_path,
            dev_mode,
            client: reqwest::Client::new(),
            child: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.app_port)
    }

    /// Compile the Go entry point to the dist binary, blocking until done. Compiler
    /// diagnostics stream straight through to the terminal.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn compile(&self) -> Result<()> {
        let go = which::which("go")
            .context("could not find the go toolchain on PATH; vorma compiles the app with `go build`")?;

        tracing::info!(
            "{}compiling {}",
            BUILDING,
            project_rel(&self.core.main_app_entry, &self.core.working_directory).display()
        );
        let started = std::time::Instant::now();

        if let Some(parent) = self.core.layout.binary.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("error creating binary output dir")?;
        }

        let status = Command::new(go)
            .arg("build")
            .arg("-o")
            .arg(&self.core.layout.binary)
            .arg(&self.core.main_app_entry)
            .current_dir(&self.core.working_directory)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| ProcessError::Spawn {
                name: "go build".into(),
                source: err,
            })?
            .wait()
            .await
            .context("error waiting on go build")?;

        if !status.success() {
            return Err(ProcessError::Compile { status }.into());
        }
        tracing::info!(
            "{}compile finished in {}",
            SUCCESS,
            humantime::Duration::from(started.elapsed())
        );
        Ok(())
    }

    /// Spawn the compiled binary. The previous child, if any, is stopped first so the port is
    /// never double-bound.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(mut previous) = guard.take() {
            tracing::warn!("app child still running at start; stopping it first");
            super::terminate(&mut previous, STOP_GRACE).await?;
        }

        let mut command = Command::new(&self.core.layout.binary);
        command
            .current_dir(&self.core.working_directory)
            .env("PORT", self.app_port.to_string())
            .env("VORMA_REFRESH_PORT", self.refresh_port.to_string())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if self.dev_mode {
            command.env(DEV_MODE_ENV, "1");
        }

        let child = command.spawn().map_err(|err| ProcessError::Spawn {
            name: self.core.layout.binary.display().to_string(),
            source: err,
        })?;
        tracing::info!(pid = child.id(), port = self.app_port, "app process started");
        *guard = Some(child);
        Ok(())
    }

    /// Stop the child with a termination signal and wait on its exit. A no-op when nothing
    /// runs.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };
        tracing::debug!(pid = child.id(), "stopping app process");
        super::terminate(&mut child, STOP_GRACE).await
    }

    /// Barrier: returns once the healthcheck endpoint answered 200 at least once, or fails
    /// after the bounded timeout.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn wait_for_app(&self) -> Result<()> {
        let url = format!("{}{}", self.base_url(), self.healthcheck_path);
        let max_times =
            (HEALTHCHECK_TIMEOUT.as_millis() / HEALTHCHECK_INTERVAL.as_millis()) as usize;

        let check = || async {
            let response = self.client.get(&url).send().await?;
            response.error_for_status()?;
            Ok::<_, reqwest::Error>(())
        };

        check
            .retry(
                ConstantBuilder::default()
                    .with_delay(HEALTHCHECK_INTERVAL)
                    .with_max_times(max_times),
            )
            .await
            .map_err(|_| ProcessError::Unhealthy {
                url: url.clone(),
                timeout: HEALTHCHECK_TIMEOUT,
            })?;

        tracing::debug!(%url, "app healthcheck passed");
        Ok(())
    }

    /// Optionally recompile, then stop, start, and wait for health. The compile comes first:
    /// if it fails, the running child is left untouched and keeps serving.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn restart(&self, recompile: bool) -> Result<()> {
        if recompile {
            self.compile().await?;
        }
        self.stop().await?;
        self.start().await?;
        self.wait_for_app().await
    }

    /// PID of the running child, if any.
    pub async fn current_pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    /// GET one of the well-known dev-reload endpoints on the running app.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn call_reload_endpoint(&self, path: &str) -> Result<(), ReloadEndpointError> {
        let url = format!("{}{}", self.base_url(), path);
        let response = self
            .client
            .get(&url)
            .timeout(RELOAD_ENDPOINT_TIMEOUT)
            .send()
            .await
            .map_err(|source| ReloadEndpointError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReloadEndpointError::BadStatus {
                url,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
