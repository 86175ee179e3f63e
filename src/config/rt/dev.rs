use crate::config::models::Configuration;
use crate::config::rt::{RtcCore, RtcWatch};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Default port of the refresh WebSocket server.
pub const DEFAULT_REFRESH_PORT: u16 = 10000;

/// Runtime config for the bundler sidecar.
#[derive(Clone, Debug)]
pub struct RtcBundler {
    pub package_manager: String,
    pub dev_args: Vec<String>,
    pub prod_args: Vec<String>,
    pub working_dir: PathBuf,
    pub port: Option<u16>,
    pub ready_log_line: Option<String>,
    pub manifest_path: PathBuf,
}

impl RtcBundler {
    fn new(config: &Configuration, core: &RtcCore) -> Option<Self> {
        let bundler = config.bundler.as_ref()?;
        let working_dir = bundler
            .working_dir
            .as_deref()
            .map(|dir| core.working_directory.join(dir))
            .unwrap_or_else(|| core.working_directory.clone());
        Some(Self {
            package_manager: bundler.package_manager_cmd.clone(),
            dev_args: bundler.dev_args.clone(),
            prod_args: bundler.prod_args.clone(),
            manifest_path: working_dir.join(&bundler.manifest_path),
            working_dir,
            port: bundler.port,
            ready_log_line: bundler.ready_log_line.clone(),
        })
    }
}

/// Runtime config for the dev server command.
#[derive(Debug)]
pub struct RtcDev {
    pub core: Arc<RtcCore>,
    pub watch: RtcWatch,
    pub bundler: Option<Arc<RtcBundler>>,
    /// Port the refresh WebSocket listens on.
    pub refresh_port: u16,
    /// Port the app binds; `None` allocates a free port once at startup.
    pub app_port: Option<u16>,
    /// Open a browser tab once the first healthcheck passes.
    pub open: bool,
}

/// Options passed in by the dev command rather than the config document.
#[derive(Clone, Debug, Default)]
pub struct DevOptions {
    pub refresh_port: Option<u16>,
    pub app_port: Option<u16>,
    pub open: bool,
}

impl RtcDev {
    pub fn new(
        config: Configuration,
        working_directory: PathBuf,
        opts: DevOptions,
    ) -> Result<Self> {
        let core = Arc::new(
            RtcCore::new(&config, working_directory).context("error building core config")?,
        );
        let mut watch =
            RtcWatch::new(&config, core.clone()).context("error building watch config")?;
        let bundler = RtcBundler::new(&config, &core).map(Arc::new);

        // The bundler writes its own output below its working dir; never feed that back in.
        if let Some(bundler) = &bundler {
            watch.push_ignored_dir(bundler.working_dir.join("node_modules"));
        }

        Ok(Self {
            core,
            watch,
            bundler,
            refresh_port: opts.refresh_port.unwrap_or(DEFAULT_REFRESH_PORT),
            app_port: opts.app_port,
            open: opts.open,
        })
    }
}

/// Runtime config for the production build command.
#[derive(Debug)]
pub struct RtcBuild {
    pub core: Arc<RtcCore>,
    pub bundler: Option<Arc<RtcBundler>>,
    /// Production build: bundler prod pass + binary compile + minified CSS.
    pub release: bool,
}

impl RtcBuild {
    pub fn new(config: Configuration, working_directory: PathBuf, release: bool) -> Result<Self> {
        let core = Arc::new(
            RtcCore::new(&config, working_directory).context("error building core config")?,
        );
        let bundler = RtcBundler::new(&config, &core).map(Arc::new);
        Ok(Self {
            core,
            bundler,
            release,
        })
    }
}
