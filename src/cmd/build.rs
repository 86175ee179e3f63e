use crate::{
    assets::AssetStore,
    build::BuildDriver,
    config::{self, rt::RtcBuild},
    css::CssPipeline,
    proc::app::AppSupervisor,
    routes::{RouteRegistry, StaticPatternRegistry, StubTypeScriptEmitter},
    runtime::{BuildIdKind, Runtime},
};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

/// Produce a full production build: assets, CSS, route snapshots, and the compiled binary.
#[derive(Clone, Debug, Args)]
#[command(name = "build")]
#[command(next_help_heading = "Build")]
pub struct Build {
    /// Skip the bundler pass and the binary compile; produce dev-stage artifacts only
    #[arg(long)]
    pub dev_stage: bool,
}

impl Build {
    #[tracing::instrument(level = "trace", skip(self, config))]
    pub async fn run(self, config: Option<PathBuf>) -> Result<()> {
        let (cfg, working_directory) = config::load(config).await?;
        let cfg = RtcBuild::new(cfg, working_directory, !self.dev_stage)?;

        let core = cfg.core.clone();
        let runtime = Arc::new(Runtime::new(core.clone(), crate::runtime::is_dev_mode()));
        let assets = Arc::new(AssetStore::new(core.clone()));
        let css = Arc::new(CssPipeline::new(core.clone()));
        let routes = Arc::new(RouteRegistry::new(
            core.clone(),
            runtime,
            Arc::new(StaticPatternRegistry::default()),
            Arc::new(StubTypeScriptEmitter),
            vec![],
        ));
        let driver = BuildDriver::new(core.clone(), cfg.bundler.clone(), assets, css, routes);

        if self.dev_stage {
            driver.build_inner(BuildIdKind::Dev, false).await
        } else {
            // Ports are irrelevant for a one-shot compile.
            let app = AppSupervisor::new(core, 0, 0, "/".into(), false);
            driver.build_prod(&app).await
        }
    }
}
