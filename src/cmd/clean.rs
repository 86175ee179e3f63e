use crate::{common, config};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

/// Clean output artifacts.
#[derive(Clone, Debug, Args)]
#[command(name = "clean")]
#[command(next_help_heading = "Clean")]
pub struct Clean {
    /// Also remove the compiled binary
    #[arg(long)]
    pub binary: bool,
}

impl Clean {
    #[tracing::instrument(level = "trace", skip(self, config))]
    pub async fn run(self, config: Option<PathBuf>) -> Result<()> {
        let (cfg, working_directory) = config::load(config).await?;
        let core = crate::config::rt::RtcBuild::new(cfg, working_directory, false)?.core;

        tracing::info!(
            "cleaning {:?}",
            common::project_rel(&core.layout.static_root, &core.working_directory)
        );
        common::clear_dir(core.layout.static_root.clone()).await?;
        if self.binary {
            if let Some(bin_dir) = core.layout.binary.parent() {
                common::clear_dir(bin_dir.to_path_buf()).await?;
            }
        }
        Ok(())
    }
}
