use crate::config::Configuration;
use anyhow::Result;
use clap::Args;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Print the JSON Schema of the config document.
#[derive(Clone, Debug, Args)]
#[command(name = "schema")]
pub struct Schema {}

impl Schema {
    #[tracing::instrument(level = "trace", skip(self, _config))]
    pub async fn run(self, _config: Option<PathBuf>) -> Result<()> {
        println!("{}", Configuration::schema(&BTreeMap::new()));
        Ok(())
    }
}
