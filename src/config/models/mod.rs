//! The configuration model
//!
//! This is what the user provides in `vorma.json`, and which gets converted into the runtime
//! model. The CLI will override certain aspects of it when running commands.

mod bundler;
mod core;
mod watch;

pub use bundler::*;
pub use core::*;
pub use watch::*;

use crate::error::ConfigInvalid;
use anyhow::{Context, Result, bail};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The default name of the config document.
pub const CONFIG_FILE: &str = "vorma.json";

/// Common configuration model functionality.
pub trait ConfigModel {
    /// Validate the section, returning the first problem found.
    fn validate(&self) -> Result<(), ConfigInvalid> {
        Ok(())
    }
}

/// The persisted configuration model.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub core: Core,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundler: Option<Bundler>,

    #[serde(default)]
    pub watch: Watch,

    /// Framework sections extend the document via a registered schema map. Unknown sections are
    /// preserved verbatim so higher layers can read them back out.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl ConfigModel for Configuration {
    fn validate(&self) -> Result<(), ConfigInvalid> {
        self.core.validate()?;
        if let Some(bundler) = &self.bundler {
            bundler.validate()?;
        }
        self.watch.validate()?;
        Ok(())
    }
}

impl Configuration {
    /// The JSON Schema of the config document, including any registered extension schemas.
    pub fn schema(extensions: &BTreeMap<String, schemars::schema::RootSchema>) -> String {
        let mut root = schemars::schema_for!(Configuration);
        for (key, ext) in extensions {
            root.schema
                .object()
                .properties
                .insert(key.clone(), schemars::schema::Schema::Object(ext.schema.clone()));
        }
        serde_json::to_string_pretty(&root).unwrap_or_default()
    }
}

/// Locate and load the configuration, given an optional file or directory. Falling back to the
/// current directory.
pub async fn load(path: Option<PathBuf>) -> Result<(Configuration, PathBuf)> {
    match path {
        // if we have a file, load it
        Some(path) if path.is_file() => {
            // Canonicalize the path to the configuration, so that we get a proper parent.
            // Otherwise, we might end up with a parent of '', which won't work later on.
            let path = path.canonicalize().with_context(|| {
                format!(
                    "unable to canonicalize path to configuration: '{}'",
                    path.display()
                )
            })?;
            let Some(cwd) = path.parent() else {
                bail!("unable to get parent directory of '{}'", path.display());
            };
            let cwd = cwd.to_path_buf();

            Ok((load_file(&path).await?, cwd))
        }
        // if we have a directory, load the well-known file inside it
        Some(path) if path.is_dir() => {
            let file = path.join(CONFIG_FILE);
            Ok((load_file(&file).await?, path))
        }
        // if we have something else, we can't deal with it
        Some(path) => bail!("{} is neither a file nor a directory", path.display()),
        // if we have nothing, look in the current directory
        None => {
            let cwd = std::env::current_dir().context("unable to get current directory")?;
            let file = cwd.join(CONFIG_FILE);
            Ok((load_file(&file).await?, cwd))
        }
    }
}

async fn load_file(path: &Path) -> Result<Configuration> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("error reading config file {path:?}"))?;
    let config: Configuration = serde_json::from_str(&raw)
        .with_context(|| format!("error parsing config file {path:?}"))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod test;
