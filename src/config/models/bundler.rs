use crate::config::models::ConfigModel;
use crate::error::ConfigInvalid;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Config options for the external JS bundler sidecar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bundler {
    /// The package manager used to run the bundler (`npm`, `pnpm`, `bun`, ...). Required.
    #[serde(default)]
    pub package_manager_cmd: String,

    /// Arguments for the long-running dev server, e.g. `["run", "dev"]`.
    #[serde(default = "default_dev_args")]
    pub dev_args: Vec<String>,

    /// Arguments for the one-shot production build, e.g. `["run", "build"]`.
    #[serde(default = "default_prod_args")]
    pub prod_args: Vec<String>,

    /// Working directory for bundler invocations, relative to the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Port the bundler dev server listens on. When set, readiness is a successful TCP connect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Log line substring signalling readiness, used when no port is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_log_line: Option<String>,

    /// Path of the bundler's production manifest, relative to the working dir.
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
}

fn default_dev_args() -> Vec<String> {
    vec!["run".into(), "dev".into()]
}

fn default_prod_args() -> Vec<String> {
    vec!["run".into(), "build".into()]
}

fn default_manifest_path() -> String {
    "dist/.vite/manifest.json".to_string()
}

impl ConfigModel for Bundler {
    fn validate(&self) -> Result<(), ConfigInvalid> {
        if self.package_manager_cmd.is_empty() {
            return Err(ConfigInvalid::MissingPackageManager);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn package_manager_is_required() {
        let bundler = Bundler::default();
        assert!(matches!(
            bundler.validate(),
            Err(ConfigInvalid::MissingPackageManager)
        ));
    }

    #[test]
    fn defaults_fill_in() {
        let bundler: Bundler = serde_json::from_value(serde_json::json!({
            "packageManagerCmd": "pnpm"
        }))
        .unwrap();
        assert_eq!(bundler.dev_args, vec!["run", "dev"]);
        assert_eq!(bundler.prod_args, vec!["run", "build"]);
        assert!(bundler.validate().is_ok());
    }
}
