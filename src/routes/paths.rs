//! On-disk route snapshots.

use crate::common::atomic_write;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

fn default_export_key() -> String {
    "default".to_string()
}

/// A registered URL pattern and everything needed to render its client component.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePath {
    /// The pattern as registered, with dynamic `:name`, splat `*`, and explicit-index markers.
    pub original_pattern: String,
    /// Source module of the client component; empty when server-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src_path: String,
    /// Post-bundle output path; empty before the bundler ran.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub out_path: String,
    /// Exported symbol of the component.
    #[serde(default = "default_export_key")]
    pub export_key: String,
    /// Exported symbol of the error-boundary component; may be empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_export_key: String,
    /// Ordered dependency module outputs, set by the stage-two pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<String>,
}

impl RoutePath {
    /// A server-only path: a registered handler with no client component.
    pub fn server_only(pattern: impl Into<String>) -> Self {
        Self {
            original_pattern: pattern.into(),
            export_key: default_export_key(),
            ..Default::default()
        }
    }
}

/// Snapshot stage: one is pre-bundler (source paths only), two is post-bundler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "one")]
    One,
    #[serde(rename = "two")]
    Two,
}

/// The on-disk snapshot of the route table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathsFile {
    pub stage: Stage,
    #[serde(rename = "buildID")]
    pub build_id: String,
    pub paths: BTreeMap<String, RoutePath>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_entry_src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_entry_out: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_entry_deps: Option<Vec<String>>,
    /// One dep can contribute to multiple CSS bundles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dep_to_css_bundle_map: Option<BTreeMap<String, Vec<String>>>,
    pub route_manifest_file: String,
}

impl PathsFile {
    /// Stage two iff every client path has its bundle output populated.
    pub fn stage_is_consistent(&self) -> bool {
        let all_out = self
            .paths
            .values()
            .filter(|path| !path.src_path.is_empty())
            .all(|path| !path.out_path.is_empty());
        match self.stage {
            Stage::Two => all_out,
            Stage::One => true,
        }
    }

    pub async fn write(&self, dest: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("error serializing paths file")?;
        atomic_write(dest, &json).await
    }

    pub async fn read(src: &Path) -> Result<Self> {
        let raw = tokio::fs::read(src)
            .await
            .with_context(|| format!("error reading paths file {src:?}"))?;
        serde_json::from_slice(&raw).with_context(|| format!("error parsing paths file {src:?}"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> PathsFile {
        let mut paths = BTreeMap::new();
        paths.insert(
            "/home".to_string(),
            RoutePath {
                original_pattern: "/home".into(),
                src_path: "frontend/src/home.tsx".into(),
                export_key: "default".into(),
                ..Default::default()
            },
        );
        paths.insert("/api/health".to_string(), RoutePath::server_only("/api/health"));
        PathsFile {
            stage: Stage::One,
            build_id: "dev_abc".into(),
            paths,
            client_entry_src: "frontend/src/entry.tsx".into(),
            client_entry_out: None,
            client_entry_deps: None,
            dep_to_css_bundle_map: None,
            route_manifest_file: "vorma_route_manifest_aaaa.json".into(),
        }
    }

    #[tokio::test]
    async fn write_then_read_yields_equal_content() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let dest = tmp.path().join("vorma_paths_stage_1.json");
        let original = sample();
        original.write(&dest).await?;
        let read_back = PathsFile::read(&dest).await?;
        assert_eq!(original, read_back);
        Ok(())
    }

    #[test]
    fn stage_two_requires_out_paths() {
        let mut file = sample();
        file.stage = Stage::Two;
        assert!(!file.stage_is_consistent());

        for path in file.paths.values_mut() {
            if !path.src_path.is_empty() {
                path.out_path = "assets/public/home.123.js".into();
            }
        }
        assert!(file.stage_is_consistent());
    }

    #[test]
    fn server_only_paths_serialize_without_src() {
        let value = serde_json::to_value(RoutePath::server_only("/api/health")).unwrap();
        assert_eq!(value["originalPattern"], "/api/health");
        assert!(value.get("srcPath").is_none());
        assert_eq!(value["exportKey"], "default");
    }
}
