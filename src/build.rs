//! Build driver.
//!
//! Drives full builds: dist setup, the user's reflection-codegen hook subprocess, the inner
//! artifact build (routes, assets, CSS), and for production the bundler pass, the stage-two
//! snapshot, and the binary compile. The dev server runs the dev variant once at startup and
//! then keeps individual artifacts fresh incrementally.

use crate::assets::AssetStore;
use crate::common::{BUILDING, SUCCESS, atomic_write, forward_slash_path, run_shell};
use crate::config::Configuration;
use crate::config::rt::{RtcBundler, RtcCore};
use crate::css::{CssNature, CssPipeline};
use crate::proc::app::AppSupervisor;
use crate::routes::RouteRegistry;
use crate::routes::paths::{PathsFile, Stage};
use crate::runtime::BuildIdKind;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub struct BuildDriver {
    core: Arc<RtcCore>,
    bundler: Option<Arc<RtcBundler>>,
    assets: Arc<AssetStore>,
    css: Arc<CssPipeline>,
    routes: Arc<RouteRegistry>,
}

impl BuildDriver {
    pub fn new(
        core: Arc<RtcCore>,
        bundler: Option<Arc<RtcBundler>>,
        assets: Arc<AssetStore>,
        css: Arc<CssPipeline>,
        routes: Arc<RouteRegistry>,
    ) -> Self {
        Self {
            core,
            bundler,
            assets,
            css,
            routes,
        }
    }

    /// Development build: dist setup, codegen hook, inner build. No bundler pass, no binary.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn build_dev(&self) -> Result<()> {
        self.setup_dist(false).await?;
        if let Some(hook) = &self.core.dev_build_hook {
            run_shell(hook, &self.core.working_directory)
                .await
                .context("dev build hook failed")?;
        }
        self.build_inner(BuildIdKind::Dev, false).await
    }

    /// Production build: everything, ending in the compiled binary.
    #[tracing::instrument(level = "trace", skip(self, app))]
    pub async fn build_prod(&self, app: &AppSupervisor) -> Result<()> {
        tracing::info!("{}starting production build", BUILDING);
        self.setup_dist(true).await?;

        if let Some(hook) = &self.core.prod_build_hook {
            run_shell(hook, &self.core.working_directory)
                .await
                .context("prod build hook failed")?;
        }
        self.build_inner(BuildIdKind::Prod, true).await?;

        if let Some(bundler) = &self.bundler {
            crate::proc::bundler::BundlerSupervisor::new(Some(bundler.clone()))
                .run_prod_build()
                .await?;
            self.finalize_stage_two().await?;
        }

        app.compile().await?;
        tracing::info!("{}production build complete", SUCCESS);
        Ok(())
    }

    /// The inner build: route parse, asset hash, CSS bundles, stage-1 snapshot.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn build_inner(&self, kind: BuildIdKind, minify_css: bool) -> Result<()> {
        self.routes
            .sync(kind)
            .await
            .context("route sync failed during build")?;

        let file_map = self.assets.build().await.context("asset store build failed")?;

        if !self.core.server_only {
            self.css
                .build(CssNature::Critical, file_map.clone(), minify_css)
                .await
                .context("critical css build failed")?;
            self.css
                .build(CssNature::Normal, file_map, minify_css)
                .await
                .context("normal css build failed")?;
        }
        Ok(())
    }

    /// Create the dist skeleton; for production, clear stale artifacts first.
    async fn setup_dist(&self, clear: bool) -> Result<()> {
        let layout = &self.core.layout;
        if clear {
            crate::common::clear_dir(layout.static_root.clone())
                .await
                .context("error clearing stale dist artifacts")?;
        }
        for dir in [
            &layout.internal,
            &layout.assets_public,
            &layout.private_out,
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("error creating dist dir {dir:?}"))?;
        }
        atomic_write(&layout.keep_file, "").await?;
        atomic_write(&layout.schema, Configuration::schema(&BTreeMap::new())).await?;
        Ok(())
    }

    /// Post-process the bundler's production manifest into the stage-two snapshot: hashed
    /// output paths, dependency edges, and the dep-to-CSS-bundle map.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn finalize_stage_two(&self) -> Result<()> {
        let Some(bundler) = &self.bundler else {
            bail!("stage-two finalize requires a bundler config");
        };

        let mut file = PathsFile::read(&self.core.layout.paths_stage_one).await?;
        let manifest = BundlerManifest::read(&bundler.manifest_path).await?;

        // Manifest keys are relative to the bundler working dir; our src paths are relative
        // to the project root.
        let workdir_prefix = bundler
            .working_dir
            .strip_prefix(&self.core.working_directory)
            .map(forward_slash_path)
            .map(|p| format!("{p}/"))
            .unwrap_or_default();

        let mut dep_to_css: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for path in file.paths.values_mut() {
            if path.src_path.is_empty() {
                continue;
            }
            let key = path
                .src_path
                .strip_prefix(&workdir_prefix)
                .unwrap_or(&path.src_path);
            let Some(entry) = manifest.get(key) else {
                bail!(
                    "bundler manifest has no entry for route module {:?}",
                    path.src_path
                );
            };
            path.out_path = entry.file.clone();
            path.deps = manifest.transitive_outputs(key);

            for dep in &path.deps {
                for css in manifest.css_of_output(dep) {
                    let bundles = dep_to_css.entry(dep.clone()).or_default();
                    if !bundles.contains(&css) {
                        bundles.push(css);
                    }
                }
            }
        }

        if !file.client_entry_src.is_empty() {
            let key = file
                .client_entry_src
                .strip_prefix(&workdir_prefix)
                .unwrap_or(&file.client_entry_src);
            if let Some(entry) = manifest.get(key) {
                file.client_entry_out = Some(entry.file.clone());
                file.client_entry_deps = Some(manifest.transitive_outputs(key));
            }
        }

        file.stage = Stage::Two;
        file.dep_to_css_bundle_map = Some(dep_to_css);
        if !file.stage_is_consistent() {
            bail!("stage-two snapshot has unfilled output paths");
        }
        file.write(&self.core.layout.paths_stage_two).await?;
        tracing::debug!("stage-two paths snapshot written");
        Ok(())
    }
}

/// One entry of the bundler's production manifest (Vite manifest format).
#[derive(Clone, Debug, Default, Deserialize)]
struct ManifestEntry {
    file: String,
    #[serde(default)]
    css: Vec<String>,
    #[serde(default)]
    imports: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct BundlerManifest(BTreeMap<String, ManifestEntry>);

impl BundlerManifest {
    async fn read(path: &std::path::Path) -> Result<Self> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("error reading bundler manifest {path:?}"))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("error parsing bundler manifest {path:?}"))
    }

    fn get(&self, key: &str) -> Option<&ManifestEntry> {
        self.0.get(key)
    }

    /// The entry's own output plus every transitive import's output, in discovery order.
    fn transitive_outputs(&self, key: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = vec![];
        let mut stack = vec![key.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(entry) = self.0.get(&current) {
                out.push(entry.file.clone());
                for import in &entry.imports {
                    stack.push(import.clone());
                }
            }
        }
        out
    }

    /// CSS bundles contributed by the module whose output is `output`.
    fn css_of_output(&self, output: &str) -> Vec<String> {
        self.0
            .values()
            .filter(|entry| entry.file == output)
            .flat_map(|entry| entry.css.iter().cloned())
            .collect()
    }
}
