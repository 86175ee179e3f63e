use crate::config::models::Configuration;
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::PathBuf;

/// Name of the compiled app binary inside the dist dir.
pub const APP_BINARY: &str = "main";

/// Fixed prefix embedded in every hashed public asset name.
pub const PUBLIC_FILE_PREFIX: &str = "vorma_public";
/// Prefix of the hashed normal-CSS bundle.
pub const NORMAL_CSS_PREFIX: &str = "vorma_normal_css";
/// Prefix of the hashed route-manifest JSON.
pub const ROUTE_MANIFEST_PREFIX: &str = "vorma_route_manifest";
/// Prefix of the hashed file-map JS lookup module.
pub const FILE_MAP_MODULE_PREFIX: &str = "vorma_public_filemap";
/// Sentinel child directory whose contents bypass asset hashing.
pub const PREHASHED_DIR: &str = "prehashed";

/// Canonical paths of everything the engine writes under the dist dir.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistLayout {
    /// The dist root itself.
    pub dist: PathBuf,
    /// The compiled app binary.
    pub binary: PathBuf,
    /// Root of everything servable or readable at runtime.
    pub static_root: PathBuf,
    /// Hashed public assets and per-route bundles.
    pub assets_public: PathBuf,
    /// App-private static assets.
    pub assets_private: PathBuf,
    /// Engine-generated route snapshots.
    pub private_out: PathBuf,
    /// Engine-internal artifacts (refs, snapshots, critical CSS).
    pub internal: PathBuf,
    /// Critical CSS, written unhashed; inlined by the app.
    pub critical_css: PathBuf,
    /// One-line ref holding the current normal-CSS bundle filename.
    pub normal_css_ref: PathBuf,
    /// One-line ref holding the current file-map JS module filename.
    pub file_map_module_ref: PathBuf,
    /// Binary snapshot of the public file map.
    pub file_map_snapshot: PathBuf,
    /// JSON sidecar of the public file map.
    pub file_map_json: PathBuf,
    /// JSON Schema of the config document.
    pub schema: PathBuf,
    /// Marker keeping the static tree present in otherwise-clean checkouts.
    pub keep_file: PathBuf,
    /// Stage-1 route snapshot (pre-bundler).
    pub paths_stage_one: PathBuf,
    /// Stage-2 route snapshot (post-bundler).
    pub paths_stage_two: PathBuf,
}

impl DistLayout {
    pub fn new(dist: PathBuf) -> Self {
        let static_root = dist.join("static");
        let assets_public = static_root.join("assets").join("public");
        let assets_private = static_root.join("assets").join("private");
        let private_out = assets_private.join("vorma_out");
        let internal = static_root.join("internal");
        Self {
            binary: dist.join("bin").join(APP_BINARY),
            critical_css: internal.join("critical.css"),
            normal_css_ref: internal.join("normal_css_file_ref.txt"),
            file_map_module_ref: internal.join("public_file_map_file_ref.txt"),
            file_map_snapshot: internal.join("public_filemap.bin"),
            file_map_json: internal.join("public_filemap.json"),
            schema: internal.join("schema.json"),
            keep_file: static_root.join(".vormakeep"),
            paths_stage_one: private_out.join("vorma_paths_stage_1.json"),
            paths_stage_two: private_out.join("vorma_paths_stage_2.json"),
            dist,
            static_root,
            assets_public,
            assets_private,
            private_out,
            internal,
        }
    }
}

/// Runtime config shared by every command.
#[derive(Clone, Debug)]
pub struct RtcCore {
    /// Canonical project root; every relative config path resolves against it.
    pub working_directory: PathBuf,
    /// Normalized public URL prefix.
    pub public_prefix: String,
    /// Browser-related features disabled entirely.
    pub server_only: bool,
    pub main_app_entry: PathBuf,
    pub public_static_dir: PathBuf,
    pub private_static_dir: PathBuf,
    pub critical_css_entry: Option<PathBuf>,
    pub normal_css_entry: Option<PathBuf>,
    pub routes_file: Option<PathBuf>,
    /// Client entry module, as written (project-root relative, forward slashes).
    pub client_entry: Option<String>,
    pub ts_gen_out_dir: Option<PathBuf>,
    pub root_template: Option<PathBuf>,
    pub dev_build_hook: Option<String>,
    pub prod_build_hook: Option<String>,
    pub layout: DistLayout,
}

impl RtcCore {
    pub(crate) fn new(config: &Configuration, working_directory: PathBuf) -> Result<Self> {
        let working_directory = working_directory
            .canonicalize()
            .context("error taking canonical path to the project root")?;

        let join = |rel: &str| working_directory.join(rel);

        let core = &config.core;
        let public_prefix = core.normalized_public_prefix()?;

        // Ensure the dist dir exists so we can canonicalize it; other layers rely on a stable
        // absolute path here.
        let dist = join(&core.dist_dir);
        if let Err(err) = std::fs::create_dir_all(&dist) {
            if err.kind() != ErrorKind::AlreadyExists {
                return Err(err).with_context(|| format!("error creating dist dir {dist:?}"));
            }
        }
        let dist = dist
            .canonicalize()
            .context("error taking canonical path to dist dir")?;

        Ok(Self {
            public_prefix,
            server_only: core.server_only_mode,
            main_app_entry: join(&core.main_app_entry),
            public_static_dir: join(&core.public_static_dir),
            private_static_dir: join(&core.private_static_dir),
            critical_css_entry: core.critical_css_entry.as_deref().map(join),
            normal_css_entry: core.normal_css_entry.as_deref().map(join),
            routes_file: core.routes_file.as_deref().map(join),
            client_entry: core.client_entry.clone(),
            ts_gen_out_dir: core.ts_gen_out_dir.as_deref().map(join),
            root_template: core.root_template.as_deref().map(join),
            dev_build_hook: core.dev_build_hook.clone(),
            prod_build_hook: core.prod_build_hook.clone(),
            layout: DistLayout::new(dist),
            working_directory,
        })
    }

    /// Construct a new instance for testing, rooted at the given temp dir.
    #[cfg(test)]
    pub fn new_test(tmpdir: &std::path::Path) -> Result<Self> {
        let working_directory = tmpdir.canonicalize()?;
        let dist = working_directory.join("dist");
        std::fs::create_dir_all(&dist)?;
        Ok(Self {
            public_prefix: "/public/".into(),
            server_only: false,
            main_app_entry: working_directory.join("backend/cmd/app/main.go"),
            public_static_dir: working_directory.join("frontend/assets"),
            private_static_dir: working_directory.join("backend/assets"),
            critical_css_entry: None,
            normal_css_entry: None,
            routes_file: None,
            client_entry: None,
            ts_gen_out_dir: None,
            root_template: None,
            dev_build_hook: None,
            prod_build_hook: None,
            layout: DistLayout::new(dist),
            working_directory,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout_paths_hang_off_static_root() {
        let layout = DistLayout::new(PathBuf::from("/proj/dist"));
        assert_eq!(layout.static_root, PathBuf::from("/proj/dist/static"));
        assert_eq!(
            layout.paths_stage_one,
            PathBuf::from("/proj/dist/static/assets/private/vorma_out/vorma_paths_stage_1.json")
        );
        assert_eq!(
            layout.critical_css,
            PathBuf::from("/proj/dist/static/internal/critical.css")
        );
        assert_eq!(layout.binary, PathBuf::from("/proj/dist/bin/main"));
    }
}
