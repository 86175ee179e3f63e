//! Route registry: discovery, merging, manifest emission, and typed codegen.
//!
//! Client routes come from the route-definitions file; server routes come from the nested
//! pattern matcher, which is an external collaborator consumed through [`PatternRegistry`].
//! Both are merged into one path table, snapshotted to disk, and summarized in a
//! content-addressed manifest the client fetches to know which patterns carry server loaders.

pub mod parser;
pub mod paths;

use crate::common::{atomic_write, forward_slash_path, truncated_hash_hex};
use crate::config::rt::{ROUTE_MANIFEST_PREFIX, RtcCore};
use crate::error::RouteRegistryError;
use crate::runtime::{BuildIdKind, Runtime, generate_build_id};
use anyhow::Result;
use paths::{PathsFile, RoutePath, Stage};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// A server-registered pattern, as reported by the nested pattern matcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerPattern {
    pub pattern: String,
    pub has_server_loader: bool,
}

/// The nested-pattern matcher, consumed as an opaque service.
pub trait PatternRegistry: Send + Sync {
    fn register_pattern(&self, pattern: ServerPattern);
    fn registered_patterns(&self) -> Vec<ServerPattern>;
    /// Patterns matching the given request path, most-nested last.
    fn find_nested_matches(&self, path: &str) -> Vec<String>;
    /// Rebuild internal matcher state without dropping attached handlers.
    fn rebuild_preserving_handlers(&self);
}

/// A server type the framework wants mirrored into TypeScript.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdHocType {
    pub name: String,
    /// The reflected type declaration, in the emitter's input form.
    pub decl: String,
}

/// The type-to-TypeScript generator, consumed as an opaque service.
pub trait TypeScriptEmitter: Send + Sync {
    /// Produce the generated module contents for the given ad-hoc types.
    fn process_types(&self, ad_hoc_types: &[AdHocType]) -> Result<String, String>;
}

/// What a completed sync produced.
#[derive(Clone, Debug)]
pub struct SyncOutput {
    pub build_id: String,
    pub route_manifest_file: String,
}

pub struct RouteRegistry {
    core: Arc<RtcCore>,
    runtime: Arc<Runtime>,
    patterns: Arc<dyn PatternRegistry>,
    emitter: Arc<dyn TypeScriptEmitter>,
    ad_hoc_types: Vec<AdHocType>,
}

impl RouteRegistry {
    pub fn new(
        core: Arc<RtcCore>,
        runtime: Arc<Runtime>,
        patterns: Arc<dyn PatternRegistry>,
        emitter: Arc<dyn TypeScriptEmitter>,
        ad_hoc_types: Vec<AdHocType>,
    ) -> Self {
        Self {
            core,
            runtime,
            patterns,
            emitter,
            ad_hoc_types,
        }
    }

    /// Rebuild the whole route state: parse, merge, swap in-process state, write artifacts.
    ///
    /// On any error the previous state is retained; callers log and continue.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn sync(&self, kind: BuildIdKind) -> Result<SyncOutput, RouteRegistryError> {
        let mut paths = self.discover_client_paths().await?;
        self.merge_server_patterns(&mut paths);

        let manifest = self.render_manifest(&paths);
        let manifest_file = format!(
            "{ROUTE_MANIFEST_PREFIX}_{}.json",
            truncated_hash_hex(manifest.as_bytes())
        );

        let build_id = generate_build_id(kind);

        // Swap paths, clear the resolver dep cache, and set the build ID in one write-lock
        // acquisition, so no reader observes one without the others.
        self.runtime.with_lock(|state, dep_cache| {
            state.paths = paths.clone();
            state.build_id = build_id.clone();
            state.route_manifest_file = Some(manifest_file.clone());
            state.client_entry_src = self.core.client_entry.clone();
            dep_cache.clear();
        });
        self.patterns.rebuild_preserving_handlers();

        self.clean_stale_manifests(&manifest_file).await;
        let manifest_path = self.core.layout.assets_public.join(&manifest_file);
        atomic_write(&manifest_path, &manifest)
            .await
            .map_err(|err| write_err(&manifest_path, err))?;

        let stage_one = PathsFile {
            stage: Stage::One,
            build_id: build_id.clone(),
            paths,
            client_entry_src: self.core.client_entry.clone().unwrap_or_default(),
            client_entry_out: None,
            client_entry_deps: None,
            dep_to_css_bundle_map: None,
            route_manifest_file: manifest_file.clone(),
        };
        stage_one
            .write(&self.core.layout.paths_stage_one)
            .await
            .map_err(|err| write_err(&self.core.layout.paths_stage_one, err))?;

        self.emit_typescript().await?;

        tracing::debug!(%build_id, routes = stage_one.paths.len(), "route state synced");
        Ok(SyncOutput {
            build_id,
            route_manifest_file: manifest_file,
        })
    }

    /// Parse the route-definitions file and resolve each module to a project-relative path.
    async fn discover_client_paths(
        &self,
    ) -> Result<BTreeMap<String, RoutePath>, RouteRegistryError> {
        let mut paths = BTreeMap::new();
        if self.core.server_only {
            return Ok(paths);
        }
        let Some(routes_file) = &self.core.routes_file else {
            return Ok(paths);
        };

        let source = tokio::fs::read_to_string(routes_file)
            .await
            .map_err(|err| RouteRegistryError::Read(routes_file.clone(), err))?;
        let parsed = parser::parse_routes_file(routes_file, &source)?;

        let routes_dir = routes_file.parent().unwrap_or(Path::new("."));
        for route in parsed {
            let module_abs = routes_dir.join(route.module.trim_start_matches("./"));
            if !module_abs.is_file() {
                return Err(RouteRegistryError::MissingComponent {
                    pattern: route.pattern,
                    file: module_abs,
                });
            }
            let src_path = module_abs
                .strip_prefix(&self.core.working_directory)
                .map(forward_slash_path)
                .unwrap_or_else(|_| forward_slash_path(&module_abs));

            paths.insert(
                route.pattern.clone(),
                RoutePath {
                    original_pattern: route.pattern,
                    src_path,
                    out_path: String::new(),
                    export_key: route.export_key.unwrap_or_else(|| "default".to_string()),
                    error_export_key: route.error_export_key.unwrap_or_default(),
                    deps: vec![],
                },
            );
        }
        Ok(paths)
    }

    /// Any server handler with no matching client entry becomes a server-only path.
    fn merge_server_patterns(&self, paths: &mut BTreeMap<String, RoutePath>) {
        for server in self.patterns.registered_patterns() {
            paths
                .entry(server.pattern.clone())
                .or_insert_with(|| RoutePath::server_only(server.pattern));
        }
    }

    /// `pattern -> 0|1` of whether a server loader is registered for it. Deterministic: the
    /// map is ordered, so equal path tables produce byte-equal manifests and equal filenames.
    fn render_manifest(&self, paths: &BTreeMap<String, RoutePath>) -> String {
        let loaders: BTreeMap<&str, u8> = {
            let server: BTreeMap<String, bool> = self
                .patterns
                .registered_patterns()
                .into_iter()
                .map(|p| (p.pattern, p.has_server_loader))
                .collect();
            paths
                .keys()
                .map(|pattern| {
                    (
                        pattern.as_str(),
                        u8::from(server.get(pattern).copied().unwrap_or(false)),
                    )
                })
                .collect()
        };
        serde_json::to_string(&loaders).unwrap_or_else(|_| "{}".to_string())
    }

    async fn clean_stale_manifests(&self, keep: &str) {
        let Ok(mut read_dir) = tokio::fs::read_dir(&self.core.layout.assets_public).await else {
            return;
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(ROUTE_MANIFEST_PREFIX) && name.ends_with(".json") && name != keep {
                if let Err(err) = tokio::fs::remove_file(entry.path()).await {
                    tracing::warn!(file = %name, error = %err, "error deleting stale route manifest");
                }
            }
        }
    }

    /// Regenerate the typed re-exports from the framework-supplied ad-hoc types.
    async fn emit_typescript(&self) -> Result<(), RouteRegistryError> {
        let Some(ts_dir) = &self.core.ts_gen_out_dir else {
            return Ok(());
        };
        let generated = self
            .emitter
            .process_types(&self.ad_hoc_types)
            .map_err(RouteRegistryError::TypeGen)?;
        let dest = ts_dir.join("vorma-routes.ts");
        atomic_write(&dest, generated)
            .await
            .map_err(|err| write_err(&dest, err))?;
        Ok(())
    }
}

fn write_err(path: &Path, err: anyhow::Error) -> RouteRegistryError {
    RouteRegistryError::Write(path.to_path_buf(), std::io::Error::other(format!("{err:#}")))
}

/// An in-memory pattern registry, used by tests and as the default when the framework layer
/// has not wired a real matcher.
#[derive(Default)]
pub struct StaticPatternRegistry {
    patterns: std::sync::Mutex<Vec<ServerPattern>>,
}

impl PatternRegistry for StaticPatternRegistry {
    fn register_pattern(&self, pattern: ServerPattern) {
        if let Ok(mut patterns) = self.patterns.lock() {
            patterns.retain(|existing| existing.pattern != pattern.pattern);
            patterns.push(pattern);
        }
    }

    fn registered_patterns(&self) -> Vec<ServerPattern> {
        self.patterns.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn find_nested_matches(&self, path: &str) -> Vec<String> {
        self.registered_patterns()
            .into_iter()
            .filter(|p| p.pattern == path)
            .map(|p| p.pattern)
            .collect()
    }

    fn rebuild_preserving_handlers(&self) {}
}

/// An emitter that renders a plain re-export stub. Stands in until the framework layer wires
/// the real generator.
#[derive(Default)]
pub struct StubTypeScriptEmitter;

impl TypeScriptEmitter for StubTypeScriptEmitter {
    fn process_types(&self, ad_hoc_types: &[AdHocType]) -> Result<String, String> {
        let mut out = String::from("// Generated by vorma. Do not edit.\n");
        for t in ad_hoc_types {
            out.push_str(&format!("export type {} = {};\n", t.name, t.decl));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests;
