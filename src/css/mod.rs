//! CSS bundling through the embedded lightningcss bundler.
//!
//! Two optional entry points exist: critical CSS (inlined into the HTML head by the app) and
//! normal CSS (served as an external stylesheet). Each bundle run resolves `@import`s, rewrites
//! relative `url(...)` tokens through the content-addressed asset store, and records the set of
//! imported files so the watcher can classify later change events.

use crate::assets::FileMap;
use crate::common::{atomic_write, truncated_hash_hex};
use crate::config::rt::{NORMAL_CSS_PREFIX, RtcCore};
use crate::error::CssBuildError;
use lightningcss::{
    bundler::{Bundler, FileProvider},
    stylesheet::{MinifyOptions, ParserOptions, PrinterOptions},
    values::url::Url,
    visit_types,
    visitor::{Visit, VisitTypes, Visitor},
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Which of the two stylesheets a build concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CssNature {
    Critical,
    Normal,
}

/// The result of a successful bundle run.
#[derive(Clone, Debug)]
pub struct CssOutput {
    pub nature: CssNature,
    /// The bundled CSS text.
    pub content: String,
    /// Public URL of the written bundle; `None` for critical CSS, which is inlined.
    pub url: Option<String>,
}

struct NatureState {
    entry: Option<PathBuf>,
    /// Absolute paths of every file the last bundle run read.
    imports: RwLock<HashSet<PathBuf>>,
    /// Rebuilds of the same nature never run concurrently.
    build_lock: Mutex<()>,
}

impl NatureState {
    fn new(entry: Option<PathBuf>) -> Self {
        Self {
            entry,
            imports: RwLock::new(HashSet::new()),
            build_lock: Mutex::new(()),
        }
    }

    fn contains(&self, path: &Path) -> bool {
        self.imports
            .read()
            .map(|set| set.contains(path))
            .unwrap_or(false)
    }

    fn replace_imports(&self, fresh: HashSet<PathBuf>) {
        if let Ok(mut set) = self.imports.write() {
            // cleared before repopulating so removed imports stop matching
            *set = fresh;
        }
    }
}

pub struct CssPipeline {
    core: Arc<RtcCore>,
    critical: NatureState,
    normal: NatureState,
}

impl CssPipeline {
    pub fn new(core: Arc<RtcCore>) -> Self {
        Self {
            critical: NatureState::new(core.critical_css_entry.clone()),
            normal: NatureState::new(core.normal_css_entry.clone()),
            core,
        }
    }

    /// Whether the path was an input of the last critical-CSS bundle run.
    pub fn is_critical_css_file(&self, path: &Path) -> bool {
        self.critical.contains(path)
    }

    /// Whether the path was an input of the last normal-CSS bundle run.
    pub fn is_normal_css_file(&self, path: &Path) -> bool {
        self.normal.contains(path)
    }

    fn state(&self, nature: CssNature) -> &NatureState {
        match nature {
            CssNature::Critical => &self.critical,
            CssNature::Normal => &self.normal,
        }
    }

    /// Bundle one nature. Returns `Ok(None)` when no entry point is configured.
    #[tracing::instrument(level = "trace", skip(self, file_map))]
    pub async fn build(
        &self,
        nature: CssNature,
        file_map: Arc<FileMap>,
        minify: bool,
    ) -> Result<Option<CssOutput>, CssBuildError> {
        let state = self.state(nature);
        let Some(entry) = state.entry.clone() else {
            return Ok(None);
        };
        let _guard = state.build_lock.lock().await;

        let prefix = self.core.public_prefix.clone();
        let bundle_entry = entry.clone();
        let (code, sources) = tokio::task::spawn_blocking(move || {
            bundle_one(&bundle_entry, &file_map, &prefix, minify)
        })
        .await
        .map_err(|err| CssBuildError::Bundle {
            entry: entry.clone(),
            message: format!("bundle task panicked: {err}"),
        })?
        .map_err(|message| CssBuildError::Bundle {
            entry: entry.clone(),
            message,
        })?;

        state.replace_imports(sources);

        let output = match nature {
            CssNature::Critical => {
                let dest = &self.core.layout.critical_css;
                atomic_write(dest, &code)
                    .await
                    .map_err(|err| write_err(dest, err))?;
                CssOutput {
                    nature,
                    content: code,
                    url: None,
                }
            }
            CssNature::Normal => {
                let name = format!(
                    "{NORMAL_CSS_PREFIX}_{}.css",
                    truncated_hash_hex(code.as_bytes())
                );
                self.sweep_old_bundles(&name).await;
                let dest = self.core.layout.assets_public.join(&name);
                atomic_write(&dest, &code)
                    .await
                    .map_err(|err| write_err(&dest, err))?;
                let ref_file = &self.core.layout.normal_css_ref;
                atomic_write(ref_file, format!("{name}\n"))
                    .await
                    .map_err(|err| write_err(ref_file, err))?;
                CssOutput {
                    nature,
                    content: code,
                    url: Some(format!("{}{name}", self.core.public_prefix)),
                }
            }
        };

        tracing::debug!(%nature, "css bundle rebuilt");
        Ok(Some(output))
    }

    /// Delete any prior bundle matching the normal-CSS glob, keeping `keep`.
    async fn sweep_old_bundles(&self, keep: &str) {
        let Ok(mut read_dir) = tokio::fs::read_dir(&self.core.layout.assets_public).await else {
            return;
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(NORMAL_CSS_PREFIX) && name.ends_with(".css") && name != keep {
                if let Err(err) = tokio::fs::remove_file(entry.path()).await {
                    tracing::warn!(file = %name, error = %err, "error deleting stale css bundle");
                }
            }
        }
    }
}

/// Rewrites relative `url(...)` tokens through the asset store. External, absolute, and
/// protocol-relative URLs pass through untouched.
struct AssetUrlRewriter<'a> {
    file_map: &'a FileMap,
    prefix: &'a str,
}

impl<'a, 'i> Visitor<'i> for AssetUrlRewriter<'a> {
    type Error = std::convert::Infallible;

    fn visit_types(&self) -> VisitTypes {
        visit_types!(URLS)
    }

    fn visit_url(&mut self, url: &mut Url<'i>) -> Result<(), Self::Error> {
        let raw = url.url.as_ref();
        if is_untouchable_url(raw) {
            return Ok(());
        }
        let cleaned = raw.trim_start_matches("./");
        let (resolved, found) = self.file_map.lookup(cleaned, self.prefix);
        if found {
            url.url = resolved.into();
        }
        Ok(())
    }
}

fn is_untouchable_url(raw: &str) -> bool {
    raw.starts_with("http://")
        || raw.starts_with("https://")
        || raw.starts_with("//")
        || raw.starts_with("data:")
        || raw.starts_with('/')
        || raw.starts_with('#')
}

/// Bundle a single entry point. Runs on a blocking thread; lightningcss is synchronous.
fn bundle_one(
    entry: &Path,
    file_map: &FileMap,
    prefix: &str,
    minify: bool,
) -> Result<(String, HashSet<PathBuf>), String> {
    let fs = FileProvider::new();
    let mut bundler = Bundler::new(&fs, None, ParserOptions::default());
    let mut stylesheet = bundler
        .bundle(entry)
        .map_err(|err| format!("{err}"))?;

    let sources = stylesheet
        .sources
        .iter()
        .map(PathBuf::from)
        .collect::<HashSet<_>>();

    let mut rewriter = AssetUrlRewriter { file_map, prefix };
    stylesheet
        .visit(&mut rewriter)
        .map_err(|err| format!("url rewrite failed: {err:?}"))?;

    if minify {
        stylesheet
            .minify(MinifyOptions::default())
            .map_err(|err| format!("{err}"))?;
    }

    let result = stylesheet
        .to_css(PrinterOptions {
            minify,
            ..Default::default()
        })
        .map_err(|err| format!("{err}"))?;

    Ok((result.code, sources))
}

fn write_err(path: &Path, err: anyhow::Error) -> CssBuildError {
    CssBuildError::Write(path.to_path_buf(), std::io::Error::other(format!("{err:#}")))
}

#[cfg(test)]
mod tests;
