//! The runtime facade: what the running app reads at request time.
//!
//! Every derived value lives in a cache slot. In production a slot initializes once and every
//! later caller observes the same result. In dev mode every call recomputes from disk, so a
//! rebuild is visible on the very next read. Recomputation is idempotent, so the slots need no
//! lock of their own; the mutable route state sits behind a read/write lock instead.

use crate::assets::FileMap;
use crate::common::truncated_hash_hex;
use crate::config::rt::RtcCore;
use crate::routes::paths::RoutePath;
use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose};
use once_cell::sync::OnceCell;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

/// Environment flag switching every cache slot into recompute-per-call mode.
pub const DEV_MODE_ENV: &str = "VORMA_DEV_MODE";

/// Response header carrying the build ID on every framework response.
pub const HEADER_BUILD_ID: &str = "X-Vorma-Build-Id";
/// Response header telling the client to GET the given URL with a fresh build.
pub const HEADER_RELOAD: &str = "X-Vorma-Reload";
/// Response header instructing the client-side fetch layer to perform a location change.
pub const HEADER_CLIENT_REDIRECT: &str = "X-Client-Redirect";
/// Request header clients send on navigations to opt into client-redirect handling.
pub const HEADER_ACCEPTS_CLIENT_REDIRECT: &str = "X-Accepts-Client-Redirect";

pub fn is_dev_mode() -> bool {
    std::env::var(DEV_MODE_ENV).is_ok_and(|v| v == "1" || v == "true")
}

/// What kind of build an ID is generated for. The prefix drives client cache invalidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildIdKind {
    Prod,
    Dev,
    /// A fast rebuild serviced by a reload endpoint, no recompile.
    DevFast,
}

/// An opaque 16-byte random identifier, base64url-encoded, with a mode prefix in dev.
pub fn generate_build_id(kind: BuildIdKind) -> String {
    let mut buffer = [0u8; 16];
    rand::rng().fill_bytes(&mut buffer);
    let id = general_purpose::URL_SAFE_NO_PAD.encode(buffer);
    match kind {
        BuildIdKind::Prod => id,
        BuildIdKind::Dev => format!("dev_{id}"),
        BuildIdKind::DevFast => format!("dev_fast_{id}"),
    }
}

/// One cached value: once-initialized in prod, recomputed per call in dev.
struct CacheSlot<T: Clone> {
    cell: OnceCell<T>,
}

impl<T: Clone> CacheSlot<T> {
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    fn get_or_compute(&self, dev: bool, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if dev {
            return f();
        }
        if let Some(value) = self.cell.get() {
            return Ok(value.clone());
        }
        let value = f()?;
        // First caller initializes; a racing caller's value is discarded in favor of the cell's.
        Ok(self.cell.get_or_init(|| value).clone())
    }
}

/// A per-key variant of [`CacheSlot`].
struct KeyedCacheSlot<V: Clone> {
    map: Mutex<HashMap<String, V>>,
}

impl<V: Clone> KeyedCacheSlot<V> {
    fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_compute(&self, dev: bool, key: &str, f: impl FnOnce() -> Result<V>) -> Result<V> {
        if dev {
            return f();
        }
        if let Ok(map) = self.map.lock() {
            if let Some(value) = map.get(key) {
                return Ok(value.clone());
            }
        }
        let value = f()?;
        if let Ok(mut map) = self.map.lock() {
            map.entry(key.to_string()).or_insert_with(|| value.clone());
        }
        Ok(value)
    }
}

/// Critical CSS in its three request-time forms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CriticalCss {
    pub content: String,
    pub style_element: String,
    pub sha256: String,
}

/// The mutable route state, guarded by the runtime's write lock.
#[derive(Clone, Debug, Default)]
pub struct RuntimeState {
    pub paths: BTreeMap<String, RoutePath>,
    pub build_id: String,
    pub route_manifest_file: Option<String>,
    pub client_entry_src: Option<String>,
    pub client_entry_out: Option<String>,
    pub client_entry_deps: Vec<String>,
    pub dep_to_css_bundle_map: BTreeMap<String, Vec<String>>,
    pub server_addr: Option<String>,
}

pub struct Runtime {
    core: Arc<RtcCore>,
    dev_mode: bool,
    state: RwLock<RuntimeState>,
    /// Resolver cache from module dep to its transitive outputs. Cleared inside the same write
    /// lock that swaps `paths`, so readers never see one without the other.
    dep_cache: Mutex<HashMap<String, Vec<String>>>,

    file_map: CacheSlot<Arc<FileMap>>,
    critical_css: CacheSlot<CriticalCss>,
    normal_css_url: CacheSlot<String>,
    normal_css_link: CacheSlot<String>,
    file_map_module_url: CacheSlot<String>,
    file_map_inject_script: CacheSlot<String>,
    public_urls: KeyedCacheSlot<String>,
    asset_checks: KeyedCacheSlot<bool>,
}

impl Runtime {
    pub fn new(core: Arc<RtcCore>, dev_mode: bool) -> Self {
        Self {
            core,
            dev_mode,
            state: RwLock::new(RuntimeState::default()),
            dep_cache: Mutex::new(HashMap::new()),
            file_map: CacheSlot::new(),
            critical_css: CacheSlot::new(),
            normal_css_url: CacheSlot::new(),
            normal_css_link: CacheSlot::new(),
            file_map_module_url: CacheSlot::new(),
            file_map_inject_script: CacheSlot::new(),
            public_urls: KeyedCacheSlot::new(),
            asset_checks: KeyedCacheSlot::new(),
        }
    }

    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Run `f` under the write lock, with access to both the route state and the dep cache.
    /// Mutations that must be atomic across fields go through here and acquire once.
    pub fn with_lock<R>(
        &self,
        f: impl FnOnce(&mut RuntimeState, &mut HashMap<String, Vec<String>>) -> R,
    ) -> R {
        #[allow(clippy::expect_used)]
        let mut state = self.state.write().expect("runtime state lock poisoned");
        #[allow(clippy::expect_used)]
        let mut dep_cache = self.dep_cache.lock().expect("dep cache lock poisoned");
        f(&mut state, &mut dep_cache)
    }

    /// Run `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&RuntimeState) -> R) -> R {
        #[allow(clippy::expect_used)]
        let state = self.state.read().expect("runtime state lock poisoned");
        f(&state)
    }

    pub fn build_id(&self) -> String {
        self.read(|state| state.build_id.clone())
    }

    // FS roots. Trivially derived, kept here so every caller goes through one place.

    pub fn base_fs_root(&self) -> PathBuf {
        self.core.layout.static_root.clone()
    }

    pub fn public_fs_root(&self) -> PathBuf {
        self.core.layout.assets_public.clone()
    }

    pub fn private_fs_root(&self) -> PathBuf {
        self.core.layout.assets_private.clone()
    }

    /// The current public file map, from the binary snapshot on disk.
    pub fn file_map(&self) -> Result<Arc<FileMap>> {
        self.file_map.get_or_compute(self.dev_mode, || {
            let bytes = std::fs::read(&self.core.layout.file_map_snapshot).with_context(|| {
                format!(
                    "error reading file map snapshot {:?}",
                    self.core.layout.file_map_snapshot
                )
            })?;
            Ok(Arc::new(
                FileMap::decode(&bytes).context("error decoding file map snapshot")?,
            ))
        })
    }

    /// Critical CSS content, `<style>` element, and content hash.
    pub fn critical_css(&self) -> Result<CriticalCss> {
        self.critical_css.get_or_compute(self.dev_mode, || {
            let content = match std::fs::read_to_string(&self.core.layout.critical_css) {
                Ok(content) => content,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!(
                            "error reading critical css {:?}",
                            self.core.layout.critical_css
                        )
                    });
                }
            };
            let sha256 = format!("{:x}", Sha256::digest(content.as_bytes()));
            let style_element = if content.is_empty() {
                String::new()
            } else {
                format!("<style id=\"vorma-critical-css\">{content}</style>")
            };
            Ok(CriticalCss {
                content,
                style_element,
                sha256,
            })
        })
    }

    /// Public URL of the current normal-CSS bundle, resolved through its ref file.
    pub fn normal_css_url(&self) -> Result<String> {
        self.normal_css_url.get_or_compute(self.dev_mode, || {
            let name = std::fs::read_to_string(&self.core.layout.normal_css_ref)
                .with_context(|| {
                    format!(
                        "error reading normal css ref {:?}",
                        self.core.layout.normal_css_ref
                    )
                })?
                .trim()
                .to_string();
            Ok(format!("{}{name}", self.core.public_prefix))
        })
    }

    /// `<link rel="stylesheet">` element for the normal-CSS bundle.
    pub fn stylesheet_link_element(&self) -> Result<String> {
        self.normal_css_link.get_or_compute(self.dev_mode, || {
            let url = self.normal_css_url()?;
            Ok(format!("<link rel=\"stylesheet\" href=\"{url}\" />"))
        })
    }

    /// Public URL of the file-map JS lookup module.
    pub fn file_map_module_url(&self) -> Result<String> {
        self.file_map_module_url.get_or_compute(self.dev_mode, || {
            let name = std::fs::read_to_string(&self.core.layout.file_map_module_ref)
                .with_context(|| {
                    format!(
                        "error reading file map module ref {:?}",
                        self.core.layout.file_map_module_ref
                    )
                })?
                .trim()
                .to_string();
            Ok(format!("{}{name}", self.core.public_prefix))
        })
    }

    /// Modulepreload link plus inline import script for the file-map module, with its hash.
    pub fn file_map_inject_script(&self) -> Result<String> {
        self.file_map_inject_script
            .get_or_compute(self.dev_mode, || {
                let url = self.file_map_module_url()?;
                let script = format!(
                    "<link rel=\"modulepreload\" href=\"{url}\" /><script type=\"module\">import \"{url}\";</script>"
                );
                let hash = truncated_hash_hex(script.as_bytes());
                Ok(format!("{script}<!-- {hash} -->"))
            })
    }

    /// Resolve a logical public asset name to its URL.
    pub fn public_url(&self, key: &str) -> Result<String> {
        self.public_urls.get_or_compute(self.dev_mode, key, || {
            let map = self.file_map()?;
            let (url, _found) = map.lookup(key, &self.core.public_prefix);
            Ok(url)
        })
    }

    /// Whether the logical name refers to a known public asset.
    pub fn is_public_asset(&self, key: &str) -> Result<bool> {
        self.asset_checks.get_or_compute(self.dev_mode, key, || {
            Ok(self.file_map()?.contains(key))
        })
    }
}

#[cfg(test)]
mod tests;
