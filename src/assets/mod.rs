//! Content-addressed store for public assets.
//!
//! Walks the public asset directory, renames every file to a hash-embedding dist name, and
//! maintains the [`FileMap`] from logical names to dist names. The map is emitted in several
//! forms consumed by different parties: a binary snapshot and JSON sidecar for the app runtime,
//! a TypeScript module for the client source tree, and a hashed JS lookup module served to the
//! browser.

use crate::common::{atomic_write, collect_files, forward_slash_path, truncated_hash_hex};
use crate::config::rt::{FILE_MAP_MODULE_PREFIX, PREHASHED_DIR, PUBLIC_FILE_PREFIX, RtcCore};
use crate::error::AssetStoreError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A single public asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMapEntry {
    /// The on-disk name under `assets/public`, embedding the content hash.
    pub dist_name: String,
    /// Truncated SHA-256 of the file contents.
    pub content_hash: String,
    /// True for files under the `prehashed/` sentinel dir, which keep their names.
    pub is_prehashed: bool,
}

/// Mapping from logical asset name to its hashed dist entry.
///
/// Immutable once returned; rebuilds allocate a fresh map and swap the pointer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMap(BTreeMap<String, FileMapEntry>);

impl FileMap {
    /// Resolve a logical name to its public URL.
    ///
    /// The lookup key is normalized: forward slashes, leading slash stripped. A miss returns
    /// `prefix + original` with `found = false` so templates degrade gracefully.
    pub fn lookup(&self, original: &str, prefix: &str) -> (String, bool) {
        let key = Self::normalize_key(original);
        match self.0.get(&key) {
            Some(entry) => (format!("{prefix}{}", entry.dist_name), true),
            None => (format!("{prefix}{key}"), false),
        }
    }

    /// Whether the logical name refers to a known public asset.
    pub fn contains(&self, original: &str) -> bool {
        self.0.contains_key(&Self::normalize_key(original))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &FileMapEntry)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn normalize_key(original: &str) -> String {
        original.trim_start_matches('/').replace('\\', "/")
    }

    fn insert(&mut self, key: String, entry: FileMapEntry) {
        self.0.insert(key, entry);
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// The content-addressed asset store. Builds are serialized by an internal lock; the produced
/// map is shared immutably.
pub struct AssetStore {
    core: Arc<RtcCore>,
    build_lock: Mutex<()>,
}

impl AssetStore {
    pub fn new(core: Arc<RtcCore>) -> Self {
        Self {
            core,
            build_lock: Mutex::new(()),
        }
    }

    /// Walk the public asset dir and rebuild everything: hashed copies, the map, and all
    /// generated sidecar files.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn build(&self) -> Result<Arc<FileMap>, AssetStoreError> {
        let _guard = self.build_lock.lock().await;

        let layout = &self.core.layout;
        let src = &self.core.public_static_dir;

        tokio::fs::create_dir_all(&layout.assets_public)
            .await
            .map_err(|err| AssetStoreError::Write(layout.assets_public.clone(), err))?;

        let mut map = FileMap::default();

        if crate::common::path_exists(src).await.unwrap_or(false) {
            let files = collect_files(src)
                .await
                .map_err(|err| walk_err(src, err))?;

            for file in files {
                let rel = file.strip_prefix(src).unwrap_or(&file);
                let bytes = tokio::fs::read(&file)
                    .await
                    .map_err(|err| AssetStoreError::Hash(file.clone(), err))?;
                let content_hash = truncated_hash_hex(&bytes);

                let (key, dist_name, is_prehashed) = match rel.strip_prefix(PREHASHED_DIR) {
                    Ok(inner) => {
                        let name = forward_slash_path(inner);
                        (name.clone(), name, true)
                    }
                    Err(_) => {
                        let key = forward_slash_path(rel);
                        let flattened = key.replace('/', "_");
                        let ext = file
                            .extension()
                            .map(|ext| format!(".{}", ext.to_string_lossy()))
                            .unwrap_or_default();
                        let stem = flattened
                            .strip_suffix(&ext)
                            .unwrap_or(&flattened)
                            .to_string();
                        (
                            key,
                            format!("{PUBLIC_FILE_PREFIX}_{stem}_{content_hash}{ext}"),
                            false,
                        )
                    }
                };

                let dest = layout.assets_public.join(&dist_name);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|err| AssetStoreError::Write(parent.to_path_buf(), err))?;
                }
                atomic_write(&dest, &bytes)
                    .await
                    .map_err(|err| write_err(&dest, err))?;

                map.insert(
                    key,
                    FileMapEntry {
                        dist_name,
                        content_hash,
                        is_prehashed,
                    },
                );
            }
        }

        self.sweep_stale(&map).await?;
        self.write_sidecars(&map).await?;

        tracing::debug!(assets = map.len(), "rebuilt public asset store");
        Ok(Arc::new(map))
    }

    /// Remove previously-hashed copies no longer present in the fresh map.
    async fn sweep_stale(&self, map: &FileMap) -> Result<(), AssetStoreError> {
        let layout = &self.core.layout;
        let current: std::collections::HashSet<&str> = map
            .entries()
            .map(|(_, entry)| entry.dist_name.as_str())
            .collect();

        let existing = collect_files(&layout.assets_public)
            .await
            .map_err(|err| walk_err(&layout.assets_public, err))?;
        for file in existing {
            let rel = forward_slash_path(file.strip_prefix(&layout.assets_public).unwrap_or(&file));
            let name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.starts_with(PUBLIC_FILE_PREFIX) && !current.contains(rel.as_str()) {
                if let Err(err) = tokio::fs::remove_file(&file).await {
                    tracing::warn!(path = ?file, error = %err, "error sweeping stale asset");
                }
            }
        }
        Ok(())
    }

    /// Emit the generated map forms, in dependency order: binary snapshot, JSON sidecar,
    /// TypeScript module, then the hashed JS lookup module plus its ref file.
    async fn write_sidecars(&self, map: &FileMap) -> Result<(), AssetStoreError> {
        let layout = &self.core.layout;

        let encoded = map.encode().map_err(AssetStoreError::Encode)?;
        atomic_write(&layout.file_map_snapshot, &encoded)
            .await
            .map_err(|err| write_err(&layout.file_map_snapshot, err))?;

        let json = serde_json::to_vec_pretty(map).map_err(AssetStoreError::EncodeJson)?;
        atomic_write(&layout.file_map_json, &json)
            .await
            .map_err(|err| write_err(&layout.file_map_json, err))?;

        if let Some(ts_dir) = &self.core.ts_gen_out_dir {
            let ts_path = ts_dir.join("vorma-file-map.ts");
            atomic_write(&ts_path, self.render_ts_module(map))
                .await
                .map_err(|err| write_err(&ts_path, err))?;
        }

        // The JS lookup module is itself a hashed public file; browsers import it by the name
        // recorded in the ref file.
        let js = self.render_js_module(map);
        let js_name = format!(
            "{FILE_MAP_MODULE_PREFIX}_{}.js",
            truncated_hash_hex(js.as_bytes())
        );
        self.sweep_prefixed(FILE_MAP_MODULE_PREFIX, &js_name).await;
        let js_path = layout.assets_public.join(&js_name);
        atomic_write(&js_path, js)
            .await
            .map_err(|err| write_err(&js_path, err))?;
        atomic_write(&layout.file_map_module_ref, format!("{js_name}\n"))
            .await
            .map_err(|err| write_err(&layout.file_map_module_ref, err))?;

        Ok(())
    }

    /// Delete public files with the given prefix, keeping `keep`.
    async fn sweep_prefixed(&self, prefix: &str, keep: &str) {
        let Ok(mut read_dir) = tokio::fs::read_dir(&self.core.layout.assets_public).await else {
            return;
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) && name != keep {
                if let Err(err) = tokio::fs::remove_file(entry.path()).await {
                    tracing::warn!(file = %name, error = %err, "error deleting stale generated file");
                }
            }
        }
    }

    fn render_ts_module(&self, map: &FileMap) -> String {
        let mut out = String::from(
            "// Generated by vorma. Do not edit.\n\nexport const vormaPublicFileMap = {\n",
        );
        for (key, entry) in map.entries() {
            out.push_str(&format!(
                "\t{}: {},\n",
                serde_json::to_string(key).unwrap_or_default(),
                serde_json::to_string(&entry.dist_name).unwrap_or_default(),
            ));
        }
        out.push_str("} as const;\n\nexport type VormaPublicAsset = keyof typeof vormaPublicFileMap;\n");
        out
    }

    fn render_js_module(&self, map: &FileMap) -> String {
        let entries: BTreeMap<&String, &String> = map
            .entries()
            .map(|(key, entry)| (key, &entry.dist_name))
            .collect();
        format!(
            "// Generated by vorma. Do not edit.\nconst map = {};\nconst prefix = {};\nexport function vormaPublicUrl(key) {{\n\tconst k = key.replace(/^\\//, \"\");\n\treturn prefix + (map[k] ?? k);\n}}\nexport default map;\n",
            serde_json::to_string(&entries).unwrap_or_default(),
            serde_json::to_string(&self.core.public_prefix).unwrap_or_default(),
        )
    }

    /// Read the binary snapshot back from disk (used by the prod runtime and by tests).
    pub async fn load_snapshot(core: &RtcCore) -> Result<FileMap> {
        let bytes = tokio::fs::read(&core.layout.file_map_snapshot)
            .await
            .with_context(|| {
                format!(
                    "error reading file map snapshot {:?}",
                    core.layout.file_map_snapshot
                )
            })?;
        FileMap::decode(&bytes).context("error decoding file map snapshot")
    }
}

fn walk_err(path: &Path, err: anyhow::Error) -> AssetStoreError {
    AssetStoreError::Walk(
        path.to_path_buf(),
        std::io::Error::other(format!("{err:#}")),
    )
}

fn write_err(path: &Path, err: anyhow::Error) -> AssetStoreError {
    AssetStoreError::Write(
        path.to_path_buf(),
        std::io::Error::other(format!("{err:#}")),
    )
}

#[cfg(test)]
mod tests;
