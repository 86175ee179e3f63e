//! Per-event classification.
//!
//! Each filesystem event is classified exactly once, from the tuple of (path, CSS import
//! membership, public-dir membership, matching watch rule). Replaying the same event against
//! the same state yields the same classification.

use crate::config::rt::{RtcWatch, WatchRule};
use crate::css::CssPipeline;
use notify::EventKind;
use notify::event::ModifyKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Path segments which are ignored by the watcher by default.
const BLACKLIST: [&str; 3] = [".git", ".DS_Store", "node_modules"];

/// What kind of file an event concerns, in classification priority order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FileType {
    #[default]
    Other,
    GoSource,
    CriticalCss,
    NormalCss,
    PublicStatic,
}

/// A classified filesystem event.
#[derive(Clone, Debug)]
pub struct ClassifiedEvent {
    pub path: PathBuf,
    pub file_type: FileType,
    /// The first watch rule whose glob matches the path, if any.
    pub watched_file: Option<Arc<WatchRule>>,
    pub ignored: bool,
    /// A metadata-only change on a non-empty file; dropped by the planner.
    pub chmod_only: bool,
}

impl ClassifiedEvent {
    fn ignored(path: PathBuf) -> Self {
        Self {
            path,
            file_type: FileType::Other,
            watched_file: None,
            ignored: true,
            chmod_only: false,
        }
    }
}

pub struct Classifier {
    watch: Arc<RtcWatch>,
    css: Arc<CssPipeline>,
}

impl Classifier {
    pub fn new(watch: Arc<RtcWatch>, css: Arc<CssPipeline>) -> Self {
        Self { watch, css }
    }

    /// Whether the event kind is one we react to at all.
    pub fn is_relevant_kind(kind: &EventKind) -> bool {
        matches!(
            kind,
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
        )
    }

    pub fn classify(&self, path: &Path, kind: &EventKind) -> ClassifiedEvent {
        let path = path.to_path_buf();

        if self.is_excluded(&path) {
            return ClassifiedEvent::ignored(path);
        }

        let chmod_only = is_chmod_only(kind) && file_non_empty(&path);

        let watched_file = self.watch.matching_rule(&path);
        let treat_as_non_go = watched_file
            .as_ref()
            .is_some_and(|rule| rule.treat_as_non_go);

        let file_type = if path.extension().is_some_and(|ext| ext == "go") && !treat_as_non_go {
            FileType::GoSource
        } else if self.css.is_critical_css_file(&path) {
            FileType::CriticalCss
        } else if self.css.is_normal_css_file(&path) {
            FileType::NormalCss
        } else if path.starts_with(&self.watch.core.public_static_dir) {
            FileType::PublicStatic
        } else if watched_file.is_some() {
            FileType::Other
        } else {
            return ClassifiedEvent::ignored(path);
        };

        ClassifiedEvent {
            path,
            file_type,
            watched_file,
            ignored: false,
            chmod_only,
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self
            .watch
            .ignored_dirs
            .iter()
            .any(|dir| path.starts_with(dir))
        {
            return true;
        }
        if self.watch.ignored_files.iter().any(|file| file == path) {
            return true;
        }
        path.components()
            .filter_map(|segment| segment.as_os_str().to_str())
            .any(|segment| BLACKLIST.contains(&segment))
    }
}

fn is_chmod_only(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Metadata(
            notify::event::MetadataKind::Permissions
                | notify::event::MetadataKind::Ownership
                | notify::event::MetadataKind::Any
        ))
    )
}

fn file_non_empty(path: &Path) -> bool {
    std::fs::metadata(path).map(|meta| meta.len() > 0).unwrap_or(false)
}
