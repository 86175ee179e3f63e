//! Filesystem watching.
//!
//! A recursive notify watcher feeds a debouncer; each debounce window's events arrive here as
//! one vector, are classified, and leave as a [`BatchPlan`] for the orchestrator. The watch
//! loop is one `select!` event loop, shut down through the shared broadcast channel.

pub mod classify;
pub mod plan;

use crate::config::rt::RtcWatch;
use crate::css::CssPipeline;
use anyhow::{Context, Result};
use classify::Classifier;
use futures_util::stream::StreamExt;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{
    DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache, new_debouncer,
};
use plan::{BatchPlan, plan_batch};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;

/// The duration of time to debounce FS events.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(30);

/// A watch system wrapping the filesystem watcher and the event classifier.
pub struct WatchSystem {
    /// A channel of debounced FS event batches.
    watch_rx: mpsc::Receiver<Vec<DebouncedEvent>>,
    /// Classifies each event against rules, CSS import sets, and the public dir.
    classifier: Classifier,
    /// Planned batches handed to the orchestrator.
    batch_tx: mpsc::Sender<BatchPlan>,
    /// The watcher; dropping it stops watching.
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    /// The application shutdown channel.
    shutdown: BroadcastStream<()>,
}

impl WatchSystem {
    /// Create a new instance, returning the receiving side of the planned-batch channel.
    pub fn new(
        watch: Arc<RtcWatch>,
        css: Arc<CssPipeline>,
        shutdown: broadcast::Sender<()>,
    ) -> Result<(Self, mpsc::Receiver<BatchPlan>)> {
        let (watch_tx, watch_rx) = mpsc::channel(1);
        let (batch_tx, batch_rx) = mpsc::channel(8);

        let mut debouncer = new_debouncer(
            DEBOUNCE_WINDOW,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let _ = watch_tx.blocking_send(events);
                }
                Err(errors) => errors
                    .into_iter()
                    .for_each(|err| tracing::warn!(error = ?err, "error from filesystem watcher")),
            },
        )
        .context("failed to build file system watcher")?;

        debouncer
            .watch(&watch.watch_root, RecursiveMode::Recursive)
            .with_context(|| {
                format!(
                    "failed to watch {:?} for file system changes",
                    watch.watch_root
                )
            })?;

        let classifier = Classifier::new(watch, css);

        Ok((
            Self {
                watch_rx,
                classifier,
                batch_tx,
                _debouncer: debouncer,
                shutdown: BroadcastStream::new(shutdown.subscribe()),
            },
            batch_rx,
        ))
    }

    /// Run the watch system, classifying events and emitting batch plans.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(events) = self.watch_rx.recv() => self.handle_batch(events).await,
                _ = self.shutdown.next() => break, // Any event, even a drop, will trigger shutdown.
            }
        }

        tracing::debug!("watch system has shut down");
    }

    async fn handle_batch(&mut self, events: Vec<DebouncedEvent>) {
        let mut classified = vec![];
        for event in &events {
            if !Classifier::is_relevant_kind(&event.event.kind) {
                continue;
            }
            for path in &event.event.paths {
                // Removed paths fail to canonicalize; classify them as-is.
                let path = tokio::fs::canonicalize(path)
                    .await
                    .unwrap_or_else(|_| path.clone());
                let ce = self.classifier.classify(&path, &event.event.kind);
                if !ce.ignored {
                    tracing::debug!(path = ?ce.path, file_type = %ce.file_type, "accepted change");
                }
                classified.push(ce);
            }
        }

        let plan = plan_batch(classified);
        if plan.is_empty() {
            return;
        }
        if self.batch_tx.send(plan).await.is_err() {
            tracing::debug!("batch receiver dropped; watch loop idling until shutdown");
        }
    }
}
