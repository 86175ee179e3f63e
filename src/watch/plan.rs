//! Batch planning.
//!
//! A debounce window's worth of classified events is reduced to a plan: deduped, partitioned
//! into strategy and standard events, and annotated with what the batch needs from the
//! supervisors.

use super::classify::{ClassifiedEvent, FileType};
use std::collections::HashSet;

/// The planner's verdict for one debounced batch.
#[derive(Debug, Default)]
pub struct BatchPlan {
    /// Events whose rule carries a strategy, sorted by pattern for deterministic execution.
    pub strategy_events: Vec<ClassifiedEvent>,
    /// Everything else, in arrival order.
    pub standard_events: Vec<ClassifiedEvent>,
    /// The app process must stop and start again.
    pub needs_hard_reload: bool,
    /// At least one Go compile is required before the restart.
    pub needs_go_compile: bool,
    /// More than one standard event survived deduplication.
    pub is_batch: bool,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.strategy_events.is_empty() && self.standard_events.is_empty()
    }
}

pub fn plan_batch(events: Vec<ClassifiedEvent>) -> BatchPlan {
    // Dedupe by path first: the last event per path wins.
    let mut by_path: Vec<ClassifiedEvent> = Vec::with_capacity(events.len());
    for event in events {
        if event.ignored || event.chmod_only {
            continue;
        }
        if let Some(existing) = by_path.iter_mut().find(|e| e.path == event.path) {
            *existing = event;
        } else {
            by_path.push(event);
        }
    }

    // Then by pattern: at most one event per watch-rule pattern per batch.
    let mut seen_patterns = HashSet::new();
    let mut deduped = Vec::with_capacity(by_path.len());
    for event in by_path {
        if let Some(rule) = &event.watched_file {
            if !seen_patterns.insert(rule.pattern.clone()) {
                continue;
            }
        }
        deduped.push(event);
    }

    let mut plan = BatchPlan::default();
    for event in deduped {
        let rule = event.watched_file.as_deref();
        if event.file_type == FileType::GoSource {
            plan.needs_hard_reload = true;
            plan.needs_go_compile = true;
        }
        if let Some(rule) = rule {
            if rule.recompile_go_binary {
                plan.needs_hard_reload = true;
                plan.needs_go_compile = true;
            }
            if rule.restart_app {
                plan.needs_hard_reload = true;
            }
        }

        if rule.is_some_and(|rule| rule.has_strategy()) {
            plan.strategy_events.push(event);
        } else {
            plan.standard_events.push(event);
        }
    }

    plan.strategy_events.sort_by(|a, b| {
        let key = |e: &ClassifiedEvent| {
            e.watched_file
                .as_ref()
                .map(|rule| rule.pattern.clone())
                .unwrap_or_default()
        };
        key(a).cmp(&key(b))
    });
    plan.is_batch = plan.standard_events.len() > 1;
    plan
}
