use crate::config::models::{Configuration, HookTiming, WatchedFile};
use crate::config::rt::RtcCore;
use crate::hooks::{CallbackHook, CmdHook, Hook, Strategy};
use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A compiled watch rule: the config's `WatchedFile` plus its glob matcher, its hooks sorted by
/// timing, and an optional strategy attached by the framework layer.
#[derive(Debug)]
pub struct WatchRule {
    pub pattern: String,
    glob: GlobMatcher,
    /// All hooks for the rule, sorted by timing class (the derived `sortedHooks`).
    pub hooks: Vec<Hook>,
    pub recompile_go_binary: bool,
    pub restart_app: bool,
    pub only_run_client_defined_revalidate_func: bool,
    pub run_on_change_only: bool,
    pub skip_rebuilding_notification: bool,
    pub treat_as_non_go: bool,
    pub strategy: Option<Strategy>,
}

impl WatchRule {
    pub fn from_config(cfg: &WatchedFile) -> Result<Self> {
        let glob = GlobBuilder::new(&cfg.pattern)
            .literal_separator(false)
            .build()
            .with_context(|| format!("invalid watch glob {:?}", cfg.pattern))?
            .compile_matcher();

        let mut hooks = cfg
            .on_change_hooks
            .iter()
            .map(|hook| CmdHook::from_config(hook).map(Hook::Cmd))
            .collect::<Result<Vec<_>>>()?;
        hooks.sort_by_key(Hook::timing);

        Ok(Self {
            pattern: cfg.pattern.clone(),
            glob,
            hooks,
            recompile_go_binary: cfg.recompile_go_binary,
            restart_app: cfg.restart_app,
            only_run_client_defined_revalidate_func: cfg.only_run_client_defined_revalidate_func,
            run_on_change_only: cfg.run_on_change_only,
            skip_rebuilding_notification: cfg.skip_rebuilding_notification,
            treat_as_non_go: cfg.treat_as_non_go,
            strategy: None,
        })
    }

    /// A framework-internal rule: no command hooks, behavior driven by the strategy.
    pub fn internal(pattern: impl Into<String>, strategy: Strategy) -> Result<Self> {
        let pattern = pattern.into();
        let glob = GlobBuilder::new(&pattern)
            .literal_separator(false)
            .build()
            .with_context(|| format!("invalid internal watch glob {pattern:?}"))?
            .compile_matcher();
        Ok(Self {
            pattern,
            glob,
            hooks: vec![],
            recompile_go_binary: false,
            restart_app: false,
            only_run_client_defined_revalidate_func: false,
            run_on_change_only: false,
            skip_rebuilding_notification: false,
            treat_as_non_go: true,
            strategy: Some(strategy),
        })
    }

    /// Attach a callback hook. Used by the framework layer; config documents can only declare
    /// command hooks.
    pub fn with_callback(mut self, timing: HookTiming, hook: CallbackHook) -> Self {
        debug_assert_eq!(timing, hook.timing);
        self.hooks.push(Hook::Callback(hook));
        self.hooks.sort_by_key(Hook::timing);
        self
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.glob.is_match(path)
    }

    /// Whether the rule carries a strategy (callback or HTTP endpoint).
    pub fn has_strategy(&self) -> bool {
        self.strategy.is_some()
    }

    pub fn hooks_for(&self, timing: HookTiming) -> impl Iterator<Item = &Hook> {
        self.hooks.iter().filter(move |hook| hook.timing() == timing)
    }
}

/// Runtime config for the watch system.
#[derive(Debug)]
pub struct RtcWatch {
    pub core: Arc<RtcCore>,
    /// Root watched recursively; the project root.
    pub watch_root: PathBuf,
    /// Absolute dir paths whose descendants never produce events.
    pub ignored_dirs: Vec<PathBuf>,
    /// Absolute file paths that never produce events.
    pub ignored_files: Vec<PathBuf>,
    /// All rules: config-declared first, then framework-internal ones.
    pub rules: Vec<Arc<WatchRule>>,
    /// Healthcheck path polled on the app after a (re)start.
    pub healthcheck_path: String,
}

impl RtcWatch {
    pub(crate) fn new(config: &Configuration, core: Arc<RtcCore>) -> Result<Self> {
        let watch_root = core.working_directory.clone();

        let mut ignored_dirs: Vec<PathBuf> = config
            .watch
            .exclude_dirs
            .iter()
            .map(|dir| core.working_directory.join(dir))
            .collect();
        // The dist root is always ignored, otherwise our own artifact writes feed back in.
        ignored_dirs.push(core.layout.dist.clone());

        let ignored_files = config
            .watch
            .exclude_files
            .iter()
            .map(|file| core.working_directory.join(file))
            .collect();

        let rules = config
            .watch
            .include
            .iter()
            .map(|rule| WatchRule::from_config(rule).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            core,
            watch_root,
            ignored_dirs,
            ignored_files,
            rules,
            healthcheck_path: config.watch.healthcheck_path.clone(),
        })
    }

    /// Register a framework-internal rule. Internal rules are consulted after user rules.
    pub fn push_rule(&mut self, rule: WatchRule) {
        self.rules.push(Arc::new(rule));
    }

    /// Register an additional ignored directory (e.g. the bundler's own output dir).
    pub fn push_ignored_dir(&mut self, dir: PathBuf) {
        if !self.ignored_dirs.contains(&dir) {
            self.ignored_dirs.push(dir);
        }
    }

    /// The first rule matching the given path, user rules taking precedence.
    pub fn matching_rule(&self, path: &Path) -> Option<Arc<WatchRule>> {
        self.rules.iter().find(|rule| rule.matches(path)).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::models::HookCfg;

    #[test]
    fn rule_globs_match_nested_paths() {
        let rule = WatchRule::from_config(&WatchedFile {
            pattern: "**/*.templ".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(rule.matches(Path::new("/proj/backend/views/home.templ")));
        assert!(!rule.matches(Path::new("/proj/backend/views/home.go")));
    }

    #[test]
    fn hooks_sort_by_timing_class() {
        let rule = WatchRule::from_config(&WatchedFile {
            pattern: "**/*.x".into(),
            on_change_hooks: vec![
                HookCfg {
                    cmd: "c".into(),
                    timing: HookTiming::Post,
                    exclude: vec![],
                },
                HookCfg {
                    cmd: "a".into(),
                    timing: HookTiming::Pre,
                    exclude: vec![],
                },
                HookCfg {
                    cmd: "b".into(),
                    timing: HookTiming::Concurrent,
                    exclude: vec![],
                },
            ],
            ..Default::default()
        })
        .unwrap();
        let timings: Vec<_> = rule.hooks.iter().map(Hook::timing).collect();
        assert_eq!(
            timings,
            vec![HookTiming::Pre, HookTiming::Concurrent, HookTiming::Post]
        );
    }
}
