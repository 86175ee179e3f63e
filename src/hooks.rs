//! Watch-rule hooks: user command hooks, in-process callbacks, and the refresh actions they
//! produce.
//!
//! Command hooks come from the config document. Callback hooks are registered programmatically
//! by the framework layer. The two are a tagged variant; a hook is exactly one of them.

use crate::config::models::{DEV_BUILD_HOOK, HookCfg, HookTiming};
use crate::config::rt::RtcCore;
use anyhow::{Context, Result, bail};
use futures_util::stream::{FuturesUnordered, StreamExt};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use tokio::{process::Command, task::JoinHandle};

/// Context handed to every hook invocation.
#[derive(Clone, Debug)]
pub struct HookContext {
    /// The changed file the hook fires for.
    pub file_path: PathBuf,
    /// True when the supervisor already terminated the app for a batch restart. Callbacks use
    /// this to know that any HTTP-endpoint-based reload would fail.
    pub app_stopped_for_batch: bool,
}

/// What the browser and the supervisors should do once a batch completes.
///
/// Actions accumulated across a batch are merged pointwise with OR semantics. On apply,
/// `trigger_restart` takes precedence and the three reload fields are ignored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshAction {
    pub reload_browser: bool,
    pub wait_for_app: bool,
    pub wait_for_bundler: bool,
    pub trigger_restart: bool,
    pub recompile_go: bool,
}

impl RefreshAction {
    /// Pointwise OR. Commutative and associative; the zero action is the identity.
    pub fn merge(self, other: Self) -> Self {
        Self {
            reload_browser: self.reload_browser || other.reload_browser,
            wait_for_app: self.wait_for_app || other.wait_for_app,
            wait_for_bundler: self.wait_for_bundler || other.wait_for_bundler,
            trigger_restart: self.trigger_restart || other.trigger_restart,
            recompile_go: self.recompile_go || other.recompile_go,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Future returned by a callback hook.
pub type CallbackFuture = Pin<Box<dyn Future<Output = Result<Option<RefreshAction>>> + Send>>;
/// An in-process hook function.
pub type CallbackFn = Arc<dyn Fn(HookContext) -> CallbackFuture + Send + Sync>;

/// What to do when a reload-endpoint strategy fails (non-2xx or transport error).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackAction {
    /// Full restart including a Go recompile.
    Restart,
    /// Restart the existing binary without recompiling.
    RestartNoRecompile,
    /// Surface the error; perform no restart and no broadcast.
    None,
}

/// A declarative fast-path for an event: either an in-process callback producing a
/// [`RefreshAction`], or a GET against a well-known endpoint on the running app.
#[derive(Clone)]
pub enum Strategy {
    Callback(CallbackFn),
    Endpoint {
        /// Endpoint path on the running app, e.g. `/__vorma/reload-routes`.
        path: &'static str,
        fallback: FallbackAction,
    },
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Strategy::Callback"),
            Self::Endpoint { path, fallback } => f
                .debug_struct("Strategy::Endpoint")
                .field("path", path)
                .field("fallback", fallback)
                .finish(),
        }
    }
}

/// A hook is exactly one of: a shell command from the config, or a registered callback.
#[derive(Clone)]
pub enum Hook {
    Cmd(CmdHook),
    Callback(CallbackHook),
}

impl Hook {
    pub fn timing(&self) -> HookTiming {
        match self {
            Self::Cmd(cmd) => cmd.timing,
            Self::Callback(cb) => cb.timing,
        }
    }

    /// Whether the hook fires for the given changed path, honoring command-hook excludes.
    pub fn applies_to(&self, path: &Path) -> bool {
        match self {
            Self::Cmd(cmd) => !cmd.exclude.is_match(path),
            Self::Callback(_) => true,
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cmd(cmd) => f.debug_tuple("Hook::Cmd").field(&cmd.cmd).finish(),
            Self::Callback(cb) => f.debug_tuple("Hook::Callback").field(&cb.timing).finish(),
        }
    }
}

/// A shell-command hook compiled from the config document.
#[derive(Clone, Debug)]
pub struct CmdHook {
    /// Shell command line, or the `DevBuildHook` sentinel.
    pub cmd: String,
    pub timing: HookTiming,
    pub exclude: GlobSet,
}

impl CmdHook {
    pub fn from_config(cfg: &HookCfg) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &cfg.exclude {
            builder.add(
                GlobBuilder::new(pattern)
                    .literal_separator(false)
                    .build()
                    .with_context(|| format!("invalid hook exclude glob {pattern:?}"))?,
            );
        }
        Ok(Self {
            cmd: cfg.cmd.clone(),
            timing: cfg.timing,
            exclude: builder.build().context("error building hook exclude set")?,
        })
    }

    /// The concrete command line, with the `DevBuildHook` sentinel expanded.
    pub fn resolve(&self, core: &RtcCore) -> Result<String> {
        if self.cmd == DEV_BUILD_HOOK {
            return core
                .dev_build_hook
                .clone()
                .context("hook references DevBuildHook but core.devBuildHook is not configured");
        }
        Ok(self.cmd.clone())
    }
}

/// An in-process callback hook registered by the framework layer.
#[derive(Clone)]
pub struct CallbackHook {
    pub timing: HookTiming,
    pub func: CallbackFn,
}

/// A `FuturesUnordered` containing a `JoinHandle` for each hook-running task.
pub type HookHandles = FuturesUnordered<JoinHandle<Result<Option<RefreshAction>>>>;

/// Spawns tokio tasks for all given hooks matching the timing class and changed path.
///
/// Command hooks run the shell command to completion; a non-zero exit is an error. Callback
/// hooks run the registered function and yield its `RefreshAction`.
pub fn spawn_hooks(
    core: &Arc<RtcCore>,
    hooks: &[Hook],
    timing: HookTiming,
    ctx: &HookContext,
) -> HookHandles {
    let futures: FuturesUnordered<_> = hooks
        .iter()
        .filter(|hook| hook.timing() == timing && hook.applies_to(&ctx.file_path))
        .map(|hook| match hook {
            Hook::Cmd(cmd_hook) => {
                let core = core.clone();
                let cmd_hook = cmd_hook.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    run_cmd_hook(&core, &cmd_hook, &ctx).await?;
                    Ok(None)
                })
            }
            Hook::Callback(cb) => {
                let fut = (cb.func)(ctx.clone());
                tokio::spawn(fut)
            }
        })
        .collect();

    futures
}

/// Waits for all of the given hooks to finish, merging any refresh actions they return.
///
/// A panicking hook surfaces as a `JoinError` and is treated as hook failure by the caller.
pub async fn wait_hooks(mut futures: HookHandles) -> Result<RefreshAction> {
    let mut merged = RefreshAction::default();
    while let Some(result) = futures.next().await {
        if let Some(action) = result.context("hook task panicked")?? {
            merged = merged.merge(action);
        }
    }
    Ok(merged)
}

async fn run_cmd_hook(core: &RtcCore, hook: &CmdHook, ctx: &HookContext) -> Result<()> {
    let cmd_line = hook.resolve(core)?;

    #[cfg(unix)]
    let (shell, flag) = ("sh", "-c");
    #[cfg(windows)]
    let (shell, flag) = ("cmd", "/C");

    tracing::info!(command = %cmd_line, timing = %hook.timing, "spawning hook");

    let status = Command::new(shell)
        .args([flag, &cmd_line])
        .current_dir(&core.working_directory)
        .env("VORMA_CHANGED_FILE", &ctx.file_path)
        .env("VORMA_DIST_DIR", &core.layout.dist)
        .env("VORMA_PUBLIC_PREFIX", &core.public_prefix)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("error spawning hook call for {cmd_line}"))?
        .wait()
        .await
        .with_context(|| format!("error calling hook to {cmd_line}"))?;

    if !status.success() {
        bail!("hook call to {cmd_line} returned a bad status");
    }
    tracing::info!("finished hook {cmd_line}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn action(bits: [bool; 5]) -> RefreshAction {
        RefreshAction {
            reload_browser: bits[0],
            wait_for_app: bits[1],
            wait_for_bundler: bits[2],
            trigger_restart: bits[3],
            recompile_go: bits[4],
        }
    }

    #[rstest]
    #[case(action([true, false, false, false, false]), action([false, true, false, false, false]))]
    #[case(action([true, true, false, false, true]), action([false, false, true, true, false]))]
    #[case(RefreshAction::default(), action([true, false, true, false, true]))]
    fn merge_is_commutative(#[case] a: RefreshAction, #[case] b: RefreshAction) {
        assert_eq!(a.merge(b), b.merge(a));
    }

    #[test]
    fn merge_is_associative_with_zero_identity() {
        let a = action([true, false, false, false, false]);
        let b = action([false, true, false, true, false]);
        let c = action([false, false, true, false, true]);
        assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));

        let zero = RefreshAction::default();
        assert_eq!(a.merge(zero), a);
        assert_eq!(zero.merge(a), a);
    }

    #[test]
    fn cmd_hook_excludes_matching_paths() {
        let hook = Hook::Cmd(
            CmdHook::from_config(&HookCfg {
                cmd: "make regen".into(),
                timing: HookTiming::Pre,
                exclude: vec!["**/*_test.go".into()],
            })
            .unwrap(),
        );
        assert!(hook.applies_to(Path::new("backend/src/loaders.go")));
        assert!(!hook.applies_to(Path::new("backend/src/loaders_test.go")));
    }

    #[tokio::test]
    async fn callback_hooks_merge_actions() {
        let cb: CallbackFn = Arc::new(|_ctx| {
            Box::pin(async {
                Ok(Some(RefreshAction {
                    reload_browser: true,
                    ..Default::default()
                }))
            })
        });
        let hooks = vec![Hook::Callback(CallbackHook {
            timing: HookTiming::Pre,
            func: cb,
        })];
        let tmp = tempfile::tempdir().unwrap();
        let core = Arc::new(crate::config::rt::RtcCore::new_test(tmp.path()).unwrap());
        let ctx = HookContext {
            file_path: "a.txt".into(),
            app_stopped_for_batch: false,
        };
        let merged = wait_hooks(spawn_hooks(&core, &hooks, HookTiming::Pre, &ctx))
            .await
            .unwrap();
        assert!(merged.reload_browser);
        assert!(!merged.trigger_restart);
    }
}
