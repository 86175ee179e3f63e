//! The dev orchestrator.
//!
//! Coordinates the watch system, the hook runner, the artifact rebuilders, both process
//! supervisors, and the refresh fabric. One batch plan comes in; strategy hooks fire first,
//! then per-event hooks and kind-specific rebuild callbacks; restarts are serialized against
//! the rebuild work; broadcasts go out only after every restart barrier has been passed.

use crate::assets::AssetStore;
use crate::build::BuildDriver;
use crate::common::{RELOAD, STARTING};
use crate::config::models::HookTiming;
use crate::config::rt::{RtcDev, WatchRule};
use crate::css::{CssNature, CssPipeline};
use crate::hooks::{
    CallbackFn, FallbackAction, HookContext, RefreshAction, Strategy, spawn_hooks, wait_hooks,
};
use crate::proc::app::AppSupervisor;
use crate::proc::bundler::BundlerSupervisor;
use crate::routes::{AdHocType, PatternRegistry, RouteRegistry, TypeScriptEmitter};
use crate::runtime::{BuildIdKind, Runtime};
use crate::watch::WatchSystem;
use crate::watch::classify::{ClassifiedEvent, FileType};
use crate::watch::plan::BatchPlan;
use crate::ws::{ChangeType, FabricHandle, ReloadMessage, spawn_fabric};
use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Dev-reload endpoint reloading route state from disk.
pub const RELOAD_ROUTES_ENDPOINT: &str = "/__vorma/reload-routes";
/// Dev-reload endpoint re-parsing the HTML template from disk.
pub const RELOAD_TEMPLATE_ENDPOINT: &str = "/__vorma/reload-template";

/// External collaborators wired in by the framework layer.
pub struct DevSeams {
    pub patterns: Arc<dyn PatternRegistry>,
    pub emitter: Arc<dyn TypeScriptEmitter>,
    pub ad_hoc_types: Vec<AdHocType>,
}

impl Default for DevSeams {
    fn default() -> Self {
        Self {
            patterns: Arc::new(crate::routes::StaticPatternRegistry::default()),
            emitter: Arc::new(crate::routes::StubTypeScriptEmitter),
            ad_hoc_types: vec![],
        }
    }
}

pub struct DevSystem {
    watch_cfg: Arc<crate::config::rt::RtcWatch>,
    runtime: Arc<Runtime>,
    assets: Arc<AssetStore>,
    css: Arc<CssPipeline>,
    driver: BuildDriver,
    app: Arc<AppSupervisor>,
    bundler: Arc<BundlerSupervisor>,
    shutdown: broadcast::Sender<()>,
    open: bool,
    refresh_port: u16,
}

impl DevSystem {
    pub fn new(mut cfg: RtcDev, seams: DevSeams, shutdown: broadcast::Sender<()>) -> Result<Self> {
        let core = cfg.core.clone();
        let app_port = crate::proc::init_app_port(cfg.app_port)?;

        let runtime = Arc::new(Runtime::new(core.clone(), true));
        let css = Arc::new(CssPipeline::new(core.clone()));
        let assets = Arc::new(AssetStore::new(core.clone()));
        let routes = Arc::new(RouteRegistry::new(
            core.clone(),
            runtime.clone(),
            seams.patterns,
            seams.emitter,
            seams.ad_hoc_types,
        ));
        let app = Arc::new(AppSupervisor::new(
            core.clone(),
            app_port,
            cfg.refresh_port,
            cfg.watch.healthcheck_path.clone(),
            true,
        ));

        // Framework-internal rules: the routes file gets the fast-rebuild callback, the HTML
        // template gets the reload-template endpoint.
        if let Some(routes_file) = &core.routes_file {
            let callback = fast_route_rebuild_callback(routes.clone(), app.clone());
            cfg.watch.push_rule(WatchRule::internal(
                routes_file.to_string_lossy().into_owned(),
                Strategy::Callback(callback),
            )?);
        }
        if let Some(template) = &core.root_template {
            cfg.watch.push_rule(WatchRule::internal(
                template.to_string_lossy().into_owned(),
                Strategy::Endpoint {
                    path: RELOAD_TEMPLATE_ENDPOINT,
                    fallback: FallbackAction::RestartNoRecompile,
                },
            )?);
        }

        let driver = BuildDriver::new(
            core.clone(),
            cfg.bundler.clone(),
            assets.clone(),
            css.clone(),
            routes.clone(),
        );
        let bundler = Arc::new(BundlerSupervisor::new(cfg.bundler.clone()));

        Ok(Self {
            watch_cfg: Arc::new(cfg.watch),
            runtime,
            assets,
            css,
            driver,
            app,
            bundler,
            shutdown,
            open: cfg.open,
            refresh_port: cfg.refresh_port,
        })
    }

    /// Run the dev server until shutdown: initial build, sidecars, app, then the batch loop.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn run(self) -> Result<()> {
        tracing::info!("{}starting dev server", STARTING);

        // (1) initial full dev build
        self.driver
            .build_dev()
            .await
            .context("initial dev build failed")?;

        // (2) bundler sidecar
        self.bundler.start().await?;
        self.bundler.wait_for_bundler().await?;

        // (3) refresh fabric
        let (fabric, fabric_loop, fabric_server) =
            spawn_fabric(self.refresh_port, self.shutdown.clone());

        // (4) app supervisor: first compile and spawn. A failing first compile is logged; the
        // watcher keeps running so the next source change retries.
        match self.app.compile().await {
            Ok(()) => {
                self.app.start().await?;
                self.app.wait_for_app().await?;
                if self.open {
                    if let Err(err) = open::that(self.app.base_url()) {
                        tracing::error!(error = ?err, "error opening browser");
                    }
                }
            }
            Err(err) => tracing::error!("initial compile failed: {err:#}"),
        }

        // (5) watcher + batch loop
        let (watch_system, mut batch_rx) =
            WatchSystem::new(self.watch_cfg.clone(), self.css.clone(), self.shutdown.clone())?;
        let watch_handle = tokio::spawn(watch_system.run());

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                Some(plan) = batch_rx.recv() => self.process_batch(plan, &fabric).await,
                _ = shutdown_rx.recv() => break,
            }
        }

        // Ordered teardown: app, bundler, then the fabric (which drains before finishing).
        tracing::debug!("dev server shutting down");
        if let Err(err) = self.app.stop().await {
            tracing::error!("error stopping app: {err:#}");
        }
        if let Err(err) = self.bundler.stop().await {
            tracing::error!("error stopping bundler: {err:#}");
        }
        let _ = watch_handle.await;
        let _ = fabric_loop.await;
        if let Ok(Err(err)) = fabric_server.await {
            tracing::error!("refresh server error: {err:#}");
        }
        Ok(())
    }

    /// Execute one planned batch.
    async fn process_batch(&self, plan: BatchPlan, fabric: &FabricHandle) {
        tracing::info!(
            "{}processing {} change(s)",
            RELOAD,
            plan.strategy_events.len() + plan.standard_events.len()
        );

        let mut accumulated = RefreshAction::default();
        let batch_stop = plan.is_batch && plan.needs_hard_reload;
        let mut compile_ok = true;
        let mut cycle_bundler = false;
        let mut css_messages: Vec<ReloadMessage> = vec![];
        let revalidate_only = plan.standard_events.iter().all(|event| {
            event
                .watched_file
                .as_ref()
                .is_some_and(|rule| rule.only_run_client_defined_revalidate_func)
        }) && !plan.standard_events.is_empty();

        // (1) strategy events, in deterministic pattern order
        for event in &plan.strategy_events {
            match self.execute_strategy(event, batch_stop).await {
                Ok(action) => accumulated = accumulated.merge(action),
                Err(err) => tracing::error!(path = ?event.path, "strategy failed: {err:#}"),
            }
        }

        // (2) batch hard reload: stop once, compile once
        if batch_stop {
            self.notify_rebuilding(&plan, fabric).await;
            if let Err(err) = self.app.stop().await {
                tracing::error!("error stopping app for batch: {err:#}");
            }
            if plan.needs_go_compile {
                if let Err(err) = self.app.compile().await {
                    tracing::error!("batch compile failed: {err:#}");
                    compile_ok = false;
                }
            }
        }

        // (3) standard events, in order
        for event in &plan.standard_events {
            self.process_standard_event(
                event,
                &plan,
                batch_stop,
                fabric,
                &mut accumulated,
                &mut compile_ok,
                &mut cycle_bundler,
                &mut css_messages,
            )
            .await;
        }

        // (4) post-batch restart + reload
        if plan.needs_hard_reload {
            if compile_ok {
                if let Err(err) = self.app.start().await {
                    tracing::error!("error starting app: {err:#}");
                    return;
                }
                if let Err(err) = self.app.wait_for_app().await {
                    tracing::error!("app unhealthy after restart: {err:#}");
                    return;
                }
                if let Err(err) = self.bundler.wait_for_bundler().await {
                    tracing::error!("bundler not ready after restart: {err:#}");
                }
                self.broadcast_reload(fabric, revalidate_only).await;
            } else {
                // Keep the previous binary serving; the overlay persists until a compile
                // succeeds.
                if let Err(err) = self.app.start().await {
                    tracing::error!("error restarting previous binary: {err:#}");
                }
            }
            return;
        }

        // (5) no hard reload: CSS hot swaps, bundler cycling, accumulated actions
        if cycle_bundler {
            // The bundler's own client reconnect reloads the browser; broadcasting here would
            // reload it twice.
            if self.bundler.is_configured() {
                if let Err(err) = self.bundler.cycle().await {
                    tracing::error!("error cycling bundler: {err:#}");
                }
            } else {
                accumulated.reload_browser = true;
            }
        }

        for message in css_messages {
            fabric.broadcast(message).await;
        }

        self.apply_refresh_action(accumulated, fabric, revalidate_only)
            .await;
    }

    /// One standard (non-strategy) event: hooks around the kind-specific change callback,
    /// with any single-event restart serialized against the callback join.
    #[allow(clippy::too_many_arguments)]
    async fn process_standard_event(
        &self,
        event: &ClassifiedEvent,
        plan: &BatchPlan,
        batch_stop: bool,
        fabric: &FabricHandle,
        accumulated: &mut RefreshAction,
        compile_ok: &mut bool,
        cycle_bundler: &mut bool,
        css_messages: &mut Vec<ReloadMessage>,
    ) {
        let rule = event.watched_file.clone();
        let single_forces_restart = !batch_stop
            && (event.file_type == FileType::GoSource
                || rule
                    .as_ref()
                    .is_some_and(|rule| rule.recompile_go_binary || rule.restart_app));

        // Start the app-stop in parallel with pre hooks when this single event forces a
        // restart anyway.
        let stop_handle = if single_forces_restart {
            self.notify_rebuilding(plan, fabric).await;
            let app = self.app.clone();
            Some(tokio::spawn(async move { app.stop().await }))
        } else {
            None
        };

        let ctx = HookContext {
            file_path: event.path.clone(),
            app_stopped_for_batch: batch_stop || single_forces_restart,
        };

        let hooks: &[crate::hooks::Hook] = rule.as_ref().map(|r| r.hooks.as_slice()).unwrap_or(&[]);
        let core = &self.watch_cfg.core;

        // Fire-and-forget hooks are never joined.
        drop(spawn_hooks(core, hooks, HookTiming::ConcurrentNoWait, &ctx));

        // Pre hooks run sequentially; the first failure skips the rest for this event.
        let mut hooks_failed = false;
        for hook in hooks.iter().filter(|h| h.timing() == HookTiming::Pre) {
            if !hook.applies_to(&ctx.file_path) {
                continue;
            }
            let single = std::slice::from_ref(hook);
            match wait_hooks(spawn_hooks(core, single, HookTiming::Pre, &ctx)).await {
                Ok(action) => *accumulated = accumulated.merge(action),
                Err(err) => {
                    tracing::error!(path = ?event.path, "pre hook failed: {err:#}");
                    hooks_failed = true;
                    break;
                }
            }
        }

        // runOnChangeOnly rules short-circuit: join the stop, restart if needed, done.
        if rule.as_ref().is_some_and(|rule| rule.run_on_change_only) {
            self.join_single_restart(stop_handle, event).await;
            return;
        }

        // The change callback runs in parallel with concurrent hooks.
        let concurrent = if hooks_failed {
            None
        } else {
            Some(spawn_hooks(core, hooks, HookTiming::Concurrent, &ctx))
        };
        let callback = self.change_callback(event, batch_stop, cycle_bundler, css_messages);
        let (callback_result, concurrent_result) = match concurrent {
            Some(handles) => {
                let (cb, conc) = tokio::join!(callback, wait_hooks(handles));
                (cb, Some(conc))
            }
            None => (callback.await, None),
        };
        if let Err(err) = callback_result {
            tracing::error!(path = ?event.path, "change callback failed: {err:#}");
            if event.file_type == FileType::GoSource {
                *compile_ok = false;
            }
        }
        match concurrent_result {
            Some(Ok(action)) => *accumulated = accumulated.merge(action),
            Some(Err(err)) => {
                tracing::error!(path = ?event.path, "concurrent hook failed: {err:#}");
                hooks_failed = true;
            }
            None => {}
        }

        // Post hooks run strictly after the callback and all concurrent hooks.
        if !hooks_failed {
            for hook in hooks.iter().filter(|h| h.timing() == HookTiming::Post) {
                if !hook.applies_to(&ctx.file_path) {
                    continue;
                }
                let single = std::slice::from_ref(hook);
                match wait_hooks(spawn_hooks(core, single, HookTiming::Post, &ctx)).await {
                    Ok(action) => *accumulated = accumulated.merge(action),
                    Err(err) => {
                        tracing::error!(path = ?event.path, "post hook failed: {err:#}");
                        break;
                    }
                }
            }
        }

        self.join_single_restart(stop_handle, event).await;
    }

    /// Join a single-event app stop. The restart itself happens in the post-batch step, which
    /// keys off `needs_hard_reload`.
    async fn join_single_restart(
        &self,
        stop_handle: Option<tokio::task::JoinHandle<Result<()>>>,
        event: &ClassifiedEvent,
    ) {
        let Some(handle) = stop_handle else { return };
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(path = ?event.path, "app stop failed: {err:#}"),
            Err(err) => tracing::error!(path = ?event.path, "app stop task panicked: {err}"),
        }
    }

    /// The kind-specific rebuild for one event.
    async fn change_callback(
        &self,
        event: &ClassifiedEvent,
        already_compiled: bool,
        cycle_bundler: &mut bool,
        css_messages: &mut Vec<ReloadMessage>,
    ) -> Result<()> {
        match event.file_type {
            FileType::GoSource => {
                // In a batch the compile already happened once, before the events.
                if !already_compiled {
                    self.app.compile().await?;
                }
                Ok(())
            }
            FileType::PublicStatic => {
                self.assets.build().await?;
                *cycle_bundler = true;
                Ok(())
            }
            FileType::CriticalCss => {
                let file_map = self.current_file_map().await?;
                if let Some(out) = self.css.build(CssNature::Critical, file_map, false).await? {
                    css_messages.push(ReloadMessage::critical(
                        general_purpose::STANDARD.encode(out.content.as_bytes()),
                    ));
                }
                Ok(())
            }
            FileType::NormalCss => {
                let file_map = self.current_file_map().await?;
                if let Some(out) = self.css.build(CssNature::Normal, file_map, false).await? {
                    if let Some(url) = out.url {
                        css_messages.push(ReloadMessage::normal(url));
                    }
                }
                Ok(())
            }
            FileType::Other => self.driver.build_inner(BuildIdKind::Dev, false).await,
        }
    }

    async fn current_file_map(&self) -> Result<Arc<crate::assets::FileMap>> {
        self.runtime.file_map()
    }

    /// Run one strategy hook, producing the action to merge into the batch accumulator.
    async fn execute_strategy(
        &self,
        event: &ClassifiedEvent,
        app_stopped: bool,
    ) -> Result<RefreshAction> {
        let Some(rule) = &event.watched_file else {
            return Ok(RefreshAction::default());
        };
        let Some(strategy) = &rule.strategy else {
            return Ok(RefreshAction::default());
        };

        match strategy {
            Strategy::Callback(func) => {
                let ctx = HookContext {
                    file_path: event.path.clone(),
                    app_stopped_for_batch: app_stopped,
                };
                match func(ctx).await {
                    Ok(Some(action)) => Ok(action),
                    Ok(None) => Ok(RefreshAction::default()),
                    Err(err) => {
                        // Previous state is retained by the failing component; log, continue,
                        // and do not broadcast a success reload.
                        tracing::error!(path = ?event.path, "strategy callback failed: {err:#}");
                        Ok(RefreshAction::default())
                    }
                }
            }
            Strategy::Endpoint { path, fallback } => {
                if app_stopped {
                    // The batch restart already covers this reload.
                    return Ok(RefreshAction::default());
                }
                match self.app.call_reload_endpoint(path).await {
                    Ok(()) => Ok(RefreshAction {
                        reload_browser: true,
                        ..Default::default()
                    }),
                    Err(err) => {
                        tracing::error!("reload endpoint failed: {err}");
                        Ok(match fallback {
                            FallbackAction::Restart => RefreshAction {
                                trigger_restart: true,
                                recompile_go: true,
                                ..Default::default()
                            },
                            FallbackAction::RestartNoRecompile => RefreshAction {
                                trigger_restart: true,
                                ..Default::default()
                            },
                            FallbackAction::None => RefreshAction::default(),
                        })
                    }
                }
            }
        }
    }

    /// Apply the merged refresh actions. `trigger_restart` wins over the reload fields.
    async fn apply_refresh_action(
        &self,
        action: RefreshAction,
        fabric: &FabricHandle,
        revalidate_only: bool,
    ) {
        if action.is_zero() {
            return;
        }
        if action.trigger_restart {
            if let Err(err) = self.app.restart(action.recompile_go).await {
                tracing::error!("fallback restart failed: {err:#}");
                return;
            }
            self.broadcast_reload(fabric, revalidate_only).await;
            return;
        }
        if action.reload_browser {
            if action.wait_for_app {
                if let Err(err) = self.app.wait_for_app().await {
                    tracing::error!("app unhealthy before reload: {err:#}");
                    return;
                }
            }
            if action.wait_for_bundler {
                if let Err(err) = self.bundler.wait_for_bundler().await {
                    tracing::error!("bundler not ready before reload: {err:#}");
                }
            }
            self.broadcast_reload(fabric, revalidate_only).await;
        }
    }

    async fn broadcast_reload(&self, fabric: &FabricHandle, revalidate_only: bool) {
        let change_type = if revalidate_only {
            ChangeType::Revalidate
        } else {
            ChangeType::Other
        };
        fabric.broadcast(ReloadMessage::of(change_type)).await;
    }

    /// Broadcast the rebuilding overlay, unless every involved rule opts out.
    async fn notify_rebuilding(&self, plan: &BatchPlan, fabric: &FabricHandle) {
        let all_skip = plan
            .standard_events
            .iter()
            .all(|event| {
                event
                    .watched_file
                    .as_ref()
                    .is_some_and(|rule| rule.skip_rebuilding_notification)
            })
            && !plan.standard_events.is_empty();
        if all_skip {
            return;
        }
        fabric.broadcast(ReloadMessage::of(ChangeType::Rebuilding)).await;
    }
}

/// The fast route rebuild: regenerate route artifacts under a `dev_fast_` build ID, then ask
/// the running app to reload them over HTTP. Endpoint failure falls back to a restart without
/// a Go compile. End-to-end this is tens of milliseconds.
fn fast_route_rebuild_callback(
    routes: Arc<RouteRegistry>,
    app: Arc<AppSupervisor>,
) -> CallbackFn {
    Arc::new(move |ctx: HookContext| {
        let routes = routes.clone();
        let app = app.clone();
        Box::pin(async move {
            routes
                .sync(BuildIdKind::DevFast)
                .await
                .context("fast route rebuild failed")?;

            if ctx.app_stopped_for_batch {
                // The batch restart will pick the new snapshot up from disk.
                return Ok(None);
            }

            match app.call_reload_endpoint(RELOAD_ROUTES_ENDPOINT).await {
                Ok(()) => Ok(Some(RefreshAction {
                    reload_browser: true,
                    ..Default::default()
                })),
                Err(err) => {
                    tracing::warn!("reload-routes endpoint failed ({err}); falling back to restart");
                    Ok(Some(RefreshAction {
                        trigger_restart: true,
                        recompile_go: false,
                        ..Default::default()
                    }))
                }
            }
        })
    })
}

#[cfg(test)]
mod tests;
