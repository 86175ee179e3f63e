use super::*;
use crate::config::models::Configuration;
use crate::config::rt::DevOptions;
use crate::routes::{ServerPattern, StaticPatternRegistry, StubTypeScriptEmitter};
use crate::watch::plan::plan_batch;

/// A fixture: a dev system over a temp project with a routes file. No app or bundler process
/// is started; tests drive internal pieces directly.
async fn setup() -> anyhow::Result<(tempfile::TempDir, DevSystem)> {
    let tmpdir = tempfile::tempdir()?;
    let root = tmpdir.path();

    tokio::fs::create_dir_all(root.join("frontend/src")).await?;
    tokio::fs::create_dir_all(root.join("frontend/assets")).await?;
    tokio::fs::create_dir_all(root.join("backend/assets")).await?;
    tokio::fs::write(
        root.join("frontend/src/vorma.routes.ts"),
        r#"route("/home", "./home.tsx");"#,
    )
    .await?;
    tokio::fs::write(root.join("frontend/src/home.tsx"), "export default 1;\n").await?;
    tokio::fs::write(root.join("backend/assets/entry.go.html"), "<html></html>").await?;

    let config: Configuration = serde_json::from_value(serde_json::json!({
        "core": {
            "mainAppEntry": "backend/cmd/app/main.go",
            "publicStaticDir": "frontend/assets",
            "privateStaticDir": "backend/assets",
            "routesFile": "frontend/src/vorma.routes.ts",
            "rootTemplate": "backend/assets/entry.go.html"
        }
    }))?;
    let cfg = crate::config::rt::RtcDev::new(config, root.to_path_buf(), DevOptions::default())?;

    let patterns = Arc::new(StaticPatternRegistry::default());
    patterns.register_pattern(ServerPattern {
        pattern: "/home".into(),
        has_server_loader: true,
    });
    let seams = DevSeams {
        patterns,
        emitter: Arc::new(StubTypeScriptEmitter),
        ad_hoc_types: vec![],
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    let system = DevSystem::new(cfg, seams, shutdown_tx)?;
    Ok((tmpdir, system))
}

fn classify(system: &DevSystem, path: &std::path::Path) -> ClassifiedEvent {
    let classifier = crate::watch::classify::Classifier::new(
        system.watch_cfg.clone(),
        system.css.clone(),
    );
    classifier.classify(
        path,
        &notify::EventKind::Modify(notify::event::ModifyKind::Data(
            notify::event::DataChange::Content,
        )),
    )
}

#[tokio::test]
async fn routes_file_and_template_get_internal_strategy_rules() -> anyhow::Result<()> {
    let (_tmpdir, system) = setup().await?;
    let root = system.watch_cfg.core.working_directory.clone();

    let routes_event = classify(&system, &root.join("frontend/src/vorma.routes.ts"));
    assert!(
        routes_event
            .watched_file
            .as_ref()
            .is_some_and(|rule| rule.has_strategy())
    );

    let template_event = classify(&system, &root.join("backend/assets/entry.go.html"));
    assert!(
        template_event
            .watched_file
            .as_ref()
            .is_some_and(|rule| rule.has_strategy())
    );

    let plan = plan_batch(vec![routes_event, template_event]);
    assert_eq!(plan.strategy_events.len(), 2);
    assert!(!plan.needs_hard_reload);
    Ok(())
}

#[tokio::test]
async fn fast_route_rebuild_falls_back_to_no_compile_restart() -> anyhow::Result<()> {
    let (_tmpdir, system) = setup().await?;
    let root = system.watch_cfg.core.working_directory.clone();

    // Nothing listens on the app port, so the reload endpoint fails and the callback asks
    // for a restart without a Go compile.
    let event = classify(&system, &root.join("frontend/src/vorma.routes.ts"));
    let action = system.execute_strategy(&event, false).await?;
    assert!(action.trigger_restart);
    assert!(!action.recompile_go);
    assert!(!action.reload_browser);

    // The artifacts were still regenerated, under a fast build ID.
    assert!(system.runtime.build_id().starts_with("dev_fast_"));
    assert!(
        crate::common::path_exists(&system.watch_cfg.core.layout.paths_stage_one).await?
    );
    Ok(())
}

#[tokio::test]
async fn fast_route_rebuild_skips_endpoint_when_app_stopped() -> anyhow::Result<()> {
    let (_tmpdir, system) = setup().await?;
    let root = system.watch_cfg.core.working_directory.clone();

    let event = classify(&system, &root.join("frontend/src/vorma.routes.ts"));
    let action = system.execute_strategy(&event, true).await?;
    // The batch restart covers the reload; no action requested.
    assert!(action.is_zero());
    assert!(system.runtime.build_id().starts_with("dev_fast_"));
    Ok(())
}

#[tokio::test]
async fn endpoint_strategy_with_none_fallback_surfaces_no_action() -> anyhow::Result<()> {
    let (_tmpdir, system) = setup().await?;

    let rule = Arc::new(WatchRule::internal(
        "**/entry.go.html",
        Strategy::Endpoint {
            path: RELOAD_TEMPLATE_ENDPOINT,
            fallback: FallbackAction::None,
        },
    )?);
    let mut event = classify(
        &system,
        &system
            .watch_cfg
            .core
            .working_directory
            .join("backend/assets/entry.go.html"),
    );
    event.watched_file = Some(rule);

    // endpoint unreachable, fallback none: the error is surfaced (logged), no restart, no
    // broadcast-worthy action
    let action = system.execute_strategy(&event, false).await?;
    assert!(action.is_zero());
    Ok(())
}

#[tokio::test]
async fn endpoint_strategy_failure_maps_fallback_to_restart_action() -> anyhow::Result<()> {
    let (_tmpdir, system) = setup().await?;

    let template = system
        .watch_cfg
        .core
        .working_directory
        .join("backend/assets/entry.go.html");
    // the internal template rule carries a restart-no-recompile fallback
    let event = classify(&system, &template);
    let action = system.execute_strategy(&event, false).await?;
    assert!(action.trigger_restart);
    assert!(!action.recompile_go);
    Ok(())
}

#[tokio::test]
async fn go_change_plans_hard_reload_with_single_compile() -> anyhow::Result<()> {
    let (_tmpdir, system) = setup().await?;
    let root = system.watch_cfg.core.working_directory.clone();

    let go_event = classify(&system, &root.join("backend/src/loaders.go"));
    let routes_event = classify(&system, &root.join("frontend/src/vorma.routes.ts"));
    let plan = plan_batch(vec![go_event, routes_event]);

    // one source event in standard, one strategy event; one compile, one restart planned
    assert!(plan.needs_hard_reload);
    assert!(plan.needs_go_compile);
    assert_eq!(plan.standard_events.len(), 1);
    assert_eq!(plan.strategy_events.len(), 1);
    assert!(!plan.is_batch);
    Ok(())
}
