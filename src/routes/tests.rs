use super::*;
use crate::config::rt::RtcCore;

/// A fixture: a project with a routes file, two component files, and one server-only pattern.
async fn setup() -> anyhow::Result<(tempfile::TempDir, RouteRegistry, Arc<Runtime>)> {
    let tmpdir = tempfile::tempdir()?;
    let mut core = RtcCore::new_test(tmpdir.path())?;

    let src_dir = core.working_directory.join("frontend/src");
    tokio::fs::create_dir_all(&src_dir).await?;
    tokio::fs::write(
        src_dir.join("vorma.routes.ts"),
        r#"
        import { route } from "vorma/client";
        route("/home", import("./home.tsx"));
        route("/about", "./about.tsx", "Page");
        "#,
    )
    .await?;
    tokio::fs::write(src_dir.join("home.tsx"), "export default () => null;\n").await?;
    tokio::fs::write(src_dir.join("about.tsx"), "export const Page = () => null;\n").await?;

    core.routes_file = Some(src_dir.join("vorma.routes.ts"));
    core.client_entry = Some("frontend/src/entry.tsx".into());
    core.ts_gen_out_dir = Some(src_dir.join("vorma_gen"));
    let core = Arc::new(core);

    let runtime = Arc::new(Runtime::new(core.clone(), true));
    let patterns = Arc::new(StaticPatternRegistry::default());
    patterns.register_pattern(ServerPattern {
        pattern: "/api/health".into(),
        has_server_loader: false,
    });
    patterns.register_pattern(ServerPattern {
        pattern: "/home".into(),
        has_server_loader: true,
    });

    let registry = RouteRegistry::new(
        core,
        runtime.clone(),
        patterns,
        Arc::new(StubTypeScriptEmitter),
        vec![AdHocType {
            name: "HomeLoaderData".into(),
            decl: "{ title: string }".into(),
        }],
    );
    Ok((tmpdir, registry, runtime))
}

#[tokio::test]
async fn sync_merges_client_and_server_paths() -> anyhow::Result<()> {
    let (_tmpdir, registry, runtime) = setup().await?;
    registry.sync(BuildIdKind::Dev).await?;

    runtime.read(|state| {
        assert_eq!(state.paths.len(), 3);
        assert_eq!(
            state.paths["/home"].src_path,
            "frontend/src/home.tsx"
        );
        assert_eq!(state.paths["/about"].export_key, "Page");
        // server handler with no client entry becomes server-only
        assert!(state.paths["/api/health"].src_path.is_empty());
        assert!(state.build_id.starts_with("dev_"));
    });
    Ok(())
}

#[tokio::test]
async fn manifest_filename_is_deterministic_for_equal_paths() -> anyhow::Result<()> {
    let (_tmpdir, registry, _runtime) = setup().await?;
    let first = registry.sync(BuildIdKind::Dev).await?;
    let second = registry.sync(BuildIdKind::Dev).await?;
    assert_eq!(first.route_manifest_file, second.route_manifest_file);
    assert_ne!(first.build_id, second.build_id);
    Ok(())
}

#[tokio::test]
async fn manifest_flags_server_loaders() -> anyhow::Result<()> {
    let (_tmpdir, registry, _runtime) = setup().await?;
    let out = registry.sync(BuildIdKind::Dev).await?;

    let manifest_path = registry.core.layout.assets_public.join(&out.route_manifest_file);
    let raw = tokio::fs::read_to_string(&manifest_path).await?;
    let manifest: std::collections::BTreeMap<String, u8> = serde_json::from_str(&raw)?;
    assert_eq!(manifest["/home"], 1);
    assert_eq!(manifest["/about"], 0);
    assert_eq!(manifest["/api/health"], 0);
    Ok(())
}

#[tokio::test]
async fn stale_manifests_are_cleaned() -> anyhow::Result<()> {
    let (_tmpdir, registry, _runtime) = setup().await?;
    let first = registry.sync(BuildIdKind::Dev).await?;

    // change the route table so the manifest hash changes
    let routes_file = registry.core.routes_file.clone().unwrap();
    let src_dir = routes_file.parent().unwrap().to_path_buf();
    tokio::fs::write(src_dir.join("contact.tsx"), "export default () => null;\n").await?;
    let mut source = tokio::fs::read_to_string(&routes_file).await?;
    source.push_str("\nroute(\"/contact\", \"./contact.tsx\");\n");
    tokio::fs::write(&routes_file, source).await?;

    let second = registry.sync(BuildIdKind::DevFast).await?;
    assert_ne!(first.route_manifest_file, second.route_manifest_file);
    assert!(second.build_id.starts_with("dev_fast_"));

    let public = &registry.core.layout.assets_public;
    assert!(!crate::common::path_exists(public.join(&first.route_manifest_file)).await?);
    assert!(crate::common::path_exists(public.join(&second.route_manifest_file)).await?);
    Ok(())
}

#[tokio::test]
async fn missing_component_file_retains_previous_state() -> anyhow::Result<()> {
    let (_tmpdir, registry, runtime) = setup().await?;
    registry.sync(BuildIdKind::Dev).await?;
    let before = runtime.read(|state| state.build_id.clone());

    let routes_file = registry.core.routes_file.clone().unwrap();
    tokio::fs::write(
        &routes_file,
        r#"route("/broken", "./does-not-exist.tsx");"#,
    )
    .await?;

    let err = registry.sync(BuildIdKind::DevFast).await.expect_err("must fail");
    assert!(matches!(err, RouteRegistryError::MissingComponent { .. }));
    // previous in-process state is untouched
    runtime.read(|state| assert_eq!(state.build_id, before));
    Ok(())
}

#[tokio::test]
async fn stage_one_snapshot_written_and_readable() -> anyhow::Result<()> {
    let (_tmpdir, registry, _runtime) = setup().await?;
    let out = registry.sync(BuildIdKind::Dev).await?;

    let file = PathsFile::read(&registry.core.layout.paths_stage_one).await?;
    assert_eq!(file.build_id, out.build_id);
    assert_eq!(file.route_manifest_file, out.route_manifest_file);
    assert!(matches!(file.stage, Stage::One));
    assert!(file.stage_is_consistent());
    assert_eq!(file.client_entry_src, "frontend/src/entry.tsx");
    Ok(())
}

#[tokio::test]
async fn typescript_module_is_regenerated() -> anyhow::Result<()> {
    let (_tmpdir, registry, _runtime) = setup().await?;
    registry.sync(BuildIdKind::Dev).await?;

    let ts = tokio::fs::read_to_string(
        registry.core.ts_gen_out_dir.clone().unwrap().join("vorma-routes.ts"),
    )
    .await?;
    assert!(ts.contains("export type HomeLoaderData = { title: string };"));
    Ok(())
}
