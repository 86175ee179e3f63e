use super::*;
use crate::config::rt::RtcCore;
use std::sync::Arc;

fn setup(dev: bool) -> (tempfile::TempDir, Runtime) {
    let tmpdir = tempfile::tempdir().unwrap();
    let core = Arc::new(RtcCore::new_test(tmpdir.path()).unwrap());
    std::fs::create_dir_all(&core.layout.internal).unwrap();
    (tmpdir, Runtime::new(core, dev))
}

#[test]
fn response_header_names_are_stable() {
    // The client relies on these exact names; they are a wire contract.
    assert_eq!(HEADER_BUILD_ID, "X-Vorma-Build-Id");
    assert_eq!(HEADER_RELOAD, "X-Vorma-Reload");
    assert_eq!(HEADER_CLIENT_REDIRECT, "X-Client-Redirect");
    assert_eq!(HEADER_ACCEPTS_CLIENT_REDIRECT, "X-Accepts-Client-Redirect");
}

#[test]
fn build_id_prefixes_by_kind() {
    assert!(generate_build_id(BuildIdKind::Dev).starts_with("dev_"));
    assert!(generate_build_id(BuildIdKind::DevFast).starts_with("dev_fast_"));
    let prod = generate_build_id(BuildIdKind::Prod);
    assert!(!prod.starts_with("dev"));
    // 16 random bytes, base64url without padding
    assert_eq!(prod.len(), 22);
    assert_ne!(prod, generate_build_id(BuildIdKind::Prod));
}

#[test]
fn dev_slots_observe_fresh_contents_every_call() {
    let (_tmpdir, runtime) = setup(true);
    let ref_file = runtime.core.layout.normal_css_ref.clone();

    std::fs::write(&ref_file, "vorma_normal_css_aaa.css\n").unwrap();
    assert_eq!(
        runtime.normal_css_url().unwrap(),
        "/public/vorma_normal_css_aaa.css"
    );

    std::fs::write(&ref_file, "vorma_normal_css_bbb.css\n").unwrap();
    assert_eq!(
        runtime.normal_css_url().unwrap(),
        "/public/vorma_normal_css_bbb.css",
        "dev mode must never serve stale cached data"
    );
}

#[test]
fn prod_slots_initialize_once() {
    let (_tmpdir, runtime) = setup(false);
    let ref_file = runtime.core.layout.normal_css_ref.clone();

    std::fs::write(&ref_file, "vorma_normal_css_aaa.css\n").unwrap();
    let first = runtime.normal_css_url().unwrap();

    std::fs::write(&ref_file, "vorma_normal_css_bbb.css\n").unwrap();
    assert_eq!(runtime.normal_css_url().unwrap(), first);
}

#[test]
fn critical_css_slot_carries_all_three_forms() {
    let (_tmpdir, runtime) = setup(true);
    std::fs::write(&runtime.core.layout.critical_css, "body{color:red}").unwrap();

    let css = runtime.critical_css().unwrap();
    assert_eq!(css.content, "body{color:red}");
    assert!(css.style_element.starts_with("<style"));
    assert!(css.style_element.contains(&css.content));
    assert_eq!(css.sha256.len(), 64);
}

#[test]
fn missing_critical_css_is_empty_not_an_error() {
    let (_tmpdir, runtime) = setup(true);
    let css = runtime.critical_css().unwrap();
    assert!(css.content.is_empty());
    assert!(css.style_element.is_empty());
}

#[test]
fn file_map_slot_reads_snapshot_and_resolves_urls() {
    let (_tmpdir, runtime) = setup(true);

    let json = serde_json::json!({
        "favicon.svg": {
            "distName": "vorma_public_favicon_abc123.svg",
            "contentHash": "abc123",
            "isPrehashed": false
        }
    });
    let map: crate::assets::FileMap = serde_json::from_value(json).unwrap();
    std::fs::write(&runtime.core.layout.file_map_snapshot, map.encode().unwrap()).unwrap();

    assert_eq!(
        runtime.public_url("/favicon.svg").unwrap(),
        "/public/vorma_public_favicon_abc123.svg"
    );
    assert!(runtime.is_public_asset("favicon.svg").unwrap());
    assert!(!runtime.is_public_asset("nope.png").unwrap());
    // lookup through the runtime maps the hashed URL back to the same logical asset (the dist
    // name embeds the original name)
    let (url, found) = runtime.file_map().unwrap().lookup("favicon.svg", "");
    assert!(found);
    assert!(url.contains("favicon"));
}

#[test]
fn with_lock_mutations_are_atomic_across_fields() {
    let (_tmpdir, runtime) = setup(true);

    runtime.with_lock(|state, dep_cache| {
        state.build_id = "dev_x".into();
        state.paths.insert(
            "/home".into(),
            crate::routes::paths::RoutePath::server_only("/home"),
        );
        dep_cache.insert("k".into(), vec!["v".into()]);
    });

    runtime.with_lock(|state, dep_cache| {
        state.build_id = "dev_y".into();
        dep_cache.clear();
    });

    runtime.read(|state| {
        assert_eq!(state.build_id, "dev_y");
        assert_eq!(state.paths.len(), 1);
    });
}
