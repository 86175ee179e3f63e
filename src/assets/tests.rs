use super::*;
use crate::config::rt::RtcCore;
use anyhow::Result;

/// A fixture for setting up a project tree with a few public assets.
async fn setup_store() -> Result<(tempfile::TempDir, AssetStore)> {
    let tmpdir = tempfile::tempdir()?;
    let core = RtcCore::new_test(tmpdir.path())?;

    let public = core.public_static_dir.clone();
    tokio::fs::create_dir_all(public.join("images")).await?;
    tokio::fs::create_dir_all(public.join(PREHASHED_DIR)).await?;
    tokio::fs::write(public.join("favicon.svg"), b"<svg/>").await?;
    tokio::fs::write(public.join("images").join("logo.png"), b"png-bytes").await?;
    tokio::fs::write(public.join(PREHASHED_DIR).join("robots.txt"), b"User-agent: *").await?;

    Ok((tmpdir, AssetStore::new(Arc::new(core))))
}

#[tokio::test]
async fn build_hashes_and_maps_every_file() -> Result<()> {
    let (_tmpdir, store) = setup_store().await?;

    let map = store.build().await?;
    assert_eq!(map.len(), 3);

    let (url, found) = map.lookup("favicon.svg", "/public/");
    assert!(found);
    assert!(url.starts_with("/public/vorma_public_favicon_"));
    assert!(url.ends_with(".svg"));

    // nested paths flatten slashes into the dist name
    let (url, found) = map.lookup("/images/logo.png", "/public/");
    assert!(found);
    assert!(url.starts_with("/public/vorma_public_images_logo_"));

    Ok(())
}

#[tokio::test]
async fn prehashed_files_keep_their_names() -> Result<()> {
    let (_tmpdir, store) = setup_store().await?;

    let map = store.build().await?;
    let (url, found) = map.lookup("robots.txt", "/public/");
    assert!(found);
    assert_eq!(url, "/public/robots.txt");

    Ok(())
}

#[tokio::test]
async fn lookup_miss_falls_back_to_original() -> Result<()> {
    let (_tmpdir, store) = setup_store().await?;
    let map = store.build().await?;

    let (url, found) = map.lookup("/missing.css", "/public/");
    assert!(!found);
    assert_eq!(url, "/public/missing.css");
    Ok(())
}

#[tokio::test]
async fn snapshot_round_trips_identically() -> Result<()> {
    let (_tmpdir, store) = setup_store().await?;
    let map = store.build().await?;

    let decoded = FileMap::decode(&map.encode()?)?;
    assert_eq!(*map, decoded);
    Ok(())
}

#[tokio::test]
async fn snapshot_on_disk_matches_built_map() -> Result<()> {
    let (tmpdir, store) = setup_store().await?;
    let map = store.build().await?;

    let core = RtcCore::new_test(tmpdir.path())?;
    let loaded = AssetStore::load_snapshot(&core).await?;
    assert_eq!(*map, loaded);
    Ok(())
}

#[tokio::test]
async fn rebuild_sweeps_stale_hashed_copies() -> Result<()> {
    let (_tmpdir, store) = setup_store().await?;
    let first = store.build().await?;
    let (first_url, _) = first.lookup("favicon.svg", "");

    // change the file contents; the hash and therefore the dist name change
    tokio::fs::write(
        store.core.public_static_dir.join("favicon.svg"),
        b"<svg>v2</svg>",
    )
    .await?;
    let second = store.build().await?;
    let (second_url, _) = second.lookup("favicon.svg", "");
    assert_ne!(first_url, second_url);

    // the old hashed copy is gone
    assert!(!crate::common::path_exists(store.core.layout.assets_public.join(&first_url)).await?);
    assert!(crate::common::path_exists(store.core.layout.assets_public.join(&second_url)).await?);
    Ok(())
}

#[tokio::test]
async fn ref_file_points_at_current_js_module() -> Result<()> {
    let (_tmpdir, store) = setup_store().await?;
    store.build().await?;

    let ref_contents =
        tokio::fs::read_to_string(&store.core.layout.file_map_module_ref).await?;
    let name = ref_contents.trim();
    assert!(name.starts_with(FILE_MAP_MODULE_PREFIX));
    assert!(name.ends_with(".js"));
    assert!(crate::common::path_exists(store.core.layout.assets_public.join(name)).await?);
    Ok(())
}
