use super::*;
use crate::assets::AssetStore;
use crate::config::rt::RtcCore;
use anyhow::Result;

/// A fixture: a project with one public asset and both CSS entries, one of them importing a
/// second file.
async fn setup() -> Result<(tempfile::TempDir, CssPipeline, Arc<FileMap>)> {
    let tmpdir = tempfile::tempdir()?;
    let mut core = RtcCore::new_test(tmpdir.path())?;

    let css_dir = core.working_directory.join("frontend/css");
    tokio::fs::create_dir_all(&css_dir).await?;
    tokio::fs::create_dir_all(&core.public_static_dir).await?;
    tokio::fs::write(core.public_static_dir.join("bg.png"), b"png").await?;

    tokio::fs::write(
        css_dir.join("critical.css"),
        "@import \"./reset.css\";\nbody { color: black; }\n",
    )
    .await?;
    tokio::fs::write(css_dir.join("reset.css"), "* { margin: 0; }\n").await?;
    tokio::fs::write(
        css_dir.join("main.css"),
        ".hero { background-image: url(\"bg.png\"); }\n.ext { background-image: url(\"https://cdn.example.com/x.png\"); }\n",
    )
    .await?;

    core.critical_css_entry = Some(css_dir.join("critical.css"));
    core.normal_css_entry = Some(css_dir.join("main.css"));
    let core = Arc::new(core);

    let store = AssetStore::new(core.clone());
    let file_map = store.build().await?;

    Ok((tmpdir, CssPipeline::new(core), file_map))
}

#[tokio::test]
async fn critical_bundle_is_written_unhashed_and_tracks_imports() -> Result<()> {
    let (_tmpdir, pipeline, file_map) = setup().await?;

    let out = pipeline
        .build(CssNature::Critical, file_map, false)
        .await?
        .expect("critical entry configured");
    assert_eq!(out.nature, CssNature::Critical);
    assert!(out.url.is_none());
    assert!(out.content.contains("margin"));

    let written =
        tokio::fs::read_to_string(&pipeline.core.layout.critical_css).await?;
    assert_eq!(written, out.content);

    // both the entry and its import are tracked
    let entry = pipeline.core.critical_css_entry.clone().unwrap();
    let import = entry.parent().unwrap().join("reset.css");
    assert!(pipeline.is_critical_css_file(&entry));
    assert!(pipeline.is_critical_css_file(&import));
    assert!(!pipeline.is_normal_css_file(&entry));
    Ok(())
}

#[tokio::test]
async fn normal_bundle_is_hashed_and_ref_file_updated() -> Result<()> {
    let (_tmpdir, pipeline, file_map) = setup().await?;

    let out = pipeline
        .build(CssNature::Normal, file_map.clone(), false)
        .await?
        .expect("normal entry configured");
    let url = out.url.expect("normal css has a url");
    assert!(url.starts_with("/public/vorma_normal_css_"));
    assert!(url.ends_with(".css"));

    let ref_contents =
        tokio::fs::read_to_string(&pipeline.core.layout.normal_css_ref).await?;
    assert!(url.ends_with(ref_contents.trim()));
    Ok(())
}

#[tokio::test]
async fn relative_urls_resolve_through_the_asset_store() -> Result<()> {
    let (_tmpdir, pipeline, file_map) = setup().await?;

    let out = pipeline
        .build(CssNature::Normal, file_map, false)
        .await?
        .expect("normal entry configured");
    assert!(out.content.contains("/public/vorma_public_bg_"));
    // external urls pass through untouched
    assert!(out.content.contains("https://cdn.example.com/x.png"));
    Ok(())
}

#[tokio::test]
async fn rebuild_deletes_exactly_the_prior_bundle() -> Result<()> {
    let (_tmpdir, pipeline, file_map) = setup().await?;

    let first = pipeline
        .build(CssNature::Normal, file_map.clone(), false)
        .await?
        .unwrap()
        .url
        .unwrap();

    let entry = pipeline.core.normal_css_entry.clone().unwrap();
    tokio::fs::write(&entry, ".hero { color: red; }\n").await?;
    let second = pipeline
        .build(CssNature::Normal, file_map, false)
        .await?
        .unwrap()
        .url
        .unwrap();
    assert_ne!(first, second);

    let mut bundles = vec![];
    let mut read_dir = tokio::fs::read_dir(&pipeline.core.layout.assets_public).await?;
    while let Some(dir_entry) = read_dir.next_entry().await? {
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(NORMAL_CSS_PREFIX) {
            bundles.push(name);
        }
    }
    assert_eq!(bundles.len(), 1, "exactly one bundle on disk: {bundles:?}");
    assert!(second.ends_with(&bundles[0]));
    Ok(())
}

#[tokio::test]
async fn missing_entry_is_a_noop() -> Result<()> {
    let tmpdir = tempfile::tempdir()?;
    let core = Arc::new(RtcCore::new_test(tmpdir.path())?);
    let pipeline = CssPipeline::new(core);
    let out = pipeline
        .build(CssNature::Critical, Arc::new(FileMap::default()), false)
        .await?;
    assert!(out.is_none());
    Ok(())
}
