use super::*;
use serde_json::json;

fn full_document() -> serde_json::Value {
    json!({
        "core": {
            "mainAppEntry": "backend/cmd/app/main.go",
            "distDir": "dist",
            "publicStaticDir": "frontend/assets",
            "privateStaticDir": "backend/assets",
            "criticalCssEntry": "frontend/css/critical.css",
            "normalCssEntry": "frontend/css/main.css",
            "publicPathPrefix": "/public/",
            "routesFile": "frontend/src/vorma.routes.ts",
            "tsGenOutDir": "frontend/src/vorma_gen",
            "rootTemplate": "backend/assets/entry.go.html",
            "devBuildHook": "go run ./backend/cmd/build --dev"
        },
        "bundler": {
            "packageManagerCmd": "pnpm",
            "devArgs": ["run", "dev"],
            "prodArgs": ["run", "build"],
            "workingDir": "frontend",
            "port": 5173
        },
        "watch": {
            "include": [
                {
                    "pattern": "**/*.templ",
                    "onChangeHooks": [{"cmd": "templ generate"}],
                    "recompileGoBinary": true,
                    "treatAsNonGo": true
                }
            ],
            "excludeDirs": ["node_modules"],
            "healthcheckPath": "/healthz"
        }
    })
}

#[test]
fn full_document_round_trips() {
    let config: Configuration = serde_json::from_value(full_document()).expect("must deserialize");
    config.validate().expect("must validate");

    assert_eq!(config.core.main_app_entry, "backend/cmd/app/main.go");
    assert_eq!(
        config.bundler.as_ref().map(|b| b.package_manager_cmd.as_str()),
        Some("pnpm")
    );
    assert_eq!(config.watch.healthcheck_path, "/healthz");

    let value = serde_json::to_value(&config).expect("must serialize");
    let back: Configuration = serde_json::from_value(value).expect("must deserialize again");
    assert_eq!(config, back);
}

#[test]
fn unknown_sections_are_preserved() {
    let mut doc = full_document();
    doc["sessions"] = json!({"cookieName": "vorma_session"});
    let config: Configuration = serde_json::from_value(doc).expect("must deserialize");
    assert!(config.extensions.contains_key("sessions"));
}

#[test]
fn missing_core_fields_fail_validation() {
    let config: Result<Configuration, _> = serde_json::from_value(json!({
        "core": {"mainAppEntry": "", "publicStaticDir": "a", "privateStaticDir": "b"}
    }));
    let config = config.expect("shape itself is fine");
    assert!(config.validate().is_err());
}

#[test]
fn schema_includes_registered_extensions() {
    let mut extensions = std::collections::BTreeMap::new();
    extensions.insert(
        "sessions".to_string(),
        schemars::schema_for!(std::collections::BTreeMap<String, String>),
    );
    let schema = Configuration::schema(&extensions);
    assert!(schema.contains("\"sessions\""));
    assert!(schema.contains("\"core\""));
}
