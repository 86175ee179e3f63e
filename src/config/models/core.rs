use crate::config::models::ConfigModel;
use crate::error::ConfigInvalid;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Config options for the core project.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Core {
    /// The Go entry point of the application, relative to the project root.
    pub main_app_entry: String,

    /// The output directory for all build artifacts. Must be relative.
    #[serde(default = "default_dist_dir")]
    pub dist_dir: String,

    /// Directory of static assets served to browsers (hashed at build time).
    pub public_static_dir: String,

    /// Directory of static assets readable by the app only (templates, partials).
    pub private_static_dir: String,

    /// Entry point of the CSS inlined into the HTML head.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_css_entry: Option<String>,

    /// Entry point of the CSS served as an external stylesheet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_css_entry: Option<String>,

    /// The URL prefix public assets are served from. Normalized to start and end with `/`.
    #[serde(default = "default_public_prefix")]
    pub public_path_prefix: String,

    /// Disables every browser-related feature: no CSS bundling, no client routes, no refresh
    /// websocket.
    #[serde(default)]
    pub server_only_mode: bool,

    /// The client route-definitions file (TS/TSX tolerated).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes_file: Option<String>,

    /// The client entry module handed to the bundler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_entry: Option<String>,

    /// Output directory for generated TypeScript (route types, file map module).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_gen_out_dir: Option<String>,

    /// The HTML template the app parses at startup; changes trigger the template-reload endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_template: Option<String>,

    /// Command line run during dev builds to perform reflection-driven codegen. Referenced from
    /// watch hooks via the `DevBuildHook` sentinel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_build_hook: Option<String>,

    /// Command line run during production builds, in place of `devBuildHook`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prod_build_hook: Option<String>,
}

fn default_dist_dir() -> String {
    "dist".to_string()
}

fn default_public_prefix() -> String {
    "/public/".to_string()
}

impl Core {
    /// The public prefix, normalized to start and end with `/` (or be exactly `/`).
    pub fn normalized_public_prefix(&self) -> Result<String, ConfigInvalid> {
        let raw = self.public_path_prefix.trim();
        if raw.is_empty() || raw == "/" {
            return Ok("/".to_string());
        }
        if raw.contains(char::is_whitespace) {
            return Err(ConfigInvalid::BadPublicPrefix(raw.to_string()));
        }
        let mut out = String::new();
        if !raw.starts_with('/') {
            out.push('/');
        }
        out.push_str(raw);
        if !out.ends_with('/') {
            out.push('/');
        }
        Ok(out)
    }
}

impl ConfigModel for Core {
    fn validate(&self) -> Result<(), ConfigInvalid> {
        if self.main_app_entry.is_empty() {
            return Err(ConfigInvalid::MissingField("core.mainAppEntry"));
        }
        if self.public_static_dir.is_empty() {
            return Err(ConfigInvalid::MissingField("core.publicStaticDir"));
        }
        if self.private_static_dir.is_empty() {
            return Err(ConfigInvalid::MissingField("core.privateStaticDir"));
        }
        self.normalized_public_prefix()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    fn core() -> Core {
        Core {
            main_app_entry: "backend/cmd/app/main.go".into(),
            public_static_dir: "frontend/assets".into(),
            private_static_dir: "backend/assets".into(),
            ..Default::default()
        }
    }

    #[rstest]
    #[case("/", "/")]
    #[case("", "/")]
    #[case("public", "/public/")]
    #[case("/public", "/public/")]
    #[case("public/", "/public/")]
    #[case("/public/", "/public/")]
    fn prefix_normalization(#[case] raw: &str, #[case] expected: &str) {
        let mut core = core();
        core.public_path_prefix = raw.into();
        assert_eq!(core.normalized_public_prefix().unwrap(), expected);
    }

    #[test]
    fn missing_entry_is_invalid() {
        let mut core = core();
        core.main_app_entry = String::new();
        assert!(core.validate().is_err());
    }
}
