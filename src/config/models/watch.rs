use crate::config::models::ConfigModel;
use crate::error::ConfigInvalid;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Sentinel command which expands to `core.devBuildHook` at execution time.
pub const DEV_BUILD_HOOK: &str = "DevBuildHook";

/// Config options for the watch system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Watch {
    /// User-declared watch rules, matched against changed paths in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<WatchedFile>,

    /// Directories excluded from watching, relative to the project root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_dirs: Vec<String>,

    /// Individual files excluded from watching.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_files: Vec<String>,

    /// Healthcheck path polled on the app after a (re)start.
    #[serde(default = "default_healthcheck_path")]
    pub healthcheck_path: String,
}

fn default_healthcheck_path() -> String {
    "/".to_string()
}

impl ConfigModel for Watch {
    fn validate(&self) -> Result<(), ConfigInvalid> {
        for rule in &self.include {
            rule.validate()?;
        }
        Ok(())
    }
}

/// A declarative watch rule: a glob plus what to do when a matching file changes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WatchedFile {
    /// Double-star glob matched against the changed path, e.g. `**/*.templ`.
    pub pattern: String,

    /// Command hooks run when the rule fires, in declaration order within each timing class.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_change_hooks: Vec<HookCfg>,

    /// Recompile the Go binary even though the file itself is not Go source.
    #[serde(default)]
    pub recompile_go_binary: bool,

    /// Restart the app process without recompiling.
    #[serde(default)]
    pub restart_app: bool,

    /// Instead of reloading the page, invoke the client's globally exposed revalidate function.
    #[serde(default)]
    pub only_run_client_defined_revalidate_func: bool,

    /// Run the hooks and stop: no rebuild, no browser notification.
    #[serde(default)]
    pub run_on_change_only: bool,

    /// Suppress the `rebuilding` overlay broadcast for this rule.
    #[serde(default)]
    pub skip_rebuilding_notification: bool,

    /// Treat matching `.go` files as plain watched files rather than Go source.
    #[serde(default)]
    pub treat_as_non_go: bool,
}

impl WatchedFile {
    fn validate(&self) -> Result<(), ConfigInvalid> {
        if self.run_on_change_only {
            // The rule short-circuits after its pre hooks; any later-timed command hook could
            // never run. Callbacks are exempt: their RefreshAction is the escape hatch.
            if let Some(hook) = self
                .on_change_hooks
                .iter()
                .find(|hook| hook.timing != HookTiming::Pre)
            {
                return Err(ConfigInvalid::NonPreHookOnChangeOnly {
                    pattern: self.pattern.clone(),
                    timing: hook.timing.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// A command hook declared in the config document.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HookCfg {
    /// Shell command line, or the `DevBuildHook` sentinel.
    pub cmd: String,

    /// When the hook runs relative to the change callback.
    #[serde(default)]
    pub timing: HookTiming,

    /// Globs excluding specific files from triggering this hook.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// When a hook runs relative to the change callback for its event.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
    JsonSchema,
    strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HookTiming {
    /// Runs to completion before the change callback starts.
    #[default]
    Pre,
    /// Runs in parallel with the change callback; joined before post hooks.
    Concurrent,
    /// Fire-and-forget; never joined.
    ConcurrentNoWait,
    /// Runs after the change callback and all concurrent hooks complete.
    Post,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn serde_camel_case_surface() {
        let rule: WatchedFile = serde_json::from_value(json!({
            "pattern": "**/*.templ",
            "onChangeHooks": [{"cmd": "templ generate", "timing": "pre"}],
            "recompileGoBinary": true,
            "treatAsNonGo": true
        }))
        .unwrap();
        assert_eq!(rule.pattern, "**/*.templ");
        assert!(rule.recompile_go_binary);
        assert!(rule.treat_as_non_go);
        assert_eq!(rule.on_change_hooks[0].timing, HookTiming::Pre);
    }

    #[test]
    fn on_change_only_rejects_non_pre_command_hooks() {
        let watch = Watch {
            include: vec![WatchedFile {
                pattern: "**/*.sql".into(),
                run_on_change_only: true,
                on_change_hooks: vec![HookCfg {
                    cmd: "make regen".into(),
                    timing: HookTiming::Post,
                    exclude: vec![],
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            watch.validate(),
            Err(ConfigInvalid::NonPreHookOnChangeOnly { .. })
        ));
    }

    #[test]
    fn on_change_only_allows_pre_hooks() {
        let watch = Watch {
            include: vec![WatchedFile {
                pattern: "**/*.sql".into(),
                run_on_change_only: true,
                on_change_hooks: vec![HookCfg {
                    cmd: DEV_BUILD_HOOK.into(),
                    timing: HookTiming::Pre,
                    exclude: vec![],
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(watch.validate().is_ok());
    }
}
