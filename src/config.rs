use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::RwLock,
};

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILENAME: &str = "tabwatch.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Settings {
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let toml =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&toml)
    }

    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        toml.parse()
    }

    /// Resolves settings from an explicit path, then `./tabwatch.toml`, then
    /// built-in defaults. Returns the path actually used, if any.
    pub fn discover(explicit: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_path(path)?, Some(path.to_owned())));
        }

        let local = Path::new(DEFAULT_CONFIG_FILENAME);
        if local.is_file() {
            return Ok((Self::from_path(local)?, Some(local.to_owned())));
        }

        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.capture.max_records_per_tab == 0 {
            bail!("`capture.max_records_per_tab` must be at least 1");
        }
        Ok(())
    }
}

impl FromStr for Settings {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let settings: Self = toml::from_str(s).context("parse config TOML")?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CaptureConfig {
    /// Resource types eligible for tracking; anything else is ignored upstream.
    pub captured_request_types: HashSet<String>,
    /// Whether an endpoint's identity includes its query string.
    pub include_query_string: bool,
    /// Regex sources; an endpoint must match one (or the list must be empty)
    /// to count as API traffic.
    pub include_patterns: Vec<String>,
    /// Regex sources; a match here always wins over any include match.
    pub exclude_patterns: Vec<String>,
    /// Per-tab record capacity; oldest-inserted keys are evicted beyond it.
    pub max_records_per_tab: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            captured_request_types: ["xmlhttprequest", "fetch"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            include_query_string: false,
            include_patterns: vec![
                "/api/".to_owned(),
                "/graphql".to_owned(),
                r"\.json($|\?)".to_owned(),
            ],
            exclude_patterns: vec![r"\.(js|css|png|jpe?g|gif|svg|woff2?)($|\?)".to_owned()],
            max_records_per_tab: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Where the observer reads settings from. Loaded once per event, so updates
/// through a source take effect on the next event without a restart.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<Settings>;
}

/// In-memory settings, replaceable at runtime.
#[derive(Debug, Default)]
pub struct SharedSettings {
    inner: RwLock<Settings>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub fn replace(&self, settings: Settings) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
    }
}

#[async_trait]
impl SettingsSource for SharedSettings {
    async fn load(&self) -> anyhow::Result<Settings> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }
}

/// Settings re-read from a TOML file on every load; edits to the file apply
/// on the next event.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SettingsSource for FileSettings {
    async fn load(&self) -> anyhow::Result<Settings> {
        Settings::from_path(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::{LogFormat, Settings, SettingsSource, SharedSettings};

    #[test]
    fn defaults_capture_xhr_and_fetch() {
        let settings = Settings::default();
        assert!(settings.capture.captured_request_types.contains("fetch"));
        assert!(
            settings
                .capture
                .captured_request_types
                .contains("xmlhttprequest")
        );
        assert!(!settings.capture.include_query_string);
        assert_eq!(settings.capture.max_records_per_tab, 200);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let settings = Settings::from_toml_str("").expect("empty config should parse");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn capture_section_overrides_defaults() {
        let settings = Settings::from_toml_str(
            r#"
[capture]
captured_request_types = ["fetch"]
include_query_string = true
include_patterns = ["/v2/"]
exclude_patterns = []
max_records_per_tab = 5
"#,
        )
        .expect("config should parse");

        assert_eq!(settings.capture.captured_request_types.len(), 1);
        assert!(settings.capture.include_query_string);
        assert_eq!(settings.capture.include_patterns, vec!["/v2/".to_owned()]);
        assert!(settings.capture.exclude_patterns.is_empty());
        assert_eq!(settings.capture.max_records_per_tab, 5);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = Settings::from_toml_str(
            r#"
[capture]
max_records_per_tab = 0
"#,
        )
        .unwrap_err();
        assert!(
            err.to_string().contains("max_records_per_tab"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Settings::from_toml_str(
            r#"
[capture]
max_record_per_tab = 10
"#,
        )
        .unwrap_err();
        assert!(
            err.to_string().contains("parse config TOML"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn logging_section_parses() {
        let settings = Settings::from_toml_str(
            r#"
[logging]
level = "warn"
format = "pretty"
"#,
        )
        .expect("config should parse");
        let logging = settings.logging.expect("logging section should be set");
        assert_eq!(logging.level.as_deref(), Some("warn"));
        assert_eq!(logging.format, Some(LogFormat::Pretty));
    }

    #[tokio::test]
    async fn shared_settings_replacement_is_visible_on_next_load() {
        let source = SharedSettings::default();
        let mut updated = Settings::default();
        updated.capture.max_records_per_tab = 3;
        source.replace(updated);

        let loaded = source.load().await.expect("load should succeed");
        assert_eq!(loaded.capture.max_records_per_tab, 3);
    }
}
