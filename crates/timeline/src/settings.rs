use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};
use zova_model::DEFAULT_KEY_CACHE_CAPACITY;

pub const SETTINGS_DIRECTORY_NAME: &str = "zova";
pub const SETTINGS_FILE_NAME: &str = "timeline.json";
pub const SETTINGS_ENV_PREFIX: &str = "ZOVA_TIMELINE_";

pub const DEFAULT_STUCK_THRESHOLD_PX: f32 = 100.0;
pub const DEFAULT_SCROLL_PERCENT_THRESHOLD: f32 = 5.0;
pub const DEFAULT_REATTACH_MULTIPLIER: f32 = 2.0;
pub const DEFAULT_SCROLL_THROTTLE_MS: u64 = 100;
/// Assumed duration of a smooth scroll when the surface never reports completion.
pub const DEFAULT_SMOOTH_SCROLL_SETTLE_MS: u64 = 500;
pub const DEFAULT_OLDER_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineSettings {
    /// Distance from the bottom, in pixels, that still counts as "at the bottom".
    pub stuck_threshold_px: f32,
    /// Same as `stuck_threshold_px`, as a percentage of the scrollable height.
    pub scroll_percent_threshold: f32,
    /// Widening applied to both thresholds when deciding to re-attach for a new stream.
    pub reattach_multiplier: f32,
    pub scroll_throttle_ms: u64,
    pub smooth_scroll_settle_ms: u64,
    pub older_page_size: usize,
    pub prefer_paginated_source: bool,
    pub key_cache_capacity: usize,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            stuck_threshold_px: DEFAULT_STUCK_THRESHOLD_PX,
            scroll_percent_threshold: DEFAULT_SCROLL_PERCENT_THRESHOLD,
            reattach_multiplier: DEFAULT_REATTACH_MULTIPLIER,
            scroll_throttle_ms: DEFAULT_SCROLL_THROTTLE_MS,
            smooth_scroll_settle_ms: DEFAULT_SMOOTH_SCROLL_SETTLE_MS,
            older_page_size: DEFAULT_OLDER_PAGE_SIZE,
            prefer_paginated_source: true,
            key_cache_capacity: DEFAULT_KEY_CACHE_CAPACITY,
        }
    }
}

impl TimelineSettings {
    pub fn scroll_throttle(&self) -> Duration {
        Duration::from_millis(self.scroll_throttle_ms)
    }

    pub fn smooth_scroll_settle(&self) -> Duration {
        Duration::from_millis(self.smooth_scroll_settle_ms)
    }

    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();

        if !self.stuck_threshold_px.is_finite() || self.stuck_threshold_px < 0.0 {
            self.stuck_threshold_px = defaults.stuck_threshold_px;
        }
        if !self.scroll_percent_threshold.is_finite() {
            self.scroll_percent_threshold = defaults.scroll_percent_threshold;
        }
        self.scroll_percent_threshold = self.scroll_percent_threshold.clamp(0.0, 100.0);
        if !self.reattach_multiplier.is_finite() || self.reattach_multiplier < 1.0 {
            self.reattach_multiplier = defaults.reattach_multiplier;
        }
        if self.older_page_size == 0 {
            self.older_page_size = defaults.older_page_size;
        }
        if self.key_cache_capacity == 0 {
            self.key_cache_capacity = defaults.key_cache_capacity;
        }

        self
    }
}

/// Settings file plus environment overrides, shared with every [`crate::TimelineContext`]
/// built from it. A successful [`SettingsStore::reload`] is visible to those contexts at once.
pub struct SettingsStore {
    settings: Arc<ArcSwap<TimelineSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".zova"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Loads settings, falling back to defaults when the file is missing or malformed.
    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::read_or_default(&config_path);
        Self::with_settings(settings, config_path)
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    /// Loads settings from a file that must exist and parse.
    pub fn open(config_path: PathBuf) -> Result<Self, SettingsError> {
        let settings = Self::read(&config_path)?;
        tracing::info!("loaded timeline settings from {:?}", config_path);
        Ok(Self::with_settings(settings, config_path))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<TimelineSettings> {
        self.settings.load_full()
    }

    /// Re-reads the file. On failure the previous settings stay in effect.
    pub fn reload(&self) -> Result<Arc<TimelineSettings>, SettingsError> {
        let settings = Arc::new(Self::read(&self.config_path)?);
        self.settings.store(Arc::clone(&settings));
        tracing::info!("reloaded timeline settings from {:?}", self.config_path);
        Ok(settings)
    }

    pub(crate) fn shared(&self) -> Arc<ArcSwap<TimelineSettings>> {
        Arc::clone(&self.settings)
    }

    fn with_settings(settings: TimelineSettings, config_path: PathBuf) -> Self {
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    fn figment(path: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(TimelineSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        }
        figment.merge(Env::prefixed(SETTINGS_ENV_PREFIX))
    }

    fn read(path: &Path) -> Result<TimelineSettings, SettingsError> {
        ensure!(
            path.exists(),
            MissingFileSnafu {
                stage: "locate-settings-file",
                path: path.to_path_buf(),
            }
        );

        let settings = Self::figment(path)
            .extract::<TimelineSettings>()
            .map_err(Box::new)
            .context(ExtractSnafu {
                stage: "extract-settings",
                path: path.to_path_buf(),
            })?;
        Ok(settings.normalized())
    }

    fn read_or_default(path: &Path) -> TimelineSettings {
        if !path.exists() {
            tracing::info!("timeline settings not found at {:?}, using defaults", path);
        }

        match Self::figment(path).extract::<TimelineSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse timeline settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                TimelineSettings::default()
            }
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("settings file {path:?} does not exist on `{stage}`"))]
    MissingFile { stage: &'static str, path: PathBuf },
    #[snafu(display("failed to read settings from {path:?} on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        path: PathBuf,
        source: Box<figment::Error>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("zova-timeline-settings-{}-{name}", std::process::id()))
            .join(SETTINGS_FILE_NAME)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = SettingsStore::new(scratch_path("missing"));
        assert_eq!(*store.settings(), TimelineSettings::default());
    }

    fn write_settings(path: &Path, json: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, json).unwrap();
    }

    fn remove_settings(path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn open_requires_existing_file() {
        let error = match SettingsStore::open(scratch_path("absent")) {
            Ok(_) => panic!("missing file must be rejected"),
            Err(error) => error,
        };
        assert!(matches!(error, SettingsError::MissingFile { .. }));
    }

    #[test]
    fn open_rejects_malformed_file() {
        let path = scratch_path("malformed");
        write_settings(&path, r#"{ "older_page_size": "many" }"#);

        let error = match SettingsStore::open(path.clone()) {
            Ok(_) => panic!("malformed file must be rejected"),
            Err(error) => error,
        };
        assert!(matches!(error, SettingsError::Extract { .. }));

        remove_settings(&path);
    }

    #[test]
    fn reload_picks_up_edits_and_keeps_last_good_settings() {
        let path = scratch_path("reload");
        write_settings(&path, r#"{ "stuck_threshold_px": 48.0 }"#);
        let store = SettingsStore::open(path.clone()).unwrap();
        assert_eq!(store.settings().stuck_threshold_px, 48.0);

        write_settings(&path, r#"{ "stuck_threshold_px": 64.0, "older_page_size": 25 }"#);
        let reloaded = store.reload().unwrap();
        assert_eq!(reloaded.stuck_threshold_px, 64.0);
        assert_eq!(store.settings().older_page_size, 25);

        write_settings(&path, "{ not json");
        assert!(store.reload().is_err());
        assert_eq!(store.settings().stuck_threshold_px, 64.0);

        remove_settings(&path);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = scratch_path("partial");
        write_settings(&path, r#"{ "scroll_throttle_ms": 250 }"#);

        let store = SettingsStore::new(path.clone());
        assert_eq!(store.settings().scroll_throttle_ms, 250);
        assert_eq!(
            store.settings().stuck_threshold_px,
            DEFAULT_STUCK_THRESHOLD_PX
        );

        remove_settings(&path);
    }

    #[test]
    fn normalization_repairs_nonsense_values() {
        let settings = TimelineSettings {
            stuck_threshold_px: -3.0,
            scroll_percent_threshold: 250.0,
            reattach_multiplier: 0.5,
            older_page_size: 0,
            ..TimelineSettings::default()
        }
        .normalized();

        assert_eq!(settings.stuck_threshold_px, DEFAULT_STUCK_THRESHOLD_PX);
        assert_eq!(settings.scroll_percent_threshold, 100.0);
        assert_eq!(settings.reattach_multiplier, DEFAULT_REATTACH_MULTIPLIER);
        assert_eq!(settings.older_page_size, DEFAULT_OLDER_PAGE_SIZE);
    }
}
