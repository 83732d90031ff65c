use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pagequill";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Margin above and below the viewport in which page overlays stay mounted
    #[serde(default = "default_buffer_px")]
    pub buffer_px: f64,

    /// Eraser hit distance in page-local units
    #[serde(default = "default_eraser_threshold")]
    pub eraser_threshold: f64,

    #[serde(default = "default_pen_color")]
    pub pen_color: String,

    #[serde(default = "default_pen_width")]
    pub pen_width: f64,

    #[serde(default = "default_pen_opacity")]
    pub pen_opacity: f64,

    /// Fraction of a highlight fragment's height it is moved up by
    #[serde(default = "default_highlight_top_correction")]
    pub highlight_top_correction: f64,

    /// Factor applied to a highlight fragment's height
    #[serde(default = "default_highlight_height_correction")]
    pub highlight_height_correction: f64,

    #[serde(default = "default_merge_tolerance")]
    pub merge_tolerance: f64,

    #[serde(default = "default_selection_settle_ms")]
    pub selection_settle_ms: u64,

    #[serde(default = "default_search_retry_interval_ms")]
    pub search_retry_interval_ms: u64,

    #[serde(default = "default_search_max_attempts")]
    pub search_max_attempts: u32,

    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,

    /// Percent added per pump while the engine reports no byte progress
    #[serde(default = "default_synthetic_progress_step")]
    pub synthetic_progress_step: u8,

    #[serde(default = "default_pulse_duration_ms")]
    pub pulse_duration_ms: u64,

    #[serde(default = "default_menu_width")]
    pub menu_width: f64,

    #[serde(default = "default_menu_height")]
    pub menu_height: f64,

    #[serde(default = "default_menu_margin")]
    pub menu_margin: f64,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_buffer_px() -> f64 {
    800.0
}

fn default_eraser_threshold() -> f64 {
    18.0
}

fn default_pen_color() -> String {
    "#e53935".to_string()
}

fn default_pen_width() -> f64 {
    2.0
}

fn default_pen_opacity() -> f64 {
    1.0
}

fn default_highlight_top_correction() -> f64 {
    0.1
}

fn default_highlight_height_correction() -> f64 {
    1.2
}

fn default_merge_tolerance() -> f64 {
    2.0
}

fn default_selection_settle_ms() -> u64 {
    10
}

fn default_search_retry_interval_ms() -> u64 {
    100
}

fn default_search_max_attempts() -> u32 {
    30
}

fn default_load_timeout_secs() -> u64 {
    25
}

fn default_synthetic_progress_step() -> u8 {
    5
}

fn default_pulse_duration_ms() -> u64 {
    1500
}

fn default_menu_width() -> f64 {
    220.0
}

fn default_menu_height() -> f64 {
    44.0
}

fn default_menu_margin() -> f64 {
    8.0
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            buffer_px: default_buffer_px(),
            eraser_threshold: default_eraser_threshold(),
            pen_color: default_pen_color(),
            pen_width: default_pen_width(),
            pen_opacity: default_pen_opacity(),
            highlight_top_correction: default_highlight_top_correction(),
            highlight_height_correction: default_highlight_height_correction(),
            merge_tolerance: default_merge_tolerance(),
            selection_settle_ms: default_selection_settle_ms(),
            search_retry_interval_ms: default_search_retry_interval_ms(),
            search_max_attempts: default_search_max_attempts(),
            load_timeout_secs: default_load_timeout_secs(),
            synthetic_progress_step: default_synthetic_progress_step(),
            pulse_duration_ms: default_pulse_duration_ms(),
            menu_width: default_menu_width(),
            menu_height: default_menu_height(),
            menu_margin: default_menu_margin(),
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

pub fn load_settings() {
    let Some(path) = config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

/// Parse a settings file and bring it up to the current version.
pub fn read_settings_file(path: &Path) -> Result<Settings> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading settings file {path:?}"))?;
    let mut settings: Settings = serde_yaml::from_str(&content)
        .with_context(|| format!("parsing settings file {path:?}"))?;
    if settings.version < CURRENT_VERSION {
        migrate_settings(&mut settings);
    }
    Ok(settings)
}

pub fn load_settings_from_path(path: &Path) {
    match read_settings_file(path) {
        Ok(settings) => {
            debug!("Loaded settings from {path:?}");
            if let Ok(mut global) = SETTINGS.write() {
                *global = settings;
            }
        }
        Err(e) => {
            error!("{e:#}");
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // v1 stored the eraser threshold in device pixels at a fixed 2x ratio
    if settings.version < 2 {
        settings.eraser_threshold /= 2.0;
    }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings() {
    let Some(path) = config_path() else {
        warn!("Could not determine config directory, cannot save settings");
        return;
    };

    if let Ok(settings) = SETTINGS.read() {
        save_settings_to_file(&settings, &path);
    }
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = match serde_yaml::to_string(settings) {
        Ok(yaml) => format!("{SETTINGS_HEADER}{yaml}"),
        Err(e) => {
            error!("Failed to serialize settings: {e}");
            return;
        }
    };

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# pagequill settings
# ============================================================================
# Distances are in page-local units unless noted otherwise.
# buffer_px and menu_* are viewport pixels.
# highlight_*_correction compensate for text-layer font ascent/descent and
# may need tuning for a different rendering engine.

"#;

// Public API for accessing/modifying settings

/// Copy of the current settings.
pub fn current() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

/// Replace the in-memory settings without saving.
pub fn replace(settings: Settings) {
    if let Ok(mut global) = SETTINGS.write() {
        *global = settings;
    }
}
