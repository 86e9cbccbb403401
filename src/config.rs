use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::catalog::DEFAULT_COMPACT_BREAKPOINT_PX;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tour: TourConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Timing of the tour controller and target resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TourConfig {
    /// Delay between data readiness and the first step (default: 300)
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Per-attempt anchor lookup timeout (default: 2000)
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_ms: u64,
    /// Lookup retries after the first attempt (default: 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between lookup attempts (default: 500)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Fallback when a panel/section animation never reports back (default: 400)
    #[serde(default = "default_transition_fallback")]
    pub transition_fallback_ms: u64,
    /// Upper bound on the data wait, 0 = wait forever (default: 15000)
    #[serde(default = "default_data_ready_timeout")]
    pub data_ready_timeout_ms: u64,
    /// Confirm anchors with the resolver before revealing a step
    #[serde(default = "default_true")]
    pub verify_anchors: bool,
    #[serde(default = "default_true")]
    pub scroll_into_view: bool,
}

fn default_settle_delay() -> u64 {
    300
}

fn default_resolve_timeout() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    1
}

fn default_retry_delay() -> u64 {
    500
}

fn default_transition_fallback() -> u64 {
    400
}

fn default_data_ready_timeout() -> u64 {
    15_000 // 15 seconds
}

fn default_true() -> bool {
    true
}

impl Default for TourConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
            resolve_timeout_ms: default_resolve_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            transition_fallback_ms: default_transition_fallback(),
            data_ready_timeout_ms: default_data_ready_timeout(),
            verify_anchors: true,
            scroll_into_view: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Viewports narrower than this get the compact catalog
    #[serde(default = "default_breakpoint")]
    pub compact_breakpoint_px: u32,
}

fn default_breakpoint() -> u32 {
    DEFAULT_COMPACT_BREAKPOINT_PX
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            compact_breakpoint_px: default_breakpoint(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write logs to a file under the state directory instead of stderr
    #[serde(default)]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Completion record and logs live here
    #[serde(default = "default_state_dir")]
    pub state: String,
}

fn default_state_dir() -> String {
    ".ward-tour".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state: default_state_dir(),
        }
    }
}

impl Config {
    /// Path to the project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".ward-tour/config.toml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Start with embedded defaults so no config file is required
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let project_config = Self::project_config_path();
        if project_config.exists() {
            builder = builder.add_source(config::File::from(project_config));
        }

        // User config in ~/.config/ward-tour/ (optional global overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ward-tour").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables, e.g. WARD_TOUR__TOUR__MAX_RETRIES=3
        builder = builder.add_source(
            config::Environment::with_prefix("WARD_TOUR")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Save config to .ward-tour/config.toml
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::project_config_path())
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(config_path, toml_str).context("Failed to write config file")?;

        Ok(())
    }

    /// Get absolute path to state directory
    pub fn state_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.paths.state);
        if path.is_absolute() {
            path
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        }
    }

    /// Get absolute path to logs directory
    pub fn logs_path(&self) -> PathBuf {
        self.state_path().join("logs")
    }

    /// Get path to the completion record
    pub fn completion_path(&self) -> PathBuf {
        self.state_path().join("tour.json")
    }
}
