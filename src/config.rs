// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Settings are a plain value read once at startup and handed to whoever needs
// them. A changed file on disk is reported as an event (see `watch`) and the
// application decides what to rebuild; nothing here calls back into the app.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::path::Path;
use winit::event_loop::EventLoopProxy;

/// Default location of the config file, relative to the working directory
pub const CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "vulkan".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings consumed by the Vulkan context
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Force FIFO presentation (vsync) to keep the GPU from spinning
    pub power_saving: bool,
}

/// Debug settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Request validation layers and the debug messenger (debug builds only)
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

impl DebugConfig {
    /// Validation only ever runs in debug builds, regardless of the file
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.validation_layers
    }

    /// Parsed `log_level`, `None` for unknown names
    pub fn level_filter(&self) -> Option<LevelFilter> {
        self.log_level.parse().ok()
    }
}

impl Config {
    /// Configuration from `path`, or the defaults together with the reason
    /// the file could not be used.
    ///
    /// Runs before the logger exists (the log level comes from the result), so
    /// the caller reports the error once logging is up.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }
}

/// Events delivered to the winit event loop from outside of it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    /// The config file was modified on disk
    ConfigChanged,
}

/// Watch the config file and forward modifications into the event loop.
///
/// Returns `None` (after logging why) when there is nothing to watch; the
/// application then simply runs without hot reload. The watcher stops when
/// the returned value is dropped.
pub fn watch(path: &Path, proxy: EventLoopProxy<AppEvent>) -> Option<notify::RecommendedWatcher> {
    use notify::{RecursiveMode, Watcher};

    if !path.exists() {
        log::debug!("Not watching {:?}: file does not exist", path);
        return None;
    }

    let handler = move |res: notify::Result<notify::Event>| match res {
        Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
            // Fails only once the event loop is gone, nothing left to notify
            let _ = proxy.send_event(AppEvent::ConfigChanged);
        }
        Ok(_) => {}
        Err(e) => log::warn!("Config watcher error: {}", e),
    };

    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(w) => w,
        Err(e) => {
            log::warn!("Config hot reload unavailable: {}", e);
            return None;
        }
    };

    if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
        log::warn!("Failed to watch {:?}: {}", path, e);
        return None;
    }

    log::info!("Watching {:?} for changes", path);
    Some(watcher)
}
