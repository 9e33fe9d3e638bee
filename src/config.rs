// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

use crate::frame::DEFAULT_FRAMES_IN_FLIGHT;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub resources: ResourcesConfig,
}

/// Window settings. The window is never resizable.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Hello World".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; falls back to mailbox, immediate, then fifo.
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    /// Sleep between frames, 0 to render as fast as presentation allows.
    pub frame_delay_ms: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [1.0, 0.0, 1.0, 1.0],
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            frame_delay_ms: 0,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds.
    pub validation_layers: bool,
    pub verbose_validation: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            verbose_validation: false,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Where shaders are loaded from
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub dir: String,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            dir: "Resources".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
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

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parse TOML text and clamp out-of-range values.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;

        if config.graphics.frames_in_flight == 0 {
            log::warn!("graphics.frames_in_flight must be at least 1, using 1");
            config.graphics.frames_in_flight = 1;
        }

        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Validation is a debug-build feature.
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.window.title, "Hello World");
        assert_eq!((config.window.width, config.window.height), (1280, 720));
        assert_eq!(config.graphics.clear_color, [1.0, 0.0, 1.0, 1.0]);
        assert_eq!(config.graphics.frames_in_flight, 2);
        assert_eq!(config.graphics.frame_delay_ms, 0);
        assert_eq!(config.resources.dir, "Resources");
        assert!(!config.debug.log_to_file);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Triangle"

            [graphics]
            present_mode = "FIFO"
            frames_in_flight = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Triangle");
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.frames_in_flight, 3);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.graphics.clear_color, [1.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn zero_frames_in_flight_is_raised_to_one() {
        let config = Config::parse("[graphics]\nframes_in_flight = 0\n").unwrap();
        assert_eq!(config.graphics.frames_in_flight, 1);
    }

    #[test]
    fn present_mode_names() {
        let mut config = Config::default();
        for (name, mode) in [
            ("immediate", vk::PresentModeKHR::IMMEDIATE),
            ("Mailbox", vk::PresentModeKHR::MAILBOX),
            ("fifo_relaxed", vk::PresentModeKHR::FIFO_RELAXED),
            ("vsync-ish", vk::PresentModeKHR::MAILBOX),
        ] {
            config.graphics.present_mode = name.to_string();
            assert_eq!(config.present_mode(), mode, "{name}");
        }
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[graphics]\nclear_color = \"magenta\"\n").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("vk-triangle-no-such-config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.graphics.present_mode, "mailbox");
    }
}
