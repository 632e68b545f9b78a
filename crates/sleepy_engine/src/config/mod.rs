//! Configuration system
//!
//! Engine settings are plain serde structs that can be loaded from TOML or RON
//! files. Every field has a default, so a partial file only overrides what it
//! names.

pub use serde::{Deserialize, Serialize};

use crate::render::{DepthFormat, PixelFormat};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside the range the engine accepts
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Smallest swap-chain ring the frame core supports
pub const MIN_BUFFER_COUNT: u32 = 2;
/// Largest swap-chain ring the frame core supports
pub const MAX_BUFFER_COUNT: u32 = 16;
/// Most object constant slots one frame may use
pub const MAX_OBJECTS_PER_FRAME: u32 = 16_384;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Window configuration
    pub window: WindowConfig,
    /// Renderer configuration
    pub renderer: RendererConfig,
}

impl Config for EngineConfig {}

impl EngineConfig {
    /// Check every field against the ranges the renderer can honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        self.renderer.validate()
    }
}

/// Window configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Client area width in pixels
    pub width: u32,
    /// Client area height in pixels
    pub height: u32,
    /// Whether the window can be resized by the user
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Sleepy Engine".to_string(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

/// Multisample mode for the back buffer, depth buffer and pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultisampleConfig {
    /// Whether multisampling is enabled at all
    pub enabled: bool,
    /// Samples per pixel when enabled
    pub sample_count: u32,
    /// Requested quality level; clamped to what the device reports
    pub quality: u32,
}

impl Default for MultisampleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_count: 4,
            quality: 0,
        }
    }
}

impl MultisampleConfig {
    /// Sample count actually used by GPU objects
    pub fn effective_sample_count(&self) -> u32 {
        if self.enabled {
            self.sample_count
        } else {
            1
        }
    }
}

/// Paths to the precompiled SPIR-V programs of the single pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderPaths {
    /// Vertex program
    pub vertex: String,
    /// Fragment program
    pub fragment: String,
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self {
            vertex: "target/shaders/color_vert.spv".to_string(),
            fragment: "target/shaders/color_frag.spv".to_string(),
        }
    }
}

/// Renderer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of back buffers in the swap chain ring (and frame slots)
    pub buffer_count: u32,
    /// Pixel format of the back buffers
    pub back_buffer_format: PixelFormat,
    /// Format of the depth-stencil buffer
    pub depth_format: DepthFormat,
    /// Multisample mode and quality level
    pub multisample: MultisampleConfig,
    /// Enable the API validation layer
    pub validation: bool,
    /// Maximum number of draw items per frame (object constant slots)
    pub max_objects: u32,
    /// Render target clear colour (RGBA)
    pub clear_color: [f32; 4],
    /// Shader bytecode locations
    pub shaders: ShaderPaths,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            back_buffer_format: PixelFormat::R8G8B8A8Unorm,
            depth_format: DepthFormat::D24UnormS8Uint,
            multisample: MultisampleConfig::default(),
            validation: cfg!(debug_assertions),
            max_objects: 256,
            // Light steel blue
            clear_color: [0.690_196, 0.768_627, 0.870_588, 1.0],
            shaders: ShaderPaths::default(),
        }
    }
}

impl RendererConfig {
    /// Validate renderer settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_BUFFER_COUNT..=MAX_BUFFER_COUNT).contains(&self.buffer_count) {
            return Err(ConfigError::Invalid(format!(
                "buffer_count must be in {}..={}, got {}",
                MIN_BUFFER_COUNT, MAX_BUFFER_COUNT, self.buffer_count
            )));
        }
        if !(1..=MAX_OBJECTS_PER_FRAME).contains(&self.max_objects) {
            return Err(ConfigError::Invalid(format!(
                "max_objects must be in 1..={}, got {}",
                MAX_OBJECTS_PER_FRAME, self.max_objects
            )));
        }
        if self.multisample.enabled && ![2, 4, 8].contains(&self.multisample.sample_count) {
            return Err(ConfigError::Invalid(format!(
                "unsupported multisample count {}",
                self.multisample.sample_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renderer.buffer_count, 3);
        assert_eq!(config.renderer.multisample.effective_sample_count(), 1);
    }

    #[test]
    fn test_buffer_count_range() {
        let mut config = EngineConfig::default();
        config.renderer.buffer_count = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.renderer.buffer_count = 17;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.renderer.buffer_count = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_objects_range() {
        let mut config = EngineConfig::default();
        config.renderer.max_objects = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.renderer.max_objects = u32::MAX / 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.renderer.max_objects = MAX_OBJECTS_PER_FRAME + 1;
        assert!(config.validate().is_err());
        config.renderer.max_objects = MAX_OBJECTS_PER_FRAME;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = EngineConfig::default();
        config.window.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_sample_count_rejected_only_when_enabled() {
        let mut config = EngineConfig::default();
        config.renderer.multisample.sample_count = 3;
        assert!(config.validate().is_ok());
        config.renderer.multisample.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [window]
            width = 1280

            [renderer]
            buffer_count = 2
            back_buffer_format = "B8G8R8A8Unorm"
            "#,
        )
        .unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.renderer.buffer_count, 2);
        assert_eq!(config.renderer.back_buffer_format, PixelFormat::B8G8R8A8Unorm);
        assert_eq!(config.renderer.depth_format, DepthFormat::D24UnormS8Uint);
    }

    #[test]
    fn test_ron_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("sleepy_config_{}.ron", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let mut config = EngineConfig::default();
        config.renderer.max_objects = 12;
        config.save_to_file(&path).unwrap();
        let loaded = EngineConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unknown_extension() {
        let result = EngineConfig::load_from_file("settings.ini");
        assert!(matches!(result, Err(ConfigError::Io(_)) | Err(ConfigError::UnsupportedFormat(_))));
    }
}
