//! Engine configuration.
//!
//! Defaults suit a desktop window; a handful of fields can be overridden
//! from the environment:
//!
//! | Variable | Values |
//! |---|---|
//! | `VENUS_PRESENT_MODE` | `fifo`, `mailbox`, `immediate`, `fifo_relaxed` |
//! | `VENUS_VALIDATION` | `0` / `1` |
//! | `VENUS_DIAGNOSTIC` | `0` / `1` |
//! | `VENUS_SHADER_DIR` | directory holding the compiled SPIR-V |

use std::path::PathBuf;

use ash::vk;
use venus_rhi::descriptor_allocator::PoolSizeRatio;
use venus_rhi::instance::{DEFAULT_API_VERSION, MIN_API_VERSION};

use crate::error::{RenderError, RenderResult};

pub const ENV_PRESENT_MODE: &str = "VENUS_PRESENT_MODE";
pub const ENV_VALIDATION: &str = "VENUS_VALIDATION";
pub const ENV_DIAGNOSTIC: &str = "VENUS_DIAGNOSTIC";
pub const ENV_SHADER_DIR: &str = "VENUS_SHADER_DIR";

/// Pool ratios used by the per-frame descriptor allocators.
pub const DEFAULT_DESCRIPTOR_RATIOS: [PoolSizeRatio; 3] = [
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1.0),
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 0.5),
];

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub title: String,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    /// Enables the Khronos validation layer.
    pub validation: bool,
    /// Waits for the graphics queue to idle after every present.
    pub diagnostic: bool,
    pub depth_format: vk::Format,
    pub shader_dir: PathBuf,
    pub target_fps: Option<u32>,
    pub descriptor_ratios: Vec<PoolSizeRatio>,
    pub initial_descriptor_sets: u32,
    pub api_version: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Venus".to_string(),
            extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            present_mode: vk::PresentModeKHR::FIFO,
            validation: cfg!(debug_assertions),
            diagnostic: false,
            depth_format: vk::Format::D16_UNORM,
            shader_dir: PathBuf::from("shaders/spirv"),
            target_fps: Some(60),
            descriptor_ratios: DEFAULT_DESCRIPTOR_RATIOS.to_vec(),
            initial_descriptor_sets: 16,
            api_version: DEFAULT_API_VERSION,
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> RenderResult<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by the `VENUS_*` variable names.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> RenderResult<Self> {
        if let Some(value) = lookup(ENV_PRESENT_MODE) {
            self.present_mode = parse_present_mode(&value)?;
        }
        if let Some(value) = lookup(ENV_VALIDATION) {
            self.validation = parse_flag(ENV_VALIDATION, &value)?;
        }
        if let Some(value) = lookup(ENV_DIAGNOSTIC) {
            self.diagnostic = parse_flag(ENV_DIAGNOSTIC, &value)?;
        }
        if let Some(value) = lookup(ENV_SHADER_DIR) {
            if value.trim().is_empty() {
                return Err(RenderError::Config(format!("{} is empty", ENV_SHADER_DIR)));
            }
            self.shader_dir = PathBuf::from(value);
        }
        Ok(self)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_extent(mut self, width: u32, height: u32) -> Self {
        self.extent = vk::Extent2D { width, height };
        self
    }

    pub fn with_present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.present_mode = mode;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    pub fn with_diagnostic(mut self, enabled: bool) -> Self {
        self.diagnostic = enabled;
        self
    }

    pub fn with_depth_format(mut self, format: vk::Format) -> Self {
        self.depth_format = format;
        self
    }

    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    pub fn with_target_fps(mut self, fps: Option<u32>) -> Self {
        self.target_fps = fps;
        self
    }

    pub fn with_descriptor_ratios(mut self, ratios: &[PoolSizeRatio], initial_sets: u32) -> Self {
        self.descriptor_ratios = ratios.to_vec();
        self.initial_descriptor_sets = initial_sets;
        self
    }

    pub fn with_api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    /// Rejects values no device could satisfy.
    pub fn validate(&self) -> RenderResult<()> {
        if self.extent.width == 0 || self.extent.height == 0 {
            return Err(RenderError::Config(format!(
                "window extent must be non-zero, got {}x{}",
                self.extent.width, self.extent.height
            )));
        }
        if self.descriptor_ratios.is_empty() {
            return Err(RenderError::Config(
                "at least one descriptor pool ratio is required".to_string(),
            ));
        }
        if self.api_version < MIN_API_VERSION {
            return Err(RenderError::Config(
                "dynamic rendering and synchronization2 need Vulkan 1.3".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parses a present mode name as accepted by `VENUS_PRESENT_MODE`.
pub fn parse_present_mode(value: &str) -> RenderResult<vk::PresentModeKHR> {
    match value.trim().to_ascii_lowercase().as_str() {
        "fifo" => Ok(vk::PresentModeKHR::FIFO),
        "mailbox" => Ok(vk::PresentModeKHR::MAILBOX),
        "immediate" => Ok(vk::PresentModeKHR::IMMEDIATE),
        "fifo_relaxed" => Ok(vk::PresentModeKHR::FIFO_RELAXED),
        other => Err(RenderError::Config(format!(
            "{}: unknown present mode '{}'",
            ENV_PRESENT_MODE, other
        ))),
    }
}

fn parse_flag(key: &str, value: &str) -> RenderResult<bool> {
    match value.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(RenderError::Config(format!(
            "{}: expected 0 or 1, got '{}'",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.title, "Venus");
        assert_eq!(config.extent.width, 1024);
        assert_eq!(config.extent.height, 1024);
        assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
        assert!(!config.diagnostic);
        assert_eq!(config.depth_format, vk::Format::D16_UNORM);
        assert_eq!(config.target_fps, Some(60));
        assert_eq!(config.initial_descriptor_sets, 16);
        assert_eq!(config.descriptor_ratios.len(), 3);
        assert_eq!(config.api_version, vk::make_api_version(0, 1, 4, 0));
        assert!(config.validate().is_ok());
        assert!(config.with_api_version(vk::API_VERSION_1_3).validate().is_ok());
    }

    #[test]
    fn test_overrides_apply() {
        let config = EngineConfig::default()
            .with_overrides(lookup(&[
                (ENV_PRESENT_MODE, "Mailbox"),
                (ENV_VALIDATION, "0"),
                (ENV_DIAGNOSTIC, "1"),
                (ENV_SHADER_DIR, "/tmp/spirv"),
            ]))
            .unwrap();

        assert_eq!(config.present_mode, vk::PresentModeKHR::MAILBOX);
        assert!(!config.validation);
        assert!(config.diagnostic);
        assert_eq!(config.shader_dir, PathBuf::from("/tmp/spirv"));
    }

    #[test]
    fn test_no_overrides_keeps_defaults() {
        let config = EngineConfig::default()
            .with_validation(true)
            .with_overrides(|_| None)
            .unwrap();
        assert!(config.validation);
        assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_bad_values_rejected() {
        let err = EngineConfig::default()
            .with_overrides(lookup(&[(ENV_PRESENT_MODE, "vsync")]))
            .unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));

        let err = EngineConfig::default()
            .with_overrides(lookup(&[(ENV_DIAGNOSTIC, "yes")]))
            .unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));

        assert!(EngineConfig::default()
            .with_overrides(lookup(&[(ENV_SHADER_DIR, "  ")]))
            .is_err());
    }

    #[test]
    fn test_parse_present_modes() {
        assert_eq!(parse_present_mode("fifo").unwrap(), vk::PresentModeKHR::FIFO);
        assert_eq!(
            parse_present_mode(" fifo_relaxed ").unwrap(),
            vk::PresentModeKHR::FIFO_RELAXED
        );
        assert_eq!(
            parse_present_mode("IMMEDIATE").unwrap(),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        assert!(EngineConfig::default().with_extent(0, 480).validate().is_err());
        assert!(EngineConfig::default()
            .with_descriptor_ratios(&[], 4)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_api_version(vk::API_VERSION_1_2)
            .validate()
            .is_err());
    }
}
