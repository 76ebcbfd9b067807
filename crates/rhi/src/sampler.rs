//! Texture samplers.
//!
//! A sampler encodes filtering and addressing state independently of any
//! image, so one sampler can be shared by many image views.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::RhiResult;

/// Every option a [`Sampler`] supports.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerConfig {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    /// Applied to U, V and W.
    pub address_mode: vk::SamplerAddressMode,
    /// `None` disables anisotropic filtering.
    pub max_anisotropy: Option<f32>,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::linear()
    }
}

impl SamplerConfig {
    /// Trilinear filtering over the full mip chain.
    pub fn linear() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: None,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        }
    }

    /// Point sampling, useful for pixel-exact lookups.
    pub fn nearest() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            ..Self::linear()
        }
    }

    pub fn filters(mut self, mag: vk::Filter, min: vk::Filter) -> Self {
        self.mag_filter = mag;
        self.min_filter = min;
        self
    }

    pub fn mipmap_mode(mut self, mode: vk::SamplerMipmapMode) -> Self {
        self.mipmap_mode = mode;
        self
    }

    pub fn address_mode(mut self, mode: vk::SamplerAddressMode) -> Self {
        self.address_mode = mode;
        self
    }

    pub fn anisotropy(mut self, max: f32) -> Self {
        self.max_anisotropy = Some(max);
        self
    }

    pub fn lod_range(mut self, min: f32, max: f32) -> Self {
        self.min_lod = min;
        self.max_lod = max;
        self
    }

    pub fn border_color(mut self, color: vk::BorderColor) -> Self {
        self.border_color = color;
        self
    }

    pub fn create(&self, device: Arc<Device>) -> RhiResult<Sampler> {
        Sampler::new(device, self)
    }

    /// Anisotropy clamped to what the device allows, or `None` if unsupported.
    fn effective_anisotropy(&self, supported: bool, limit: f32) -> Option<f32> {
        let requested = self.max_anisotropy?;
        if !supported {
            warn!("Sampler anisotropy requested but not supported by the device");
            return None;
        }
        Some(requested.clamp(1.0, limit.max(1.0)))
    }
}

/// An owned `VkSampler`.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
    config: SamplerConfig,
}

impl Sampler {
    pub fn new(device: Arc<Device>, config: &SamplerConfig) -> RhiResult<Self> {
        let info = device.info();
        let anisotropy = config.effective_anisotropy(
            info.features.sampler_anisotropy == vk::TRUE,
            info.properties.limits.max_sampler_anisotropy,
        );

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(config.mag_filter)
            .min_filter(config.min_filter)
            .mipmap_mode(config.mipmap_mode)
            .address_mode_u(config.address_mode)
            .address_mode_v(config.address_mode)
            .address_mode_w(config.address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(false)
            .min_lod(config.min_lod)
            .max_lod(config.max_lod)
            .border_color(config.border_color)
            .unnormalized_coordinates(false);

        let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };
        debug!(
            "Created sampler: mag {:?}, min {:?}, address {:?}",
            config.mag_filter, config.min_filter, config.address_mode
        );

        Ok(Self {
            device,
            sampler,
            config: *config,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    #[inline]
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_sampler(self.sampler, None) };
        debug!("Destroyed sampler");
    }
}
