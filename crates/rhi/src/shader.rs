//! Shader module management.
//!
//! SPIR-V is a stream of 32-bit words whose first word is the magic number
//! `0x07230203`. Files written on a big-endian host store every word
//! byte-swapped; [`decode_spirv`] detects this from the magic number and
//! swaps each word back, so either form loads to the same words.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use venus_rhi::device::Device;
//! use venus_rhi::shader::{Shader, ShaderStage};
//!
//! # fn example(device: Arc<Device>) -> venus_rhi::RhiResult<()> {
//! let vertex = Shader::from_spirv_file(
//!     device.clone(),
//!     Path::new("shaders/spirv/mesh.vert.spv"),
//!     ShaderStage::Vertex,
//! )?;
//! let _stage = vertex.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// The SPIR-V magic number in host word order.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Decodes a SPIR-V byte stream into host-order words.
///
/// # Errors
///
/// [`RhiError::ShaderError`] (an `IO_ERROR`) if the length is not a
/// multiple of 4, the stream is empty, or the magic number is missing in
/// both byte orders.
pub fn decode_spirv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V length must be a multiple of 4, got {} bytes",
            bytes.len()
        )));
    }

    let mut words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    match words.first().copied() {
        Some(SPIRV_MAGIC) => {}
        Some(magic) if magic.swap_bytes() == SPIRV_MAGIC => {
            debug!("Byte-swapping big-endian SPIR-V ({} words)", words.len());
            for word in &mut words {
                *word = word.swap_bytes();
            }
        }
        Some(magic) => {
            return Err(RhiError::ShaderError(format!(
                "not SPIR-V: magic number {magic:#010x}"
            )));
        }
        None => return Err(RhiError::ShaderError("empty SPIR-V stream".into())),
    }

    Ok(words)
}

/// Vulkan shader module wrapper.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// Loads a SPIR-V file and creates a module for `stage`.
    ///
    /// # Errors
    ///
    /// - [`RhiError::NotFound`] if the file does not exist
    /// - [`RhiError::Io`] for other read failures
    /// - [`RhiError::ShaderError`] for malformed SPIR-V
    pub fn from_spirv_file(device: Arc<Device>, path: &Path, stage: ShaderStage) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RhiError::NotFound(path.display().to_string()),
            _ => RhiError::Io(e),
        })?;
        Self::from_spirv_bytes(device, &bytes, stage)
    }

    /// Creates a module from SPIR-V bytes in either byte order.
    pub fn from_spirv_bytes(device: Arc<Device>, bytes: &[u8], stage: ShaderStage) -> RhiResult<Self> {
        let code = decode_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        info!("Created {} shader module ({} words)", stage, code.len());

        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage description for pipeline creation, entry point `main`.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(c"main")
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use venus_core::ErrorCode;

    /// A tiny module header: magic, version 1.0, generator, bound, schema.
    const HEADER: [u32; 5] = [SPIRV_MAGIC, 0x0001_0000, 0x0008_000b, 16, 0];

    fn little_endian(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn big_endian(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    #[test]
    fn test_little_endian_decodes_unchanged() {
        let words = decode_spirv(&little_endian(&HEADER)).expect("valid SPIR-V");
        assert_eq!(words, HEADER);
    }

    #[test]
    fn test_big_endian_matches_little_endian() {
        let le = decode_spirv(&little_endian(&HEADER)).expect("valid SPIR-V");
        let be = decode_spirv(&big_endian(&HEADER)).expect("valid SPIR-V");
        assert_eq!(le, be);
    }

    #[test]
    fn test_odd_length_is_io_error() {
        let mut bytes = little_endian(&HEADER);
        bytes.pop();
        let err = decode_spirv(&bytes).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IO_ERROR);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let err = decode_spirv(&little_endian(&[0xdead_beef, 0])).unwrap_err();
        assert!(matches!(err, RhiError::ShaderError(_)));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(decode_spirv(&[]).is_err());
    }

    #[test]
    fn test_shader_stage_to_vk() {
        assert_eq!(ShaderStage::Vertex.to_vk_stage(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderStage::Fragment.to_vk_stage(), vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(ShaderStage::Compute.to_vk_stage(), vk::ShaderStageFlags::COMPUTE);
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }
}
