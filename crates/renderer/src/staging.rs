//! Staging uploads and downloads.
//!
//! [`BufferWriter`] and [`ImageWriter`] batch CPU data into one host-visible
//! staging buffer and copy it to device-local resources in a single
//! [`ImmediateSubmit`]. The download helpers go the other way through a
//! readback buffer.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use venus_rhi::buffer::{Buffer, BufferUsage};
use venus_rhi::command::CommandBuffer;
use venus_rhi::image::{mip_extent, Image};
use venus_rhi::memory::MemoryAllocator;
use venus_rhi::RhiError;

use crate::error::RenderResult;
use crate::immediate::ImmediateSubmit;

/// Alignment of every region inside a staging buffer. Covers the texel size
/// of all uncompressed formats and the 4-byte rule for buffer-image copies.
pub const STAGING_ALIGNMENT: u64 = 16;

#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Bytes per texel for formats the writers accept.
pub fn texel_size(format: vk::Format) -> Option<u64> {
    let size = match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => 1,
        vk::Format::R8G8_UNORM => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::D32_SFLOAT => 4,
        vk::Format::D16_UNORM => 2,
        vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => return None,
    };
    Some(size)
}

/// Packs byte slices into one staging area at aligned offsets.
#[derive(Default)]
struct StagingArena {
    bytes: Vec<u8>,
}

impl StagingArena {
    /// Appends `data`, returning its offset.
    fn push(&mut self, data: &[u8]) -> u64 {
        let offset = align_up(self.bytes.len() as u64, STAGING_ALIGNMENT);
        self.bytes.resize(offset as usize, 0);
        self.bytes.extend_from_slice(data);
        offset
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn clear(&mut self) {
        self.bytes.clear();
    }

    fn upload(&self, allocator: &Arc<MemoryAllocator>) -> RenderResult<Buffer> {
        let staging = Buffer::new(allocator, BufferUsage::Staging, self.len())?;
        let mut map = staging.map()?;
        map.write(0, self.bytes.as_slice())?;
        map.flush(0, vk::WHOLE_SIZE)?;
        drop(map);
        Ok(staging)
    }
}

struct BufferCopy {
    dst: vk::Buffer,
    region: vk::BufferCopy,
}

/// Batched uploads into device-local buffers.
#[derive(Default)]
pub struct BufferWriter {
    arena: StagingArena,
    copies: Vec<BufferCopy>,
}

impl BufferWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `data` for upload into `dst` at byte `offset`.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidInput`] if the data is empty or does not fit.
    pub fn write<T: bytemuck::Pod>(
        &mut self,
        dst: &Buffer,
        offset: vk::DeviceSize,
        data: &[T],
    ) -> RenderResult<&mut Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = bytes.len() as vk::DeviceSize;
        if size == 0 || offset.checked_add(size).is_none_or(|end| end > dst.size()) {
            return Err(RhiError::InvalidInput(format!(
                "upload of {} bytes at offset {} does not fit a {} byte buffer",
                size,
                offset,
                dst.size()
            ))
            .into());
        }
        if !dst.usage().contains(vk::BufferUsageFlags::TRANSFER_DST) {
            return Err(
                RhiError::InvalidInput("upload target lacks TRANSFER_DST usage".into()).into(),
            );
        }

        let src_offset = self.arena.push(bytes);
        self.copies.push(BufferCopy {
            dst: dst.handle(),
            region: vk::BufferCopy {
                src_offset,
                dst_offset: offset,
                size,
            },
        });
        Ok(self)
    }

    /// Number of queued copies.
    #[inline]
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Uploads every queued write and blocks until the copies complete.
    pub fn flush(
        &mut self,
        immediate: &ImmediateSubmit,
        allocator: &Arc<MemoryAllocator>,
    ) -> RenderResult<()> {
        if self.copies.is_empty() {
            return Ok(());
        }

        let staging = self.arena.upload(allocator)?;
        immediate.submit(|cmd| {
            for copy in &self.copies {
                cmd.copy_buffer(staging.handle(), copy.dst, &[copy.region]);
            }
        })?;

        debug!(
            "Uploaded {} buffer region(s), {} staging bytes",
            self.copies.len(),
            self.arena.len()
        );
        self.copies.clear();
        self.arena.clear();
        Ok(())
    }
}

/// Creates a device-local buffer for `usage` holding `data`.
pub fn create_buffer_with_data<T: bytemuck::Pod>(
    immediate: &ImmediateSubmit,
    allocator: &Arc<MemoryAllocator>,
    usage: BufferUsage,
    data: &[T],
) -> RenderResult<Buffer> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;
    let buffer = Buffer::new(allocator, usage, size)?;
    let mut writer = BufferWriter::new();
    writer.write(&buffer, 0, data)?;
    writer.flush(immediate, allocator)?;
    Ok(buffer)
}

struct ImageUpload {
    image: vk::Image,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
    generate_mips: bool,
    src_offset: u64,
}

/// Batched uploads of mip level 0 into device-local images.
///
/// Every written image ends in `SHADER_READ_ONLY_OPTIMAL` on all levels.
#[derive(Default)]
pub struct ImageWriter {
    arena: StagingArena,
    uploads: Vec<ImageUpload>,
}

impl ImageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues tightly packed `pixels` for level 0 of `image`.
    ///
    /// With `generate_mips`, the remaining levels are filled by successive
    /// linear blits; otherwise they are left undefined.
    pub fn write(
        &mut self,
        image: &Image,
        pixels: &[u8],
        generate_mips: bool,
    ) -> RenderResult<&mut Self> {
        let texel = texel_size(image.format()).ok_or_else(|| {
            RhiError::InvalidInput(format!("unsupported upload format {:?}", image.format()))
        })?;
        let extent = image.extent();
        let expected = u64::from(extent.width) * u64::from(extent.height) * texel;
        if pixels.len() as u64 != expected {
            return Err(RhiError::InvalidInput(format!(
                "expected {} bytes for a {}x{} {:?} image, got {}",
                expected,
                extent.width,
                extent.height,
                image.format(),
                pixels.len()
            ))
            .into());
        }
        if generate_mips
            && image.mip_levels() > 1
            && !image.usage().contains(vk::ImageUsageFlags::TRANSFER_SRC)
        {
            return Err(RhiError::InvalidInput(
                "mip generation needs TRANSFER_SRC usage".into(),
            )
            .into());
        }

        let src_offset = self.arena.push(pixels);
        self.uploads.push(ImageUpload {
            image: image.handle(),
            extent,
            aspect: image.aspect(),
            mip_levels: image.mip_levels(),
            generate_mips,
            src_offset,
        });
        Ok(self)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.uploads.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }

    /// Uploads every queued image and blocks until the GPU is done.
    pub fn flush(
        &mut self,
        immediate: &ImmediateSubmit,
        allocator: &Arc<MemoryAllocator>,
    ) -> RenderResult<()> {
        if self.uploads.is_empty() {
            return Ok(());
        }

        let staging = self.arena.upload(allocator)?;
        immediate.submit(|cmd| {
            for upload in &self.uploads {
                record_image_upload(cmd, staging.handle(), upload);
            }
        })?;

        debug!("Uploaded {} image(s)", self.uploads.len());
        self.uploads.clear();
        self.arena.clear();
        Ok(())
    }
}

fn level_range(aspect: vk::ImageAspectFlags, base: u32, count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(base)
        .level_count(count)
        .layer_count(1)
}

fn level_layers(aspect: vk::ImageAspectFlags, level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(aspect)
        .mip_level(level)
        .layer_count(1)
}

fn extent_3d(extent: vk::Extent2D) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: 1,
    }
}

fn record_image_upload(cmd: &CommandBuffer, staging: vk::Buffer, upload: &ImageUpload) {
    let aspect = upload.aspect;
    cmd.transition_image(
        upload.image,
        level_range(aspect, 0, upload.mip_levels),
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    let copy = vk::BufferImageCopy::default()
        .buffer_offset(upload.src_offset)
        .image_subresource(level_layers(aspect, 0))
        .image_extent(extent_3d(upload.extent));
    cmd.copy_buffer_to_image(
        staging,
        upload.image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[copy],
    );

    if upload.generate_mips && upload.mip_levels > 1 {
        record_mip_chain(cmd, upload.image, aspect, upload.extent, upload.mip_levels);
    } else {
        cmd.transition_image(
            upload.image,
            level_range(aspect, 0, upload.mip_levels),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    }
}

/// Blit regions that build level `i` from level `i - 1`, for `i` in `1..levels`.
pub fn mip_blits(
    aspect: vk::ImageAspectFlags,
    extent: vk::Extent2D,
    levels: u32,
) -> Vec<vk::ImageBlit> {
    (1..levels)
        .map(|level| {
            let src = mip_extent(extent, level - 1);
            let dst = mip_extent(extent, level);
            vk::ImageBlit::default()
                .src_subresource(level_layers(aspect, level - 1))
                .src_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: src.width as i32,
                        y: src.height as i32,
                        z: 1,
                    },
                ])
                .dst_subresource(level_layers(aspect, level))
                .dst_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: dst.width as i32,
                        y: dst.height as i32,
                        z: 1,
                    },
                ])
        })
        .collect()
}

/// Fills levels `1..levels` from level 0, which must be in `TRANSFER_DST_OPTIMAL`
/// along with every other level. Leaves all levels `SHADER_READ_ONLY_OPTIMAL`.
fn record_mip_chain(
    cmd: &CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    extent: vk::Extent2D,
    levels: u32,
) {
    for (i, blit) in mip_blits(aspect, extent, levels).iter().enumerate() {
        let src_level = i as u32;
        cmd.transition_image(
            image,
            level_range(aspect, src_level, 1),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        cmd.blit_image(
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(blit),
            vk::Filter::LINEAR,
        );
        cmd.transition_image(
            image,
            level_range(aspect, src_level, 1),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    }

    cmd.transition_image(
        image,
        level_range(aspect, levels - 1, 1),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}

/// Reads the whole of `src` back to the CPU.
///
/// `src` needs `TRANSFER_SRC` usage.
pub fn download_buffer(
    immediate: &ImmediateSubmit,
    allocator: &Arc<MemoryAllocator>,
    src: &Buffer,
) -> RenderResult<Vec<u8>> {
    let size = src.size();
    let readback = Buffer::new(allocator, BufferUsage::Readback, size)?;
    immediate.submit(|cmd| {
        cmd.copy_buffer(
            src.handle(),
            readback.handle(),
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            }],
        );
    })?;
    read_back(&readback, size)
}

/// Reads mip `level` of `image` back to the CPU as tightly packed texels.
///
/// The image must be in `layout` on that level and is returned to it. It
/// needs `TRANSFER_SRC` usage.
pub fn download_image_level(
    immediate: &ImmediateSubmit,
    allocator: &Arc<MemoryAllocator>,
    image: &Image,
    level: u32,
    layout: vk::ImageLayout,
) -> RenderResult<Vec<u8>> {
    if level >= image.mip_levels() {
        return Err(RhiError::InvalidInput(format!(
            "mip level {} out of range ({} levels)",
            level,
            image.mip_levels()
        ))
        .into());
    }
    let texel = texel_size(image.format()).ok_or_else(|| {
        RhiError::InvalidInput(format!("unsupported download format {:?}", image.format()))
    })?;
    let extent = mip_extent(image.extent(), level);
    let size = u64::from(extent.width) * u64::from(extent.height) * texel;

    let readback = Buffer::new(allocator, BufferUsage::Readback, size)?;
    let range = level_range(image.aspect(), level, 1);
    immediate.submit(|cmd| {
        cmd.transition_image(
            image.handle(),
            range,
            layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        let copy = vk::BufferImageCopy::default()
            .image_subresource(level_layers(image.aspect(), level))
            .image_extent(extent_3d(extent));
        cmd.copy_image_to_buffer(
            image.handle(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            readback.handle(),
            &[copy],
        );
        cmd.transition_image(
            image.handle(),
            range,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            layout,
        );
    })?;
    read_back(&readback, size)
}

fn read_back(readback: &Buffer, size: vk::DeviceSize) -> RenderResult<Vec<u8>> {
    let map = readback.map()?;
    map.invalidate(0, vk::WHOLE_SIZE)?;
    Ok(map.read(0, size as usize)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
    }

    #[test]
    fn test_arena_offsets_are_aligned() {
        let mut arena = StagingArena::default();
        assert_eq!(arena.push(&[1, 2, 3]), 0);
        assert_eq!(arena.push(&[4; 20]), 16);
        assert_eq!(arena.push(&[5]), 48);
        assert_eq!(arena.len(), 49);
        // Padding is zeroed and data is intact.
        assert_eq!(&arena.bytes[0..4], &[1, 2, 3, 0]);
        assert_eq!(arena.bytes[48], 5);
    }

    #[test]
    fn test_texel_sizes() {
        assert_eq!(texel_size(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(texel_size(vk::Format::R16G16B16A16_SFLOAT), Some(8));
        assert_eq!(texel_size(vk::Format::BC1_RGB_UNORM_BLOCK), None);
    }

    #[test]
    fn test_mip_blits_halve_each_level() {
        let extent = vk::Extent2D {
            width: 16,
            height: 4,
        };
        let blits = mip_blits(vk::ImageAspectFlags::COLOR, extent, 5);
        assert_eq!(blits.len(), 4);

        let dst_sizes: Vec<(i32, i32)> = blits
            .iter()
            .map(|b| (b.dst_offsets[1].x, b.dst_offsets[1].y))
            .collect();
        assert_eq!(dst_sizes, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);

        for (i, blit) in blits.iter().enumerate() {
            assert_eq!(blit.src_subresource.mip_level, i as u32);
            assert_eq!(blit.dst_subresource.mip_level, i as u32 + 1);
        }
        assert_eq!((blits[0].src_offsets[1].x, blits[0].src_offsets[1].y), (16, 4));
    }

    #[test]
    fn test_single_level_has_no_blits() {
        let extent = vk::Extent2D {
            width: 1,
            height: 1,
        };
        assert!(mip_blits(vk::ImageAspectFlags::COLOR, extent, 1).is_empty());
    }
}
