//! Staging uploads and readbacks on a real device.

mod common;

use ash::vk;
use venus_renderer::{
    checkerboard, create_buffer_with_data, download_buffer, download_image_level, BufferWriter,
    ImageWriter,
};
use venus_rhi::buffer::{Buffer, BufferUsage};
use venus_rhi::image::{mip_extent, ImageConfig};

const WHITE: [u8; 4] = [255, 255, 255, 255];
const RED: [u8; 4] = [239, 83, 80, 255];

#[test]
fn test_buffer_writer_round_trip() {
    let Some(ctx) = common::headless() else {
        return;
    };

    let buffer = Buffer::new(&ctx.allocator, BufferUsage::Storage, 256).unwrap();
    let head: Vec<u32> = (0..16).collect();
    let tail = [0xabcd_u32; 8];

    let mut writer = BufferWriter::new();
    writer.write(&buffer, 0, &head).unwrap();
    writer.write(&buffer, 128, &tail).unwrap();
    assert_eq!(writer.len(), 2);
    writer.flush(&ctx.immediate, &ctx.allocator).unwrap();
    assert!(writer.is_empty());

    let bytes = download_buffer(&ctx.immediate, &ctx.allocator, &buffer).unwrap();
    let words: &[u32] = bytemuck::cast_slice(&bytes);
    assert_eq!(&words[..16], head.as_slice());
    assert_eq!(&words[32..40], &tail);
}

#[test]
fn test_buffer_writer_rejects_overflow() {
    let Some(ctx) = common::headless() else {
        return;
    };

    let buffer = Buffer::new(&ctx.allocator, BufferUsage::Storage, 16).unwrap();
    let mut writer = BufferWriter::new();
    assert!(writer.write(&buffer, 8, &[0u32; 4]).is_err());
    assert!(writer.is_empty());
}

#[test]
fn test_create_buffer_with_data() {
    let Some(ctx) = common::headless() else {
        return;
    };

    let data = [1.0f32, 2.0, 3.0, 4.0];
    let buffer =
        create_buffer_with_data(&ctx.immediate, &ctx.allocator, BufferUsage::Storage, &data)
            .unwrap();
    assert_eq!(buffer.size(), 16);

    let bytes = download_buffer(&ctx.immediate, &ctx.allocator, &buffer).unwrap();
    assert_eq!(bytemuck::cast_slice::<u8, f32>(&bytes), &data);
}

#[test]
fn test_checker_mip_chain_upload() {
    let Some(ctx) = common::headless() else {
        return;
    };

    let extent = vk::Extent2D {
        width: 16,
        height: 16,
    };
    let image = ImageConfig::new(extent, vk::Format::R8G8B8A8_UNORM)
        .usage(
            vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        )
        .mipmapped()
        .name("checker")
        .create(&ctx.allocator)
        .unwrap();
    assert_eq!(image.mip_levels(), 5);

    let pixels = checkerboard(16, WHITE, RED);
    let mut writer = ImageWriter::new();
    writer.write(&image, &pixels, true).unwrap();
    writer.flush(&ctx.immediate, &ctx.allocator).unwrap();

    let base = download_image_level(
        &ctx.immediate,
        &ctx.allocator,
        &image,
        0,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )
    .unwrap();
    assert_eq!(base, pixels);

    // Every level was left readable; the smallest one averages the pattern.
    for level in 1..image.mip_levels() {
        let texels = download_image_level(
            &ctx.immediate,
            &ctx.allocator,
            &image,
            level,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        let size = mip_extent(extent, level);
        assert_eq!(texels.len(), (size.width * size.height * 4) as usize);
    }
    let last = download_image_level(
        &ctx.immediate,
        &ctx.allocator,
        &image,
        4,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )
    .unwrap();
    let expected = [247u8, 169, 167, 255];
    for (got, want) in last.iter().zip(expected) {
        assert!(got.abs_diff(want) <= 2, "{:?} vs {:?}", last, expected);
    }
}

#[test]
fn test_mip_generation_requires_transfer_src() {
    let Some(ctx) = common::headless() else {
        return;
    };

    let image = ImageConfig::new(
        vk::Extent2D {
            width: 4,
            height: 4,
        },
        vk::Format::R8G8B8A8_UNORM,
    )
    .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
    .mipmapped()
    .create(&ctx.allocator)
    .unwrap();

    let mut writer = ImageWriter::new();
    assert!(writer.write(&image, &[0u8; 64], true).is_err());
    assert!(writer.write(&image, &[0u8; 60], false).is_err());
}
