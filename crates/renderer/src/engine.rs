//! The process-wide engine.
//!
//! [`Engine`] owns the Vulkan instance, the presentation surface, the
//! [`GraphicsDevice`], the read-only [`Globals`] and the per-frame cache.
//! At most one engine is alive per process.
//!
//! # Initialization and teardown
//!
//! ```text
//! init:     Display -> Instance -> Surface -> GraphicsDevice -> Globals -> cache
//! shutdown: cache -> Globals -> GraphicsDevice -> Surface -> Instance
//! ```
//!
//! A failed init step drops everything built before it in reverse order.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use tracing::{debug, info, warn};

use venus_core::{BaseKind, ErrorCode, SubKind};
use venus_platform::{Display, Surface};
use venus_rhi::buffer::{Buffer, BufferUsage};
use venus_rhi::command::{transition_barrier, CommandBuffer};
use venus_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorSetLayout};
use venus_rhi::descriptor_allocator::DescriptorAllocator;
use venus_rhi::descriptor_writer::DescriptorWriter;
use venus_rhi::device::Device;
use venus_rhi::image::{full_range, Image, ImageConfig};
use venus_rhi::instance::{Instance, InstanceConfig};
use venus_rhi::memory::MemoryAllocator;
use venus_rhi::pipeline::GraphicsPipelineConfig;
use venus_rhi::sampler::{Sampler, SamplerConfig};
use venus_rhi::shader::{Shader, ShaderStage};

use crate::config::EngineConfig;
use crate::error::{RenderError, RenderResult};
use crate::graphics_device::{GraphicsDevice, GraphicsDeviceConfig};
use crate::material::{Material, MaterialInstance};
use crate::rasterizer::Rasterizer;
use crate::render_object::{MeshPushConstants, RenderObject};
use crate::staging::ImageWriter;

pub const MESH_VERTEX_SHADER: &str = "mesh.vert.spv";
pub const MESH_FRAGMENT_SHADER: &str = "mesh.frag.spv";

const ERROR_IMAGE_SIZE: u32 = 16;
const MAGENTA: [u8; 4] = [255, 0, 255, 255];
const BLACK: [u8; 4] = [0, 0, 0, 255];
const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Error returned by a second `Engine::init` while one is alive.
pub const ENGINE_ALREADY_INITIALIZED: ErrorCode = ErrorCode::new(BaseKind::Custom, SubKind::CheckError);

static ENGINE_ALIVE: AtomicBool = AtomicBool::new(false);

/// Holds the process-wide engine slot; releases it on drop.
struct EngineGuard;

impl EngineGuard {
    fn acquire() -> RenderResult<Self> {
        ENGINE_ALIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| EngineGuard)
            .map_err(|_| RenderError::from(ENGINE_ALREADY_INITIALIZED))
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        ENGINE_ALIVE.store(false, Ordering::Release);
    }
}

/// Per-frame scene constants bound at set 0, binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SceneData {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub ambient_color: Vec4,
    pub sunlight_direction: Vec4,
    pub sunlight_color: Vec4,
}

impl Default for SceneData {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
            ambient_color: Vec4::splat(0.1),
            sunlight_direction: Vec4::new(0.0, 1.0, 0.5, 1.0),
            sunlight_color: Vec4::ONE,
        }
    }
}

/// RGBA8 checkerboard of `size`×`size` texels alternating `even` and `odd`
/// by `(x + y) % 2`.
pub fn checkerboard(size: u32, even: [u8; 4], odd: [u8; 4]) -> Vec<u8> {
    (0..size)
        .flat_map(|y| (0..size).map(move |x| if (x + y) % 2 == 0 { even } else { odd }))
        .flatten()
        .collect()
}

/// Resources created once at init and read-only afterwards.
pub struct Globals {
    mesh_material: Arc<Material>,
    scene_layout: DescriptorSetLayout,
    vertex_shader: Shader,
    fragment_shader: Shader,
    linear_sampler: Sampler,
    nearest_sampler: Sampler,
    error_image: Image,
    white_image: Image,
}

impl Globals {
    fn new(gfx: &GraphicsDevice, config: &EngineConfig) -> RenderResult<Self> {
        let device = gfx.device().clone();

        let vertex_shader = load_shader(&device, &config.shader_dir, MESH_VERTEX_SHADER, ShaderStage::Vertex)?;
        let fragment_shader =
            load_shader(&device, &config.shader_dir, MESH_FRAGMENT_SHADER, ShaderStage::Fragment)?;

        let scene_layout = DescriptorLayoutBuilder::new()
            .uniform_buffer(0)
            .build(
                device.clone(),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )?;
        let material_layout = DescriptorLayoutBuilder::new()
            .combined_image_sampler(0)
            .build(device.clone(), vk::ShaderStageFlags::FRAGMENT)?;

        let pipeline_config = GraphicsPipelineConfig::new()
            .color_format(gfx.swapchain().format())
            .depth(config.depth_format, true, vk::CompareOp::GREATER_OR_EQUAL);
        let push_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(std::mem::size_of::<MeshPushConstants>() as u32);
        let mesh_material = Material::new(
            device.clone(),
            "mesh",
            &pipeline_config,
            &[scene_layout.handle()],
            material_layout,
            &[push_range],
            &vertex_shader,
            &fragment_shader,
        )?;

        let linear_sampler = SamplerConfig::linear().create(device.clone())?;
        let nearest_sampler = SamplerConfig::nearest().create(device)?;

        let (error_image, white_image) = create_default_images(gfx)?;

        info!("Engine globals ready");

        Ok(Self {
            mesh_material,
            scene_layout,
            vertex_shader,
            fragment_shader,
            linear_sampler,
            nearest_sampler,
            error_image,
            white_image,
        })
    }

    #[inline]
    pub fn mesh_material(&self) -> &Arc<Material> {
        &self.mesh_material
    }

    #[inline]
    pub fn scene_layout(&self) -> &DescriptorSetLayout {
        &self.scene_layout
    }

    #[inline]
    pub fn material_layout(&self) -> &DescriptorSetLayout {
        self.mesh_material.descriptor_set_layout()
    }

    #[inline]
    pub fn vertex_shader(&self) -> &Shader {
        &self.vertex_shader
    }

    #[inline]
    pub fn fragment_shader(&self) -> &Shader {
        &self.fragment_shader
    }

    #[inline]
    pub fn linear_sampler(&self) -> &Sampler {
        &self.linear_sampler
    }

    #[inline]
    pub fn nearest_sampler(&self) -> &Sampler {
        &self.nearest_sampler
    }

    /// Magenta and black checkerboard shown for missing textures.
    #[inline]
    pub fn error_image(&self) -> &Image {
        &self.error_image
    }

    #[inline]
    pub fn white_image(&self) -> &Image {
        &self.white_image
    }
}

fn load_shader(
    device: &Arc<Device>,
    dir: &Path,
    file: &str,
    stage: ShaderStage,
) -> RenderResult<Shader> {
    Ok(Shader::from_spirv_file(device.clone(), &dir.join(file), stage)?)
}

fn create_default_images(gfx: &GraphicsDevice) -> RenderResult<(Image, Image)> {
    let allocator = gfx.allocator();
    let usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;

    let error_image = ImageConfig::new(
        vk::Extent2D {
            width: ERROR_IMAGE_SIZE,
            height: ERROR_IMAGE_SIZE,
        },
        vk::Format::R8G8B8A8_UNORM,
    )
    .usage(usage)
    .name("error image")
    .create(allocator)?;

    let white_image = ImageConfig::new(
        vk::Extent2D {
            width: 1,
            height: 1,
        },
        vk::Format::R8G8B8A8_UNORM,
    )
    .usage(usage)
    .name("white image")
    .create(allocator)?;

    let mut writer = ImageWriter::new();
    writer.write(&error_image, &checkerboard(ERROR_IMAGE_SIZE, MAGENTA, BLACK), false)?;
    writer.write(&white_image, &WHITE, false)?;
    writer.flush(gfx.immediate(), allocator)?;

    Ok((error_image, white_image))
}

/// Per-slot state reset at the start of each frame.
struct SlotCache {
    descriptors: DescriptorAllocator,
    scene_buffer: Buffer,
}

/// Per-frame caches: one descriptor allocator and scene buffer per frame
/// slot, and the rasterizer.
struct FrameCache {
    slots: Vec<SlotCache>,
    rasterizer: Rasterizer,
}

impl FrameCache {
    fn new(gfx: &GraphicsDevice, config: &EngineConfig) -> RenderResult<Self> {
        let slots = (0..gfx.frame_ring().slot_count())
            .map(|_| Self::slot(gfx.device(), gfx.allocator(), config))
            .collect::<RenderResult<Vec<_>>>()?;
        debug!("Frame cache created for {} slot(s)", slots.len());
        Ok(Self {
            slots,
            rasterizer: Rasterizer::new(gfx.extent()),
        })
    }

    fn slot(
        device: &Arc<Device>,
        allocator: &Arc<MemoryAllocator>,
        config: &EngineConfig,
    ) -> RenderResult<SlotCache> {
        Ok(SlotCache {
            descriptors: DescriptorAllocator::new(
                device.clone(),
                config.initial_descriptor_sets,
                &config.descriptor_ratios,
            )?,
            scene_buffer: Buffer::new(
                allocator,
                BufferUsage::Uniform,
                std::mem::size_of::<SceneData>() as vk::DeviceSize,
            )?,
        })
    }

    /// Matches the slot list to a rebuilt frame ring.
    fn resize_slots(&mut self, gfx: &GraphicsDevice, config: &EngineConfig) -> RenderResult<()> {
        let count = gfx.frame_ring().slot_count();
        while self.slots.len() < count {
            self.slots
                .push(Self::slot(gfx.device(), gfx.allocator(), config)?);
        }
        self.slots.truncate(count);
        Ok(())
    }
}

/// What a `draw_frame` callback can touch.
pub struct Frame<'a> {
    device: &'a Arc<Device>,
    globals: &'a Globals,
    rasterizer: &'a mut Rasterizer,
    descriptors: &'a mut DescriptorAllocator,
    scene: &'a mut SceneData,
    extent: vk::Extent2D,
    index: u64,
}

impl<'a> Frame<'a> {
    /// Queues a draw.
    pub fn draw(&mut self, object: &RenderObject) {
        self.rasterizer.add_render_object(object);
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.rasterizer.set_clear_color(color);
    }

    pub fn scene_mut(&mut self) -> &mut SceneData {
        &mut *self.scene
    }

    pub fn globals(&self) -> &'a Globals {
        self.globals
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Frames finished before this one.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Allocates a set valid until this slot's next frame.
    pub fn allocate_set(&mut self, layout: &DescriptorSetLayout) -> RenderResult<vk::DescriptorSet> {
        Ok(self.descriptors.allocate(layout.handle())?)
    }

    /// A frame-lifetime instance of `material` whose binding 0 samples `image`.
    pub fn material_instance(
        &mut self,
        material: &Arc<Material>,
        image: &Image,
        sampler: &Sampler,
    ) -> RenderResult<MaterialInstance> {
        let instance = MaterialInstance::new(material, &mut *self.descriptors)?;
        let mut writer = DescriptorWriter::new();
        writer.write_image(
            0,
            image.view(),
            sampler.handle(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        );
        writer.update(self.device, instance.descriptor_set());
        Ok(instance)
    }
}

pub struct Engine {
    // Field order is teardown order.
    cache: FrameCache,
    globals: Globals,
    gfx: GraphicsDevice,
    surface: Surface,
    instance: Instance,
    config: EngineConfig,
    requested_extent: vk::Extent2D,
    _guard: EngineGuard,
}

impl Engine {
    /// Opens the display and builds the whole engine on it.
    ///
    /// # Errors
    ///
    /// `(CUSTOM, CHECK_ERROR)` if an engine is already alive; otherwise the
    /// first failing step's error, after everything before it was torn down.
    pub fn init(display: &mut impl Display, config: EngineConfig) -> RenderResult<Self> {
        config.validate()?;
        let guard = EngineGuard::acquire()?;

        display.init(&config.title, config.extent)?;
        let extensions = display.required_extensions()?;

        let instance = InstanceConfig::new(config.title.clone())
            .api_version(config.api_version)
            .validation(config.validation)
            .surface_extensions(&extensions)
            .create()?;
        let surface = display.create_surface(instance.entry(), instance.handle())?;

        let resolution = display.resolution();
        let extent = if resolution.width > 0 && resolution.height > 0 {
            resolution
        } else {
            config.extent
        };

        let gfx = GraphicsDevice::new(
            &instance,
            &surface,
            GraphicsDeviceConfig {
                extent,
                present_mode: config.present_mode,
                depth_format: config.depth_format,
                diagnostic: config.diagnostic,
            },
        )?;
        let globals = Globals::new(&gfx, &config)?;
        let cache = FrameCache::new(&gfx, &config)?;

        info!("Engine initialized ({}x{})", extent.width, extent.height);

        Ok(Self {
            cache,
            globals,
            gfx,
            surface,
            instance,
            config,
            requested_extent: extent,
            _guard: guard,
        })
    }

    /// True while an engine exists in this process.
    pub fn is_alive() -> bool {
        ENGINE_ALIVE.load(Ordering::Acquire)
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    #[inline]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    #[inline]
    pub fn device(&self) -> &GraphicsDevice {
        &self.gfx
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut GraphicsDevice {
        &mut self.gfx
    }

    #[inline]
    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Rebuilds the swapchain for `extent`, e.g. after a window resize.
    pub fn resize(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.requested_extent = extent;
        self.gfx.resize(extent)?;
        self.cache.resize_slots(&self.gfx, &self.config)?;
        self.cache.rasterizer.set_extent(self.gfx.extent());
        Ok(())
    }

    /// Runs one frame: prepare, `build`, record, submit, present.
    ///
    /// Returns `Ok(false)` when the frame was skipped because the swapchain
    /// had to be rebuilt.
    pub fn draw_frame(&mut self, build: impl FnOnce(&mut Frame<'_>)) -> RenderResult<bool> {
        match self.gfx.prepare() {
            Ok(_) => {}
            Err(e) if e.is_resize() => {
                self.resize(self.requested_extent)?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        match self.record_and_submit(build) {
            Ok(needs_resize) => {
                if needs_resize {
                    self.resize(self.requested_extent)?;
                }
                Ok(true)
            }
            Err(e) => {
                match self.gfx.abandon() {
                    Ok(true) => {
                        if let Err(resize) = self.resize(self.requested_extent) {
                            warn!("Failed to rebuild swapchain after abandoned frame: {}", resize);
                        }
                    }
                    Ok(false) => {}
                    Err(abandon) => warn!("Failed to abandon frame: {}", abandon),
                }
                Err(e)
            }
        }
    }

    fn record_and_submit(&mut self, build: impl FnOnce(&mut Frame<'_>)) -> RenderResult<bool> {
        let slot_index = self.gfx.current_slot_index();
        let extent = self.gfx.extent();
        let frame_index = self.gfx.frame_ring().frame_counter();
        let device = self.gfx.device().clone();

        let slot = &mut self.cache.slots[slot_index];
        slot.descriptors.reset()?;

        let rasterizer = &mut self.cache.rasterizer;
        rasterizer.clear();
        rasterizer.set_extent(extent);

        let mut scene = SceneData::default();
        {
            let mut frame = Frame {
                device: &device,
                globals: &self.globals,
                rasterizer,
                descriptors: &mut slot.descriptors,
                scene: &mut scene,
                extent,
                index: frame_index,
            };
            build(&mut frame);
        }

        slot.scene_buffer.write_data(0, std::slice::from_ref(&scene))?;
        let scene_set = slot
            .descriptors
            .allocate(self.globals.scene_layout.handle())?;
        let mut writer = DescriptorWriter::new();
        writer.write_buffer(
            0,
            slot.scene_buffer.handle(),
            std::mem::size_of::<SceneData>() as vk::DeviceSize,
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
        );
        writer.update(&device, scene_set);

        let rasterizer = &mut self.cache.rasterizer;
        rasterizer.set_global_sets(&[scene_set]);
        rasterizer.sort_objects();

        let (color_image, color_view) = self.gfx.current_image();
        let depth_image = self.gfx.swapchain().depth().handle();
        let depth_view = self.gfx.depth_view();

        self.gfx
            .begin_record(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        self.gfx.record(|cmd| {
            prepare_depth(cmd, depth_image);
            rasterizer.record(cmd, color_image, color_view, depth_view);
            cmd.transition_image(
                color_image,
                full_range(vk::ImageAspectFlags::COLOR, 1),
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            );
        })?;
        self.gfx.end_record()?;
        self.gfx.submit()?;
        self.gfx.finish()
    }
}

/// Discards last frame's depth and readies it as an attachment. The source
/// scope covers depth writes still in flight from earlier submissions.
fn prepare_depth(cmd: &CommandBuffer, depth_image: vk::Image) {
    let barrier = transition_barrier(
        depth_image,
        full_range(vk::ImageAspectFlags::DEPTH, 1),
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
    )
    .src_stage_mask(
        vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
    )
    .src_access_mask(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE);
    cmd.image_barriers(&[barrier]);
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.gfx.wait_idle() {
            tracing::error!("Failed to wait for device idle during engine shutdown: {}", e);
        }
        info!("Shutting down engine");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkerboard_pattern() {
        let pixels = checkerboard(4, WHITE, BLACK);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        let texel = |x: usize, y: usize| &pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(texel(0, 0), &WHITE);
        assert_eq!(texel(1, 0), &BLACK);
        assert_eq!(texel(0, 1), &BLACK);
        assert_eq!(texel(3, 3), &WHITE);
    }

    #[test]
    fn test_scene_data_is_std140_sized() {
        // Three matrices and three vec4s, no padding.
        assert_eq!(std::mem::size_of::<SceneData>(), 3 * 64 + 3 * 16);
    }

    #[test]
    fn test_second_engine_guard_is_rejected() {
        let first = EngineGuard::acquire().unwrap();
        assert!(Engine::is_alive());

        match EngineGuard::acquire() {
            Err(e) => assert_eq!(e.code(), ENGINE_ALREADY_INITIALIZED),
            Ok(_) => panic!("second guard acquired"),
        }

        drop(first);
        assert!(!Engine::is_alive());
        let again = EngineGuard::acquire().unwrap();
        drop(again);
    }
}
