//! Pipeline layouts and graphics pipelines for dynamic rendering.
//!
//! - [`PipelineLayout`] wraps VkPipelineLayout (descriptor set layouts and push constants)
//! - [`Pipeline`] wraps VkPipeline
//! - [`GraphicsPipelineConfig`] enumerates the fixed-function options and builds a
//!   pipeline with no vertex input (vertices are pulled through buffer device
//!   addresses) and dynamic viewport and scissor
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use venus_rhi::device::Device;
//! use venus_rhi::shader::Shader;
//! use venus_rhi::pipeline::{GraphicsPipelineConfig, PipelineLayout};
//! use venus_rhi::vk;
//!
//! # fn example(device: Arc<Device>, vs: &Shader, fs: &Shader) -> venus_rhi::RhiResult<()> {
//! let layout = PipelineLayout::new(device.clone(), &[], &[])?;
//! let pipeline = GraphicsPipelineConfig::new()
//!     .color_format(vk::Format::B8G8R8A8_UNORM)
//!     .depth(vk::Format::D16_UNORM, true, vk::CompareOp::GREATER_OR_EQUAL)
//!     .build(device, &layout, vs, fs)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::{Shader, ShaderStage};

/// Vulkan pipeline layout wrapper.
///
/// Immutable after creation.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayout {
    /// Creates a new pipeline layout.
    ///
    /// # Errors
    ///
    /// Returns an error if pipeline layout creation fails.
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout with {} descriptor set layout(s) and {} push constant range(s)",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self {
            device,
            layout,
            push_constant_ranges: push_constant_ranges.to_vec(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Vulkan pipeline wrapper.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Pipeline destroyed ({:?})", self.bind_point);
    }
}

/// Color blending presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    /// Blending disabled.
    #[default]
    Opaque,
    /// `src * a + dst * (1 - a)`.
    Alpha,
    /// `src * a + dst`.
    Additive,
}

impl BlendMode {
    pub fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        let dst_color = match self {
            Self::Opaque => return state.blend_enable(false),
            Self::Alpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            Self::Additive => vk::BlendFactor::ONE,
        };
        state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(dst_color)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }
}

/// Depth attachment and test settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthState {
    pub format: vk::Format,
    pub write: bool,
    pub compare_op: vk::CompareOp,
}

/// Every option a graphics pipeline supports.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineConfig {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,
    pub blend: BlendMode,
    pub color_formats: Vec<vk::Format>,
    /// `None` disables the depth attachment and depth testing.
    pub depth: Option<DepthState>,
}

impl Default for GraphicsPipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsPipelineConfig {
    /// Triangle list, filled, no culling, opaque, no attachments.
    pub fn new() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            blend: BlendMode::Opaque,
            color_formats: Vec::new(),
            depth: None,
        }
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull(mut self, mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = mode;
        self.front_face = front_face;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn color_format(mut self, format: vk::Format) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn depth(mut self, format: vk::Format, write: bool, compare_op: vk::CompareOp) -> Self {
        self.depth = Some(DepthState {
            format,
            write,
            compare_op,
        });
        self
    }

    pub fn no_depth(mut self) -> Self {
        self.depth = None;
        self
    }

    /// Creates the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if the shaders are bound to the wrong
    /// stages or no attachment is configured, and the Vulkan error if creation fails.
    pub fn build(
        &self,
        device: Arc<Device>,
        layout: &PipelineLayout,
        vertex_shader: &Shader,
        fragment_shader: &Shader,
    ) -> RhiResult<Pipeline> {
        self.validate(vertex_shader.stage(), fragment_shader.stage())?;

        let shader_stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .line_width(1.0);
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(self.samples)
            .min_sample_shading(1.0);

        let depth_stencil_state = match self.depth {
            Some(depth) => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(true)
                .depth_write_enable(depth.write)
                .depth_compare_op(depth.compare_op)
                .min_depth_bounds(0.0)
                .max_depth_bounds(1.0),
            None => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(false)
                .depth_write_enable(false)
                .depth_compare_op(vk::CompareOp::NEVER),
        };

        let blend_attachments = vec![self.blend.attachment_state(); self.color_formats.len()];
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&self.color_formats)
            .depth_attachment_format(
                self.depth
                    .map_or(vk::Format::UNDEFINED, |depth| depth.format),
            );

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering_info);

        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| result)?[0]
        };

        debug!(
            "Graphics pipeline created: {} color attachment(s), depth {:?}",
            self.color_formats.len(),
            self.depth.map(|d| d.format)
        );

        Ok(Pipeline {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }

    fn validate(&self, vertex: ShaderStage, fragment: ShaderStage) -> RhiResult<()> {
        if vertex != ShaderStage::Vertex || fragment != ShaderStage::Fragment {
            return Err(RhiError::PipelineError(format!(
                "expected vertex and fragment shaders, got {} and {}",
                vertex.name(),
                fragment.name()
            )));
        }
        if self.color_formats.is_empty() && self.depth.is_none() {
            return Err(RhiError::PipelineError(
                "a graphics pipeline needs at least one attachment".to_string(),
            ));
        }
        Ok(())
    }
}
