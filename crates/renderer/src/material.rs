//! Materials: a pipeline, its layout and the descriptor set layout its
//! instances allocate from.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use venus_rhi::descriptor::DescriptorSetLayout;
use venus_rhi::descriptor_allocator::DescriptorAllocator;
use venus_rhi::device::Device;
use venus_rhi::pipeline::{GraphicsPipelineConfig, Pipeline, PipelineLayout};
use venus_rhi::shader::Shader;

use crate::error::RenderResult;

/// Pipeline state shared by every object drawn with it.
///
/// The pipeline layout is `global_layouts` followed by the material's own
/// set layout, so instance sets bind at [`Material::set_index`].
pub struct Material {
    name: String,
    pipeline: Pipeline,
    layout: PipelineLayout,
    set_layout: DescriptorSetLayout,
    set_index: u32,
}

impl Material {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: Arc<Device>,
        name: impl Into<String>,
        config: &GraphicsPipelineConfig,
        global_layouts: &[vk::DescriptorSetLayout],
        set_layout: DescriptorSetLayout,
        push_constant_ranges: &[vk::PushConstantRange],
        vertex_shader: &Shader,
        fragment_shader: &Shader,
    ) -> RenderResult<Arc<Self>> {
        let name = name.into();
        let mut set_layouts = global_layouts.to_vec();
        set_layouts.push(set_layout.handle());

        let layout = PipelineLayout::new(device.clone(), &set_layouts, push_constant_ranges)?;
        let pipeline = config.build(device, &layout, vertex_shader, fragment_shader)?;
        debug!("Material '{}' created", name);

        Ok(Arc::new(Self {
            name,
            pipeline,
            layout,
            set_layout,
            set_index: global_layouts.len() as u32,
        }))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    #[inline]
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    #[inline]
    pub fn descriptor_set_layout(&self) -> &DescriptorSetLayout {
        &self.set_layout
    }

    /// Set number instance descriptor sets bind to.
    #[inline]
    pub fn set_index(&self) -> u32 {
        self.set_index
    }

    /// Push-constant ranges declared by the layout.
    #[inline]
    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        self.layout.push_constant_ranges()
    }
}

/// A material paired with a descriptor set allocated for its layout.
#[derive(Clone)]
pub struct MaterialInstance {
    material: Arc<Material>,
    set: vk::DescriptorSet,
}

impl MaterialInstance {
    /// Allocates a set for `material`'s layout from `allocator`.
    pub fn new(material: &Arc<Material>, allocator: &mut DescriptorAllocator) -> RenderResult<Self> {
        let set = allocator.allocate(material.set_layout.handle())?;
        Ok(Self {
            material: material.clone(),
            set,
        })
    }

    #[inline]
    pub fn material(&self) -> &Arc<Material> {
        &self.material
    }

    #[inline]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.set
    }
}

impl std::fmt::Debug for MaterialInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialInstance")
            .field("material", &self.material.name)
            .field("set", &self.set)
            .finish()
    }
}
