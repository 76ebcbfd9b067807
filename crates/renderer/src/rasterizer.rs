//! Per-frame draw batching.
//!
//! Objects are added with their material, deduplicated by
//! `(pipeline, pipeline layout)`, stably sorted by material, and recorded
//! into one dynamic rendering pass with the minimum of rebinds.

use std::collections::HashMap;

use ash::vk;
use tracing::trace;

use venus_rhi::command::{transition_barrier, CommandBuffer};
use venus_rhi::image::full_range;
use venus_rhi::rendering::{AttachmentLoad, RenderingAttachments};

use crate::render_object::{PushConstantBlock, RenderObject};

/// Dedup key of a material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RasterMaterial {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// What the rasterizer needs to draw one object.
#[derive(Clone, Copy, Debug)]
pub struct RasterObject {
    pub index_count: u32,
    pub first_index: u32,
    /// Null for non-indexed draws.
    pub index_buffer: vk::Buffer,
    /// Object-level set bound at `set_index`, or null.
    pub descriptor_set: vk::DescriptorSet,
    pub set_index: u32,
    pub push_constants: PushConstantBlock,
}

impl RasterObject {
    /// Splits a render object into its draw data and material key.
    pub fn from_render_object(object: &RenderObject) -> (Self, RasterMaterial) {
        let material = object.material.material();
        (
            Self {
                index_count: object.index_count,
                first_index: object.first_index,
                index_buffer: object.index_buffer,
                descriptor_set: object.material.descriptor_set(),
                set_index: material.set_index(),
                push_constants: object.push_constants,
            },
            RasterMaterial {
                pipeline: material.pipeline(),
                layout: material.pipeline_layout(),
            },
        )
    }
}

/// One step of a recorded pass, in order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RasterCommand {
    BindPipeline(vk::Pipeline),
    SetViewportScissor,
    BindGlobalSets(vk::PipelineLayout),
    BindObjectSet {
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    },
    BindIndexBuffer(vk::Buffer),
    /// Index into the sorted object list whose push constants to push.
    PushConstants { layout: vk::PipelineLayout, object: usize },
    DrawIndexed { index_count: u32, first_index: u32 },
    Draw { vertex_count: u32 },
}

/// Batches render objects for one frame.
pub struct Rasterizer {
    materials: Vec<RasterMaterial>,
    material_indices: HashMap<vk::Pipeline, HashMap<vk::PipelineLayout, usize>>,
    objects: Vec<(RasterObject, usize)>,
    global_sets: Vec<vk::DescriptorSet>,
    render_area: vk::Rect2D,
    clear_color: [f32; 4],
}

impl Rasterizer {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            materials: Vec::new(),
            material_indices: HashMap::new(),
            objects: Vec::new(),
            global_sets: Vec::new(),
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Index of `material`, inserting it if new.
    fn material_index(&mut self, material: RasterMaterial) -> usize {
        let by_layout = self.material_indices.entry(material.pipeline).or_default();
        *by_layout.entry(material.layout).or_insert_with(|| {
            self.materials.push(material);
            self.materials.len() - 1
        })
    }

    /// Adds an object, returning its material index.
    pub fn add(&mut self, object: RasterObject, material: RasterMaterial) -> usize {
        let index = self.material_index(material);
        self.objects.push((object, index));
        index
    }

    pub fn add_render_object(&mut self, object: &RenderObject) -> usize {
        let (object, material) = RasterObject::from_render_object(object);
        self.add(object, material)
    }

    /// Stable sort by material index.
    pub fn sort_objects(&mut self) {
        self.objects.sort_by_key(|&(_, material)| material);
    }

    /// Drops every object and material.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.materials.clear();
        self.material_indices.clear();
    }

    /// Sets bound from set 0 whenever the pipeline changes.
    pub fn set_global_sets(&mut self, sets: &[vk::DescriptorSet]) {
        self.global_sets = sets.to_vec();
    }

    pub fn set_extent(&mut self, extent: vk::Extent2D) {
        self.render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }

    #[inline]
    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    #[inline]
    pub fn materials(&self) -> &[RasterMaterial] {
        &self.materials
    }

    #[inline]
    pub fn objects(&self) -> &[(RasterObject, usize)] {
        &self.objects
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// The bind and draw sequence for the current object order.
    pub fn plan(&self) -> Vec<RasterCommand> {
        let mut commands = Vec::with_capacity(self.objects.len() * 2);
        let mut last_material = None;
        let mut last_pipeline = None;
        let mut last_set = None;
        let mut last_index_buffer = vk::Buffer::null();

        for (i, (object, material_index)) in self.objects.iter().enumerate() {
            let material = self.materials[*material_index];

            let material_changed = last_material != Some(*material_index);
            if material_changed {
                last_material = Some(*material_index);
                if last_pipeline != Some(material.pipeline) {
                    last_pipeline = Some(material.pipeline);
                    commands.push(RasterCommand::BindPipeline(material.pipeline));
                    commands.push(RasterCommand::SetViewportScissor);
                    if !self.global_sets.is_empty() {
                        commands.push(RasterCommand::BindGlobalSets(material.layout));
                    }
                }
            }

            let set = (object.set_index, object.descriptor_set);
            if object.descriptor_set != vk::DescriptorSet::null()
                && (material_changed || last_set != Some(set))
            {
                last_set = Some(set);
                commands.push(RasterCommand::BindObjectSet {
                    layout: material.layout,
                    set_index: object.set_index,
                    set: object.descriptor_set,
                });
            }

            if object.index_buffer != vk::Buffer::null() && object.index_buffer != last_index_buffer {
                last_index_buffer = object.index_buffer;
                commands.push(RasterCommand::BindIndexBuffer(object.index_buffer));
            }

            if !object.push_constants.is_empty() {
                commands.push(RasterCommand::PushConstants {
                    layout: material.layout,
                    object: i,
                });
            }

            if object.index_buffer != vk::Buffer::null() {
                commands.push(RasterCommand::DrawIndexed {
                    index_count: object.index_count,
                    first_index: object.first_index,
                });
            } else {
                commands.push(RasterCommand::Draw {
                    vertex_count: object.index_count,
                });
            }
        }

        commands
    }

    /// Records the pass into `cmd`.
    ///
    /// `color_image` is cleared and left in `COLOR_ATTACHMENT_OPTIMAL`; the
    /// caller transitions it for presentation. Depth is cleared to 0.0.
    pub fn record(
        &self,
        cmd: &CommandBuffer,
        color_image: vk::Image,
        color_view: vk::ImageView,
        depth_view: vk::ImageView,
    ) {
        let color_range = full_range(vk::ImageAspectFlags::COLOR, 1);
        // Source stage matches the image-acquired wait so the clear waits for it.
        cmd.image_barriers(&[transition_barrier(
            color_image,
            color_range,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        )
        .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)]);
        cmd.clear_color_image(
            color_image,
            vk::ImageLayout::GENERAL,
            self.clear_color,
            color_range,
        );
        cmd.transition_image(
            color_image,
            color_range,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );

        let attachments = RenderingAttachments::with_area(self.render_area)
            .color(color_view, AttachmentLoad::Load)
            .depth(depth_view, AttachmentLoad::Clear(0.0));
        cmd.begin_rendering(&attachments.info());
        self.record_draws(cmd);
        cmd.end_rendering();
    }

    /// Records only the binds and draws, inside a pass the caller began.
    pub fn record_draws(&self, cmd: &CommandBuffer) {
        let plan = self.plan();
        trace!(
            "Recording {} object(s), {} material(s), {} command(s)",
            self.objects.len(),
            self.materials.len(),
            plan.len()
        );

        for command in plan {
            match command {
                RasterCommand::BindPipeline(pipeline) => cmd.bind_graphics_pipeline(pipeline),
                RasterCommand::SetViewportScissor => cmd.set_viewport_and_scissor(self.render_area),
                RasterCommand::BindGlobalSets(layout) => {
                    cmd.bind_descriptor_sets(layout, 0, &self.global_sets)
                }
                RasterCommand::BindObjectSet {
                    layout,
                    set_index,
                    set,
                } => cmd.bind_descriptor_sets(layout, set_index, &[set]),
                RasterCommand::BindIndexBuffer(buffer) => {
                    cmd.bind_index_buffer(buffer, 0, vk::IndexType::UINT32)
                }
                RasterCommand::PushConstants { layout, object } => cmd.push_constants_bytes(
                    layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    self.objects[object].0.push_constants.as_bytes(),
                ),
                RasterCommand::DrawIndexed {
                    index_count,
                    first_index,
                } => cmd.draw_indexed(index_count, 1, first_index, 0, 0),
                RasterCommand::Draw { vertex_count } => cmd.draw(vertex_count, 1, 0, 0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn material(pipeline: u64, layout: u64) -> RasterMaterial {
        RasterMaterial {
            pipeline: vk::Pipeline::from_raw(pipeline),
            layout: vk::PipelineLayout::from_raw(layout),
        }
    }

    fn object(tag: u32) -> RasterObject {
        RasterObject {
            index_count: 3,
            first_index: tag,
            index_buffer: vk::Buffer::null(),
            descriptor_set: vk::DescriptorSet::null(),
            set_index: 1,
            push_constants: PushConstantBlock::EMPTY,
        }
    }

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn test_materials_dedup_by_pipeline_and_layout() {
        let mut rasterizer = Rasterizer::new(extent());
        assert_eq!(rasterizer.add(object(0), material(1, 10)), 0);
        assert_eq!(rasterizer.add(object(1), material(1, 10)), 0);
        // Same pipeline, different layout is a different material.
        assert_eq!(rasterizer.add(object(2), material(1, 11)), 1);
        assert_eq!(rasterizer.add(object(3), material(2, 10)), 2);
        assert_eq!(rasterizer.add(object(4), material(2, 10)), 2);

        assert_eq!(rasterizer.materials().len(), 3);
        assert_eq!(rasterizer.len(), 5);
    }

    #[test]
    fn test_sort_groups_by_material_and_keeps_insertion_order() {
        let (a, b, c) = (material(1, 1), material(2, 1), material(3, 1));
        let mut rasterizer = Rasterizer::new(extent());
        for (tag, m) in [a, b, a, c, b, a].into_iter().enumerate() {
            rasterizer.add(object(tag as u32), m);
        }

        rasterizer.sort_objects();

        let order: Vec<(usize, u32)> = rasterizer
            .objects()
            .iter()
            .map(|(o, m)| (*m, o.first_index))
            .collect();
        assert_eq!(
            order,
            vec![(0, 0), (0, 2), (0, 5), (1, 1), (1, 4), (2, 3)]
        );
    }

    #[test]
    fn test_plan_binds_pipeline_once_per_group() {
        let mut rasterizer = Rasterizer::new(extent());
        rasterizer.set_global_sets(&[vk::DescriptorSet::from_raw(99)]);
        rasterizer.add(object(0), material(1, 10));
        rasterizer.add(object(1), material(2, 10));
        rasterizer.add(object(2), material(1, 10));
        rasterizer.sort_objects();

        let binds = rasterizer
            .plan()
            .into_iter()
            .filter(|c| matches!(c, RasterCommand::BindPipeline(_)))
            .count();
        assert_eq!(binds, 2);

        let plan = rasterizer.plan();
        assert_eq!(
            &plan[..4],
            &[
                RasterCommand::BindPipeline(vk::Pipeline::from_raw(1)),
                RasterCommand::SetViewportScissor,
                RasterCommand::BindGlobalSets(vk::PipelineLayout::from_raw(10)),
                RasterCommand::Draw { vertex_count: 3 },
            ]
        );
    }

    #[test]
    fn test_plan_shared_pipeline_skips_rebind() {
        // Two layouts on one pipeline: two materials, one pipeline bind.
        let mut rasterizer = Rasterizer::new(extent());
        rasterizer.add(object(0), material(1, 10));
        rasterizer.add(object(1), material(1, 11));

        let plan = rasterizer.plan();
        let binds = plan
            .iter()
            .filter(|c| matches!(c, RasterCommand::BindPipeline(_)))
            .count();
        assert_eq!(binds, 1);
        // No global sets configured, so none are bound.
        assert!(!plan.iter().any(|c| matches!(c, RasterCommand::BindGlobalSets(_))));
    }

    #[test]
    fn test_plan_indexed_draws_and_index_rebinds() {
        let index_a = vk::Buffer::from_raw(7);
        let index_b = vk::Buffer::from_raw(8);
        let mut rasterizer = Rasterizer::new(extent());
        for buffer in [index_a, index_a, index_b] {
            let mut o = object(0);
            o.index_buffer = buffer;
            o.index_count = 6;
            rasterizer.add(o, material(1, 1));
        }

        let plan = rasterizer.plan();
        let index_binds: Vec<vk::Buffer> = plan
            .iter()
            .filter_map(|c| match c {
                RasterCommand::BindIndexBuffer(b) => Some(*b),
                _ => None,
            })
            .collect();
        assert_eq!(index_binds, vec![index_a, index_b]);
        assert_eq!(
            plan.iter()
                .filter(|c| matches!(c, RasterCommand::DrawIndexed { index_count: 6, .. }))
                .count(),
            3
        );
    }

    #[test]
    fn test_plan_object_sets_and_push_constants() {
        let set_a = vk::DescriptorSet::from_raw(21);
        let set_b = vk::DescriptorSet::from_raw(22);
        let mut rasterizer = Rasterizer::new(extent());
        for set in [set_a, set_a, set_b] {
            let mut o = object(0);
            o.descriptor_set = set;
            o.push_constants = PushConstantBlock::from_bytes(&[1, 2, 3, 4]).unwrap();
            rasterizer.add(o, material(1, 1));
        }

        let plan = rasterizer.plan();
        let set_binds: Vec<vk::DescriptorSet> = plan
            .iter()
            .filter_map(|c| match c {
                RasterCommand::BindObjectSet { set, set_index, .. } => {
                    assert_eq!(*set_index, 1);
                    Some(*set)
                }
                _ => None,
            })
            .collect();
        assert_eq!(set_binds, vec![set_a, set_b]);

        let pushes: Vec<usize> = plan
            .iter()
            .filter_map(|c| match c {
                RasterCommand::PushConstants { object, .. } => Some(*object),
                _ => None,
            })
            .collect();
        assert_eq!(pushes, vec![0, 1, 2]);
    }

    #[test]
    fn test_clear_resets_cache() {
        let mut rasterizer = Rasterizer::new(extent());
        rasterizer.add(object(0), material(1, 1));
        rasterizer.clear();
        assert!(rasterizer.is_empty());
        assert!(rasterizer.materials().is_empty());
        assert_eq!(rasterizer.add(object(0), material(2, 2)), 0);
    }
}
