//! Batched descriptor set writes.

use std::collections::VecDeque;

use ash::vk;

use crate::device::Device;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteSource {
    Buffer(usize),
    Image(usize),
    AccelerationStructure(usize),
}

#[derive(Clone, Copy, Debug)]
struct PendingWrite {
    binding: u32,
    ty: vk::DescriptorType,
    source: WriteSource,
}

/// Accumulates descriptor writes and flushes them to a set in one call.
///
/// Info structs live in deques that only grow at the back. Pending writes
/// refer to them by index, which stays valid until [`DescriptorWriter::clear`]
/// even when the deque reallocates; pointers are taken only inside `update`.
#[derive(Default)]
pub struct DescriptorWriter {
    buffer_infos: VecDeque<vk::DescriptorBufferInfo>,
    image_infos: VecDeque<vk::DescriptorImageInfo>,
    acceleration_structures: VecDeque<vk::AccelerationStructureKHR>,
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a buffer descriptor (uniform, storage, and their dynamic forms).
    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.buffer_infos.push_back(
            vk::DescriptorBufferInfo::default()
                .buffer(buffer)
                .offset(offset)
                .range(size),
        );
        self.writes.push(PendingWrite {
            binding,
            ty,
            source: WriteSource::Buffer(self.buffer_infos.len() - 1),
        });
        self
    }

    /// Queues an image descriptor (sampled, storage, combined image sampler or sampler).
    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.image_infos.push_back(
            vk::DescriptorImageInfo::default()
                .sampler(sampler)
                .image_view(view)
                .image_layout(layout),
        );
        self.writes.push(PendingWrite {
            binding,
            ty,
            source: WriteSource::Image(self.image_infos.len() - 1),
        });
        self
    }

    /// Queues an acceleration structure descriptor.
    pub fn write_acceleration_structure(
        &mut self,
        binding: u32,
        acceleration_structure: vk::AccelerationStructureKHR,
    ) -> &mut Self {
        self.acceleration_structures
            .push_back(acceleration_structure);
        self.writes.push(PendingWrite {
            binding,
            ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            source: WriteSource::AccelerationStructure(self.acceleration_structures.len() - 1),
        });
        self
    }

    /// Number of queued writes.
    #[inline]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Empties the queued writes and their backing storage.
    pub fn clear(&mut self) {
        self.writes.clear();
        self.buffer_infos.clear();
        self.image_infos.clear();
        self.acceleration_structures.clear();
    }

    /// Points every queued write at `set` and issues a single update.
    ///
    /// The set must not be referenced by pending GPU work.
    pub fn update(&self, device: &Device, set: vk::DescriptorSet) {
        if self.writes.is_empty() {
            return;
        }

        let mut acceleration_infos: Vec<vk::WriteDescriptorSetAccelerationStructureKHR<'_>> = self
            .writes
            .iter()
            .filter_map(|write| match write.source {
                WriteSource::AccelerationStructure(index) => Some(
                    vk::WriteDescriptorSetAccelerationStructureKHR::default()
                        .acceleration_structures(std::slice::from_ref(
                            &self.acceleration_structures[index],
                        )),
                ),
                _ => None,
            })
            .collect();
        let mut acceleration_infos = acceleration_infos.iter_mut();

        let writes: Vec<vk::WriteDescriptorSet<'_>> = self
            .writes
            .iter()
            .map(|write| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.ty);
                match write.source {
                    WriteSource::Buffer(index) => {
                        base.buffer_info(std::slice::from_ref(&self.buffer_infos[index]))
                    }
                    WriteSource::Image(index) => {
                        base.image_info(std::slice::from_ref(&self.image_infos[index]))
                    }
                    WriteSource::AccelerationStructure(_) => match acceleration_infos.next() {
                        Some(info) => base.descriptor_count(1).push_next(info),
                        None => base,
                    },
                }
            })
            .collect();

        unsafe { device.handle().update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_writes_accumulate_in_order() {
        let mut writer = DescriptorWriter::new();
        writer
            .write_buffer(
                0,
                vk::Buffer::from_raw(1),
                256,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
            )
            .write_image(
                1,
                vk::ImageView::from_raw(2),
                vk::Sampler::from_raw(3),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            )
            .write_buffer(
                2,
                vk::Buffer::from_raw(4),
                64,
                128,
                vk::DescriptorType::STORAGE_BUFFER,
            );

        assert_eq!(writer.len(), 3);
        assert_eq!(writer.writes[0].source, WriteSource::Buffer(0));
        assert_eq!(writer.writes[1].source, WriteSource::Image(0));
        assert_eq!(writer.writes[2].source, WriteSource::Buffer(1));
        assert_eq!(writer.writes[2].binding, 2);

        let info = writer.buffer_infos[1];
        assert_eq!(info.buffer, vk::Buffer::from_raw(4));
        assert_eq!(info.offset, 128);
        assert_eq!(info.range, 64);
        assert_eq!(
            writer.image_infos[0].image_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_writes_keep_their_info_index_across_growth() {
        let mut writer = DescriptorWriter::new();
        for i in 0..64u64 {
            writer.write_buffer(
                i as u32,
                vk::Buffer::from_raw(i + 1),
                16,
                i * 16,
                vk::DescriptorType::UNIFORM_BUFFER,
            );
        }

        assert_eq!(writer.len(), 64);
        for (i, write) in writer.writes.iter().enumerate() {
            assert_eq!(write.source, WriteSource::Buffer(i));
            let WriteSource::Buffer(index) = write.source else {
                unreachable!()
            };
            let info = writer.buffer_infos[index];
            assert_eq!(info.buffer, vk::Buffer::from_raw(i as u64 + 1));
            assert_eq!(info.offset, i as u64 * 16);
        }
    }

    #[test]
    fn test_acceleration_structure_write() {
        let mut writer = DescriptorWriter::new();
        writer.write_acceleration_structure(5, vk::AccelerationStructureKHR::from_raw(9));
        assert_eq!(writer.writes[0].ty, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR);
        assert_eq!(writer.writes[0].binding, 5);
        assert_eq!(writer.acceleration_structures.len(), 1);
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut writer = DescriptorWriter::new();
        writer
            .write_buffer(0, vk::Buffer::null(), 16, 0, vk::DescriptorType::UNIFORM_BUFFER)
            .write_image(
                1,
                vk::ImageView::null(),
                vk::Sampler::null(),
                vk::ImageLayout::GENERAL,
                vk::DescriptorType::STORAGE_IMAGE,
            );
        writer.clear();

        assert!(writer.is_empty());
        assert!(writer.buffer_infos.is_empty());
        assert!(writer.image_infos.is_empty());
    }
}
