//! Draw records produced by the scene and consumed by the rasterizer.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use venus_rhi::RhiError;

use crate::error::RenderResult;
use crate::material::MaterialInstance;

/// Largest push-constant block every Vulkan implementation must accept.
pub const MAX_PUSH_CONSTANT_SIZE: usize = 128;

/// Inline push-constant bytes carried by a draw.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PushConstantBlock {
    bytes: [u8; MAX_PUSH_CONSTANT_SIZE],
    len: u8,
}

impl PushConstantBlock {
    pub const EMPTY: Self = Self {
        bytes: [0; MAX_PUSH_CONSTANT_SIZE],
        len: 0,
    };

    /// Copies `value` into a block.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidInput`] if `T` is larger than [`MAX_PUSH_CONSTANT_SIZE`].
    pub fn new<T: Pod>(value: &T) -> RenderResult<Self> {
        Self::from_bytes(bytemuck::bytes_of(value))
    }

    pub fn from_bytes(data: &[u8]) -> RenderResult<Self> {
        if data.len() > MAX_PUSH_CONSTANT_SIZE {
            return Err(RhiError::InvalidInput(format!(
                "push constants of {} bytes exceed the {} byte limit",
                data.len(),
                MAX_PUSH_CONSTANT_SIZE
            ))
            .into());
        }
        let mut bytes = [0; MAX_PUSH_CONSTANT_SIZE];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Self {
            bytes,
            len: data.len() as u8,
        })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for PushConstantBlock {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl std::fmt::Debug for PushConstantBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushConstantBlock")
            .field("len", &self.len)
            .finish()
    }
}

/// Push constants read by the built-in mesh shaders.
///
/// Matches `layout(push_constant)` in `mesh.vert`: the world matrix followed
/// by the vertex buffer's device address.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct MeshPushConstants {
    pub world: Mat4,
    pub vertex_buffer: vk::DeviceAddress,
    pub _padding: u64,
}

/// Bounding sphere in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub center: Vec3,
    pub radius: f32,
}

impl Bounds {
    /// Smallest sphere around `points`, centred on their bounding box.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let points: Vec<Vec3> = points.into_iter().collect();
        if points.is_empty() {
            return Self::default();
        }
        let (min, max) = points.iter().fold(
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            |(min, max), &p| (min.min(p), max.max(p)),
        );
        let center = (min + max) * 0.5;
        let radius = points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0, f32::max);
        Self { center, radius }
    }
}

/// One draw call.
///
/// With a null `index_buffer` the draw is non-indexed and `index_count`
/// counts vertices.
#[derive(Clone, Debug)]
pub struct RenderObject {
    pub bounds: Bounds,
    pub transform: Mat4,
    pub index_count: u32,
    pub first_index: u32,
    pub index_buffer: vk::Buffer,
    pub vertex_buffer: vk::Buffer,
    pub vertex_address: vk::DeviceAddress,
    pub material: MaterialInstance,
    pub push_constants: PushConstantBlock,
}

impl RenderObject {
    /// A draw using the mesh shader push-constant layout.
    pub fn mesh(
        material: MaterialInstance,
        transform: Mat4,
        vertex_buffer: vk::Buffer,
        vertex_address: vk::DeviceAddress,
        index_buffer: vk::Buffer,
        index_count: u32,
    ) -> RenderResult<Self> {
        let push_constants = PushConstantBlock::new(&MeshPushConstants {
            world: transform,
            vertex_buffer: vertex_address,
            _padding: 0,
        })?;
        Ok(Self {
            bounds: Bounds::default(),
            transform,
            index_count,
            first_index: 0,
            index_buffer,
            vertex_buffer,
            vertex_address,
            material,
            push_constants,
        })
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_first_index(mut self, first_index: u32) -> Self {
        self.first_index = first_index;
        self
    }

    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.index_buffer != vk::Buffer::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constant_block_limits() {
        let block = PushConstantBlock::from_bytes(&[7; 128]).unwrap();
        assert_eq!(block.len(), 128);
        assert!(PushConstantBlock::from_bytes(&[0; 129]).is_err());
        assert!(PushConstantBlock::EMPTY.is_empty());
        assert!(PushConstantBlock::default().as_bytes().is_empty());
    }

    #[test]
    fn test_mesh_push_constants_layout() {
        assert_eq!(std::mem::size_of::<MeshPushConstants>(), 80);
        let constants = MeshPushConstants {
            world: Mat4::IDENTITY,
            vertex_buffer: 0xdead_beef,
            _padding: 0,
        };
        let block = PushConstantBlock::new(&constants).unwrap();
        assert_eq!(block.len(), 80);
        assert_eq!(&block.as_bytes()[64..72], &0xdead_beef_u64.to_le_bytes());
    }

    #[test]
    fn test_bounds_from_points() {
        let bounds = Bounds::from_points([
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
        ]);
        assert_eq!(bounds.center, Vec3::new(0.0, 1.0, 0.0));
        assert!((bounds.radius - 2.0_f32.sqrt()).abs() < 1e-6);
        assert_eq!(Bounds::from_points([]), Bounds::default());
    }
}
