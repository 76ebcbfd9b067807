//! Vertex layout read by shaders through a buffer device address.
//!
//! Pipelines declare no vertex input state; the vertex shader indexes a
//! storage buffer of [`Vertex`] with `gl_VertexIndex`. UV components are
//! interleaved into the padding so the struct matches std430 without holes.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// A mesh vertex, 48 bytes.
///
/// - Offset 0: position (12 bytes), offset 12: uv.x
/// - Offset 16: normal (12 bytes), offset 28: uv.y
/// - Offset 32: color (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub uv_x: f32,
    pub normal: Vec3,
    pub uv_y: f32,
    pub color: Vec4,
}

impl Vertex {
    #[inline]
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2, color: Vec4) -> Self {
        Self {
            position,
            uv_x: uv.x,
            normal,
            uv_y: uv.y,
            color,
        }
    }

    /// A vertex with only a position and color.
    #[inline]
    pub fn colored(position: Vec3, color: Vec4) -> Self {
        Self::new(position, Vec3::Z, Vec2::ZERO, color)
    }

    #[inline]
    pub fn uv(&self) -> Vec2 {
        Vec2::new(self.uv_x, self.uv_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_vertex_layout() {
        assert_eq!(size_of::<Vertex>(), 48);
        assert_eq!(offset_of!(Vertex, position), 0);
        assert_eq!(offset_of!(Vertex, uv_x), 12);
        assert_eq!(offset_of!(Vertex, normal), 16);
        assert_eq!(offset_of!(Vertex, uv_y), 28);
        assert_eq!(offset_of!(Vertex, color), 32);
    }

    #[test]
    fn test_vertex_uv_roundtrip() {
        let v = Vertex::new(Vec3::ONE, Vec3::Y, Vec2::new(0.25, 0.75), Vec4::ONE);
        assert_eq!(v.uv(), Vec2::new(0.25, 0.75));
        assert_eq!(bytemuck::bytes_of(&v).len(), 48);
    }
}
