//! Dynamic rendering attachment helpers (Vulkan 1.3).
//!
//! # Example
//!
//! ```no_run
//! use venus_rhi::vk;
//! use venus_rhi::command::CommandBuffer;
//! use venus_rhi::rendering::{AttachmentLoad, RenderingAttachments};
//!
//! # fn example(color: vk::ImageView, depth: vk::ImageView, cmd: &CommandBuffer) {
//! let attachments = RenderingAttachments::new(vk::Extent2D { width: 800, height: 600 })
//!     .color(color, AttachmentLoad::Load)
//!     .depth(depth, AttachmentLoad::Clear(0.0));
//! cmd.begin_rendering(&attachments.info());
//! // ... draw commands ...
//! cmd.end_rendering();
//! # }
//! ```

use ash::vk;

/// What happens to an attachment's contents when rendering begins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AttachmentLoad<T> {
    /// Keep the existing contents.
    Load,
    /// Overwrite with the given clear value.
    Clear(T),
    /// Contents are undefined.
    DontCare,
}

impl<T> AttachmentLoad<T> {
    fn load_op(&self) -> vk::AttachmentLoadOp {
        match self {
            Self::Load => vk::AttachmentLoadOp::LOAD,
            Self::Clear(_) => vk::AttachmentLoadOp::CLEAR,
            Self::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

/// A color attachment in `COLOR_ATTACHMENT_OPTIMAL`, stored at the end of rendering.
pub fn color_attachment(
    view: vk::ImageView,
    load: AttachmentLoad<[f32; 4]>,
) -> vk::RenderingAttachmentInfo<'static> {
    let info = vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(load.load_op())
        .store_op(vk::AttachmentStoreOp::STORE);
    match load {
        AttachmentLoad::Clear(float32) => info.clear_value(vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        }),
        _ => info,
    }
}

/// A depth attachment in `DEPTH_ATTACHMENT_OPTIMAL`, stored at the end of rendering.
pub fn depth_attachment(
    view: vk::ImageView,
    load: AttachmentLoad<f32>,
) -> vk::RenderingAttachmentInfo<'static> {
    let info = vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
        .load_op(load.load_op())
        .store_op(vk::AttachmentStoreOp::STORE);
    match load {
        AttachmentLoad::Clear(depth) => info.clear_value(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
        }),
        _ => info,
    }
}

/// Owns the attachment infos a `VkRenderingInfo` points into.
#[derive(Clone, Debug)]
pub struct RenderingAttachments {
    area: vk::Rect2D,
    colors: Vec<vk::RenderingAttachmentInfo<'static>>,
    depth: Option<vk::RenderingAttachmentInfo<'static>>,
}

impl RenderingAttachments {
    /// No attachments, render area covering `extent`.
    pub fn new(extent: vk::Extent2D) -> Self {
        Self::with_area(vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        })
    }

    pub fn with_area(area: vk::Rect2D) -> Self {
        Self {
            area,
            colors: Vec::new(),
            depth: None,
        }
    }

    pub fn color(mut self, view: vk::ImageView, load: AttachmentLoad<[f32; 4]>) -> Self {
        self.colors.push(color_attachment(view, load));
        self
    }

    pub fn depth(mut self, view: vk::ImageView, load: AttachmentLoad<f32>) -> Self {
        self.depth = Some(depth_attachment(view, load));
        self
    }

    #[inline]
    pub fn area(&self) -> vk::Rect2D {
        self.area
    }

    #[inline]
    pub fn colors(&self) -> &[vk::RenderingAttachmentInfo<'static>] {
        &self.colors
    }

    #[inline]
    pub fn depth_info(&self) -> Option<&vk::RenderingAttachmentInfo<'static>> {
        self.depth.as_ref()
    }

    /// Rendering info borrowing this bundle's attachments.
    pub fn info(&self) -> vk::RenderingInfo<'_> {
        let info = vk::RenderingInfo::default()
            .render_area(self.area)
            .layer_count(1)
            .color_attachments(&self.colors);
        match &self.depth {
            Some(depth) => info.depth_attachment(depth),
            None => info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_color_attachment_load_keeps_contents() {
        let info = color_attachment(vk::ImageView::from_raw(1), AttachmentLoad::Load);
        assert_eq!(info.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(info.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(info.image_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_color_attachment_clear_value() {
        let info = color_attachment(
            vk::ImageView::from_raw(1),
            AttachmentLoad::Clear([0.117, 0.117, 0.523, 0.0]),
        );
        assert_eq!(info.load_op, vk::AttachmentLoadOp::CLEAR);
        let color = unsafe { info.clear_value.color.float32 };
        assert_eq!(color, [0.117, 0.117, 0.523, 0.0]);
    }

    #[test]
    fn test_depth_attachment_clear_to_zero() {
        let info = depth_attachment(vk::ImageView::from_raw(2), AttachmentLoad::Clear(0.0));
        assert_eq!(info.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(info.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(info.image_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        let depth = unsafe { info.clear_value.depth_stencil.depth };
        assert_eq!(depth, 0.0);
    }

    #[test]
    fn test_rendering_info_points_at_bundle() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let attachments = RenderingAttachments::new(extent)
            .color(vk::ImageView::from_raw(1), AttachmentLoad::Load)
            .depth(vk::ImageView::from_raw(2), AttachmentLoad::Clear(0.0));

        let info = attachments.info();
        assert_eq!(info.render_area.extent, extent);
        assert_eq!(info.layer_count, 1);
        assert_eq!(info.color_attachment_count, 1);
        assert!(!info.p_depth_attachment.is_null());
        assert!(attachments.depth_info().is_some());

        let color_only = RenderingAttachments::new(extent)
            .color(vk::ImageView::from_raw(1), AttachmentLoad::DontCare);
        assert!(color_only.info().p_depth_attachment.is_null());
    }
}
