//! Vulkan surface ownership.

use std::ffi::CStr;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::PlatformResult;

/// RAII wrapper for a Vulkan surface.
///
/// Destroys the `vk::SurfaceKHR` on drop. The instance it was created from
/// must outlive it, and any swapchain built on it must be destroyed first.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for a raw window.
    ///
    /// # Safety
    /// The handles must refer to a live window that outlives the surface.
    pub unsafe fn from_raw(
        entry: &ash::Entry,
        instance: &ash::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> PlatformResult<Self> {
        // SAFETY: entry and instance are valid; the caller guarantees the handles.
        let handle = unsafe { ash_window::create_surface(entry, instance, display, window, None)? };
        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Self {
            handle,
            surface_loader,
        })
    }

    /// The raw handle, valid only while this `Surface` lives.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window::create_surface from the same instance
        // as the loader; this is the only place it is destroyed.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Instance extensions needed to create a surface on `display`.
pub fn required_extensions(display: RawDisplayHandle) -> PlatformResult<Vec<&'static CStr>> {
    let extensions = ash_window::enumerate_required_extensions(display)?;

    let names: Vec<&'static CStr> = extensions
        .iter()
        // SAFETY: ash_window returns pointers to static, NUL-terminated
        // extension name constants.
        .map(|&ext| unsafe { CStr::from_ptr(ext) })
        .collect();

    tracing::debug!("Required surface extensions: {:?}", names);
    Ok(names)
}
