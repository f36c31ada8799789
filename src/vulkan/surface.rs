use anyhow::Result;
use ash::{khr::surface::Instance as AshSurface, vk};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::vulkan::entry::Entry;
use crate::vulkan::instance::Instance;

pub struct Surface {
    pub(crate) inner: AshSurface,
    pub surface_khr: vk::SurfaceKHR,
}

impl Surface {
    pub(crate) fn new(
        entry: &Entry,
        instance: &Instance,
        window_handle: &dyn HasWindowHandle,
        display_handle: &dyn HasDisplayHandle,
    ) -> Result<Self> {
        let inner = AshSurface::new(&entry.inner, &instance.inner);
        let surface_khr = unsafe {
            ash_window::create_surface(
                &entry.inner,
                &instance.inner,
                display_handle.display_handle()?.as_raw(),
                window_handle.window_handle()?.as_raw(),
                None,
            )?
        };

        Ok(Self { inner, surface_khr })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.inner.destroy_surface(self.surface_khr, None);
        }
    }
}
