use ash::vk;
use glam::UVec2;
use log::debug;

use crate::vulkan::{Context, Image, ImageAndView, ImageView};
use crate::OctaResult;

/// Storage image the ray generation shader writes. Sized like the swapchain
/// and rebuilt with it.
#[derive(Debug)]
pub struct RenderOutputImage {
    inner: ImageAndView,
    pub format: vk::Format,
    pub size: UVec2,
}

impl RenderOutputImage {
    pub fn new(context: &Context, size: UVec2) -> OctaResult<Self> {
        let format = context.physical_device.render_storage_image_format;
        let inner = context.create_storage_image(format, size)?;

        Ok(Self {
            inner,
            format,
            size,
        })
    }

    pub fn rebuild(&mut self, context: &Context, size: UVec2) -> OctaResult<()> {
        debug!("Rebuilding render output at {}x{}", size.x, size.y);

        self.inner = context.create_storage_image(self.format, size)?;
        self.size = size;

        Ok(())
    }

    pub fn image(&self) -> &Image {
        &self.inner.image
    }

    pub fn view(&self) -> &ImageView {
        &self.inner.view
    }
}
