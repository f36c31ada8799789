pub extern crate ash;
pub extern crate ash_window;
pub extern crate gpu_allocator;

mod buffer;
mod command;
mod context;
mod descriptor;
mod device;
mod entry;
mod image;
mod instance;
pub mod physical_device;
mod pipeline;
mod queue;
mod ray_tracing;
mod surface;
mod swapchain;
mod sync;

pub mod utils;

use std::fmt::{Debug, Formatter};
pub use buffer::*;
pub use command::*;
pub use context::*;
pub use descriptor::*;
pub use device::*;
pub use image::*;
pub use pipeline::*;
pub use queue::*;
pub use ray_tracing::*;
pub use swapchain::*;
pub use sync::*;

#[derive(Clone, Copy, Eq, PartialEq)]
pub enum Version {
    Vk1_3,
}

impl Version {
    pub(crate) fn make_api_version(&self) -> u32 {
        match self {
            Version::Vk1_3 => {ash::vk::make_api_version(0, 1, 3, 0)}
        }
    }
}

impl Debug for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Version::Vk1_3 => {f.write_str("1.3.")}
        }
    }
}
