use ash::vk;

use crate::vulkan::{Context, Fence, Semaphore};
use crate::OctaResult;

/// Sync objects of every frame slot. A slot is only reused after its fence signaled.
#[derive(Debug)]
pub struct InFlightFrames {
    per_frames: Vec<PerFrame>,
}

#[derive(Debug)]
struct PerFrame {
    image_available_semaphore: Semaphore,
    render_finished_semaphore: Semaphore,
    fence: Fence,
}

impl InFlightFrames {
    pub(crate) fn new(context: &Context, frame_count: usize) -> OctaResult<Self> {
        let sync_objects = (0..frame_count)
            .map(|_i| {
                let image_available_semaphore = context.create_semaphore()?;
                let render_finished_semaphore = context.create_semaphore()?;
                let fence = context.create_fence(Some(vk::FenceCreateFlags::SIGNALED))?;

                Ok(PerFrame {
                    image_available_semaphore,
                    render_finished_semaphore,
                    fence,
                })
            })
            .collect::<OctaResult<Vec<_>>>()?;

        Ok(Self {
            per_frames: sync_objects,
        })
    }

    pub fn len(&self) -> usize {
        self.per_frames.len()
    }

    pub(crate) fn image_available_semaphore(&self, frame_index: usize) -> &Semaphore {
        &self.per_frames[frame_index].image_available_semaphore
    }

    pub(crate) fn render_finished_semaphore(&self, frame_index: usize) -> &Semaphore {
        &self.per_frames[frame_index].render_finished_semaphore
    }

    pub(crate) fn fence(&self, frame_index: usize) -> &Fence {
        &self.per_frames[frame_index].fence
    }
}
