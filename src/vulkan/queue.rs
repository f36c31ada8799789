use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::vulkan::{CommandBuffer, Device, Fence, Semaphore};

/// What the renderer needs to know about a queue family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    flags: vk::QueueFlags,
    queue_count: u32,
    presents: bool,
}

impl QueueFamily {
    pub(crate) fn new(index: u32, properties: &vk::QueueFamilyProperties, presents: bool) -> Self {
        Self {
            index,
            flags: properties.queue_flags,
            queue_count: properties.queue_count,
            presents,
        }
    }

    /// Runs the ray tracing pipeline, the acceleration structure builds and
    /// the output copies.
    pub fn can_trace(&self) -> bool {
        self.queue_count > 0
            && self
                .flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
    }

    pub fn can_present(&self) -> bool {
        self.queue_count > 0 && self.presents
    }
}

/// A semaphore and the stage a submission waits for or signals it at.
#[derive(Clone, Copy)]
pub struct SemaphoreStage<'a> {
    pub semaphore: &'a Semaphore,
    pub stage: vk::PipelineStageFlags2,
}

fn semaphore_infos(stages: &[SemaphoreStage]) -> Vec<vk::SemaphoreSubmitInfo<'static>> {
    stages
        .iter()
        .map(|s| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(s.semaphore.inner)
                .stage_mask(s.stage)
        })
        .collect()
}

pub struct Queue {
    pub inner: vk::Queue,
    device: Arc<Device>,
}

impl Queue {
    pub(crate) fn new(inner: vk::Queue, device: Arc<Device>) -> Self {
        Self { inner, device }
    }

    /// Submits a single command buffer. `fence` is signaled once it completed.
    pub fn submit(
        &self,
        command_buffer: &CommandBuffer,
        wait: &[SemaphoreStage],
        signal: &[SemaphoreStage],
        fence: &Fence,
    ) -> Result<()> {
        let wait_infos = semaphore_infos(wait);
        let signal_infos = semaphore_infos(signal);
        let command_buffer_infos =
            [vk::CommandBufferSubmitInfo::default().command_buffer(command_buffer.inner)];

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&command_buffer_infos)
            .signal_semaphore_infos(&signal_infos);

        unsafe {
            self.device
                .inner
                .queue_submit2(self.inner, &[submit_info], fence.inner)?
        };

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32, presents: bool) -> QueueFamily {
        let properties = vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            ..Default::default()
        };
        QueueFamily::new(0, &properties, presents)
    }

    #[test]
    fn tracing_needs_graphics_and_compute() {
        let both = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;

        assert!(family(both | vk::QueueFlags::TRANSFER, 1, false).can_trace());
        assert!(!family(vk::QueueFlags::GRAPHICS, 1, false).can_trace());
        assert!(!family(vk::QueueFlags::COMPUTE, 1, false).can_trace());
        assert!(!family(both, 0, false).can_trace());
    }

    #[test]
    fn empty_family_cannot_present() {
        assert!(family(vk::QueueFlags::TRANSFER, 1, true).can_present());
        assert!(!family(vk::QueueFlags::TRANSFER, 0, true).can_present());
        assert!(!family(vk::QueueFlags::GRAPHICS, 2, false).can_present());
    }
}
