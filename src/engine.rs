use std::mem;

use ash::vk;
use log::{debug, info};
use winit::{dpi::PhysicalSize, event_loop::ActiveEventLoop, window::Window, window::WindowAttributes};

use crate::controls::Controls;
use crate::frame::{AcquireOutcome, PresentOutcome};
use crate::in_flight_frames::InFlightFrames;
use crate::vulkan::{AcquiredImage, CommandBuffer, CommandPool, Context, Image, SemaphoreStage, Swapchain};
use crate::{EngineConfig, OctaResult};

/// Window, device and the presentation objects. Field order is drop order.
pub struct Engine {
    pub controls: Controls,
    pub resize_requested: bool,

    pub in_flight_frames: InFlightFrames,
    pub command_buffers: Vec<CommandBuffer>,
    pub command_pool: CommandPool,
    pub swapchain: Swapchain,
    pub context: Context,
    pub window: Window,
}

impl Engine {
    pub fn new(event_loop: &ActiveEventLoop, engine_config: &EngineConfig) -> OctaResult<Self> {
        info!("Creating Engine");

        let window = event_loop.create_window(
            WindowAttributes::default()
                .with_title(&engine_config.name)
                .with_inner_size(PhysicalSize::new(
                    engine_config.start_size.x,
                    engine_config.start_size.y,
                ))
                .with_resizable(true),
        )?;

        // Vulkan context
        let context = Context::new(&window, &window, engine_config)?;

        let command_pool = context.create_command_pool(
            context.physical_device.graphics_queue_family,
            Some(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
        )?;

        let swapchain = Swapchain::new(&context, window.inner_size().width, window.inner_size().height)?;

        let command_buffers = command_pool.allocate_command_buffers(
            vk::CommandBufferLevel::PRIMARY,
            engine_config.num_frames_in_flight as _,
        )?;

        let in_flight_frames = InFlightFrames::new(&context, engine_config.num_frames_in_flight)?;

        Ok(Self {
            controls: Controls::default(),
            resize_requested: false,
            in_flight_frames,
            command_buffers,
            command_pool,
            swapchain,
            context,
            window,
        })
    }

    pub fn wait_for_gpu(&self) -> OctaResult<()> {
        self.context.device_wait_idle()
    }

    pub fn command_buffer(&self, frame_index: usize) -> &CommandBuffer {
        &self.command_buffers[frame_index]
    }

    pub fn swapchain_image(&self, image_index: u32) -> &Image {
        &self.swapchain.images_and_views[image_index as usize].image
    }

    /// Blocks until the slot's previous submission finished, then acquires.
    pub fn acquire_next_image(&mut self, frame_index: usize) -> OctaResult<AcquireOutcome> {
        self.in_flight_frames.fence(frame_index).wait(None)?;

        let result = self.swapchain.acquire_next_image(
            u64::MAX,
            self.in_flight_frames.image_available_semaphore(frame_index),
        );
        acquire_outcome(result)
    }

    pub fn begin_recording(&mut self, frame_index: usize) -> OctaResult<()> {
        self.in_flight_frames.fence(frame_index).reset()?;

        let buffer = &self.command_buffers[frame_index];
        buffer.reset()?;
        buffer.begin(None)
    }

    pub fn submit_and_present(&mut self, frame_index: usize, image_index: u32) -> OctaResult<PresentOutcome> {
        let buffer = &self.command_buffers[frame_index];
        buffer.end()?;

        self.context.graphics_queue.submit(
            buffer,
            &[SemaphoreStage {
                semaphore: self.in_flight_frames.image_available_semaphore(frame_index),
                stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            }],
            &[SemaphoreStage {
                semaphore: self.in_flight_frames.render_finished_semaphore(frame_index),
                stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            }],
            self.in_flight_frames.fence(frame_index),
        )?;

        let signal_semaphores = [self.in_flight_frames.render_finished_semaphore(frame_index)];
        let result = self.swapchain.queue_present(
            image_index,
            &signal_semaphores,
            &self.context.present_queue,
        );
        present_outcome(result)
    }

    pub fn take_resize_request(&mut self) -> bool {
        mem::take(&mut self.resize_requested)
    }

    /// Resizes to the window. A minimized window keeps the old swapchain,
    /// leaves the resize pending and returns false.
    pub fn recreate_swapchain(&mut self) -> OctaResult<bool> {
        let size = self.window.inner_size();
        if size.width == 0 || size.height == 0 {
            debug!("Window has no area, postponing swapchain recreation");
            self.resize_requested = true;
            return Ok(false);
        }

        debug!("Recreating the swapchain");
        self.wait_for_gpu()?;

        self.swapchain.resize(&self.context, size.width, size.height)?;
        Ok(true)
    }
}

fn is_out_of_date(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<vk::Result>(), Some(&vk::Result::ERROR_OUT_OF_DATE_KHR))
}

/// A suboptimal image is still rendered to; the present reports it afterwards.
pub(crate) fn acquire_outcome(result: OctaResult<AcquiredImage>) -> OctaResult<AcquireOutcome> {
    match result {
        Ok(AcquiredImage { index, .. }) => Ok(AcquireOutcome::Image(index)),
        Err(err) if is_out_of_date(&err) => Ok(AcquireOutcome::OutOfDate),
        Err(err) => Err(err.context("Error while acquiring next image")),
    }
}

pub(crate) fn present_outcome(result: OctaResult<bool>) -> OctaResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Stale),
        Err(err) if is_out_of_date(&err) => Ok(PresentOutcome::Stale),
        Err(err) => Err(err.context("Failed to present queue")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_acquire_is_not_an_error() {
        let outcome = acquire_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR.into())).unwrap();
        assert_eq!(outcome, AcquireOutcome::OutOfDate);
    }

    #[test]
    fn suboptimal_acquire_still_yields_the_image() {
        let outcome = acquire_outcome(Ok(AcquiredImage {
            index: 2,
            is_suboptimal: true,
        }))
        .unwrap();
        assert_eq!(outcome, AcquireOutcome::Image(2));
    }

    #[test]
    fn other_acquire_errors_are_fatal() {
        let result = acquire_outcome(Err(vk::Result::ERROR_DEVICE_LOST.into()));
        assert!(result.is_err());
    }

    #[test]
    fn present_classifies_stale_surfaces() {
        assert_eq!(present_outcome(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(present_outcome(Ok(true)).unwrap(), PresentOutcome::Stale);
        assert_eq!(
            present_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR.into())).unwrap(),
            PresentOutcome::Stale
        );
        assert!(present_outcome(Err(vk::Result::ERROR_SURFACE_LOST_KHR.into())).is_err());
    }
}
