//! Per frame protocol: acquire, record, submit and present, with recreation of
//! the presentation objects whenever the surface goes stale.

use std::mem;

use log::debug;

use crate::OctaResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image(u32),
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The swapchain is out of date or suboptimal.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub frame_index: usize,
    pub image_index: u32,
    /// False for the first frame after a recreation.
    pub copy_output: bool,
}

/// What the controller drives. Implemented by the engine and renderer pair and
/// by test doubles.
pub trait FrameBackend {
    fn frames_in_flight(&self) -> usize;

    /// Waits until `frame_index` is free and acquires the next swapchain image.
    fn acquire_next_image(&mut self, frame_index: usize) -> OctaResult<AcquireOutcome>;

    fn begin_recording(&mut self, frame_index: usize) -> OctaResult<()>;

    fn record_frame(&mut self, frame: &Frame) -> OctaResult<()>;

    /// Ends recording, submits and presents.
    fn submit_and_present(&mut self, frame: &Frame) -> OctaResult<PresentOutcome>;

    /// Returns and clears a pending window resize.
    fn take_resize_request(&mut self) -> bool;

    /// Returns false if recreation had to be postponed, e.g. for a minimized
    /// window. The old swapchain and its pending work are untouched then.
    fn recreate_swapchain(&mut self) -> OctaResult<bool>;

    /// Recreates the render output and rewrites the descriptors that bind it.
    fn rebuild_render_output(&mut self) -> OctaResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Idle,
    Recording(Frame),
}

#[derive(Debug)]
pub struct FrameController {
    state: FrameState,
    frame_index: usize,
    frames_in_flight: usize,
    discard: bool,
}

impl FrameController {
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "Need at least one frame in flight");

        Self {
            state: FrameState::Idle,
            frame_index: 0,
            frames_in_flight,
            discard: false,
        }
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, FrameState::Recording(_))
    }

    /// Acquires an image and opens the recording. Returns `None` if the
    /// surface was stale; nothing was recorded then and the presentation
    /// objects have been recreated.
    pub fn begin_frame<B: FrameBackend>(&mut self, backend: &mut B) -> OctaResult<Option<Frame>> {
        assert_eq!(self.state, FrameState::Idle, "begin_frame called while recording");

        let image_index = match backend.acquire_next_image(self.frame_index)? {
            AcquireOutcome::Image(index) => index,
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date on acquire");
                self.recreate(backend)?;
                return Ok(None);
            }
        };

        backend.begin_recording(self.frame_index)?;

        let frame = Frame {
            frame_index: self.frame_index,
            image_index,
            copy_output: !mem::take(&mut self.discard),
        };
        self.state = FrameState::Recording(frame);

        Ok(Some(frame))
    }

    /// Submits and presents the open frame and moves to the next frame slot.
    pub fn end_frame<B: FrameBackend>(&mut self, backend: &mut B) -> OctaResult<()> {
        let frame = match self.state {
            FrameState::Recording(frame) => frame,
            FrameState::Idle => panic!("end_frame called without an open frame"),
        };
        self.state = FrameState::Idle;
        self.frame_index = (self.frame_index + 1) % self.frames_in_flight;

        let outcome = backend.submit_and_present(&frame)?;
        let resized = backend.take_resize_request();
        if outcome == PresentOutcome::Stale || resized {
            debug!("Swapchain stale after present (resized: {resized})");
            self.recreate(backend)?;
        }

        Ok(())
    }

    /// One full frame. Does nothing beyond recreation if no image could be acquired.
    pub fn ray_trace_scene<B: FrameBackend>(&mut self, backend: &mut B) -> OctaResult<()> {
        let Some(frame) = self.begin_frame(backend)? else {
            return Ok(());
        };

        backend.record_frame(&frame)?;
        self.end_frame(backend)
    }

    /// The render output is only rebuilt after the swapchain was, since only
    /// then is the device known to be idle.
    fn recreate<B: FrameBackend>(&mut self, backend: &mut B) -> OctaResult<()> {
        self.discard = true;
        if !backend.recreate_swapchain()? {
            debug!("Swapchain recreation postponed, keeping the render output");
            return Ok(());
        }
        backend.rebuild_render_output()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Acquire(usize),
        Begin(usize),
        Record(Frame),
        Present(usize),
        RecreateSwapchain,
        RebuildOutput,
    }

    #[derive(Default)]
    struct MockBackend {
        frames_in_flight: usize,
        calls: Vec<Call>,
        acquire_results: VecDeque<AcquireOutcome>,
        present_results: VecDeque<PresentOutcome>,
        resize_requested: bool,
        next_image: u32,
        postponed_recreations: usize,
    }

    impl MockBackend {
        fn new(frames_in_flight: usize) -> Self {
            Self {
                frames_in_flight,
                ..Default::default()
            }
        }

        fn recorded(&self) -> Vec<Frame> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Record(frame) => Some(*frame),
                    _ => None,
                })
                .collect()
        }

        fn count(&self, call: &Call) -> usize {
            self.calls.iter().filter(|c| *c == call).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn frames_in_flight(&self) -> usize {
            self.frames_in_flight
        }

        fn acquire_next_image(&mut self, frame_index: usize) -> OctaResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(frame_index));
            let outcome = self.acquire_results.pop_front().unwrap_or_else(|| {
                self.next_image = (self.next_image + 1) % 3;
                AcquireOutcome::Image(self.next_image)
            });
            Ok(outcome)
        }

        fn begin_recording(&mut self, frame_index: usize) -> OctaResult<()> {
            self.calls.push(Call::Begin(frame_index));
            Ok(())
        }

        fn record_frame(&mut self, frame: &Frame) -> OctaResult<()> {
            self.calls.push(Call::Record(*frame));
            Ok(())
        }

        fn submit_and_present(&mut self, frame: &Frame) -> OctaResult<PresentOutcome> {
            self.calls.push(Call::Present(frame.frame_index));
            Ok(self.present_results.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn take_resize_request(&mut self) -> bool {
            mem::take(&mut self.resize_requested)
        }

        fn recreate_swapchain(&mut self) -> OctaResult<bool> {
            self.calls.push(Call::RecreateSwapchain);
            if self.postponed_recreations > 0 {
                self.postponed_recreations -= 1;
                self.resize_requested = true;
                return Ok(false);
            }
            Ok(true)
        }

        fn rebuild_render_output(&mut self) -> OctaResult<()> {
            self.calls.push(Call::RebuildOutput);
            Ok(())
        }
    }

    fn run_frames(controller: &mut FrameController, backend: &mut MockBackend, count: usize) {
        for _ in 0..count {
            controller.ray_trace_scene(backend).unwrap();
        }
    }

    #[test]
    fn frame_slot_rotates_modulo_frames_in_flight() {
        for frames_in_flight in 1..=3 {
            let mut backend = MockBackend::new(frames_in_flight);
            let mut controller = FrameController::new(backend.frames_in_flight());

            for k in 1..=7 {
                run_frames(&mut controller, &mut backend, 1);
                assert_eq!(controller.frame_index(), k % frames_in_flight);
            }
        }
    }

    #[test]
    fn frames_record_in_the_acquired_slot() {
        let mut backend = MockBackend::new(2);
        let mut controller = FrameController::new(2);
        run_frames(&mut controller, &mut backend, 3);

        let slots = backend.recorded().iter().map(|f| f.frame_index).collect::<Vec<_>>();
        assert_eq!(slots, vec![0, 1, 0]);
        assert_eq!(
            &backend.calls[..4],
            &[
                Call::Acquire(0),
                Call::Begin(0),
                Call::Record(backend.recorded()[0]),
                Call::Present(0)
            ]
        );
    }

    #[test]
    fn resize_skips_exactly_one_copy() {
        let mut backend = MockBackend::new(2);
        let mut controller = FrameController::new(2);

        run_frames(&mut controller, &mut backend, 1);
        backend.resize_requested = true;
        run_frames(&mut controller, &mut backend, 3);

        let copies = backend.recorded().iter().map(|f| f.copy_output).collect::<Vec<_>>();
        assert_eq!(copies, vec![true, true, false, true]);
        assert_eq!(backend.count(&Call::RecreateSwapchain), 1);
        assert_eq!(backend.count(&Call::RebuildOutput), 1);
        assert!(!backend.resize_requested);
    }

    #[test]
    fn stale_present_recreates_and_discards_next_copy() {
        let mut backend = MockBackend::new(2);
        backend.present_results.push_back(PresentOutcome::Stale);
        let mut controller = FrameController::new(2);

        run_frames(&mut controller, &mut backend, 3);

        let copies = backend.recorded().iter().map(|f| f.copy_output).collect::<Vec<_>>();
        assert_eq!(copies, vec![true, false, true]);
        assert_eq!(backend.count(&Call::RecreateSwapchain), 1);
    }

    #[test]
    fn out_of_date_acquire_records_nothing() {
        let mut backend = MockBackend::new(2);
        backend.acquire_results.push_back(AcquireOutcome::OutOfDate);
        let mut controller = FrameController::new(2);

        run_frames(&mut controller, &mut backend, 1);

        assert_eq!(
            backend.calls,
            vec![Call::Acquire(0), Call::RecreateSwapchain, Call::RebuildOutput]
        );
        assert!(!controller.is_recording());
        assert_eq!(controller.frame_index(), 0);

        run_frames(&mut controller, &mut backend, 2);
        let copies = backend.recorded().iter().map(|f| f.copy_output).collect::<Vec<_>>();
        assert_eq!(copies, vec![false, true]);
    }

    #[test]
    fn postponed_recreation_keeps_render_output_and_discards() {
        let mut backend = MockBackend::new(2);
        backend.present_results.push_back(PresentOutcome::Stale);
        backend.postponed_recreations = 1;
        let mut controller = FrameController::new(2);

        run_frames(&mut controller, &mut backend, 1);
        assert_eq!(backend.calls.last(), Some(&Call::RecreateSwapchain));
        assert_eq!(backend.count(&Call::RebuildOutput), 0);
        assert!(backend.resize_requested);

        // The pending resize is retried after the next present.
        run_frames(&mut controller, &mut backend, 2);
        let copies = backend.recorded().iter().map(|f| f.copy_output).collect::<Vec<_>>();
        assert_eq!(copies, vec![true, false, false]);
        assert_eq!(backend.count(&Call::RecreateSwapchain), 2);
        assert_eq!(backend.count(&Call::RebuildOutput), 1);
    }

    #[test]
    fn begin_then_end_returns_to_idle() {
        let mut backend = MockBackend::new(2);
        let mut controller = FrameController::new(2);

        let frame = controller.begin_frame(&mut backend).unwrap();
        assert!(frame.is_some());
        assert!(controller.is_recording());

        controller.end_frame(&mut backend).unwrap();
        assert!(!controller.is_recording());
        assert_eq!(controller.frame_index(), 1);
    }

    #[test]
    #[should_panic(expected = "begin_frame called while recording")]
    fn double_begin_panics() {
        let mut backend = MockBackend::new(2);
        let mut controller = FrameController::new(2);

        controller.begin_frame(&mut backend).unwrap();
        let _ = controller.begin_frame(&mut backend);
    }

    #[test]
    #[should_panic(expected = "end_frame called without an open frame")]
    fn end_without_begin_panics() {
        let mut backend = MockBackend::new(2);
        let mut controller = FrameController::new(2);

        let _ = controller.end_frame(&mut backend);
    }
}
