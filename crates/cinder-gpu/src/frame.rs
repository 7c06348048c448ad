//! Per-frame protocol shared by every renderer.
//!
//! [`FrameLoop`] owns the frame counter, the pending-resize flag, and the
//! swapchain lifecycle, and drives a [`FrameBackend`] through one frame at a
//! time:
//!
//! 1. wait for the slot's fence
//! 2. acquire an image (out-of-date: rebuild and abort the frame)
//! 3. reset the slot's fence
//! 4. update per-frame data
//! 5. record
//! 6. submit
//! 7. present (stale or resized: rebuild)
//! 8. advance the counter
//!
//! The backend does the driver work; the loop only sequences it, which is
//! what lets the protocol be tested without a GPU.

use crate::error::{GpuError, Result};
use crate::swapchain::{SwapchainLifecycle, SwapchainState};

/// Result of asking the swapchain for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired. `suboptimal` images are still rendered to.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain should be rebuilt after this present.
    pub const fn is_stale(self) -> bool {
        matches!(self, Self::Suboptimal | Self::OutOfDate)
    }
}

/// What happened during one call to [`FrameLoop::draw_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was presented.
    Presented { slot: usize, image_index: u32 },
    /// The frame was presented and the swapchain rebuilt afterwards.
    PresentedAndRebuilt { slot: usize, image_index: u32 },
    /// Acquire found the swapchain out of date; it was rebuilt and nothing
    /// was drawn.
    Aborted,
}

/// Driver-facing half of the frame protocol.
///
/// `slot` is always `< ring_size`; `image_index` is whatever the last
/// successful acquire returned.
pub trait FrameBackend {
    /// Block until the slot's previous submission has retired.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Acquire the next swapchain image, signalling the slot's
    /// image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Unsignal the slot's fence ahead of submission.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    /// Write per-frame data (uniforms) owned by `slot`.
    fn update_frame_data(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Record the slot's command buffer targeting `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Submit the slot's command buffer, signalling its fence.
    fn submit(&mut self, slot: usize) -> Result<()>;

    /// Present `image_index` once the slot's rendering has finished.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Current framebuffer size in pixels.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until the window may have changed.
    fn wait_events(&mut self);

    /// Block until the device has no work in flight.
    fn wait_idle(&mut self) -> Result<()>;

    /// Tear down and recreate size-dependent objects for a `width` x
    /// `height` framebuffer. The device is already idle.
    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> Result<()>;
}

/// Frame counter and swapchain bookkeeping.
#[derive(Debug)]
pub struct FrameLoop {
    counter: u64,
    ring_size: usize,
    resize_pending: bool,
    lifecycle: SwapchainLifecycle,
    frames_presented: u64,
    rebuilds: u64,
}

impl FrameLoop {
    /// Start a loop over a `ring_size`-slot ring whose swapchain already
    /// exists.
    pub fn new(ring_size: usize) -> Result<Self> {
        if ring_size == 0 {
            return Err(GpuError::InvalidState(
                "frame ring needs at least one slot".to_string(),
            ));
        }

        let mut lifecycle = SwapchainLifecycle::new();
        lifecycle.mark_created()?;

        Ok(Self {
            counter: 0,
            ring_size,
            resize_pending: false,
            lifecycle,
            frames_presented: 0,
            rebuilds: 0,
        })
    }

    /// Slot the next frame will use.
    pub fn current_slot(&self) -> usize {
        (self.counter % self.ring_size as u64) as usize
    }

    pub fn ring_size(&self) -> usize {
        self.ring_size
    }

    /// Completed frames since startup.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Swapchain rebuilds since startup.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn swapchain_state(&self) -> SwapchainState {
        self.lifecycle.state()
    }

    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Force a rebuild after the next present.
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }

    /// Run one frame of the protocol.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn draw_frame<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<FrameStatus> {
        if self.lifecycle.state() != SwapchainState::Created {
            return Err(GpuError::InvalidState(format!(
                "cannot draw while swapchain is {:?}",
                self.lifecycle.state()
            )));
        }

        let slot = self.current_slot();

        backend.wait_for_slot(slot)?;

        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    tracing::trace!(slot, image_index, "Acquired suboptimal image");
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                tracing::debug!(slot, "Swapchain out of date on acquire");
                self.rebuild(backend)?;
                return Ok(FrameStatus::Aborted);
            }
        };

        // Only after a successful acquire, so a failed acquire leaves the
        // fence signaled for the retry
        backend.reset_slot(slot)?;
        backend.update_frame_data(slot, image_index)?;
        backend.record(slot, image_index)?;
        backend.submit(slot)?;

        let outcome = backend.present(slot, image_index)?;
        self.frames_presented += 1;

        let rebuilt = if outcome.is_stale() || self.resize_pending {
            tracing::debug!(?outcome, resized = self.resize_pending, "Rebuilding after present");
            self.rebuild(backend)?;
            true
        } else {
            false
        };

        self.counter += 1;

        Ok(if rebuilt {
            FrameStatus::PresentedAndRebuilt { slot, image_index }
        } else {
            FrameStatus::Presented { slot, image_index }
        })
    }

    /// Invalidate, wait for a drawable size, idle, and recreate.
    fn rebuild<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        self.lifecycle.invalidate()?;

        let (width, height) = loop {
            let (width, height) = backend.framebuffer_size();
            if width > 0 && height > 0 {
                break (width, height);
            }
            backend.wait_events();
        };

        self.lifecycle.begin_rebuild()?;
        backend.wait_idle()?;
        backend.rebuild_swapchain(width, height)?;
        self.lifecycle.mark_created()?;

        self.resize_pending = false;
        self.rebuilds += 1;
        tracing::debug!(width, height, generation = self.lifecycle.generation(), "Swapchain rebuilt");
        Ok(())
    }

    /// Idle the device and mark the swapchain destroyed. The backend
    /// releases its objects afterwards.
    pub fn shutdown<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        backend.wait_idle()?;
        self.lifecycle.mark_destroyed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Update(usize, u32),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        WaitEvents,
        Idle,
        Rebuild(u32, u32),
    }

    /// Records every call and replays scripted driver results.
    struct RecordingBackend {
        calls: Vec<Call>,
        image_count: u32,
        next_image: u32,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        sizes: VecDeque<(u32, u32)>,
        size: (u32, u32),
        fail_submit: bool,
    }

    impl RecordingBackend {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                image_count: 3,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                sizes: VecDeque::new(),
                size: (800, 600),
                fail_submit: false,
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameBackend for RecordingBackend {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if let Some(outcome) = self.acquire_script.pop_front() {
                return Ok(outcome);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            })
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn update_frame_data(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Update(slot, image_index));
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Submit(slot));
            if self.fail_submit {
                return Err(GpuError::Vulkan(ash::vk::Result::ERROR_DEVICE_LOST));
            }
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn framebuffer_size(&self) -> (u32, u32) {
            self.sizes.front().copied().unwrap_or(self.size)
        }

        fn wait_events(&mut self) {
            self.calls.push(Call::WaitEvents);
            self.sizes.pop_front();
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::Idle);
            Ok(())
        }

        fn rebuild_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
            self.calls.push(Call::Rebuild(width, height));
            self.next_image = 0;
            Ok(())
        }
    }

    #[test]
    fn slots_cycle_modulo_ring_size() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut backend = RecordingBackend::new();

        let mut slots = Vec::new();
        for _ in 0..5 {
            match frames.draw_frame(&mut backend).unwrap() {
                FrameStatus::Presented { slot, .. } => slots.push(slot),
                other => panic!("unexpected {other:?}"),
            }
        }

        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(frames.counter(), 5);
        assert!(frames.current_slot() < frames.ring_size());
    }

    #[test]
    fn slot_fence_is_waited_before_reuse() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut backend = RecordingBackend::new();
        for _ in 0..6 {
            frames.draw_frame(&mut backend).unwrap();
        }

        // Every reset/record of a slot is preceded by a wait on that slot
        // with no intervening submit for it
        let mut waited = [false; 2];
        for call in &backend.calls {
            match *call {
                Call::Wait(s) => waited[s] = true,
                Call::Reset(s) | Call::Record(s, _) => assert!(waited[s], "{call:?} before wait"),
                Call::Submit(s) => waited[s] = false,
                _ => {}
            }
        }
    }

    #[test]
    fn frame_steps_run_in_protocol_order() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut backend = RecordingBackend::new();
        frames.draw_frame(&mut backend).unwrap();

        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Update(0, 0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn out_of_date_acquire_rebuilds_once_and_aborts() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut backend = RecordingBackend::new();
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);

        let status = frames.draw_frame(&mut backend).unwrap();
        assert_eq!(status, FrameStatus::Aborted);
        assert_eq!(frames.counter(), 0);
        assert_eq!(frames.rebuilds(), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::Rebuild(..))), 1);
        // Fence untouched so the retry does not deadlock
        assert_eq!(backend.count(|c| matches!(c, Call::Reset(_))), 0);
        assert_eq!(frames.swapchain_state(), SwapchainState::Created);

        // Retry on the same slot proceeds normally
        let status = frames.draw_frame(&mut backend).unwrap();
        assert_eq!(
            status,
            FrameStatus::Presented {
                slot: 0,
                image_index: 0
            }
        );
        assert_eq!(frames.rebuilds(), 1);
    }

    #[test]
    fn rebuild_idles_device_first() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut backend = RecordingBackend::new();
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
        frames.draw_frame(&mut backend).unwrap();

        let idle = backend.calls.iter().position(|c| *c == Call::Idle).unwrap();
        let rebuild = backend
            .calls
            .iter()
            .position(|c| matches!(c, Call::Rebuild(..)))
            .unwrap();
        assert!(idle < rebuild);
    }

    #[test]
    fn minimized_window_blocks_rebuild_until_visible() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut backend = RecordingBackend::new();
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
        backend.sizes = VecDeque::from([(0, 0), (1024, 0), (1024, 768)]);

        frames.draw_frame(&mut backend).unwrap();

        assert_eq!(backend.count(|c| *c == Call::WaitEvents), 2);
        assert_eq!(backend.calls.last(), Some(&Call::Rebuild(1024, 768)));
    }

    #[test]
    fn resize_flag_rebuilds_after_present() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut backend = RecordingBackend::new();

        frames.notify_resized();
        backend.size = (1280, 720);
        let status = frames.draw_frame(&mut backend).unwrap();

        assert_eq!(
            status,
            FrameStatus::PresentedAndRebuilt {
                slot: 0,
                image_index: 0
            }
        );
        assert!(!frames.resize_pending());
        assert_eq!(frames.counter(), 1);
        assert_eq!(backend.calls.last(), Some(&Call::Rebuild(1280, 720)));

        // Flag cleared: next frame does not rebuild
        frames.draw_frame(&mut backend).unwrap();
        assert_eq!(frames.rebuilds(), 1);
    }

    #[test]
    fn stale_present_triggers_rebuild() {
        for outcome in [PresentOutcome::Suboptimal, PresentOutcome::OutOfDate] {
            let mut frames = FrameLoop::new(2).unwrap();
            let mut backend = RecordingBackend::new();
            backend.present_script.push_back(outcome);

            let status = frames.draw_frame(&mut backend).unwrap();
            assert!(matches!(status, FrameStatus::PresentedAndRebuilt { .. }));
            assert_eq!(frames.counter(), 1);
            assert_eq!(frames.frames_presented(), 1);
        }
    }

    #[test]
    fn suboptimal_acquire_still_draws() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut backend = RecordingBackend::new();
        backend.acquire_script.push_back(AcquireOutcome::Acquired {
            image_index: 2,
            suboptimal: true,
        });

        let status = frames.draw_frame(&mut backend).unwrap();
        assert_eq!(
            status,
            FrameStatus::Presented {
                slot: 0,
                image_index: 2
            }
        );
        assert_eq!(frames.rebuilds(), 0);
    }

    #[test]
    fn driver_errors_propagate_without_advancing() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut backend = RecordingBackend::new();
        backend.fail_submit = true;

        let err = frames.draw_frame(&mut backend).unwrap_err();
        assert_eq!(err.vk_result(), Some(ash::vk::Result::ERROR_DEVICE_LOST));
        assert_eq!(frames.counter(), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 0);
    }

    #[test]
    fn zero_slot_ring_is_rejected() {
        assert!(matches!(FrameLoop::new(0), Err(GpuError::InvalidState(_))));
    }

    #[test]
    fn drawing_after_shutdown_is_an_error() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut backend = RecordingBackend::new();
        frames.shutdown(&mut backend).unwrap();

        assert_eq!(frames.swapchain_state(), SwapchainState::Destroyed);
        assert!(frames.draw_frame(&mut backend).is_err());
    }
}
