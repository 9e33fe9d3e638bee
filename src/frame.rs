// =============================================================================
// FRAME PACING - ring of frame slots over the swapchain
// =============================================================================
//
// Each slot owns one fence and two semaphores. A frame walks its slot through
//
//   Idle --wait+reset fence--> Acquiring --acquire image--> Submitted
//        --submit--> Presenting --present--> Idle
//
// and the cursor then moves to the next slot. The fence wait is the only
// place the host blocks, which caps the GPU backlog at one frame per slot.
//
// Command buffers are recorded per swapchain image, so the one submitted is
// picked by the acquired image index. Slot and image index are unrelated.

use ash::vk;
use thiserror::Error;

use crate::backend::swapchain::Acquired;

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Submitted,
    Presenting,
}

impl SlotState {
    fn next(self) -> Self {
        match self {
            Self::Idle => Self::Acquiring,
            Self::Acquiring => Self::Submitted,
            Self::Submitted => Self::Presenting,
            Self::Presenting => Self::Idle,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("failed to acquire swapchain image: {0}")]
    Acquire(vk::Result),
    #[error("acquired image {index}, but the swapchain only has {count}")]
    ImageOutOfRange { index: u32, count: usize },
    #[error("slot {slot} was left mid-frame ({state:?}) by an earlier failure")]
    SlotNotIdle { slot: usize, state: SlotState },
    #[error("{stage} failed: {result}")]
    Device {
        stage: &'static str,
        result: vk::Result,
    },
}

/// The GPU side of a frame, one call per step.
pub trait FrameTimeline {
    type CommandBuffer: Copy;

    /// Block until the last submission made from `slot` has retired.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError>;

    fn reset_slot(&mut self, slot: usize) -> Result<(), FrameError>;

    /// Request the next presentable image, signalling the slot's
    /// image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<Acquired, FrameError>;

    /// Submit `command_buffer` behind the slot's image-available semaphore,
    /// signalling its render-finished semaphore and fence.
    fn submit(&mut self, slot: usize, command_buffer: Self::CommandBuffer)
        -> Result<(), FrameError>;

    /// Queue `image_index` for display once the slot's render-finished
    /// semaphore is signalled.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<(), FrameError>;
}

/// What one `FrameLoop::draw` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    pub slot: usize,
    pub image_index: u32,
    pub suboptimal: bool,
}

pub struct FrameLoop<C> {
    /// Pre-recorded, one per swapchain image, never re-recorded.
    command_buffers: Vec<C>,
    slots: Vec<SlotState>,
    current: usize,
    frames_presented: u64,
}

impl<C: Copy> FrameLoop<C> {
    pub fn new(frames_in_flight: usize, command_buffers: Vec<C>) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        Self {
            command_buffers,
            slots: vec![SlotState::Idle; frames_in_flight],
            current: 0,
            frames_presented: 0,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Run one frame on the current slot and move to the next one.
    ///
    /// Any error is fatal: the slot is left where it failed, and later calls
    /// return `SlotNotIdle` without touching the GPU.
    pub fn draw<T>(&mut self, timeline: &mut T) -> Result<FrameOutcome, FrameError>
    where
        T: FrameTimeline<CommandBuffer = C>,
    {
        let slot = self.current;
        if self.slots[slot] != SlotState::Idle {
            return Err(FrameError::SlotNotIdle {
                slot,
                state: self.slots[slot],
            });
        }

        timeline.wait_for_slot(slot)?;
        timeline.reset_slot(slot)?;
        self.advance(slot);

        let acquired = timeline.acquire_image(slot)?;
        let image_index = acquired.image_index();
        let command_buffer = *self
            .command_buffers
            .get(image_index as usize)
            .ok_or(FrameError::ImageOutOfRange {
                index: image_index,
                count: self.command_buffers.len(),
            })?;
        self.advance(slot);

        timeline.submit(slot, command_buffer)?;
        self.advance(slot);

        timeline.present(slot, image_index)?;
        self.advance(slot);

        if acquired.is_suboptimal() {
            log::debug!("Image {} acquired suboptimal, presenting anyway", image_index);
        }
        log::trace!("Frame {}: slot {} -> image {}", self.frames_presented, slot, image_index);

        self.frames_presented += 1;
        self.current = (self.current + 1) % self.slots.len();

        Ok(FrameOutcome {
            slot,
            image_index,
            suboptimal: acquired.is_suboptimal(),
        })
    }

    fn advance(&mut self, slot: usize) {
        self.slots[slot] = self.slots[slot].next();
    }
}

#[cfg(test)]
impl<C> FrameLoop<C> {
    fn current_slot(&self) -> usize {
        self.current
    }

    fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Wait(usize),
        Reset(usize),
        Acquire(usize, u32),
        Submit(usize, u32),
        Present(usize, u32),
    }

    /// Fake GPU that never finishes work until the host waits on it.
    struct MockTimeline {
        image_count: u32,
        script: VecDeque<Result<Acquired, vk::Result>>,
        next_image: u32,
        fence_signaled: Vec<bool>,
        fence_reset: Vec<bool>,
        in_flight: Vec<bool>,
        max_outstanding: usize,
        events: Vec<Event>,
    }

    impl MockTimeline {
        fn new(slots: usize, image_count: u32) -> Self {
            Self {
                image_count,
                script: VecDeque::new(),
                next_image: 0,
                fence_signaled: vec![true; slots],
                fence_reset: vec![false; slots],
                in_flight: vec![false; slots],
                max_outstanding: 0,
                events: Vec::new(),
            }
        }

        fn scripted(slots: usize, image_count: u32, images: &[u32]) -> Self {
            let mut timeline = Self::new(slots, image_count);
            timeline.script = images.iter().map(|&i| Ok(Acquired::Optimal(i))).collect();
            timeline
        }

        fn submits(&self) -> Vec<(usize, u32)> {
            self.events
                .iter()
                .filter_map(|e| match *e {
                    Event::Submit(slot, cb) => Some((slot, cb)),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameTimeline for MockTimeline {
        type CommandBuffer = u32;

        fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError> {
            self.in_flight[slot] = false;
            self.fence_signaled[slot] = true;
            self.events.push(Event::Wait(slot));
            Ok(())
        }

        fn reset_slot(&mut self, slot: usize) -> Result<(), FrameError> {
            assert!(self.fence_signaled[slot], "slot {slot} reset before its fence signalled");
            self.fence_signaled[slot] = false;
            self.fence_reset[slot] = true;
            self.events.push(Event::Reset(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<Acquired, FrameError> {
            let acquired = match self.script.pop_front() {
                Some(scripted) => scripted.map_err(FrameError::Acquire)?,
                None => {
                    let index = self.next_image;
                    self.next_image = (self.next_image + 1) % self.image_count;
                    Acquired::Optimal(index)
                }
            };
            self.events.push(Event::Acquire(slot, acquired.image_index()));
            Ok(acquired)
        }

        fn submit(&mut self, slot: usize, command_buffer: u32) -> Result<(), FrameError> {
            assert!(!self.in_flight[slot], "slot {slot} resubmitted while its work is in flight");
            assert!(self.fence_reset[slot], "slot {slot} submitted without a fresh fence");
            self.fence_reset[slot] = false;
            self.in_flight[slot] = true;
            let outstanding = self.in_flight.iter().filter(|&&busy| busy).count();
            self.max_outstanding = self.max_outstanding.max(outstanding);
            self.events.push(Event::Submit(slot, command_buffer));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<(), FrameError> {
            assert!(image_index < self.image_count);
            self.events.push(Event::Present(slot, image_index));
            Ok(())
        }
    }

    /// Command buffer "handles" that encode which image they were recorded for.
    fn command_buffers(image_count: u32) -> Vec<u32> {
        (0..image_count).map(|i| 100 + i).collect()
    }

    #[test]
    fn one_frame_runs_steps_in_order() {
        let mut frames = FrameLoop::new(2, command_buffers(3));
        let mut gpu = MockTimeline::new(2, 3);

        let outcome = frames.draw(&mut gpu).unwrap();

        assert_eq!(outcome, FrameOutcome { slot: 0, image_index: 0, suboptimal: false });
        assert_eq!(
            gpu.events,
            vec![
                Event::Wait(0),
                Event::Reset(0),
                Event::Acquire(0, 0),
                Event::Submit(0, 100),
                Event::Present(0, 0),
            ]
        );
        assert_eq!(frames.slot_state(0), SlotState::Idle);
        assert_eq!(frames.current_slot(), 1);
        assert_eq!(frames.frames_presented(), 1);
    }

    #[test]
    fn slots_alternate_while_images_follow_acquisition() {
        let mut frames = FrameLoop::new(2, command_buffers(3));
        let mut gpu = MockTimeline::scripted(2, 3, &[2, 0, 1, 1, 2, 0]);

        let outcomes: Vec<_> = (0..6).map(|_| frames.draw(&mut gpu).unwrap()).collect();

        let slots: Vec<_> = outcomes.iter().map(|o| o.slot).collect();
        let images: Vec<_> = outcomes.iter().map(|o| o.image_index).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(images, vec![2, 0, 1, 1, 2, 0]);
    }

    #[test]
    fn command_buffer_is_chosen_by_image_not_slot() {
        let mut frames = FrameLoop::new(2, command_buffers(3));
        let mut gpu = MockTimeline::scripted(2, 3, &[2, 0, 1]);

        for _ in 0..3 {
            frames.draw(&mut gpu).unwrap();
        }

        assert_eq!(gpu.submits(), vec![(0, 102), (1, 100), (0, 101)]);
    }

    #[test]
    fn fence_is_waited_and_reset_before_each_resubmit() {
        let mut frames = FrameLoop::new(2, command_buffers(3));
        let mut gpu = MockTimeline::new(2, 3);

        for _ in 0..10 {
            frames.draw(&mut gpu).unwrap();
        }

        // Between two submits on the same slot there is a wait then a reset on it.
        for slot in 0..2 {
            let mut pending_wait = false;
            let mut pending_reset = false;
            for event in &gpu.events {
                match *event {
                    Event::Wait(s) if s == slot => pending_wait = true,
                    Event::Reset(s) if s == slot => {
                        assert!(pending_wait, "reset before wait on slot {slot}");
                        pending_reset = true;
                    }
                    Event::Submit(s, _) if s == slot => {
                        assert!(pending_wait && pending_reset, "unguarded submit on slot {slot}");
                        pending_wait = false;
                        pending_reset = false;
                    }
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn outstanding_frames_are_bounded_by_slot_count() {
        for slots in 1..=3 {
            let mut frames = FrameLoop::new(slots, command_buffers(3));
            let mut gpu = MockTimeline::new(slots, 3);

            for _ in 0..20 {
                frames.draw(&mut gpu).unwrap();
            }

            assert_eq!(gpu.max_outstanding, slots);
        }
    }

    #[test]
    fn acquired_indices_stay_in_range() {
        let mut frames = FrameLoop::new(2, command_buffers(3));
        let mut gpu = MockTimeline::new(2, 3);

        for _ in 0..12 {
            let outcome = frames.draw(&mut gpu).unwrap();
            assert!(outcome.image_index < 3);
        }
    }

    #[test]
    fn suboptimal_acquisition_still_presents() {
        let mut frames = FrameLoop::new(2, command_buffers(3));
        let mut gpu = MockTimeline::new(2, 3);
        gpu.script.push_back(Ok(Acquired::Suboptimal(1)));

        let outcome = frames.draw(&mut gpu).unwrap();

        assert!(outcome.suboptimal);
        assert_eq!(gpu.events.last(), Some(&Event::Present(0, 1)));
    }

    #[test]
    fn failed_acquisition_is_fatal_and_submits_nothing() {
        let mut frames = FrameLoop::new(2, command_buffers(3));
        let mut gpu = MockTimeline::new(2, 3);
        gpu.script.push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        let err = frames.draw(&mut gpu).unwrap_err();

        assert_eq!(err, FrameError::Acquire(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert!(gpu.submits().is_empty());
        assert!(!gpu.events.iter().any(|e| matches!(e, Event::Present(..))));
        assert_eq!(frames.frames_presented(), 0);
        assert_eq!(frames.slot_state(0), SlotState::Acquiring);
    }

    #[test]
    fn draw_after_failure_does_not_touch_the_gpu() {
        let mut frames = FrameLoop::new(2, command_buffers(3));
        let mut gpu = MockTimeline::new(2, 3);
        gpu.script.push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        frames.draw(&mut gpu).unwrap_err();
        let events_after_failure = gpu.events.len();

        let err = frames.draw(&mut gpu).unwrap_err();

        assert_eq!(
            err,
            FrameError::SlotNotIdle {
                slot: 0,
                state: SlotState::Acquiring
            }
        );
        // No fence wait on a fence that will never signal again
        assert_eq!(gpu.events.len(), events_after_failure);
    }

    #[test]
    fn out_of_range_image_is_rejected() {
        let mut frames = FrameLoop::new(2, command_buffers(3));
        let mut gpu = MockTimeline::scripted(2, 3, &[5]);

        let err = frames.draw(&mut gpu).unwrap_err();

        assert_eq!(err, FrameError::ImageOutOfRange { index: 5, count: 3 });
        assert!(gpu.submits().is_empty());
    }

    #[test]
    fn zero_slots_still_gets_one() {
        let frames: FrameLoop<u32> = FrameLoop::new(0, command_buffers(2));
        assert_eq!(frames.frames_in_flight(), 1);
    }
}
