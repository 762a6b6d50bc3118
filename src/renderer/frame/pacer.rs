use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::target::swapchain::{AcquireOutcome, PresentOutcome};

/// Extra semaphores a frame's submission waits on and signals, next to its own
#[derive(Debug, Clone, Default)]
pub struct SubmitExtras {
    pub waits: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signals: Vec<vk::Semaphore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recreation {
    Rebuilt,
    /// The surface has no area, try again next frame
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub slot: usize,
    pub image_index: u32,
    /// Frame whose completion was waited for before the slot was reused
    pub retired_frame: Option<u64>,
    /// Presentation resources were rebuilt after this frame was presented
    pub recreated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented(FrameReport),
    /// Acquisition found the swap chain out of date and it was rebuilt; nothing was drawn
    Recreated,
    /// Recreation is pending on a zero-sized surface; nothing was drawn
    Skipped,
}

/// The device side of a frame. `FramePacer` decides the order of these calls, implementors
/// only carry them out.
pub trait FrameDriver {
    /// Number of frames that may be in flight at once
    fn slot_count(&self) -> usize;

    fn image_count(&self) -> usize;

    /// Blocks until the last submission made with `slot` has finished
    fn wait_slot(&mut self, slot: usize) -> Result<()>;

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Updates per-image data and makes sure the image's commands are recorded
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Resets the slot's fence and submits the image's commands with it
    fn submit(&mut self, slot: usize, image_index: u32, extras: &SubmitExtras) -> Result<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Rebuilds everything that depends on the swap chain
    fn recreate(&mut self) -> Result<Recreation>;
}

/// Rotates frames through the slots and tracks which submission each slot and each
/// swap chain image belongs to
#[derive(Debug)]
pub struct FramePacer {
    frame: u64,
    slot: usize,
    slot_frames: Vec<Option<u64>>,
    image_owners: Vec<Option<usize>>,
    recreate_pending: bool,
    resized: bool,
}

impl FramePacer {
    pub fn new(slot_count: usize, image_count: usize) -> Result<Self> {
        if slot_count == 0 {
            return Err(eyre!("Frame pacer needs at least one slot"));
        }
        Ok(Self {
            frame: 0,
            slot: 0,
            slot_frames: vec![None; slot_count],
            image_owners: vec![None; image_count],
            recreate_pending: false,
            resized: false,
        })
    }

    /// Index of the next frame to be presented
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn slot_count(&self) -> usize {
        self.slot_frames.len()
    }

    pub fn recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    /// Requests a rebuild after the next present
    pub fn set_resized(&mut self, resized: bool) {
        self.resized = resized;
    }

    pub fn draw_frame<D: FrameDriver>(
        &mut self,
        driver: &mut D,
        extras: &SubmitExtras,
    ) -> Result<FrameOutcome> {
        if self.recreate_pending && self.recreate(driver)? == Recreation::Deferred {
            return Ok(FrameOutcome::Skipped);
        }

        // Acquire
        let slot = self.slot;
        let retired_frame = self.slot_frames[slot];
        driver.wait_slot(slot)?;
        let (image_index, acquire_suboptimal) = match driver.acquire(slot)? {
            AcquireOutcome::Acquired { image_index, suboptimal } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::debug!("Swap chain out of date at acquire on frame {}", self.frame);
                return Ok(match self.recreate(driver)? {
                    Recreation::Rebuilt => FrameOutcome::Recreated,
                    Recreation::Deferred => FrameOutcome::Skipped,
                });
            }
        };

        // Record
        let image = image_index as usize;
        let owner = *self.image_owners
            .get(image)
            .ok_or_else(|| eyre!("Acquired image {image_index} but only {} exist", self.image_owners.len()))?;
        if let Some(owner) = owner {
            if owner != slot {
                driver.wait_slot(owner)?;
            }
        }
        driver.record(slot, image_index)?;

        // Submit
        driver.submit(slot, image_index, extras)?;
        self.image_owners[image] = Some(slot);
        self.slot_frames[slot] = Some(self.frame);

        // Present
        let presented = driver.present(slot, image_index)?;
        let needs_recreate = acquire_suboptimal
            || presented != PresentOutcome::Presented
            || std::mem::take(&mut self.resized);

        let mut report = FrameReport {
            frame: self.frame,
            slot,
            image_index,
            retired_frame,
            recreated: false,
        };
        log::trace!("Presented {:?}", report);

        // Advance
        self.frame += 1;
        self.slot = (slot + 1) % self.slot_frames.len();

        if needs_recreate {
            report.recreated = self.recreate(driver)? == Recreation::Rebuilt;
        }
        Ok(FrameOutcome::Presented(report))
    }

    fn recreate<D: FrameDriver>(&mut self, driver: &mut D) -> Result<Recreation> {
        let recreation = driver.recreate()?;
        match recreation {
            Recreation::Deferred => {
                log::debug!("Recreation deferred until the surface has an area");
                self.recreate_pending = true;
            }
            Recreation::Rebuilt => {
                self.recreate_pending = false;
                self.resized = false;
                // The driver idles the device before rebuilding, so no image is in use
                self.image_owners = vec![None; driver.image_count()];
                let slot_count = driver.slot_count().max(1);
                if slot_count != self.slot_frames.len() {
                    self.slot_frames = vec![None; slot_count];
                    self.slot = 0;
                }
            }
        }
        Ok(recreation)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Record(usize, u32),
        Submit(usize, u32),
        Present(usize, u32),
        Recreate,
    }

    /// Scripted swap chain that hands out images round robin and checks fence discipline
    struct MockDriver {
        slots: usize,
        images: usize,
        next_image: u32,
        generation: u64,
        calls: Vec<Call>,
        pending: Vec<bool>,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        recreate_script: VecDeque<Recreation>,
        acquired_generations: Vec<u64>,
    }

    impl MockDriver {
        fn new(slots: usize, images: usize) -> Self {
            Self {
                slots,
                images,
                next_image: 0,
                generation: 0,
                calls: Vec::new(),
                pending: vec![false; slots],
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                recreate_script: VecDeque::new(),
                acquired_generations: Vec::new(),
            }
        }

        fn count(&self, wanted: Call) -> usize {
            self.calls.iter().filter(|c| **c == wanted).count()
        }
    }

    impl FrameDriver for MockDriver {
        fn slot_count(&self) -> usize {
            self.slots
        }

        fn image_count(&self) -> usize {
            self.images
        }

        fn wait_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            self.pending[slot] = false;
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if let Some(outcome) = self.acquire_script.pop_front() {
                return Ok(outcome);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.images as u32;
            self.acquired_generations.push(self.generation);
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            })
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize, image_index: u32, _extras: &SubmitExtras) -> Result<()> {
            self.calls.push(Call::Submit(slot, image_index));
            assert!(!self.pending[slot], "slot {slot} reused before its fence was waited");
            let outstanding = self.pending.iter().filter(|p| **p).count();
            assert!(outstanding < self.slots, "more than {} frames in flight", self.slots);
            self.pending[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.present_script.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn recreate(&mut self) -> Result<Recreation> {
            self.calls.push(Call::Recreate);
            let recreation = self.recreate_script.pop_front().unwrap_or(Recreation::Rebuilt);
            if recreation == Recreation::Rebuilt {
                self.generation += 1;
                self.next_image = 0;
                self.pending.iter_mut().for_each(|p| *p = false);
            }
            Ok(recreation)
        }
    }

    fn presented(outcome: FrameOutcome) -> FrameReport {
        match outcome {
            FrameOutcome::Presented(report) => report,
            other => panic!("expected a presented frame, got {other:?}"),
        }
    }

    #[test]
    fn slots_rotate_and_fences_are_waited_before_reuse() {
        let mut driver = MockDriver::new(2, 3);
        let mut pacer = FramePacer::new(2, 3).unwrap();
        let extras = SubmitExtras::default();

        let slots = (0..5)
            .map(|_| presented(pacer.draw_frame(&mut driver, &extras).unwrap()).slot)
            .collect::<Vec<_>>();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);

        // Every submission is preceded by a wait on its own slot
        for (i, call) in driver.calls.iter().enumerate() {
            if let Call::Submit(slot, _) = call {
                let last_wait = driver.calls[..i]
                    .iter()
                    .rposition(|c| *c == Call::Wait(*slot))
                    .unwrap();
                let last_submit = driver.calls[..i]
                    .iter()
                    .rposition(|c| matches!(c, Call::Submit(s, _) if s == slot));
                assert!(last_submit.is_none_or(|submit| submit < last_wait));
            }
        }
        assert_eq!(pacer.frame(), 5);
    }

    #[test]
    fn reused_slot_retires_the_frame_two_back() {
        let mut driver = MockDriver::new(2, 3);
        let mut pacer = FramePacer::new(2, 3).unwrap();
        let extras = SubmitExtras::default();

        for i in 0..8u64 {
            let report = presented(pacer.draw_frame(&mut driver, &extras).unwrap());
            assert_eq!(report.frame, i);
            assert_eq!(report.retired_frame, i.checked_sub(2));
        }
    }

    #[test]
    fn image_owned_by_another_slot_is_waited_for() {
        // Two images and three slots: image 0 comes back while slot 0 may still be drawing it
        let mut driver = MockDriver::new(3, 2);
        let mut pacer = FramePacer::new(3, 2).unwrap();
        let extras = SubmitExtras::default();

        for _ in 0..3 {
            pacer.draw_frame(&mut driver, &extras).unwrap();
        }
        // Frame 2 runs on slot 2 and acquires image 0, last submitted by slot 0
        let third = driver.calls
            .iter()
            .position(|c| *c == Call::Acquire(2))
            .unwrap();
        assert_eq!(driver.calls[third + 1], Call::Wait(0));
        assert_eq!(driver.calls[third + 2], Call::Record(2, 0));
    }

    #[test]
    fn out_of_date_acquire_rebuilds_before_next_acquire() {
        let mut driver = MockDriver::new(2, 3);
        let mut pacer = FramePacer::new(2, 3).unwrap();
        let extras = SubmitExtras::default();

        presented(pacer.draw_frame(&mut driver, &extras).unwrap());
        driver.acquire_script.push_back(AcquireOutcome::OutOfDate);

        assert_eq!(pacer.draw_frame(&mut driver, &extras).unwrap(), FrameOutcome::Recreated);
        // The aborted frame does not advance the counter
        assert_eq!(pacer.frame(), 1);
        assert_eq!(driver.count(Call::Recreate), 1);

        let report = presented(pacer.draw_frame(&mut driver, &extras).unwrap());
        assert_eq!(report.frame, 1);
        assert_eq!(report.slot, 1);
        assert_eq!(driver.acquired_generations, vec![0, 1]);

        let recreate = driver.calls.iter().position(|c| *c == Call::Recreate).unwrap();
        let next_acquire = driver.calls.iter().rposition(|c| matches!(c, Call::Acquire(_))).unwrap();
        assert!(recreate < next_acquire);
    }

    #[test]
    fn suboptimal_present_rebuilds_after_presenting() {
        let mut driver = MockDriver::new(2, 3);
        let mut pacer = FramePacer::new(2, 3).unwrap();
        driver.present_script.push_back(PresentOutcome::Suboptimal);

        let report = presented(pacer.draw_frame(&mut driver, &SubmitExtras::default()).unwrap());
        assert!(report.recreated);
        assert_eq!(driver.calls.last(), Some(&Call::Recreate));
        assert_eq!(pacer.frame(), 1);
    }

    #[test]
    fn resize_flag_triggers_one_rebuild() {
        let mut driver = MockDriver::new(2, 3);
        let mut pacer = FramePacer::new(2, 3).unwrap();
        let extras = SubmitExtras::default();

        pacer.set_resized(true);
        assert!(presented(pacer.draw_frame(&mut driver, &extras).unwrap()).recreated);
        assert!(!presented(pacer.draw_frame(&mut driver, &extras).unwrap()).recreated);
        assert_eq!(driver.count(Call::Recreate), 1);
    }

    #[test]
    fn zero_sized_surface_defers_until_rebuilt() {
        let mut driver = MockDriver::new(2, 3);
        let mut pacer = FramePacer::new(2, 3).unwrap();
        let extras = SubmitExtras::default();

        driver.acquire_script.push_back(AcquireOutcome::OutOfDate);
        driver.recreate_script.extend([Recreation::Deferred, Recreation::Deferred]);

        assert_eq!(pacer.draw_frame(&mut driver, &extras).unwrap(), FrameOutcome::Skipped);
        assert!(pacer.recreate_pending());
        assert_eq!(pacer.draw_frame(&mut driver, &extras).unwrap(), FrameOutcome::Skipped);

        let report = presented(pacer.draw_frame(&mut driver, &extras).unwrap());
        assert!(!pacer.recreate_pending());
        assert_eq!(report.frame, 0);
        assert_eq!(driver.count(Call::Recreate), 3);
    }

    #[test]
    fn slot_count_change_restarts_rotation() {
        let mut driver = MockDriver::new(2, 3);
        let mut pacer = FramePacer::new(2, 3).unwrap();
        let extras = SubmitExtras::default();

        pacer.draw_frame(&mut driver, &extras).unwrap();
        driver.slots = 3;
        driver.pending = vec![false; 3];
        driver.acquire_script.push_back(AcquireOutcome::OutOfDate);
        pacer.draw_frame(&mut driver, &extras).unwrap();

        assert_eq!(pacer.slot_count(), 3);
        let report = presented(pacer.draw_frame(&mut driver, &extras).unwrap());
        assert_eq!(report.slot, 0);
        assert_eq!(report.retired_frame, None);
    }

    #[test]
    fn image_index_beyond_chain_is_an_error() {
        let mut driver = MockDriver::new(2, 3);
        let mut pacer = FramePacer::new(2, 3).unwrap();
        driver.acquire_script.push_back(AcquireOutcome::Acquired {
            image_index: 7,
            suboptimal: false,
        });
        assert!(pacer.draw_frame(&mut driver, &SubmitExtras::default()).is_err());
    }
}
