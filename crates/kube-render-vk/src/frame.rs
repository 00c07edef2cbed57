// SPDX-License-Identifier: CEPL-1.0
//! Per-frame state machine: wait, acquire, update, record, submit, present.
//!
//! The scheduler owns only bookkeeping: the frame counter, which slot last used
//! each image, and the framebuffer size with its pending-rebuild flag. Everything that touches the device sits
//! behind [`FrameTarget`], so the fence discipline can be driven without a GPU.

use anyhow::Result;
use kube_render::RenderSize;
use tracing::{debug, trace};

/// Result of asking the swapchain for its next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: usize, suboptimal: bool },
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Ok,
    /// Out of date or suboptimal. The chain should be rebuilt before the next frame.
    Stale,
}

/// What one call to [`FrameScheduler::draw_frame`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { slot: usize, image: usize },
    /// Acquisition hit an out-of-date chain. Rebuilt; nothing was drawn.
    Skipped,
}

/// Device-side half of a frame. Any `Err` is fatal.
pub trait FrameTarget {
    /// Blocks until `slot`'s fence is signaled.
    fn wait_slot(&mut self, slot: usize) -> Result<()>;
    /// Idles the device and rebuilds the swapchain group for `framebuffer`.
    /// Returns the new image count.
    fn recreate(&mut self, framebuffer: RenderSize) -> Result<usize>;
    fn acquire(&mut self, slot: usize) -> Result<Acquired>;
    fn update_uniforms(&mut self, image: usize) -> Result<()>;
    /// Resets `slot`'s fence and `image`'s command buffer, then records the frame.
    fn reset_and_record(&mut self, slot: usize, image: usize) -> Result<()>;
    /// Signals `slot`'s fence on completion.
    fn submit(&mut self, slot: usize, image: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image: usize) -> Result<Presented>;
}

#[derive(Debug)]
pub struct FrameScheduler {
    frames_in_flight: usize,
    frame: u64,
    /// Slot whose fence guards each swapchain image's last submission.
    images_in_flight: Vec<Option<usize>>,
    /// Size the next rebuild targets.
    framebuffer: RenderSize,
    resize_requested: bool,
    recreations: u32,
}

impl FrameScheduler {
    /// `framebuffer` is the size the current group was built for.
    pub fn new(frames_in_flight: usize, image_count: usize, framebuffer: RenderSize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            frame: 0,
            images_in_flight: vec![None; image_count],
            framebuffer,
            resize_requested: false,
            recreations: 0,
        }
    }

    /// Records a new framebuffer size and flags a rebuild for the next
    /// `draw_frame`. Empty or unchanged sizes are ignored; returns whether
    /// a rebuild was flagged.
    pub fn resize(&mut self, size: RenderSize) -> bool {
        if size.is_empty() || size == self.framebuffer {
            return false;
        }
        self.framebuffer = size;
        self.resize_requested = true;
        true
    }

    pub fn framebuffer(&self) -> RenderSize {
        self.framebuffer
    }

    pub fn resize_pending(&self) -> bool {
        self.resize_requested
    }

    pub fn current_slot(&self) -> usize {
        (self.frame % self.frames_in_flight as u64) as usize
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frame
    }

    pub fn recreations(&self) -> u32 {
        self.recreations
    }

    /// Length of the image ownership table; follows the swapchain's image count.
    pub fn tracked_images(&self) -> usize {
        self.images_in_flight.len()
    }

    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.images_in_flight.get(image).copied().flatten()
    }

    fn take_resize(&mut self) -> bool {
        std::mem::take(&mut self.resize_requested)
    }

    fn recreate<T: FrameTarget + ?Sized>(&mut self, target: &mut T) -> Result<()> {
        let images = target.recreate(self.framebuffer)?;
        // The device was idled, so no image is owned by a pending submission.
        self.images_in_flight = vec![None; images];
        self.resize_requested = false;
        self.recreations += 1;
        debug!("recreation #{} ({} images)", self.recreations, images);
        Ok(())
    }

    pub fn draw_frame<T: FrameTarget + ?Sized>(&mut self, target: &mut T) -> Result<FrameOutcome> {
        let slot = self.current_slot();

        // 1) Throttle to the slot's previous submission
        target.wait_slot(slot)?;

        // 2) Pending resize
        if self.take_resize() {
            self.recreate(target)?;
        }

        // 3) Acquire
        let image = match target.acquire(slot)? {
            Acquired::Image { index, suboptimal } => {
                if suboptimal {
                    trace!("acquired suboptimal image {index}");
                }
                index
            }
            Acquired::OutOfDate => {
                self.recreate(target)?;
                return Ok(FrameOutcome::Skipped);
            }
        };

        // 4) Uniforms for this image
        target.update_uniforms(image)?;

        // 5) Cross-slot guard
        if let Some(owner) = self.image_owner(image) {
            if owner != slot {
                target.wait_slot(owner)?;
            }
        }
        if let Some(entry) = self.images_in_flight.get_mut(image) {
            *entry = Some(slot);
        }

        // 6-7) Record + submit
        target.reset_and_record(slot, image)?;
        target.submit(slot, image)?;

        // 8) Present
        let presented = target.present(slot, image)?;
        if presented == Presented::Stale || self.take_resize() {
            self.recreate(target)?;
        }

        // 9) Next slot
        self.frame += 1;
        Ok(FrameOutcome::Presented { slot, image })
    }
}
