// SPDX-License-Identifier: CEPL-1.0
use crate::handle::Owned;
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

/// How many frames the CPU may run ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Per-slot synchronization. The fence starts signaled so the first wait returns at once.
pub struct FrameSlot {
    pub image_available: Owned<vk::Semaphore>,
    pub render_finished: Owned<vk::Semaphore>,
    pub in_flight: Owned<vk::Fence>,
}

impl FrameSlot {
    pub fn new(device: &Arc<ash::Device>) -> Result<Self> {
        let sem = vk::SemaphoreCreateInfo::default();
        let fence = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        unsafe {
            Ok(Self {
                image_available: Owned::new(
                    device,
                    device.create_semaphore(&sem, None).context("create semaphore")?,
                ),
                render_finished: Owned::new(
                    device,
                    device.create_semaphore(&sem, None).context("create semaphore")?,
                ),
                in_flight: Owned::new(
                    device,
                    device.create_fence(&fence, None).context("create fence")?,
                ),
            })
        }
    }
}

pub struct FrameSlots {
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    pub fn new(device: &Arc<ash::Device>, count: usize) -> Result<Self> {
        let slots = (0..count)
            .map(|_| FrameSlot::new(device))
            .collect::<Result<Vec<_>>>()
            .context("create frame slots")?;
        Ok(Self { slots })
    }

    pub fn get(&self, slot: usize) -> &FrameSlot {
        &self.slots[slot]
    }
}

impl Owned<vk::Fence> {
    /// Blocks without a timeout.
    pub fn wait(&self) -> Result<()> {
        unsafe { self.device().wait_for_fences(&[self.raw()], true, u64::MAX) }
            .context("wait for fence")
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device().reset_fences(&[self.raw()]) }.context("reset fence")
    }
}
