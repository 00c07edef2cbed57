// SPDX-License-Identifier: CEPL-1.0
//! Drives the frame scheduler against a simulated GPU that finishes work out
//! of order and hands out swapchain images in a scrambled order.

use anyhow::{ensure, Result};
use ash::vk;
use kube_render::RenderSize;
use kube_render_vk::swapchain::{choose_extent, image_count, PerImageCounts};
use kube_render_vk::{
    Acquired, FrameOutcome, FrameScheduler, FrameTarget, Presented, FRAMES_IN_FLIGHT,
};

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

fn sentinel_caps() -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        current_extent: vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        },
        min_image_extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 4096,
        },
        min_image_count: 2,
        max_image_count: 0,
        ..Default::default()
    }
}

struct SimGpu {
    rng: XorShift,
    caps: vk::SurfaceCapabilitiesKHR,
    window: RenderSize,
    extent: vk::Extent2D,
    fence_signaled: Vec<bool>,
    /// Image read by each slot's pending submission.
    slot_work: Vec<Option<usize>>,
    /// Slot whose pending submission reads each image's command buffer.
    image_reader: Vec<Option<usize>>,
    uniform_writes: Vec<u32>,
    recorded: Vec<u32>,
    vary_image_count: bool,
    out_of_date_every: Option<u64>,
    stale_every: Option<u64>,
    acquires: u64,
    presents: u64,
    recreations: u32,
}

impl SimGpu {
    fn new(window: RenderSize, seed: u64) -> Self {
        let caps = sentinel_caps();
        let images = image_count(&caps) as usize;
        Self {
            rng: XorShift(seed),
            caps,
            window,
            extent: choose_extent(&caps, window),
            fence_signaled: vec![true; FRAMES_IN_FLIGHT],
            slot_work: vec![None; FRAMES_IN_FLIGHT],
            image_reader: vec![None; images],
            uniform_writes: vec![0; images],
            recorded: vec![0; images],
            vary_image_count: false,
            out_of_date_every: None,
            stale_every: None,
            acquires: 0,
            presents: 0,
            recreations: 0,
        }
    }

    fn images(&self) -> usize {
        self.image_reader.len()
    }

    fn complete(&mut self, slot: usize) {
        if let Some(image) = self.slot_work[slot].take() {
            self.image_reader[image] = None;
        }
        self.fence_signaled[slot] = true;
    }

    /// Only uniforms and command buffers are modeled here. Views, framebuffers
    /// and descriptor sets follow the chain, and the real group refuses to
    /// build when any of them disagree.
    fn per_image_counts(&self) -> PerImageCounts {
        let images = self.images();
        PerImageCounts {
            images,
            views: images,
            framebuffers: images,
            uniforms: self.uniform_writes.len(),
            descriptor_sets: images,
            command_buffers: self.recorded.len(),
        }
    }
}

impl FrameTarget for SimGpu {
    fn wait_slot(&mut self, slot: usize) -> Result<()> {
        self.complete(slot);
        Ok(())
    }

    fn recreate(&mut self, framebuffer: RenderSize) -> Result<usize> {
        self.window = framebuffer;
        for slot in 0..FRAMES_IN_FLIGHT {
            self.complete(slot);
        }
        if self.vary_image_count {
            self.caps.min_image_count = 1 + self.rng.below(3) as u32;
        }
        let n = image_count(&self.caps) as usize;
        self.extent = choose_extent(&self.caps, self.window);
        self.image_reader = vec![None; n];
        self.uniform_writes = vec![0; n];
        self.recorded = vec![0; n];
        self.recreations += 1;
        Ok(n)
    }

    fn acquire(&mut self, _slot: usize) -> Result<Acquired> {
        self.acquires += 1;
        if self.out_of_date_every.is_some_and(|k| self.acquires % k == 0) {
            return Ok(Acquired::OutOfDate);
        }
        // The GPU makes progress on its own schedule.
        if self.rng.below(3) == 0 {
            let slot = self.rng.below(FRAMES_IN_FLIGHT);
            self.complete(slot);
        }
        let index = self.rng.below(self.images());
        Ok(Acquired::Image {
            index,
            suboptimal: false,
        })
    }

    fn update_uniforms(&mut self, image: usize) -> Result<()> {
        ensure!(image < self.images(), "uniform write past image count");
        self.uniform_writes[image] += 1;
        Ok(())
    }

    fn reset_and_record(&mut self, slot: usize, image: usize) -> Result<()> {
        ensure!(
            self.fence_signaled[slot],
            "slot {slot} reset while its fence is unsignaled"
        );
        ensure!(
            self.image_reader[image].is_none(),
            "image {image} re-recorded while slot {:?} still reads it",
            self.image_reader[image]
        );
        self.fence_signaled[slot] = false;
        self.recorded[image] += 1;
        Ok(())
    }

    fn submit(&mut self, slot: usize, image: usize) -> Result<()> {
        ensure!(self.slot_work[slot].is_none(), "slot {slot} double-submitted");
        self.slot_work[slot] = Some(image);
        self.image_reader[image] = Some(slot);
        Ok(())
    }

    fn present(&mut self, _slot: usize, _image: usize) -> Result<Presented> {
        self.presents += 1;
        if self.stale_every.is_some_and(|k| self.presents % k == 0) {
            Ok(Presented::Stale)
        } else {
            Ok(Presented::Ok)
        }
    }
}

#[test]
fn fence_discipline_holds_for_a_thousand_frames() {
    let mut gpu = SimGpu::new(RenderSize::new(800, 600), 0x9E37_79B9_7F4A_7C15);
    gpu.vary_image_count = true;
    gpu.out_of_date_every = Some(97);
    gpu.stale_every = Some(131);
    let mut sched = FrameScheduler::new(FRAMES_IN_FLIGHT, gpu.images(), gpu.window);

    let mut skipped = 0;
    let mut iterations = 0u32;
    while gpu.presents < 1000 {
        iterations += 1;
        assert!(iterations < 2000, "scheduler stopped making progress");
        if iterations % 200 == 0 {
            let size = RenderSize::new(640 + iterations / 200, 480);
            assert!(sched.resize(size));
        }
        let rebuilt_before = sched.recreations();
        match sched.draw_frame(&mut gpu).unwrap() {
            FrameOutcome::Presented { slot, image } => {
                assert!(slot < FRAMES_IN_FLIGHT);
                if sched.recreations() == rebuilt_before {
                    assert_eq!(sched.image_owner(image), Some(slot));
                    assert_eq!(gpu.image_reader[image], Some(slot));
                }
            }
            FrameOutcome::Skipped => skipped += 1,
        }
        assert_eq!(sched.tracked_images(), gpu.images());
    }

    assert_eq!(sched.frames_drawn(), 1000);
    assert!(skipped > 0);
    assert_eq!(sched.recreations(), gpu.recreations);
    assert!(gpu.recreations >= skipped);
}

#[test]
fn back_to_back_recreates_stay_consistent() {
    let mut gpu = SimGpu::new(RenderSize::new(640, 480), 7);
    gpu.vary_image_count = true;
    gpu.stale_every = Some(1);
    let mut sched = FrameScheduler::new(FRAMES_IN_FLIGHT, gpu.images(), gpu.window);

    // Resize before acquire, then a stale present: two rebuilds in one frame.
    assert!(sched.resize(RenderSize::new(320, 240)));
    sched.draw_frame(&mut gpu).unwrap();
    assert_eq!(sched.recreations(), 2);
    assert_eq!((gpu.extent.width, gpu.extent.height), (320, 240));
    let counts = gpu.per_image_counts();
    assert!(counts.is_consistent());
    assert_eq!(sched.tracked_images(), counts.images);
    assert!((0..gpu.images()).all(|i| sched.image_owner(i).is_none()));
}

#[test]
fn resize_mid_run_recreates_once() {
    // The host waits for a drawable framebuffer before creating the renderer.
    let reported = [
        RenderSize::new(0, 0),
        RenderSize::new(0, 0),
        RenderSize::new(800, 600),
    ];
    let size = reported
        .iter()
        .copied()
        .find(|s| !s.is_empty())
        .unwrap();
    assert_eq!(size, RenderSize::new(800, 600));

    let mut gpu = SimGpu::new(size, 42);
    let mut sched = FrameScheduler::new(FRAMES_IN_FLIGHT, gpu.images(), gpu.window);
    assert_eq!((gpu.extent.width, gpu.extent.height), (800, 600));
    // The window reports its creation size once more; that is not a resize.
    assert!(!sched.resize(size));

    for _ in 0..5 {
        let out = sched.draw_frame(&mut gpu).unwrap();
        assert!(matches!(out, FrameOutcome::Presented { .. }));
    }

    assert!(sched.resize(RenderSize::new(400, 300)));

    for _ in 0..5 {
        let out = sched.draw_frame(&mut gpu).unwrap();
        assert!(matches!(out, FrameOutcome::Presented { .. }));
    }

    assert_eq!(sched.recreations(), 1);
    assert_eq!(gpu.recreations, 1);
    assert_eq!((gpu.extent.width, gpu.extent.height), (400, 300));
    assert_eq!(sched.frames_drawn(), 10);
}
