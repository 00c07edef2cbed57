// SPDX-License-Identifier: CEPL-1.0
//! FPS text drawn with a 3×5 bitmap font as a second draw in the scene pass.

use crate::context::DeviceContext;
use crate::memory::{GpuBuffer, HOST_MEMORY};
use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};
use std::time::{Duration, Instant};

/// Vertex cap per frame. A multiple of 6 so truncation never splits a cell.
pub const MAX_OVERLAY_VERTICES: usize = 6 * 512;

const CELL_W: f32 = 8.0;
const CELL_H: f32 = 12.0;
const MARGIN: f32 = 8.0;
const SPACING: f32 = 4.0;
const GLYPH_COLS: usize = 3;
const TEXT_COLOR: [f32; 3] = [1.0, 1.0, 1.0];

const BLANK: [u8; 5] = [0; 5];

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct OverlayVertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
}

impl OverlayVertex {
    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<OverlayVertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attributes() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(OverlayVertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(OverlayVertex, color) as u32,
            },
        ]
    }
}

/// Same layout as `VkDrawIndirectCommand`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawParams {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawParams {
    pub fn vertices(vertex_count: u32) -> Self {
        Self {
            vertex_count,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

/// Rows top to bottom; bit 2 is the left column. Unknown characters render blank.
pub fn glyph(ch: char) -> [u8; 5] {
    match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'P' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'S' => [0b111, 0b100, 0b111, 0b001, 0b111],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        _ => BLANK,
    }
}

fn push_cell(out: &mut Vec<OverlayVertex>, x: f32, y: f32, extent: vk::Extent2D) {
    let ndc = |px: f32, py: f32| {
        [
            px / extent.width as f32 * 2.0 - 1.0,
            py / extent.height as f32 * 2.0 - 1.0,
        ]
    };
    let p0 = ndc(x, y);
    let p1 = ndc(x + CELL_W, y);
    let p2 = ndc(x + CELL_W, y + CELL_H);
    let p3 = ndc(x, y + CELL_H);
    out.extend([p0, p1, p2, p2, p3, p0].map(|pos| OverlayVertex {
        pos,
        color: TEXT_COLOR,
    }));
}

/// Lays `text` out from the top-left corner. At most `max` vertices, rounded
/// down to whole cells.
pub fn build_vertices(text: &str, extent: vk::Extent2D, max: usize) -> Vec<OverlayVertex> {
    let max = max - max % 6;
    let mut out = Vec::new();
    if extent.width == 0 || extent.height == 0 {
        return out;
    }
    let mut x = MARGIN;
    for ch in text.chars() {
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_COLS {
                if bits & (0b100 >> col) != 0 {
                    let px = x + col as f32 * CELL_W;
                    let py = MARGIN + row as f32 * CELL_H;
                    push_cell(&mut out, px, py, extent);
                }
            }
        }
        x += GLYPH_COLS as f32 * CELL_W + SPACING;
        if out.len() >= max {
            out.truncate(max);
            break;
        }
    }
    out
}

/// Frames over wall time, refreshed once a second.
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    since: Instant,
    rate: f64,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            since: now,
            rate: 0.0,
        }
    }

    pub fn tick(&mut self, now: Instant) -> f64 {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.since);
        if elapsed >= Duration::from_secs(1) {
            self.rate = f64::from(self.frames) / elapsed.as_secs_f64();
            self.frames = 0;
            self.since = now;
        }
        self.rate
    }

    pub fn label(&self) -> String {
        format!("FPS: {:.1}", self.rate)
    }
}

/// Vertex + indirect buffers for one frame slot.
pub struct OverlayBuffers {
    vertices: GpuBuffer,
    indirect: GpuBuffer,
}

impl OverlayBuffers {
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let vertices = GpuBuffer::new(
            ctx,
            (MAX_OVERLAY_VERTICES * size_of::<OverlayVertex>()) as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            HOST_MEMORY,
        )
        .context("overlay vertex buffer")?;
        let indirect = GpuBuffer::new(
            ctx,
            size_of::<DrawParams>() as vk::DeviceSize,
            vk::BufferUsageFlags::INDIRECT_BUFFER,
            HOST_MEMORY,
        )
        .context("overlay indirect buffer")?;
        Ok(Self { vertices, indirect })
    }

    pub fn write(&self, verts: &[OverlayVertex]) -> Result<()> {
        if !verts.is_empty() {
            self.vertices.write(0, bytemuck::cast_slice(verts))?;
        }
        let draw = DrawParams::vertices(verts.len() as u32);
        self.indirect.write(0, bytemuck::bytes_of(&draw))
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.handle()
    }

    pub fn indirect_buffer(&self) -> vk::Buffer {
        self.indirect.handle()
    }
}

/// Counter plus one buffer set per frame slot, so a slot only rewrites what
/// its own fence has already released.
pub struct Overlay {
    counter: FpsCounter,
    per_slot: Vec<OverlayBuffers>,
}

impl Overlay {
    pub fn new(ctx: &DeviceContext, slots: usize) -> Result<Self> {
        let per_slot = (0..slots)
            .map(|_| OverlayBuffers::new(ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            counter: FpsCounter::new(Instant::now()),
            per_slot,
        })
    }

    pub fn update(&mut self, slot: usize, extent: vk::Extent2D) -> Result<()> {
        self.counter.tick(Instant::now());
        let verts = build_vertices(&self.counter.label(), extent, MAX_OVERLAY_VERTICES);
        self.per_slot[slot].write(&verts).context("update overlay")
    }

    pub fn buffers(&self, slot: usize) -> &OverlayBuffers {
        &self.per_slot[slot]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    fn lit_cells(text: &str) -> usize {
        text.chars()
            .map(|c| glyph(c).iter().map(|r| r.count_ones() as usize).sum::<usize>())
            .sum()
    }

    #[test]
    fn fps_label_counts() {
        let verts = build_vertices("FPS: 60.0", EXTENT, MAX_OVERLAY_VERTICES);
        assert_eq!(verts.len() % 6, 0);
        assert!(verts.len() <= MAX_OVERLAY_VERTICES);
        assert_eq!(verts.len(), 6 * lit_cells("FPS: 60.0"));
        assert_eq!(verts.len(), 408);
    }

    #[test]
    fn unknown_character_is_blank() {
        assert_eq!(glyph('A'), glyph(' '));
        assert!(build_vertices("A", EXTENT, MAX_OVERLAY_VERTICES).is_empty());
        assert_eq!(
            build_vertices("1A1", EXTENT, MAX_OVERLAY_VERTICES).len(),
            2 * build_vertices("1", EXTENT, MAX_OVERLAY_VERTICES).len()
        );
    }

    #[test]
    fn cap_keeps_whole_cells() {
        let text = "8".repeat(200);
        let verts = build_vertices(&text, EXTENT, MAX_OVERLAY_VERTICES);
        assert_eq!(verts.len(), MAX_OVERLAY_VERTICES);
        let verts = build_vertices(&text, EXTENT, 100);
        assert_eq!(verts.len(), 96);
    }

    #[test]
    fn empty_extent_yields_nothing() {
        let zero = vk::Extent2D {
            width: 0,
            height: 600,
        };
        assert!(build_vertices("FPS: 1.0", zero, MAX_OVERLAY_VERTICES).is_empty());
    }

    #[test]
    fn first_cell_sits_in_top_left_margin() {
        let verts = build_vertices("1", EXTENT, MAX_OVERLAY_VERTICES);
        // '1' lights the middle column of the top row first.
        let p0 = verts[0].pos;
        assert_eq!(p0, [(8.0 + 8.0) / 800.0 * 2.0 - 1.0, 8.0 / 600.0 * 2.0 - 1.0]);
        assert_eq!(verts[2], verts[3]);
        assert_eq!(verts[0], verts[5]);
        assert!(verts.iter().all(|v| v.color == TEXT_COLOR));
    }

    #[test]
    fn draw_params_match_vulkan_layout() {
        assert_eq!(size_of::<DrawParams>(), size_of::<vk::DrawIndirectCommand>());
        assert_eq!(size_of::<OverlayVertex>(), 20);
    }

    #[test]
    fn counter_refreshes_once_a_second() {
        let t0 = Instant::now();
        let mut fps = FpsCounter::new(t0);
        assert_eq!(fps.label(), "FPS: 0.0");
        for i in 1..60 {
            fps.tick(t0 + Duration::from_millis(i * 16));
        }
        assert_eq!(fps.label(), "FPS: 0.0");
        let rate = fps.tick(t0 + Duration::from_secs(1));
        assert!((rate - 60.0).abs() < 1e-9);
        assert_eq!(fps.label(), "FPS: 60.0");
    }
}
