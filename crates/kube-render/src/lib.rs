// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports 0 in one dimension; nothing can be presented then.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

pub trait Renderer {
    /// Records the new framebuffer size. Backends defer the actual rebuild to
    /// the next frame and skip it when the size did not change.
    fn resize(&mut self, size: RenderSize);
    fn render(&mut self) -> Result<()>;
}
