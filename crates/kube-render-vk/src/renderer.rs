// SPDX-License-Identifier: CEPL-1.0
use crate::context::{DeviceContext, NegotiateOptions};
use crate::error::VkError;
use crate::frame::{Acquired, FrameScheduler, FrameTarget, Presented};
use crate::handle::Owned;
use crate::mesh::MeshBuffers;
use crate::overlay::{DrawParams, Overlay};
use crate::pipeline::build_descriptor_set_layout;
use crate::pixmap;
use crate::shaders::{ShaderPair, ShaderProgram, ShaderSource};
use crate::swapchain::{pick_depth_format, GroupInputs, SwapchainResourceGroup};
use crate::sync::{FrameSlots, FRAMES_IN_FLIGHT};
use crate::texture::Texture;
use anyhow::{Context, Result};
use ash::vk;
use kube_math::{aspect_ratio, Mvp};
use kube_render::{RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const VALIDATION_ENV: &str = "KUBE_VALIDATION";
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.05, 0.05, 0.1, 1.0];

const NO_GROUP: &str = "swapchain group missing after a failed rebuild";

#[derive(Clone, Debug, PartialEq)]
pub struct RendererOptions {
    pub validation: bool,
    pub overlay: bool,
    pub shaders: ShaderSource,
    /// PPM to sample on the cube. `None` or a bad file means the checkerboard.
    pub texture: Option<PathBuf>,
    pub clear_color: [f32; 4],
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            validation: true,
            overlay: true,
            shaders: ShaderSource::Embedded,
            texture: None,
            clear_color: DEFAULT_CLEAR_COLOR,
        }
    }
}

// STRICT TEARDOWN ORDER: fields drop top to bottom after `Drop::drop` idles
// the device. The context (device, surface, instance) goes last.
struct Gpu {
    group: Option<SwapchainResourceGroup>,
    slots: FrameSlots,
    overlay: Option<Overlay>,
    texture: Texture,
    mesh: MeshBuffers,
    set_layout: Owned<vk::DescriptorSetLayout>,
    command_pool: Owned<vk::CommandPool>,
    scene_shaders: ShaderPair,
    overlay_shaders: Option<ShaderPair>,
    depth_format: vk::Format,
    clear_color: [f32; 4],
    start: Instant,
    ctx: DeviceContext,
}

impl Drop for Gpu {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("teardown: {e:#}");
        }
        info!("renderer shutting down");
    }
}

impl Gpu {
    fn group(&self) -> Result<&SwapchainResourceGroup> {
        self.group.as_ref().context(NO_GROUP)
    }

    unsafe fn record(&self, slot: usize, image: usize) -> Result<()> {
        let device = &self.ctx.device;
        let group = self.group()?;
        let cmd = group.command_buffer(image);
        let extent = group.extent();

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("record: reset command buffer")?;
            device
                .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                .context("record: begin")?;

            let clears = [
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: self.clear_color,
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ];
            let rp_begin = vk::RenderPassBeginInfo::default()
                .render_pass(group.render_pass())
                .framebuffer(group.framebuffer(image))
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clears);
            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

            // Scene
            let scene = group.scene();
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, scene.pipeline.raw());
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.mesh.vertices.handle()], &[0]);
            device.cmd_bind_index_buffer(cmd, self.mesh.indices.handle(), 0, vk::IndexType::UINT32);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                scene.layout.raw(),
                0,
                &[group.descriptor_set(image)],
                &[],
            );
            device.cmd_draw_indexed(cmd, self.mesh.index_count, 1, 0, 0, 0);

            // Overlay
            if let (Some(pipeline), Some(overlay)) = (group.overlay(), self.overlay.as_ref()) {
                let buffers = overlay.buffers(slot);
                device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline.pipeline.raw(),
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &[buffers.vertex_buffer()], &[0]);
                device.cmd_draw_indirect(
                    cmd,
                    buffers.indirect_buffer(),
                    0,
                    1,
                    std::mem::size_of::<DrawParams>() as u32,
                );
            }

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd).context("record: end")?;
        }
        Ok(())
    }
}

impl FrameTarget for Gpu {
    fn wait_slot(&mut self, slot: usize) -> Result<()> {
        self.slots.get(slot).in_flight.wait()
    }

    fn recreate(&mut self, framebuffer: RenderSize) -> Result<usize> {
        let old = self.group.take().context(NO_GROUP)?;
        let inputs = GroupInputs {
            set_layout: self.set_layout.raw(),
            command_pool: self.command_pool.raw(),
            depth_format: self.depth_format,
            texture: &self.texture,
            scene_shaders: &self.scene_shaders,
            overlay_shaders: self.overlay_shaders.as_ref(),
        };
        let group = old.recreate(&self.ctx, &inputs, framebuffer)?;
        let images = group.image_count();
        self.group = Some(group);
        Ok(images)
    }

    fn acquire(&mut self, slot: usize) -> Result<Acquired> {
        let swapchain = self.group()?.handle();
        let semaphore = self.slots.get(slot).image_available.raw();
        let result = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image {
                index: index as usize,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(result) => Err(VkError::UnexpectedResult {
                stage: "acquire",
                result,
            }
            .into()),
        }
    }

    fn update_uniforms(&mut self, image: usize) -> Result<()> {
        let group = self.group()?;
        let extent = group.extent();
        let mvp = Mvp::spinning(
            self.start.elapsed().as_secs_f32(),
            aspect_ratio(extent.width, extent.height),
        );
        group.write_uniforms(image, &mvp)
    }

    fn reset_and_record(&mut self, slot: usize, image: usize) -> Result<()> {
        self.slots.get(slot).in_flight.reset()?;
        let extent = self.group()?.extent();
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.update(slot, extent)?;
        }
        unsafe { self.record(slot, image) }
    }

    fn submit(&mut self, slot: usize, image: usize) -> Result<()> {
        let frame = self.slots.get(slot);
        let wait = [frame.image_available.raw()];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal = [frame.render_finished.raw()];
        let cmds = [self.group()?.command_buffer(image)];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signal);
        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.graphics_queue, &[submit], frame.in_flight.raw())
        }
        .map_err(|result| VkError::UnexpectedResult {
            stage: "submit",
            result,
        })?;
        Ok(())
    }

    fn present(&mut self, slot: usize, image: usize) -> Result<Presented> {
        let wait = [self.slots.get(slot).render_finished.raw()];
        let swapchains = [self.group()?.handle()];
        let indices = [image as u32];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let result = unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &info)
        };
        match result {
            Ok(false) => Ok(Presented::Ok),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::Stale),
            Err(result) => Err(VkError::UnexpectedResult {
                stage: "present",
                result,
            }
            .into()),
        }
    }
}

/// Vulkan backend: a textured spinning cube with an optional FPS overlay.
pub struct VkRenderer {
    scheduler: FrameScheduler,
    gpu: Gpu,
}

impl VkRenderer {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        opts: RendererOptions,
    ) -> Result<Self> {
        // 1) Shaders first: without them nothing below is worth creating
        let scene_shaders = opts
            .shaders
            .load(ShaderProgram::Cube)
            .context("setup: cube shaders")?;
        let overlay_shaders = if opts.overlay {
            Some(
                opts.shaders
                    .load(ShaderProgram::Overlay)
                    .context("setup: overlay shaders")?,
            )
        } else {
            None
        };

        // 2) Instance, surface, device
        let ctx = DeviceContext::negotiate(
            window,
            display,
            NegotiateOptions {
                validation: opts.validation,
            },
        )?;
        let device = &ctx.device;

        // 3) Long-lived objects
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.families.graphics);
        let command_pool = Owned::new(
            device,
            unsafe { device.create_command_pool(&pool_info, None) }
                .context("setup: command pool")?,
        );
        let set_layout = build_descriptor_set_layout(device).context("setup: descriptor layout")?;
        let depth_format = pick_depth_format(|f| ctx.format_features(f))?;
        let mesh = MeshBuffers::cube(&ctx).context("setup: mesh")?;
        let pixmap = pixmap::load_or_fallback(opts.texture.as_deref());
        let texture =
            Texture::upload(&ctx, command_pool.raw(), &pixmap).context("setup: texture")?;
        let overlay = if opts.overlay {
            Some(Overlay::new(&ctx, FRAMES_IN_FLIGHT).context("setup: overlay")?)
        } else {
            None
        };
        let slots = FrameSlots::new(device, FRAMES_IN_FLIGHT)?;

        // 4) Size-dependent group
        let group = SwapchainResourceGroup::create(
            &ctx,
            &GroupInputs {
                set_layout: set_layout.raw(),
                command_pool: command_pool.raw(),
                depth_format,
                texture: &texture,
                scene_shaders: &scene_shaders,
                overlay_shaders: overlay_shaders.as_ref(),
            },
            size,
        )
        .context("setup: swapchain")?;
        let scheduler = FrameScheduler::new(FRAMES_IN_FLIGHT, group.image_count(), size);

        info!(
            "Vulkan renderer ready ({}x{}, depth {:?}, overlay {})",
            group.extent().width,
            group.extent().height,
            depth_format,
            if opts.overlay { "on" } else { "off" }
        );

        Ok(Self {
            scheduler,
            gpu: Gpu {
                group: Some(group),
                slots,
                overlay,
                texture,
                mesh,
                set_layout,
                command_pool,
                scene_shaders,
                overlay_shaders,
                depth_format,
                clear_color: opts.clear_color,
                start: Instant::now(),
                ctx,
            },
        })
    }

}

impl Renderer for VkRenderer {
    fn resize(&mut self, size: RenderSize) {
        if self.scheduler.resize(size) {
            debug!("resize requested → {}x{}", size.width, size.height);
        }
    }

    fn render(&mut self) -> Result<()> {
        self.scheduler.draw_frame(&mut self.gpu)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = RendererOptions::default();
        assert!(opts.validation);
        assert!(opts.overlay);
        assert_eq!(opts.shaders, ShaderSource::Embedded);
        assert_eq!(opts.texture, None);
        assert_eq!(opts.clear_color, DEFAULT_CLEAR_COLOR);
    }
}
