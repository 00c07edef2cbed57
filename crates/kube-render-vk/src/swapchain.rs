// SPDX-License-Identifier: CEPL-1.0
//! The presentable image chain and everything whose lifetime follows the window size.

use crate::context::DeviceContext;
use crate::error::VkError;
use crate::handle::Owned;
use crate::memory::{create_image_view, GpuBuffer, GpuImage, DEVICE_MEMORY, HOST_MEMORY};
use crate::pipeline::{build_render_pass, overlay_pipeline, scene_pipeline, GraphicsPipeline};
use crate::shaders::ShaderPair;
use crate::texture::Texture;
use anyhow::{ensure, Context, Result};
use ash::khr::swapchain;
use ash::vk;
use kube_math::Mvp;
use kube_render::RenderSize;
use std::sync::Arc;
use tracing::{debug, info};

pub const FALLBACK_EXTENT: vk::Extent2D = vk::Extent2D {
    width: 800,
    height: 600,
};

pub const DEPTH_CANDIDATES: &[vk::Format] = &[
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// BGRA8 sRGB with the nonlinear sRGB color space, else whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Mailbox when offered, FIFO otherwise (always available).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's own extent when it reports one; otherwise the framebuffer size
/// clamped into the advertised bounds. A zero axis falls back to 800 or 600 on its own.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    let current = caps.current_extent;
    if current.width != u32::MAX && current.width != 0 && current.height != 0 {
        return current;
    }
    let or_fallback = |v: u32, fallback: u32| if v == 0 { fallback } else { v };
    let want = vk::Extent2D {
        width: or_fallback(framebuffer.width, FALLBACK_EXTENT.width),
        height: or_fallback(framebuffer.height, FALLBACK_EXTENT.height),
    };
    let clamp = |v: u32, min: u32, max: u32| {
        let min = min.max(1);
        // A zero max means the surface sets no upper bound.
        let max = if max == 0 { v.max(min) } else { max.max(min) };
        v.clamp(min, max)
    };
    vk::Extent2D {
        width: clamp(want.width, caps.min_image_extent.width, caps.max_image_extent.width),
        height: clamp(
            want.height,
            caps.min_image_extent.height,
            caps.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped when the surface advertises a max.
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

/// First candidate usable as an optimally tiled depth attachment.
pub fn pick_depth_format(
    features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> Result<vk::Format, VkError> {
    DEPTH_CANDIDATES
        .iter()
        .copied()
        .find(|&f| features(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
        .ok_or(VkError::NoDepthFormat(DEPTH_CANDIDATES))
}

struct Swapchain {
    loader: swapchain::Device,
    handle: vk::SwapchainKHR,
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_swapchain(self.handle, None) };
        debug!("swapchain destroyed");
    }
}

struct CommandBuffers {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.pool, &self.buffers) };
        }
    }
}

/// Lengths of the per-image arrays in a group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerImageCounts {
    pub images: usize,
    pub views: usize,
    pub framebuffers: usize,
    pub uniforms: usize,
    pub descriptor_sets: usize,
    pub command_buffers: usize,
}

impl PerImageCounts {
    /// Every per-image array has one entry per swapchain image.
    pub fn is_consistent(&self) -> bool {
        [
            self.views,
            self.framebuffers,
            self.uniforms,
            self.descriptor_sets,
            self.command_buffers,
        ]
        .iter()
        .all(|&len| len == self.images)
    }
}

/// Long-lived objects the group is built against. None of them change on resize.
pub struct GroupInputs<'a> {
    pub set_layout: vk::DescriptorSetLayout,
    pub command_pool: vk::CommandPool,
    pub depth_format: vk::Format,
    pub texture: &'a Texture,
    pub scene_shaders: &'a ShaderPair,
    pub overlay_shaders: Option<&'a ShaderPair>,
}

// Field order is teardown order: a child never outlives the object it was
// built from. Descriptor sets die with their pool; images belong to the swapchain.
pub struct SwapchainResourceGroup {
    command_buffers: CommandBuffers,
    framebuffers: Vec<Owned<vk::Framebuffer>>,
    render_pass: Owned<vk::RenderPass>,
    scene: GraphicsPipeline,
    overlay: Option<GraphicsPipeline>,
    views: Vec<Owned<vk::ImageView>>,
    depth_view: Owned<vk::ImageView>,
    _depth: GpuImage,
    uniforms: Vec<GpuBuffer>,
    descriptor_pool: Owned<vk::DescriptorPool>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    images: Vec<vk::Image>,
    swapchain: Swapchain,
    extent: vk::Extent2D,
}

impl SwapchainResourceGroup {
    pub fn create(
        ctx: &DeviceContext,
        inputs: &GroupInputs<'_>,
        framebuffer: RenderSize,
    ) -> Result<Self> {
        unsafe { create_group(ctx, inputs, framebuffer) }
    }

    /// The only way to rebuild: idle the device, tear the whole group down, build a new one.
    pub fn recreate(
        self,
        ctx: &DeviceContext,
        inputs: &GroupInputs<'_>,
        framebuffer: RenderSize,
    ) -> Result<Self> {
        ctx.wait_idle().context("recreate: wait idle")?;
        let old = self.extent;
        drop(self);
        let group = Self::create(ctx, inputs, framebuffer).context("recreate swapchain")?;
        info!(
            "swapchain recreated {}x{} → {}x{} ({} images)",
            old.width,
            old.height,
            group.extent.width,
            group.extent.height,
            group.image_count()
        );
        Ok(group)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn per_image_counts(&self) -> PerImageCounts {
        PerImageCounts {
            images: self.images.len(),
            views: self.views.len(),
            framebuffers: self.framebuffers.len(),
            uniforms: self.uniforms.len(),
            descriptor_sets: self.descriptor_sets.len(),
            command_buffers: self.command_buffers.buffers.len(),
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.raw()
    }

    pub fn scene(&self) -> &GraphicsPipeline {
        &self.scene
    }

    pub fn overlay(&self) -> Option<&GraphicsPipeline> {
        self.overlay.as_ref()
    }

    pub fn framebuffer(&self, image: usize) -> vk::Framebuffer {
        self.framebuffers[image].raw()
    }

    pub fn command_buffer(&self, image: usize) -> vk::CommandBuffer {
        self.command_buffers.buffers[image]
    }

    pub fn descriptor_set(&self, image: usize) -> vk::DescriptorSet {
        self.descriptor_sets[image]
    }

    pub fn write_uniforms(&self, image: usize, mvp: &Mvp) -> Result<()> {
        self.uniforms[image]
            .write(0, mvp.as_bytes())
            .context("write uniform buffer")
    }
}

unsafe fn create_group(
    ctx: &DeviceContext,
    inputs: &GroupInputs<'_>,
    framebuffer: RenderSize,
) -> Result<SwapchainResourceGroup> {
    let device = &ctx.device;

    // 1) Policy
    let caps = ctx.surface_capabilities()?;
    let format = choose_surface_format(&ctx.surface_formats()?)
        .context("swapchain: surface reports no formats")?;
    let present_mode = choose_present_mode(&ctx.present_modes()?);
    let extent = choose_extent(&caps, framebuffer);
    let min_images = image_count(&caps);
    let (sharing, family_list) = ctx.families.sharing();

    // 2) Swapchain + its images
    let ci = vk::SwapchainCreateInfoKHR::default()
        .surface(ctx.surface())
        .min_image_count(min_images)
        .image_format(format.format)
        .image_color_space(format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(sharing)
        .queue_family_indices(&family_list)
        .pre_transform(caps.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true);
    let swapchain = Swapchain {
        loader: ctx.swapchain_loader.clone(),
        handle: unsafe { ctx.swapchain_loader.create_swapchain(&ci, None) }
            .context("swapchain: create")?,
    };
    let images = unsafe { ctx.swapchain_loader.get_swapchain_images(swapchain.handle) }
        .context("swapchain: get images")?;
    let n = images.len();
    info!(
        "swapchain {:?}/{:?} {:?} {}x{} ({} images)",
        format.format, format.color_space, present_mode, extent.width, extent.height, n
    );

    // 3) Views
    let views = images
        .iter()
        .map(|&img| create_image_view(device, img, format.format, vk::ImageAspectFlags::COLOR))
        .collect::<Result<Vec<_>>>()
        .context("swapchain: image views")?;

    // 4) Depth
    let depth = GpuImage::new(
        ctx,
        extent,
        inputs.depth_format,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        DEVICE_MEMORY,
    )
    .context("swapchain: depth image")?;
    let depth_view = create_image_view(
        device,
        depth.handle(),
        inputs.depth_format,
        vk::ImageAspectFlags::DEPTH,
    )
    .context("swapchain: depth view")?;

    // 5) Render pass + pipelines
    let render_pass = build_render_pass(device, format.format, inputs.depth_format)
        .context("swapchain: render pass")?;
    let scene = scene_pipeline(
        device,
        render_pass.raw(),
        inputs.set_layout,
        extent,
        inputs.scene_shaders,
    )?;
    let overlay = inputs
        .overlay_shaders
        .map(|shaders| overlay_pipeline(device, render_pass.raw(), extent, shaders))
        .transpose()?;

    // 6) Framebuffers
    let framebuffers = views
        .iter()
        .map(|view| {
            let attachments = [view.raw(), depth_view.raw()];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.raw())
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            unsafe { device.create_framebuffer(&info, None) }
                .map(|fb| Owned::new(device, fb))
                .context("swapchain: create framebuffer")
        })
        .collect::<Result<Vec<_>>>()?;

    // 7) Per-image uniforms + descriptor sets
    let uniforms = (0..n)
        .map(|_| {
            GpuBuffer::new(
                ctx,
                std::mem::size_of::<Mvp>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                HOST_MEMORY,
            )
        })
        .collect::<Result<Vec<_>>>()
        .context("swapchain: uniform buffers")?;

    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: n as u32,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: n as u32,
        },
    ];
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(n as u32)
        .pool_sizes(&pool_sizes);
    let descriptor_pool = Owned::new(
        device,
        unsafe { device.create_descriptor_pool(&pool_info, None) }
            .context("swapchain: descriptor pool")?,
    );
    let layouts = vec![inputs.set_layout; n];
    let alloc = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(descriptor_pool.raw())
        .set_layouts(&layouts);
    let descriptor_sets = unsafe { device.allocate_descriptor_sets(&alloc) }
        .context("swapchain: descriptor sets")?;

    for (set, ubo) in descriptor_sets.iter().zip(&uniforms) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: ubo.handle(),
            offset: 0,
            range: ubo.size(),
        }];
        let image_info = [inputs.texture.descriptor()];
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(*set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info),
            vk::WriteDescriptorSet::default()
                .dst_set(*set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info),
        ];
        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }

    // 8) Command buffers, one per image
    let alloc = vk::CommandBufferAllocateInfo {
        command_pool: inputs.command_pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: n as u32,
        ..Default::default()
    };
    let command_buffers = CommandBuffers {
        device: Arc::clone(device),
        pool: inputs.command_pool,
        buffers: unsafe { device.allocate_command_buffers(&alloc) }
            .context("swapchain: command buffers")?,
    };

    let group = SwapchainResourceGroup {
        command_buffers,
        framebuffers,
        render_pass,
        scene,
        overlay,
        views,
        depth_view,
        _depth: depth,
        uniforms,
        descriptor_pool,
        descriptor_sets,
        images,
        swapchain,
        extent,
    };
    let counts = group.per_image_counts();
    ensure!(
        counts.is_consistent(),
        "swapchain: per-image arrays disagree: {counts:?}"
    );
    Ok(group)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        }
    }

    fn wh(e: vk::Extent2D) -> (u32, u32) {
        (e.width, e.height)
    }

    const UNDEFINED: (u32, u32) = (u32::MAX, u32::MAX);

    #[test]
    fn surface_extent_wins_when_defined() {
        let c = caps((1024, 768), (1, 1), (4096, 4096));
        assert_eq!(wh(choose_extent(&c, RenderSize::new(10, 10))), (1024, 768));
    }

    #[test]
    fn undefined_extent_follows_framebuffer_and_clamps() {
        let c = caps(UNDEFINED, (200, 150), (1920, 1080));
        assert_eq!(wh(choose_extent(&c, RenderSize::new(640, 480))), (640, 480));
        assert_eq!(wh(choose_extent(&c, RenderSize::new(50, 60))), (200, 150));
        assert_eq!(wh(choose_extent(&c, RenderSize::new(5000, 4000))), (1920, 1080));
        assert_eq!(wh(choose_extent(&c, RenderSize::new(100, 2000))), (200, 1080));
    }

    #[test]
    fn zero_framebuffer_falls_back_to_default() {
        let c = caps(UNDEFINED, (1, 1), (4096, 4096));
        assert_eq!(wh(choose_extent(&c, RenderSize::new(0, 0))), (800, 600));
        let tight = caps(UNDEFINED, (1, 1), (640, 480));
        assert_eq!(wh(choose_extent(&tight, RenderSize::new(0, 0))), (640, 480));
    }

    #[test]
    fn zero_axis_falls_back_alone() {
        let c = caps(UNDEFINED, (1, 1), (4096, 4096));
        assert_eq!(wh(choose_extent(&c, RenderSize::new(1024, 0))), (1024, 600));
        assert_eq!(wh(choose_extent(&c, RenderSize::new(0, 300))), (800, 300));
    }

    #[test]
    fn per_image_counts_must_agree() {
        let all = |n| PerImageCounts {
            images: n,
            views: n,
            framebuffers: n,
            uniforms: n,
            descriptor_sets: n,
            command_buffers: n,
        };
        assert!(all(3).is_consistent());
        assert!(all(0).is_consistent());
        let short_sets = PerImageCounts {
            descriptor_sets: 2,
            ..all(3)
        };
        assert!(!short_sets.is_consistent());
        let extra_buffers = PerImageCounts {
            command_buffers: 4,
            ..all(3)
        };
        assert!(!extra_buffers.is_consistent());
    }

    #[test]
    fn zero_bounds_read_as_unbounded() {
        let c = caps((0, 0), (0, 0), (0, 0));
        assert_eq!(wh(choose_extent(&c, RenderSize::new(1234, 567))), (1234, 567));
    }

    #[test]
    fn extent_is_idempotent() {
        let c = caps(UNDEFINED, (200, 150), (1920, 1080));
        let fb = RenderSize::new(5000, 10);
        let first = choose_extent(&c, fb);
        for _ in 0..8 {
            assert_eq!(choose_extent(&c, fb), first);
        }
    }

    #[test]
    fn image_count_respects_max() {
        let mut c = caps(UNDEFINED, (1, 1), (1, 1));
        assert_eq!(image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(image_count(&c), 2);
        c.max_image_count = 8;
        assert_eq!(image_count(&c), 3);
    }

    #[test]
    fn format_and_mode_preferences() {
        let linear = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[linear, srgb]), Some(srgb));
        assert_eq!(choose_surface_format(&[linear]), Some(linear));
        assert_eq!(choose_surface_format(&[]), None);

        use vk::PresentModeKHR as P;
        assert_eq!(choose_present_mode(&[P::FIFO, P::MAILBOX]), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::IMMEDIATE, P::FIFO]), P::FIFO);
        assert_eq!(choose_present_mode(&[]), P::FIFO);
    }

    #[test]
    fn depth_format_order() {
        let only = |ok: vk::Format| {
            move |f: vk::Format| {
                if f == ok {
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                } else {
                    vk::FormatFeatureFlags::SAMPLED_IMAGE
                }
            }
        };
        assert_eq!(
            pick_depth_format(|_| vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT).unwrap(),
            vk::Format::D32_SFLOAT
        );
        assert_eq!(
            pick_depth_format(only(vk::Format::D24_UNORM_S8_UINT)).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
        assert!(matches!(
            pick_depth_format(only(vk::Format::D16_UNORM)),
            Err(VkError::NoDepthFormat(_))
        ));
    }
}
