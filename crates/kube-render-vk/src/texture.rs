// SPDX-License-Identifier: CEPL-1.0
use crate::context::DeviceContext;
use crate::handle::Owned;
use crate::memory::{
    copy_buffer_to_image, create_image_view, one_time_commands, transition_image_layout,
    GpuBuffer, GpuImage, DEVICE_MEMORY,
};
use crate::pixmap::Pixmap;
use anyhow::{Context, Result};
use ash::vk;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Sampled RGBA texture in device-local memory. Drop order: sampler, view, image.
pub struct Texture {
    sampler: Owned<vk::Sampler>,
    view: Owned<vk::ImageView>,
    image: GpuImage,
}

impl Texture {
    /// Staging buffer → transfer-dst image → shader-read-only, in one blocking submission.
    pub fn upload(ctx: &DeviceContext, pool: vk::CommandPool, pixmap: &Pixmap) -> Result<Self> {
        let extent = vk::Extent2D {
            width: pixmap.width,
            height: pixmap.height,
        };
        let staging = GpuBuffer::with_data(ctx, vk::BufferUsageFlags::TRANSFER_SRC, &pixmap.rgba)
            .context("texture staging buffer")?;
        let image = GpuImage::new(
            ctx,
            extent,
            TEXTURE_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            DEVICE_MEMORY,
        )
        .context("texture image")?;

        one_time_commands(ctx, pool, |device, cmd| {
            transition_image_layout(
                device,
                cmd,
                image.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            copy_buffer_to_image(device, cmd, staging.handle(), image.handle(), extent);
            transition_image_layout(
                device,
                cmd,
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })
        .context("texture upload")?;
        // The queue is idle, so the staging buffer can go.
        drop(staging);

        let view = create_image_view(
            &ctx.device,
            image.handle(),
            TEXTURE_FORMAT,
            vk::ImageAspectFlags::COLOR,
        )
        .context("texture view")?;

        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .compare_op(vk::CompareOp::ALWAYS)
            .max_lod(0.0);
        let sampler = Owned::new(
            &ctx.device,
            unsafe { ctx.device.create_sampler(&info, None) }.context("texture sampler")?,
        );

        Ok(Self {
            sampler,
            view,
            image,
        })
    }

    pub fn descriptor(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler.raw(),
            image_view: self.view.raw(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}
