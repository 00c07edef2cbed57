// SPDX-License-Identifier: CEPL-1.0
//! Buffers, images and the one-shot command helper. Every allocation is bound
//! immediately to its own memory; there is no pooling.

use crate::context::DeviceContext;
use crate::error::VkError;
use crate::handle::Owned;
use anyhow::{anyhow, Context, Result};
use ash::vk;
use std::sync::Arc;

pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);
pub const DEVICE_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

/// Lowest-indexed memory type allowed by `type_bits` whose flags cover `required`.
pub fn find_memory_type(
    types: &[vk::MemoryType],
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, VkError> {
    types
        .iter()
        .take(vk::MAX_MEMORY_TYPES)
        .enumerate()
        .find(|&(i, t)| type_bits & (1 << i) != 0 && t.property_flags.contains(required))
        .map(|(i, _)| i as u32)
        .ok_or(VkError::NoSuitableMemoryType {
            type_bits,
            required,
        })
}

/// Copies `src` into `dst[offset..]`, refusing writes that run past the mapping.
pub fn write_mapped(dst: &mut [u8], offset: usize, src: &[u8]) -> Result<(), VkError> {
    let size = dst.len();
    let end = offset
        .checked_add(src.len())
        .filter(|&end| end <= size)
        .ok_or(VkError::MappedRange {
            offset,
            len: src.len(),
            size,
        })?;
    dst[offset..end].copy_from_slice(src);
    Ok(())
}

// Host mapping of a whole allocation. Unmapped on drop.
struct Mapping<'a> {
    device: &'a ash::Device,
    memory: vk::DeviceMemory,
    bytes: &'a mut [u8],
}

impl<'a> Mapping<'a> {
    unsafe fn new(device: &'a ash::Device, memory: vk::DeviceMemory, size: usize) -> Result<Self> {
        let ptr = unsafe {
            device.map_memory(memory, 0, size as vk::DeviceSize, vk::MemoryMapFlags::empty())
        }
        .context("map memory")?;
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.cast::<u8>(), size) };
        Ok(Self {
            device,
            memory,
            bytes,
        })
    }
}

impl Drop for Mapping<'_> {
    fn drop(&mut self) {
        unsafe { self.device.unmap_memory(self.memory) }
    }
}

unsafe fn allocate(
    ctx: &DeviceContext,
    req: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> Result<Owned<vk::DeviceMemory>> {
    let memory_type_index = find_memory_type(ctx.memory_types(), req.memory_type_bits, props)?;
    let info = vk::MemoryAllocateInfo {
        allocation_size: req.size,
        memory_type_index,
        ..Default::default()
    };
    let memory = unsafe { ctx.device.allocate_memory(&info, None) }.context("allocate memory")?;
    Ok(Owned::new(&ctx.device, memory))
}

pub struct GpuBuffer {
    buffer: Owned<vk::Buffer>,
    memory: Owned<vk::DeviceMemory>,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn new(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let info = vk::BufferCreateInfo {
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        // A failure below drops `buffer`, which destroys it before the error propagates.
        let buffer = Owned::new(
            &ctx.device,
            unsafe { ctx.device.create_buffer(&info, None) }.context("create buffer")?,
        );
        let req = unsafe { ctx.device.get_buffer_memory_requirements(buffer.raw()) };
        let memory = unsafe { allocate(ctx, req, props) }?;
        unsafe { ctx.device.bind_buffer_memory(buffer.raw(), memory.raw(), 0) }
            .context("bind buffer memory")?;
        Ok(Self {
            buffer,
            memory,
            size,
        })
    }

    /// Host-visible buffer filled with `bytes`.
    pub fn with_data(ctx: &DeviceContext, usage: vk::BufferUsageFlags, bytes: &[u8]) -> Result<Self> {
        let buffer = Self::new(ctx, bytes.len() as vk::DeviceSize, usage, HOST_MEMORY)?;
        buffer.write(0, bytes)?;
        Ok(buffer)
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.raw()
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Scoped map, copy, unmap. Only valid for host-visible, host-coherent memory.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let device = self.memory.device();
        let mut map = unsafe { Mapping::new(device, self.memory.raw(), self.size as usize) }?;
        write_mapped(map.bytes, offset, bytes)?;
        Ok(())
    }
}

pub struct GpuImage {
    image: Owned<vk::Image>,
    _memory: Owned<vk::DeviceMemory>,
}

impl GpuImage {
    pub fn new(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let info = vk::ImageCreateInfo {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = Owned::new(
            &ctx.device,
            unsafe { ctx.device.create_image(&info, None) }.context("create image")?,
        );
        let req = unsafe { ctx.device.get_image_memory_requirements(image.raw()) };
        let memory = unsafe { allocate(ctx, req, props) }?;
        unsafe { ctx.device.bind_image_memory(image.raw(), memory.raw(), 0) }
            .context("bind image memory")?;
        Ok(Self {
            image,
            _memory: memory,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image.raw()
    }
}

pub fn create_image_view(
    device: &Arc<ash::Device>,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<Owned<vk::ImageView>> {
    let info = vk::ImageViewCreateInfo {
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    let view = unsafe { device.create_image_view(&info, None) }.context("create image view")?;
    Ok(Owned::new(device, view))
}

// Transient command buffer, returned to its pool on drop.
struct Transient<'a> {
    device: &'a ash::Device,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
}

impl Drop for Transient<'_> {
    fn drop(&mut self) {
        unsafe { self.device.free_command_buffers(self.pool, &[self.cmd]) }
    }
}

/// Records `record` into a throwaway command buffer, submits it to the graphics
/// queue and blocks until the queue is idle. Setup only, never per frame.
pub fn one_time_commands<F>(ctx: &DeviceContext, pool: vk::CommandPool, record: F) -> Result<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
{
    let device = ctx.device.as_ref();
    let ai = vk::CommandBufferAllocateInfo {
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = unsafe { device.allocate_command_buffers(&ai) }
        .context("allocate one-time command buffer")?[0];
    let transient = Transient { device, pool, cmd };

    let bi = vk::CommandBufferBeginInfo {
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    unsafe { device.begin_command_buffer(cmd, &bi) }.context("begin one-time commands")?;
    record(device, cmd)?;
    unsafe { device.end_command_buffer(cmd) }.context("end one-time commands")?;

    let cmds = [transient.cmd];
    let submit = vk::SubmitInfo::default().command_buffers(&cmds);
    unsafe {
        device
            .queue_submit(ctx.graphics_queue, &[submit], vk::Fence::null())
            .context("submit one-time commands")?;
        device
            .queue_wait_idle(ctx.graphics_queue)
            .context("wait for one-time commands")?;
    }
    Ok(())
}

/// Layout transitions used by texture upload.
pub fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        _ => return Err(anyhow!("unsupported layout transition {old:?} → {new:?}")),
    };
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        )
    };
    Ok(())
}

pub fn copy_buffer_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
) {
    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    };
    unsafe {
        device.cmd_copy_buffer_to_image(
            cmd,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        )
    };
}
