// SPDX-License-Identifier: CEPL-1.0
//! Owning wrappers for device-level handles.

use ash::vk;
use std::fmt;
use std::sync::Arc;

pub trait DeviceHandle: Copy + fmt::Debug {
    /// # Safety
    /// The handle must have come from `device` and no pending GPU work may still use it.
    unsafe fn destroy(self, device: &ash::Device);
}

macro_rules! device_handles {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(
            impl DeviceHandle for $ty {
                unsafe fn destroy(self, device: &ash::Device) {
                    unsafe { device.$destroy(self, None) }
                }
            }
        )*
    };
}

device_handles! {
    vk::Buffer => destroy_buffer,
    vk::DeviceMemory => free_memory,
    vk::Image => destroy_image,
    vk::ImageView => destroy_image_view,
    vk::Sampler => destroy_sampler,
    vk::Framebuffer => destroy_framebuffer,
    vk::RenderPass => destroy_render_pass,
    vk::Pipeline => destroy_pipeline,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::DescriptorPool => destroy_descriptor_pool,
    vk::ShaderModule => destroy_shader_module,
    vk::CommandPool => destroy_command_pool,
    vk::Semaphore => destroy_semaphore,
    vk::Fence => destroy_fence,
}

/// Destroys its handle on drop. Must not outlive the `DeviceContext` that created the device.
pub struct Owned<H: DeviceHandle> {
    device: Arc<ash::Device>,
    handle: H,
}

impl<H: DeviceHandle> Owned<H> {
    pub fn new(device: &Arc<ash::Device>, handle: H) -> Self {
        Self {
            device: Arc::clone(device),
            handle,
        }
    }

    #[inline]
    pub fn raw(&self) -> H {
        self.handle
    }

    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }
}

impl<H: DeviceHandle> Drop for Owned<H> {
    fn drop(&mut self) {
        tracing::trace!("destroy {:?}", self.handle);
        unsafe { self.handle.destroy(&self.device) }
    }
}

impl<H: DeviceHandle> fmt::Debug for Owned<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}
