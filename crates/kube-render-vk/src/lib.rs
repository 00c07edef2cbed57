// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for the kube demo: device negotiation, GPU resources,
//! pipelines, the swapchain group and the per-frame scheduler.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod context;
pub mod error;
pub mod frame;
pub mod handle;
pub mod memory;
pub mod mesh;
pub mod overlay;
pub mod pipeline;
pub mod pixmap;
pub mod renderer;
pub mod shaders;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use error::VkError;
pub use frame::{Acquired, FrameOutcome, FrameScheduler, FrameTarget, Presented};
pub use renderer::{RendererOptions, VkRenderer, DEFAULT_CLEAR_COLOR, VALIDATION_ENV};
pub use shaders::ShaderSource;
pub use sync::FRAMES_IN_FLIGHT;
