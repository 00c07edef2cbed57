// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Conditions callers tell apart. Everything else is an `anyhow` chain naming the failed step.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("no suitable GPU found ({candidates} device(s) enumerated)")]
    NoSuitableDevice { candidates: usize },

    #[error("no suitable memory type (type bits {type_bits:#b}, required {required:?})")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("no supported depth format among {0:?}")]
    NoDepthFormat(&'static [vk::Format]),

    #[error("shader asset {}: {source}", path.display())]
    ShaderAsset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write of {len} bytes at offset {offset} overruns a {size}-byte mapping")]
    MappedRange {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("{stage}: unexpected {result:?}")]
    UnexpectedResult {
        stage: &'static str,
        result: vk::Result,
    },
}
