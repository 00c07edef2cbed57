// SPDX-License-Identifier: CEPL-1.0
use crate::error::VkError;
use ash::util::read_spv;
use std::io::Cursor;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderProgram {
    Cube,
    Overlay,
}

impl ShaderProgram {
    pub fn name(self) -> &'static str {
        match self {
            ShaderProgram::Cube => "cube",
            ShaderProgram::Overlay => "overlay",
        }
    }

    fn embedded(self) -> (&'static [u8], &'static [u8]) {
        match self {
            ShaderProgram::Cube => (
                include_bytes!(concat!(env!("OUT_DIR"), "/cube.vert.spv")),
                include_bytes!(concat!(env!("OUT_DIR"), "/cube.frag.spv")),
            ),
            ShaderProgram::Overlay => (
                include_bytes!(concat!(env!("OUT_DIR"), "/overlay.vert.spv")),
                include_bytes!(concat!(env!("OUT_DIR"), "/overlay.frag.spv")),
            ),
        }
    }
}

/// Where SPIR-V comes from. `Embedded` is what build.rs compiled into the binary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ShaderSource {
    #[default]
    Embedded,
    Directory(PathBuf),
}

pub struct ShaderPair {
    pub vert: Vec<u32>,
    pub frag: Vec<u32>,
}

impl ShaderSource {
    /// Vertex + fragment words for `program`. A missing or malformed blob is fatal.
    pub fn load(&self, program: ShaderProgram) -> Result<ShaderPair, VkError> {
        let name = program.name();
        match self {
            ShaderSource::Embedded => {
                let (vert, frag) = program.embedded();
                Ok(ShaderPair {
                    vert: decode(format!("<embedded>/{name}.vert.spv").into(), vert)?,
                    frag: decode(format!("<embedded>/{name}.frag.spv").into(), frag)?,
                })
            }
            ShaderSource::Directory(dir) => Ok(ShaderPair {
                vert: read_file(&dir.join(format!("{name}.vert.spv")))?,
                frag: read_file(&dir.join(format!("{name}.frag.spv")))?,
            }),
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u32>, VkError> {
    let bytes = std::fs::read(path).map_err(|source| VkError::ShaderAsset {
        path: path.to_owned(),
        source,
    })?;
    decode(path.to_owned(), &bytes)
}

fn decode(path: PathBuf, bytes: &[u8]) -> Result<Vec<u32>, VkError> {
    read_spv(&mut Cursor::new(bytes)).map_err(|source| VkError::ShaderAsset { path, source })
}
