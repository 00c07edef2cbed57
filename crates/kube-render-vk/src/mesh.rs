// SPDX-License-Identifier: CEPL-1.0
use crate::context::DeviceContext;
use crate::memory::GpuBuffer;
use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attributes() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

// Corners in UV order (0,0) (1,0) (1,1) (0,1), plus the face tint.
const FACES: [([[f32; 3]; 4], [f32; 3]); 6] = [
    // back (-Z), red
    (
        [[-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [1.0, 1.0, -1.0], [-1.0, 1.0, -1.0]],
        [1.0, 0.0, 0.0],
    ),
    // front (+Z), green
    (
        [[-1.0, -1.0, 1.0], [1.0, -1.0, 1.0], [1.0, 1.0, 1.0], [-1.0, 1.0, 1.0]],
        [0.0, 1.0, 0.0],
    ),
    // bottom (-Y), blue
    (
        [[-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [1.0, -1.0, 1.0], [-1.0, -1.0, 1.0]],
        [0.0, 0.0, 1.0],
    ),
    // top (+Y), yellow
    (
        [[-1.0, 1.0, -1.0], [1.0, 1.0, -1.0], [1.0, 1.0, 1.0], [-1.0, 1.0, 1.0]],
        [1.0, 1.0, 0.0],
    ),
    // left (-X), magenta
    (
        [[-1.0, -1.0, 1.0], [-1.0, -1.0, -1.0], [-1.0, 1.0, -1.0], [-1.0, 1.0, 1.0]],
        [1.0, 0.0, 1.0],
    ),
    // right (+X), cyan
    (
        [[1.0, -1.0, -1.0], [1.0, -1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, -1.0]],
        [0.0, 1.0, 1.0],
    ),
];

const CORNER_UV: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
const QUAD: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// 24 vertices: four per face so each face gets its own UVs and tint.
pub fn cube_vertices() -> Vec<Vertex> {
    FACES
        .iter()
        .flat_map(|(corners, color)| {
            corners.iter().zip(CORNER_UV).map(move |(&pos, uv)| Vertex {
                pos,
                color: *color,
                uv,
            })
        })
        .collect()
}

/// 36 indices, two triangles per face.
pub fn cube_indices() -> Vec<u32> {
    (0..FACES.len() as u32)
        .flat_map(|face| QUAD.iter().map(move |i| face * 4 + i))
        .collect()
}

/// Host-visible vertex + index buffers, written once at startup.
pub struct MeshBuffers {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
}

impl MeshBuffers {
    pub fn cube(ctx: &DeviceContext) -> Result<Self> {
        let vertices = cube_vertices();
        let indices = cube_indices();
        Ok(Self {
            vertices: GpuBuffer::with_data(
                ctx,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                bytemuck::cast_slice(&vertices),
            )
            .context("cube vertex buffer")?,
            indices: GpuBuffer::with_data(
                ctx,
                vk::BufferUsageFlags::INDEX_BUFFER,
                bytemuck::cast_slice(&indices),
            )
            .context("cube index buffer")?,
            index_count: indices.len() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_counts() {
        assert_eq!(cube_vertices().len(), 24);
        let idx = cube_indices();
        assert_eq!(idx.len(), 36);
        assert!(idx.iter().all(|&i| i < 24));
        assert_eq!(&idx[6..12], &[4, 5, 6, 6, 7, 4]);
    }

    #[test]
    fn each_face_is_flat_and_single_colored() {
        for face in cube_vertices().chunks(4) {
            let color = face[0].color;
            assert!(face.iter().all(|v| v.color == color));
            // One axis is constant across the face.
            let flat = (0..3).any(|axis| face.iter().all(|v| v.pos[axis] == face[0].pos[axis]));
            assert!(flat);
            let uvs: Vec<_> = face.iter().map(|v| v.uv).collect();
            assert_eq!(uvs, CORNER_UV.to_vec());
        }
    }

    #[test]
    fn layout_matches_shader_interface() {
        assert_eq!(Vertex::binding().stride, 32);
        let offsets: Vec<u32> = Vertex::attributes().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
    }
}
