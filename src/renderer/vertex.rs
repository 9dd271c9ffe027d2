use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use std::mem;

use crate::renderer::backend::{VertexAttribute, VertexFormat, VertexLayout};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct Vertex {
    pub position: [f32; 4],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

/// Four vertices of one sprite, counter-clockwise from the bottom-left corner.
pub type Quad = [Vertex; 4];

pub const INDICES_PER_QUAD: u32 = 6;

/// Unit quad centred on the origin in the z = 0 plane.
pub const UNIT_QUAD: Quad = [
    v([-0.5, -0.5, 0.0, 1.0], [0.0, 0.0]),
    v([0.5, -0.5, 0.0, 1.0], [1.0, 0.0]),
    v([0.5, 0.5, 0.0, 1.0], [1.0, 1.0]),
    v([-0.5, 0.5, 0.0, 1.0], [0.0, 1.0]),
];

const fn v(position: [f32; 4], tex_coord: [f32; 2]) -> Vertex {
    Vertex {
        position,
        color: [0.0; 3],
        tex_coord,
    }
}

impl Vertex {
    pub fn layout() -> VertexLayout {
        VertexLayout {
            stride: mem::size_of::<Vertex>() as u64,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x4,
                    offset: mem::offset_of!(Vertex, position) as u64,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x3,
                    offset: mem::offset_of!(Vertex, color) as u64,
                },
                VertexAttribute {
                    location: 2,
                    format: VertexFormat::Float32x2,
                    offset: mem::offset_of!(Vertex, tex_coord) as u64,
                },
            ],
        }
    }
}

/// The unit quad moved to `position`.
pub fn translated_quad(position: Vec3) -> Quad {
    let transform = Mat4::from_translation(position);
    UNIT_QUAD.map(|vertex| Vertex {
        position: (transform * Vec4::from_array(vertex.position)).to_array(),
        ..vertex
    })
}

/// Two triangles per quad: `4i, 4i+1, 4i+2, 4i+2, 4i+3, 4i`.
pub fn quad_indices(quad_count: u32) -> Vec<u32> {
    (0..quad_count)
        .flat_map(|quad| {
            let base = quad * 4;
            [base, base + 1, base + 2, base + 2, base + 3, base]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_matches_struct_size() {
        let layout = Vertex::layout();
        assert_eq!(layout.stride, 36);
        assert_eq!(layout.stride, std::mem::size_of::<Vertex>() as u64);
        let offsets: Vec<u64> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 16, 28]);
    }

    #[test]
    fn translation_moves_every_corner() {
        let quad = translated_quad(Vec3::new(2.0, -1.0, 0.5));
        assert_eq!(quad[0].position, [1.5, -1.5, 0.5, 1.0]);
        assert_eq!(quad[2].position, [2.5, -0.5, 0.5, 1.0]);
        for (moved, original) in quad.iter().zip(UNIT_QUAD.iter()) {
            assert_eq!(moved.tex_coord, original.tex_coord);
            assert_eq!(moved.color, original.color);
        }
    }

    #[test]
    fn index_pattern_for_each_quad() {
        for count in [0u32, 1, 2, 7, 100] {
            let indices = quad_indices(count);
            assert_eq!(indices.len(), (count * INDICES_PER_QUAD) as usize);
            for (i, chunk) in indices.chunks_exact(6).enumerate() {
                let base = 4 * i as u32;
                assert_eq!(chunk, [base, base + 1, base + 2, base + 2, base + 3, base]);
            }
        }
    }
}
