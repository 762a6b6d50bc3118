use ash::vk;
use bytemuck::{Pod, Zeroable};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use glam::{Vec2, Vec3};
use crate::renderer::resources::vertex::VertexBufferLayout;

/// Vertex format of the built-in meshes
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub texcoord: Vec2,
}

impl Vertex {
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout::new(size_of::<Self>() as u32)
            .with_attribute(vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Self, position) as u32)
            .with_attribute(vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Self, normal) as u32)
            .with_attribute(vk::Format::R32G32_SFLOAT, std::mem::offset_of!(Self, texcoord) as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Indices {
    pub fn index_type(&self) -> vk::IndexType {
        match self {
            Indices::U16(_) => vk::IndexType::UINT16,
            Indices::U32(_) => vk::IndexType::UINT32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Indices::U16(indices) => indices.len(),
            Indices::U32(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Indices::U16(indices) => bytemuck::cast_slice(indices),
            Indices::U32(indices) => bytemuck::cast_slice(indices),
        }
    }

    fn max(&self) -> Option<u32> {
        match self {
            Indices::U16(indices) => indices.iter().max().map(|i| *i as u32),
            Indices::U32(indices) => indices.iter().max().copied(),
        }
    }
}

/// Geometry as delivered by a loader: raw interleaved vertices described by a layout
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<u8>,
    pub vertex_layout: VertexBufferLayout,
    pub indices: Indices,
}

impl MeshData {
    pub fn from_vertices(vertices: &[Vertex], indices: Indices) -> Self {
        Self {
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            vertex_layout: Vertex::layout(),
            indices,
        }
    }

    pub fn vertex_count(&self) -> usize {
        match self.vertex_layout.stride {
            0 => 0,
            stride => self.vertices.len() / stride as usize,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let stride = self.vertex_layout.stride as usize;
        if stride == 0 || self.vertices.len() % stride != 0 {
            return Err(eyre!(
                "Vertex data of {} bytes is not a whole number of {stride} byte vertices",
                self.vertices.len(),
            ));
        }
        if self.indices.is_empty() {
            return Err(eyre!("Mesh has no indices"));
        }
        if let Some(max) = self.indices.max() {
            if max as usize >= self.vertex_count() {
                return Err(eyre!(
                    "Index {max} is out of range for {} vertices",
                    self.vertex_count(),
                ));
            }
        }
        Ok(())
    }

    /// Unit quad in the XY plane facing +Z
    pub fn new_quad() -> Self {
        let normal = Vec3::Z;
        let vertices = [
            ([-1.0, 1.0], [0.0, 0.0]),  // Top left
            ([-1.0, -1.0], [0.0, 1.0]), // Bottom left
            ([1.0, 1.0], [1.0, 0.0]),   // Top right
            ([1.0, -1.0], [1.0, 1.0]),  // Bottom right
        ]
            .map(|([x, y], texcoord)| Vertex {
                position: Vec3::new(x, y, 0.0),
                normal,
                texcoord: Vec2::from_array(texcoord),
            });

        // Counter-clockwise winding order
        let indices = vec![
            0, 1, 2, // Top left triangle
            2, 1, 3, // Bottom right triangle
        ];

        Self::from_vertices(&vertices, Indices::U16(indices))
    }

    /// Cube spanning -1..1 with outward normals and one texture per face
    pub fn new_cube() -> Self {
        // (normal, u, v) with u x v == normal, so corners walk counter-clockwise from outside
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u, v) in faces {
            let base = vertices.len() as u16;
            vertices.extend(corners.iter().map(|(s, t)| Vertex {
                position: normal + u * *s + v * *t,
                normal,
                texcoord: Vec2::new((s + 1.0) * 0.5, (1.0 - t) * 0.5),
            }));
            indices.extend([base, base + 1, base + 2, base + 2, base + 3, base]);
        }

        Self::from_vertices(&vertices, Indices::U16(indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_struct() {
        let layout = Vertex::layout();
        assert_eq!(layout.stride, 32);
        let offsets = layout.attributes.iter().map(|a| a.offset).collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 12, 24]);
    }

    #[test]
    fn cube_faces_wind_counter_clockwise_from_outside() {
        let cube = MeshData::new_cube();
        cube.validate().unwrap();
        assert_eq!(cube.vertex_count(), 24);

        let vertices = cube.vertices
            .chunks_exact(size_of::<Vertex>())
            .map(bytemuck::pod_read_unaligned::<Vertex>)
            .collect::<Vec<_>>();
        let Indices::U16(indices) = &cube.indices else {
            panic!("cube uses 16 bit indices");
        };
        for triangle in indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| vertices[triangle[i] as usize]);
            let facing = (b.position - a.position).cross(c.position - a.position);
            assert!(facing.dot(a.normal) > 0.0);
        }
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let mut quad = MeshData::new_quad();
        quad.validate().unwrap();
        quad.indices = Indices::U32(vec![0, 1, 4]);
        assert!(quad.validate().is_err());
    }
}
