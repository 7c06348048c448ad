//! Vertex and instance layouts for the mesh pipeline.

use ash::vk;
use glam::{Mat4, Vec3};
use std::mem::{offset_of, size_of};

/// Per-vertex binding.
pub const VERTEX_BINDING: u32 = 0;
/// Per-instance binding.
pub const INSTANCE_BINDING: u32 = 1;

/// Mesh vertex.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            color,
            uv,
        }
    }
}

/// Per-instance data: a column-major model matrix.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceData {
    pub model: [[f32; 4]; 4],
}

impl InstanceData {
    pub fn from_matrix(model: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
        }
    }
}

/// Binding descriptions for vertex and instance streams.
pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
    vec![
        vk::VertexInputBindingDescription {
            binding: VERTEX_BINDING,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        },
        vk::VertexInputBindingDescription {
            binding: INSTANCE_BINDING,
            stride: size_of::<InstanceData>() as u32,
            input_rate: vk::VertexInputRate::INSTANCE,
        },
    ]
}

/// Attribute descriptions matching `mesh.vert`.
///
/// Locations 0-2 are position, color, and uv; 3-6 are the model matrix
/// columns.
pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
    let mut attributes = vec![
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: VERTEX_BINDING,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, position) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: VERTEX_BINDING,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, color) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: VERTEX_BINDING,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(Vertex, uv) as u32,
        },
    ];

    let column = size_of::<[f32; 4]>() as u32;
    for i in 0..4 {
        attributes.push(vk::VertexInputAttributeDescription {
            location: 3 + i,
            binding: INSTANCE_BINDING,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: offset_of!(InstanceData, model) as u32 + i * column,
        });
    }

    attributes
}

/// Indexed triangle mesh.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

/// Unit cube centered at the origin, 4 vertices per face so each face gets
/// its own UVs. Counter-clockwise winding seen from outside.
pub fn cube() -> Mesh {
    // (normal, up) for each face; right = up x normal
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 0.3, 0.3]),
        ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [0.3, 1.0, 0.3]),
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.3, 0.3, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.3]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, -1.0], [0.3, 1.0, 1.0]),
        ([0.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.3, 1.0]),
    ];

    let mut mesh = Mesh::default();
    for (normal, up, color) in faces {
        let n = Vec3::from(normal);
        let u = Vec3::from(up);
        let r = u.cross(n);
        let base = mesh.vertices.len() as u32;

        let corners = [
            (-r - u, [0.0, 1.0]),
            (r - u, [1.0, 1.0]),
            (r + u, [1.0, 0.0]),
            (-r + u, [0.0, 0.0]),
        ];
        for (corner, uv) in corners {
            let p = (n + corner) * 0.5;
            mesh.vertices.push(Vertex::new(p.to_array(), color, uv));
        }
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    mesh
}

/// `n` x `n` grid of instances on the XZ plane, centered on the origin.
pub fn grid_instances(n: u32, spacing: f32) -> Vec<InstanceData> {
    let half = (n.saturating_sub(1)) as f32 * spacing * 0.5;
    let mut instances = Vec::with_capacity((n * n) as usize);
    for z in 0..n {
        for x in 0..n {
            let translation = Vec3::new(x as f32 * spacing - half, 0.0, z as f32 * spacing - half);
            instances.push(InstanceData::from_matrix(Mat4::from_translation(translation)));
        }
    }
    instances
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cube_has_six_quads() {
        let mesh = cube();
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
        for v in &mesh.vertices {
            for c in v.position {
                assert_relative_eq!(c.abs(), 0.5);
            }
        }
    }

    #[test]
    fn cube_faces_wind_outward() {
        let mesh = cube();
        for tri in mesh.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(mesh.vertices[i as usize].position));
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(centroid) > 0.0, "inward triangle {tri:?}");
        }
    }

    #[test]
    fn grid_is_centered() {
        let instances = grid_instances(3, 2.0);
        assert_eq!(instances.len(), 9);

        let sum: Vec3 = instances
            .iter()
            .map(|i| Mat4::from_cols_array_2d(&i.model).w_axis.truncate())
            .sum();
        assert_relative_eq!(sum.length(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn instance_attributes_cover_matrix_columns() {
        let attrs = attribute_descriptions();
        assert_eq!(attrs.len(), 7);

        let instance: Vec<_> = attrs
            .iter()
            .filter(|a| a.binding == INSTANCE_BINDING)
            .collect();
        assert_eq!(instance.len(), 4);
        assert_eq!(instance[3].offset, 48);
        assert_eq!(binding_descriptions()[1].stride, 64);
    }
}
