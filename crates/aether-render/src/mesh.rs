//! Mesh geometry, its GPU buffers, and the draw-binding descriptor effects
//! hand to the renderer.

use crate::buffer::{BufferAllocator, InputLayout, VertexNormal, VertexPosition, VertexTexCoord};

/// Errors raised while validating, uploading or binding a mesh.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MeshError {
    /// An attribute stream has a different length than the position stream.
    #[error("{attribute} has {actual} elements, expected {expected}")]
    AttributeCountMismatch {
        attribute: String,
        expected: usize,
        actual: usize,
    },

    /// An index refers past the end of the vertex streams.
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    /// The layout expects a stream the mesh does not provide.
    #[error("vertex buffer slot {slot} has no buffer bound")]
    MissingVertexStream { slot: u32 },
}

/// CPU-side geometry with one stream per attribute.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshGeometry {
    pub positions: Vec<VertexPosition>,
    pub normals: Vec<VertexNormal>,
    /// Zero or more texture coordinate channels.
    pub texcoords: Vec<Vec<VertexTexCoord>>,
    pub indices: Vec<u32>,
}

impl MeshGeometry {
    /// Two triangles covering clip space, facing -Z, with `uv (0,0)` top-left.
    pub fn fullscreen_quad() -> Self {
        let positions = [
            [-1.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
            [1.0, -1.0, 0.0],
            [-1.0, -1.0, 0.0],
        ];
        let uvs = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

        Self {
            positions: positions
                .iter()
                .map(|&position| VertexPosition { position })
                .collect(),
            normals: vec![
                VertexNormal {
                    normal: [0.0, 0.0, -1.0]
                };
                4
            ],
            texcoords: vec![uvs.iter().map(|&uv| VertexTexCoord { uv }).collect()],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Check stream lengths and index bounds.
    pub fn validate(&self) -> Result<(), MeshError> {
        let expected = self.positions.len();
        if self.normals.len() != expected {
            return Err(MeshError::AttributeCountMismatch {
                attribute: "normals".to_string(),
                expected,
                actual: self.normals.len(),
            });
        }
        for (channel, uvs) in self.texcoords.iter().enumerate() {
            if uvs.len() != expected {
                return Err(MeshError::AttributeCountMismatch {
                    attribute: format!("texcoord channel {channel}"),
                    expected,
                    actual: uvs.len(),
                });
            }
        }
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= expected) {
            return Err(MeshError::IndexOutOfRange {
                index,
                vertex_count: expected,
            });
        }
        Ok(())
    }
}

/// GPU buffers for a mesh, one per attribute stream.
pub struct MeshData {
    pub positions: wgpu::Buffer,
    pub normals: wgpu::Buffer,
    pub texcoord_arrays: Vec<wgpu::Buffer>,
    pub indices: wgpu::Buffer,
    pub index_count: u32,
    pub vertex_count: u32,
}

impl MeshData {
    /// Validate `geometry` and upload each stream into its own buffer.
    pub fn upload(
        device: &wgpu::Device,
        label: &str,
        geometry: &MeshGeometry,
    ) -> Result<Self, MeshError> {
        geometry.validate()?;
        let allocator = BufferAllocator::new(device);

        let texcoord_arrays = geometry
            .texcoords
            .iter()
            .enumerate()
            .map(|(i, uvs)| allocator.create_vertex_buffer(&format!("{label}-texcoord{i}"), uvs))
            .collect();

        Ok(Self {
            positions: allocator
                .create_vertex_buffer(&format!("{label}-positions"), &geometry.positions),
            normals: allocator.create_vertex_buffer(&format!("{label}-normals"), &geometry.normals),
            texcoord_arrays,
            indices: allocator.create_index_buffer(&format!("{label}-indices"), &geometry.indices),
            index_count: geometry.indices.len() as u32,
            vertex_count: geometry.positions.len() as u32,
        })
    }
}

/// Everything the renderer needs to issue an indexed draw for an effect.
#[derive(Debug)]
pub struct MeshDataInput<'a> {
    pub input_layout: InputLayout,
    pub topology: wgpu::PrimitiveTopology,
    /// One entry per layout slot; `None` when the mesh lacks that stream.
    pub vertex_buffers: Vec<Option<&'a wgpu::Buffer>>,
    pub strides: Vec<u32>,
    pub offsets: Vec<u64>,
    pub index_buffer: &'a wgpu::Buffer,
    pub index_count: u32,
    pub index_format: wgpu::IndexFormat,
}

impl MeshDataInput<'_> {
    /// Bind vertex and index buffers to a render pass.
    ///
    /// Fails without binding anything if a slot is empty.
    pub fn bind(&self, render_pass: &mut wgpu::RenderPass<'_>) -> Result<(), MeshError> {
        if let Some(slot) = self.vertex_buffers.iter().position(Option::is_none) {
            return Err(MeshError::MissingVertexStream { slot: slot as u32 });
        }
        for (slot, (buffer, &offset)) in self
            .vertex_buffers
            .iter()
            .flatten()
            .zip(&self.offsets)
            .enumerate()
        {
            render_pass.set_vertex_buffer(slot as u32, buffer.slice(offset..));
        }
        render_pass.set_index_buffer(self.index_buffer.slice(..), self.index_format);
        Ok(())
    }

    /// Draw the entire mesh using indexed rendering.
    pub fn draw(&self, render_pass: &mut wgpu::RenderPass<'_>) {
        render_pass.draw_indexed(0..self.index_count, 0, 0..1);
    }
}
