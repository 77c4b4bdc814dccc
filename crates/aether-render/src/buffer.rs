//! Vertex stream formats, input layouts, and GPU buffer allocation.
//!
//! Effects read positions, normals and texture coordinates from three separate
//! vertex buffers rather than one interleaved buffer, so each attribute has its
//! own stream type and its own buffer slot.

use bytemuck::{Pod, Zeroable};
use static_assertions::assert_eq_size;
use wgpu::util::DeviceExt;
use wgpu::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};

/// Position stream element (slot 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VertexPosition {
    pub position: [f32; 3],
}

/// Normal stream element (slot 1).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VertexNormal {
    pub normal: [f32; 3],
}

/// Texture coordinate stream element (slot 2).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VertexTexCoord {
    pub uv: [f32; 2],
}

assert_eq_size!(VertexPosition, [u8; 12]);
assert_eq_size!(VertexNormal, [u8; 12]);
assert_eq_size!(VertexTexCoord, [u8; 8]);

const POSITION_ATTRIBUTES: [VertexAttribute; 1] = [VertexAttribute {
    format: VertexFormat::Float32x3,
    offset: 0,
    shader_location: 0,
}];

const NORMAL_ATTRIBUTES: [VertexAttribute; 1] = [VertexAttribute {
    format: VertexFormat::Float32x3,
    offset: 0,
    shader_location: 1,
}];

const TEXCOORD_ATTRIBUTES: [VertexAttribute; 1] = [VertexAttribute {
    format: VertexFormat::Float32x2,
    offset: 0,
    shader_location: 2,
}];

const POS_NORMAL_TEX_BUFFERS: [VertexBufferLayout<'static>; 3] = [
    VertexBufferLayout {
        array_stride: std::mem::size_of::<VertexPosition>() as wgpu::BufferAddress,
        step_mode: VertexStepMode::Vertex,
        attributes: &POSITION_ATTRIBUTES,
    },
    VertexBufferLayout {
        array_stride: std::mem::size_of::<VertexNormal>() as wgpu::BufferAddress,
        step_mode: VertexStepMode::Vertex,
        attributes: &NORMAL_ATTRIBUTES,
    },
    VertexBufferLayout {
        array_stride: std::mem::size_of::<VertexTexCoord>() as wgpu::BufferAddress,
        step_mode: VertexStepMode::Vertex,
        attributes: &TEXCOORD_ATTRIBUTES,
    },
];

/// Named description of how vertex buffer slots map to shader inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputLayout {
    name: &'static str,
    buffers: &'static [VertexBufferLayout<'static>],
}

impl InputLayout {
    /// Position, normal and texcoord in three separate streams (strides 12, 12, 8).
    pub const POS_NORMAL_TEX: InputLayout = InputLayout {
        name: "VertexPosNormalTex",
        buffers: &POS_NORMAL_TEX_BUFFERS,
    };

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// One layout per vertex buffer slot, in slot order.
    pub fn buffers(&self) -> &'static [VertexBufferLayout<'static>] {
        self.buffers
    }

    /// Byte stride of every slot, in slot order.
    pub fn strides(&self) -> Vec<u32> {
        self.buffers
            .iter()
            .map(|layout| layout.array_stride as u32)
            .collect()
    }

    pub fn slot_count(&self) -> usize {
        self.buffers.len()
    }
}

/// GPU buffer allocator for vertex streams and index buffers.
pub struct BufferAllocator<'a> {
    device: &'a wgpu::Device,
}

impl<'a> BufferAllocator<'a> {
    /// Create a new buffer allocator with the given device.
    pub fn new(device: &'a wgpu::Device) -> Self {
        Self { device }
    }

    /// Create a vertex buffer from a slice of stream elements.
    pub fn create_vertex_buffer<T: Pod>(&self, label: &str, data: &[T]) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            })
    }

    /// Create a u32 index buffer.
    pub fn create_index_buffer(&self, label: &str, data: &[u32]) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            })
    }
}
