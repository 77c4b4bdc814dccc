//! CPU-side constant buffers with typed, name-addressed variables.
//!
//! A [`ConstantBuffer`] mirrors one reflected uniform block as bytes laid out
//! with WGSL uniform rules. Variables write into that mirror and mark it dirty;
//! the GPU copy is refreshed once per apply.

use std::fmt;

use wgpu::util::DeviceExt;

use crate::effect::EffectError;
use crate::reflect::UniformBlock;

/// 32-bit scalar kinds that can live in a uniform block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Sint,
    Uint,
    Float,
}

/// Shape of a constant-buffer variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VariableType {
    Scalar(ScalarType),
    Vector { scalar: ScalarType, len: u32 },
    /// Column-major `f32` matrix.
    Matrix { columns: u32, rows: u32 },
    /// Arrays, nested structs and anything else; written as raw bytes.
    Other { size: u32 },
}

impl VariableType {
    /// Size in bytes occupied inside the block.
    pub fn size(&self) -> u32 {
        match *self {
            VariableType::Scalar(_) => 4,
            VariableType::Vector { len, .. } => 4 * len,
            VariableType::Matrix { columns, rows } => columns * column_stride(rows),
            VariableType::Other { size } => size,
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scalar = |s: ScalarType| match s {
            ScalarType::Sint => "i32",
            ScalarType::Uint => "u32",
            ScalarType::Float => "f32",
        };
        match *self {
            VariableType::Scalar(s) => write!(f, "{}", scalar(s)),
            VariableType::Vector { scalar: s, len } => write!(f, "vec{}<{}>", len, scalar(s)),
            VariableType::Matrix { columns, rows } => write!(f, "mat{columns}x{rows}<f32>"),
            VariableType::Other { size } => write!(f, "{size} bytes"),
        }
    }
}

/// Distance between matrix columns: `vec2` columns are 8 bytes, wider ones 16.
fn column_stride(rows: u32) -> u32 {
    if rows == 2 { 8 } else { 16 }
}

/// CPU mirror of one uniform block plus its lazily created GPU buffer.
pub struct ConstantBuffer {
    name: String,
    group: u32,
    binding: u32,
    data: Vec<u8>,
    dirty: bool,
    gpu: Option<wgpu::Buffer>,
}

impl ConstantBuffer {
    /// Zero-initialised buffer sized for the reflected block.
    pub fn new(block: &UniformBlock) -> Self {
        Self {
            name: block.name.clone(),
            group: block.group,
            binding: block.binding,
            data: vec![0; block.size as usize],
            dirty: true,
            gpu: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(group, binding)` the block is declared at.
    pub fn slot(&self) -> (u32, u32) {
        (self.group, self.binding)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The GPU buffer, once [`ConstantBuffer::upload`] has run.
    pub fn gpu_buffer(&self) -> Option<&wgpu::Buffer> {
        self.gpu.as_ref()
    }

    /// Create the GPU buffer on first call, otherwise write pending changes.
    ///
    /// Returns `true` when a new GPU buffer was created, which invalidates
    /// bind groups referencing this block.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, label: &str) -> bool {
        match &self.gpu {
            None => {
                self.gpu = Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: &self.data,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                }));
                self.dirty = false;
                true
            }
            Some(buffer) => {
                if self.dirty {
                    queue.write_buffer(buffer, 0, &self.data);
                    self.dirty = false;
                }
                false
            }
        }
    }

    /// Read-only view of a variable at `offset`.
    pub(crate) fn variable<'a>(
        &'a self,
        name: &'a str,
        offset: u32,
        ty: VariableType,
    ) -> ConstantBufferVariable<'a> {
        let start = offset as usize;
        ConstantBufferVariable {
            name,
            ty,
            bytes: &self.data[start..start + ty.size() as usize],
        }
    }

    /// Writable view of a variable at `offset`.
    pub(crate) fn variable_mut<'a>(
        &'a mut self,
        name: &'a str,
        offset: u32,
        ty: VariableType,
    ) -> ConstantBufferVariableMut<'a> {
        let start = offset as usize;
        ConstantBufferVariableMut {
            name,
            ty,
            bytes: &mut self.data[start..start + ty.size() as usize],
            dirty: &mut self.dirty,
        }
    }
}

/// Read access to a named variable.
pub struct ConstantBufferVariable<'a> {
    name: &'a str,
    ty: VariableType,
    bytes: &'a [u8],
}

impl ConstantBufferVariable<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn ty(&self) -> VariableType {
        self.ty
    }

    pub fn raw(&self) -> &[u8] {
        self.bytes
    }

    pub fn get_sint(&self) -> Result<i32, EffectError> {
        expect(self.name, self.ty, VariableType::Scalar(ScalarType::Sint), "i32")?;
        Ok(bytemuck::pod_read_unaligned(&self.bytes[..4]))
    }

    pub fn get_uint(&self) -> Result<u32, EffectError> {
        expect(self.name, self.ty, VariableType::Scalar(ScalarType::Uint), "u32")?;
        Ok(bytemuck::pod_read_unaligned(&self.bytes[..4]))
    }

    pub fn get_float(&self) -> Result<f32, EffectError> {
        expect(self.name, self.ty, VariableType::Scalar(ScalarType::Float), "f32")?;
        Ok(bytemuck::pod_read_unaligned(&self.bytes[..4]))
    }

    /// All components of a float vector.
    pub fn get_float_vector(&self) -> Result<Vec<f32>, EffectError> {
        match self.ty {
            VariableType::Vector {
                scalar: ScalarType::Float,
                ..
            } => Ok(read_floats(self.bytes)),
            _ => Err(mismatch(self.name, self.ty, "float vector")),
        }
    }

    /// Matrix elements in column-major order, column padding removed.
    pub fn get_float_matrix(&self) -> Result<Vec<f32>, EffectError> {
        let VariableType::Matrix { columns, rows } = self.ty else {
            return Err(mismatch(self.name, self.ty, "float matrix"));
        };
        let stride = column_stride(rows) as usize;
        let mut out = Vec::with_capacity((columns * rows) as usize);
        for column in self.bytes.chunks_exact(stride).take(columns as usize) {
            out.extend(read_floats(&column[..rows as usize * 4]));
        }
        Ok(out)
    }
}

/// Write access to a named variable. Every setter marks the block dirty.
pub struct ConstantBufferVariableMut<'a> {
    name: &'a str,
    ty: VariableType,
    bytes: &'a mut [u8],
    dirty: &'a mut bool,
}

impl ConstantBufferVariableMut<'_> {
    pub fn ty(&self) -> VariableType {
        self.ty
    }

    pub fn set_sint(&mut self, value: i32) -> Result<(), EffectError> {
        expect(self.name, self.ty, VariableType::Scalar(ScalarType::Sint), "i32")?;
        self.write(0, bytemuck::bytes_of(&value));
        Ok(())
    }

    pub fn set_uint(&mut self, value: u32) -> Result<(), EffectError> {
        expect(self.name, self.ty, VariableType::Scalar(ScalarType::Uint), "u32")?;
        self.write(0, bytemuck::bytes_of(&value));
        Ok(())
    }

    pub fn set_float(&mut self, value: f32) -> Result<(), EffectError> {
        expect(self.name, self.ty, VariableType::Scalar(ScalarType::Float), "f32")?;
        self.write(0, bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Write the leading `values.len()` components of a float vector.
    pub fn set_float_vector(&mut self, values: &[f32]) -> Result<(), EffectError> {
        match self.ty {
            VariableType::Vector {
                scalar: ScalarType::Float,
                len,
            } if !values.is_empty() && values.len() <= len as usize => {
                self.write(0, bytemuck::cast_slice(values));
                Ok(())
            }
            _ => Err(mismatch(self.name, self.ty, "float vector")),
        }
    }

    /// Write a `columns x rows` matrix given in column-major order.
    pub fn set_float_matrix(
        &mut self,
        columns: u32,
        rows: u32,
        values: &[f32],
    ) -> Result<(), EffectError> {
        let matches = self.ty == VariableType::Matrix { columns, rows };
        if !matches || values.len() != (columns * rows) as usize {
            return Err(mismatch(self.name, self.ty, "float matrix"));
        }
        let stride = column_stride(rows) as usize;
        for (i, column) in values.chunks_exact(rows as usize).enumerate() {
            self.write(i * stride, bytemuck::cast_slice(column));
        }
        Ok(())
    }

    pub fn set_mat4(&mut self, matrix: glam::Mat4) -> Result<(), EffectError> {
        self.set_float_matrix(4, 4, &matrix.to_cols_array())
    }

    /// Overwrite the variable with raw bytes of exactly its size.
    pub fn set_raw(&mut self, bytes: &[u8]) -> Result<(), EffectError> {
        if bytes.len() != self.bytes.len() {
            return Err(mismatch(self.name, self.ty, "raw bytes of matching size"));
        }
        self.write(0, bytes);
        Ok(())
    }

    fn write(&mut self, offset: usize, src: &[u8]) {
        self.bytes[offset..offset + src.len()].copy_from_slice(src);
        *self.dirty = true;
    }
}

fn read_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect()
}

fn expect(
    name: &str,
    actual: VariableType,
    wanted: VariableType,
    requested: &'static str,
) -> Result<(), EffectError> {
    if actual == wanted {
        Ok(())
    } else {
        Err(mismatch(name, actual, requested))
    }
}

fn mismatch(name: &str, actual: VariableType, requested: &'static str) -> EffectError {
    EffectError::TypeMismatch {
        name: name.to_string(),
        declared: actual,
        requested,
    }
}
