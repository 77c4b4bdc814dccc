//! wgpu collaborators for shader effects: device handles, WGSL loading and
//! reflection, named constant buffers and resource slots, render states, and
//! the mesh streams effects bind for drawing.

pub mod buffer;
pub mod constant_buffer;
pub mod effect;
pub mod gpu;
pub mod material;
pub mod mesh;
pub mod reflect;
pub mod render_states;
pub mod shader;

pub use buffer::{InputLayout, VertexNormal, VertexPosition, VertexTexCoord};
pub use constant_buffer::{
    ConstantBuffer, ConstantBufferVariable, ConstantBufferVariableMut, ScalarType, VariableType,
};
pub use effect::{EffectError, EffectHelper, EffectPass, EffectPassDesc, PassTargets};
pub use gpu::{DeviceHandle, RenderContextError};
pub use material::{Material, MaterialProperty};
pub use mesh::{MeshData, MeshDataInput, MeshError, MeshGeometry};
pub use reflect::{
    EntryPointInfo, ResourceKind, ResourceSlot, ShaderReflection, StageKind, UniformBlock,
    UniformMember, reflect_wgsl,
};
pub use render_states::{DepthStencilDesc, RasterizerDesc, RenderStates};
pub use shader::{LoadedShader, ShaderError, ShaderLibrary};
