//! WGSL reflection via naga.
//!
//! Parses and validates shader source, then extracts what an effect needs to
//! address its inputs by name: entry points, uniform blocks with member
//! offsets, and handle resources (textures, samplers) with their bindings.

use std::num::NonZeroU64;

use naga::{AddressSpace, Expression, ImageClass, ImageDimension, ScalarKind, TypeInner};
use rustc_hash::FxHashSet;

use crate::constant_buffer::{ScalarType, VariableType};
use crate::shader::ShaderError;

/// Pipeline stage of an entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Vertex,
    Fragment,
    Compute,
}

/// A named entry point found in a module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPointInfo {
    pub name: String,
    pub stage: StageKind,
}

/// One member of a uniform block.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformMember {
    pub name: String,
    /// Byte offset from the start of the block.
    pub offset: u32,
    pub ty: VariableType,
}

/// A `var<uniform>` global.
///
/// A uniform of non-struct type is reported as a block with a single member
/// carrying the global's own name.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformBlock {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    /// Size in bytes, including trailing padding.
    pub size: u32,
    pub members: Vec<UniformMember>,
}

/// Kind of a handle-space resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Texture {
        sample_type: wgpu::TextureSampleType,
        view_dimension: wgpu::TextureViewDimension,
        multisampled: bool,
    },
    Sampler {
        comparison: bool,
    },
}

/// A texture or sampler global.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceSlot {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
}

/// Everything reflected out of one WGSL module.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderReflection {
    pub entry_points: Vec<EntryPointInfo>,
    pub uniform_blocks: Vec<UniformBlock>,
    pub resources: Vec<ResourceSlot>,
}

impl ShaderReflection {
    /// Stage of the named entry point, if present.
    pub fn entry_point_stage(&self, name: &str) -> Option<StageKind> {
        self.entry_points
            .iter()
            .find(|ep| ep.name == name)
            .map(|ep| ep.stage)
    }

    /// Find a resource slot by name.
    pub fn resource(&self, name: &str) -> Option<&ResourceSlot> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Find the uniform block containing a member with the given name.
    pub fn uniform_member(&self, name: &str) -> Option<(&UniformBlock, &UniformMember)> {
        self.uniform_blocks.iter().find_map(|block| {
            block
                .members
                .iter()
                .find(|m| m.name == name)
                .map(|m| (block, m))
        })
    }

    /// Highest bind group index referenced, if any.
    pub fn max_group(&self) -> Option<u32> {
        self.uniform_blocks
            .iter()
            .map(|b| b.group)
            .chain(self.resources.iter().map(|r| r.group))
            .max()
    }
}

impl UniformBlock {
    /// Bind group layout entry for this block.
    pub fn layout_entry(&self, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding: self.binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: NonZeroU64::new(u64::from(self.size)),
            },
            count: None,
        }
    }
}

impl ResourceSlot {
    /// Bind group layout entry for this resource.
    pub fn layout_entry(&self, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
        let ty = match self.kind {
            ResourceKind::Texture {
                sample_type,
                view_dimension,
                multisampled,
            } => wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled,
            },
            ResourceKind::Sampler { comparison: true } => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
            }
            ResourceKind::Sampler { comparison: false } => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
            }
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.binding,
            visibility,
            ty,
            count: None,
        }
    }
}

/// Parse, validate, and reflect a WGSL module.
///
/// `name` is only used in error messages.
pub fn reflect_wgsl(name: &str, source: &str) -> Result<ShaderReflection, ShaderError> {
    let module =
        naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::CompilationFailed {
            name: name.to_string(),
            message: e.emit_to_string(source),
        })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| ShaderError::CompilationFailed {
        name: name.to_string(),
        message: e.emit_to_string(source),
    })?;

    Ok(reflect_module(&module))
}

fn reflect_module(module: &naga::Module) -> ShaderReflection {
    let mut reflection = ShaderReflection::default();

    for ep in &module.entry_points {
        let stage = match ep.stage {
            naga::ShaderStage::Vertex => StageKind::Vertex,
            naga::ShaderStage::Fragment => StageKind::Fragment,
            naga::ShaderStage::Compute => StageKind::Compute,
            #[allow(unreachable_patterns)]
            _ => continue,
        };
        reflection.entry_points.push(EntryPointInfo {
            name: ep.name.clone(),
            stage,
        });
    }

    let sampled = sampled_images(module);
    for (handle, var) in module.global_variables.iter() {
        let (Some(name), Some(binding)) = (var.name.as_ref(), var.binding.as_ref()) else {
            continue;
        };
        let inner = &module.types[var.ty].inner;

        match var.space {
            AddressSpace::Uniform => {
                let members = match inner {
                    TypeInner::Struct { members, .. } => members
                        .iter()
                        .map(|m| UniformMember {
                            name: m.name.clone().unwrap_or_default(),
                            offset: m.offset,
                            ty: variable_type(module, m.ty),
                        })
                        .collect(),
                    _ => vec![UniformMember {
                        name: name.clone(),
                        offset: 0,
                        ty: variable_type(module, var.ty),
                    }],
                };
                reflection.uniform_blocks.push(UniformBlock {
                    name: name.clone(),
                    group: binding.group,
                    binding: binding.binding,
                    size: inner.size(module.to_ctx()),
                    members,
                });
            }
            AddressSpace::Handle => {
                let Some(kind) = resource_kind(inner, sampled.contains(&handle)) else {
                    log::debug!("Skipping unsupported handle '{}'", name);
                    continue;
                };
                reflection.resources.push(ResourceSlot {
                    name: name.clone(),
                    group: binding.group,
                    binding: binding.binding,
                    kind,
                });
            }
            _ => log::debug!("Skipping global '{}' in {:?} space", name, var.space),
        }
    }

    reflection
}

fn variable_type(module: &naga::Module, ty: naga::Handle<naga::Type>) -> VariableType {
    let inner = &module.types[ty].inner;
    match *inner {
        TypeInner::Scalar(scalar) => match scalar_type(scalar) {
            Some(s) => VariableType::Scalar(s),
            None => VariableType::Other {
                size: inner.size(module.to_ctx()),
            },
        },
        TypeInner::Vector { size, scalar } => match scalar_type(scalar) {
            Some(s) => VariableType::Vector {
                scalar: s,
                len: size as u32,
            },
            None => VariableType::Other {
                size: inner.size(module.to_ctx()),
            },
        },
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } if scalar_type(scalar) == Some(ScalarType::Float) => VariableType::Matrix {
            columns: columns as u32,
            rows: rows as u32,
        },
        _ => VariableType::Other {
            size: inner.size(module.to_ctx()),
        },
    }
}

fn scalar_type(scalar: naga::Scalar) -> Option<ScalarType> {
    match (scalar.kind, scalar.width) {
        (ScalarKind::Sint, 4) => Some(ScalarType::Sint),
        (ScalarKind::Uint, 4) => Some(ScalarType::Uint),
        (ScalarKind::Float, 4) => Some(ScalarType::Float),
        _ => None,
    }
}

/// Globals passed as the image operand of a sample or gather anywhere in the module.
fn sampled_images(module: &naga::Module) -> FxHashSet<naga::Handle<naga::GlobalVariable>> {
    let functions = module
        .functions
        .iter()
        .map(|(_, f)| f)
        .chain(module.entry_points.iter().map(|ep| &ep.function));

    let mut sampled = FxHashSet::default();
    for function in functions {
        for (_, expr) in function.expressions.iter() {
            if let Expression::ImageSample { image, .. } = expr
                && let Expression::GlobalVariable(global) = function.expressions[*image]
            {
                sampled.insert(global);
            }
        }
    }
    sampled
}

/// Float textures that are only loaded, never sampled, bind as non-filterable
/// so depth and other unfilterable formats can back them.
fn resource_kind(inner: &TypeInner, sampled: bool) -> Option<ResourceKind> {
    match *inner {
        TypeInner::Sampler { comparison } => Some(ResourceKind::Sampler { comparison }),
        TypeInner::Image {
            dim,
            arrayed,
            class,
        } => {
            let (sample_type, multisampled) = match class {
                ImageClass::Sampled { kind, multi } => {
                    let sample_type = match kind {
                        ScalarKind::Sint => wgpu::TextureSampleType::Sint,
                        ScalarKind::Uint => wgpu::TextureSampleType::Uint,
                        _ => wgpu::TextureSampleType::Float {
                            filterable: !multi && sampled,
                        },
                    };
                    (sample_type, multi)
                }
                ImageClass::Depth { multi } => (wgpu::TextureSampleType::Depth, multi),
                _ => return None,
            };
            let view_dimension = match (dim, arrayed) {
                (ImageDimension::D1, _) => wgpu::TextureViewDimension::D1,
                (ImageDimension::D2, false) => wgpu::TextureViewDimension::D2,
                (ImageDimension::D2, true) => wgpu::TextureViewDimension::D2Array,
                (ImageDimension::D3, _) => wgpu::TextureViewDimension::D3,
                (ImageDimension::Cube, false) => wgpu::TextureViewDimension::Cube,
                (ImageDimension::Cube, true) => wgpu::TextureViewDimension::CubeArray,
            };
            Some(ResourceKind::Texture {
                sample_type,
                view_dimension,
                multisampled,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHADER: &str = r#"
        struct Globals {
            view_proj: mat4x4<f32>,
            eye: vec3<f32>,
            time: f32,
            frame: i32,
        };

        @group(0) @binding(0) var<uniform> globals: Globals;
        @group(0) @binding(1) var color_tex: texture_2d<f32>;
        @group(0) @binding(2) var color_sampler: sampler;
        @group(1) @binding(0) var shadow_map: texture_depth_2d_array;
        @group(1) @binding(1) var shadow_sampler: sampler_comparison;
        @group(1) @binding(2) var<uniform> exposure: f32;

        @vertex
        fn vs(@location(0) p: vec3<f32>) -> @builtin(position) vec4<f32> {
            return globals.view_proj * vec4<f32>(p, 1.0);
        }

        @fragment
        fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
            let c = textureSample(color_tex, color_sampler, pos.xy);
            let s = textureSampleCompare(shadow_map, shadow_sampler, pos.xy, 0, 0.5);
            return c * s * exposure * globals.time;
        }
    "#;

    #[test]
    fn test_entry_points_and_stages() {
        let r = reflect_wgsl("test", SHADER).unwrap();
        assert_eq!(r.entry_point_stage("vs"), Some(StageKind::Vertex));
        assert_eq!(r.entry_point_stage("fs"), Some(StageKind::Fragment));
        assert_eq!(r.entry_point_stage("main"), None);
    }

    #[test]
    fn test_uniform_struct_member_offsets() {
        let r = reflect_wgsl("test", SHADER).unwrap();
        let (block, eye) = r.uniform_member("eye").unwrap();
        assert_eq!(block.name, "globals");
        assert_eq!((block.group, block.binding), (0, 0));
        assert_eq!(eye.offset, 64);
        assert_eq!(
            eye.ty,
            VariableType::Vector {
                scalar: ScalarType::Float,
                len: 3
            }
        );

        // f32 packs into the tail of the vec3
        let (_, time) = r.uniform_member("time").unwrap();
        assert_eq!(time.offset, 76);
        let (_, frame) = r.uniform_member("frame").unwrap();
        assert_eq!(frame.offset, 80);
        assert_eq!(frame.ty, VariableType::Scalar(ScalarType::Sint));
        assert_eq!(block.size, 96);
    }

    #[test]
    fn test_matrix_member_type() {
        let r = reflect_wgsl("test", SHADER).unwrap();
        let (_, m) = r.uniform_member("view_proj").unwrap();
        assert_eq!(m.offset, 0);
        assert_eq!(
            m.ty,
            VariableType::Matrix {
                columns: 4,
                rows: 4
            }
        );
    }

    #[test]
    fn test_bare_uniform_becomes_single_member_block() {
        let r = reflect_wgsl("test", SHADER).unwrap();
        let (block, member) = r.uniform_member("exposure").unwrap();
        assert_eq!(block.name, "exposure");
        assert_eq!((block.group, block.binding), (1, 2));
        assert_eq!(member.offset, 0);
        assert_eq!(block.size, 4);
    }

    #[test]
    fn test_handle_resources() {
        let r = reflect_wgsl("test", SHADER).unwrap();
        assert_eq!(
            r.resource("color_tex").unwrap().kind,
            ResourceKind::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            }
        );
        assert_eq!(
            r.resource("shadow_map").unwrap().kind,
            ResourceKind::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                view_dimension: wgpu::TextureViewDimension::D2Array,
                multisampled: false,
            }
        );
        assert_eq!(
            r.resource("color_sampler").unwrap().kind,
            ResourceKind::Sampler { comparison: false }
        );
        assert_eq!(
            r.resource("shadow_sampler").unwrap().kind,
            ResourceKind::Sampler { comparison: true }
        );
        assert_eq!(r.max_group(), Some(1));
    }

    #[test]
    fn test_loaded_only_texture_is_not_filterable() {
        let source = r#"
            @group(0) @binding(0) var depth_tex: texture_2d<f32>;
            @group(0) @binding(1) var color_tex: texture_2d<f32>;
            @group(0) @binding(2) var color_sampler: sampler;

            fn shade(uv: vec2<f32>) -> vec4<f32> {
                return textureSampleLevel(color_tex, color_sampler, uv, 0.0);
            }

            @fragment
            fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
                let depth = textureLoad(depth_tex, vec2<i32>(pos.xy), 0).r;
                return shade(pos.xy) * depth;
            }
        "#;
        let r = reflect_wgsl("load_only", source).unwrap();
        let sample_type = |name: &str| match r.resource(name).unwrap().kind {
            ResourceKind::Texture { sample_type, .. } => sample_type,
            other => panic!("{name} is not a texture: {other:?}"),
        };
        assert_eq!(
            sample_type("depth_tex"),
            wgpu::TextureSampleType::Float { filterable: false }
        );
        // Sampled from a helper function, not the entry point itself.
        assert_eq!(
            sample_type("color_tex"),
            wgpu::TextureSampleType::Float { filterable: true }
        );
    }

    #[test]
    fn test_layout_entries_carry_binding_types() {
        let r = reflect_wgsl("test", SHADER).unwrap();
        let block_entry = r.uniform_blocks[0].layout_entry(wgpu::ShaderStages::VERTEX_FRAGMENT);
        assert_eq!(block_entry.binding, 0);
        assert!(matches!(
            block_entry.ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                ..
            }
        ));

        let sampler_entry = r
            .resource("shadow_sampler")
            .unwrap()
            .layout_entry(wgpu::ShaderStages::FRAGMENT);
        assert_eq!(
            sampler_entry.ty,
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
        );
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = reflect_wgsl("broken", "fn main( {").unwrap_err();
        match err {
            ShaderError::CompilationFailed { name, message } => {
                assert_eq!(name, "broken");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validation_error_is_reported() {
        let source = r#"
            @vertex
            fn vs() -> @builtin(position) vec4<f32> {
                return undeclared_variable;
            }
        "#;
        assert!(matches!(
            reflect_wgsl("bad", source),
            Err(ShaderError::CompilationFailed { .. })
        ));
    }
}
