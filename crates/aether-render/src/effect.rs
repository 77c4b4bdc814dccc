//! Named-slot effect framework.
//!
//! [`EffectHelper`] compiles WGSL stages, reflects their uniform blocks and
//! handle resources into name-addressed slots, and groups stages into
//! [`EffectPass`]es. Applying a pass uploads dirty constant buffers, builds the
//! pipeline on first use, and rebuilds bind groups whenever a binding changed.

use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::buffer::InputLayout;
use crate::constant_buffer::{
    ConstantBuffer, ConstantBufferVariable, ConstantBufferVariableMut, VariableType,
};
use crate::gpu::DeviceHandle;
use crate::reflect::{ResourceKind, ResourceSlot, StageKind};
use crate::render_states::{DepthStencilDesc, RasterizerDesc};
use crate::shader::{LoadedShader, ShaderError, ShaderLibrary};

/// Errors raised by effect configuration and application.
#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    #[error("no constant-buffer variable or resource named '{name}'")]
    NameNotFound { name: String },

    #[error("'{name}' is declared as {declared}, cannot access it as {requested}")]
    TypeMismatch {
        name: String,
        declared: VariableType,
        requested: &'static str,
    },

    #[error("effect pass '{name}' not found")]
    PassNotFound { name: String },

    #[error("effect pass '{name}' already exists")]
    DuplicatePass { name: String },

    #[error("resource '{name}' is declared but nothing is bound to it")]
    UnboundResource { name: String },

    #[error("resource '{name}' is not a {expected}")]
    WrongResourceKind { name: String, expected: &'static str },

    #[error("shader '{shader}' has no {stage:?} entry point '{entry_point}'")]
    EntryPointNotFound {
        shader: String,
        entry_point: String,
        stage: StageKind,
    },

    #[error("shader '{name}' is not a {expected:?} stage")]
    StageMismatch { name: String, expected: StageKind },

    #[error("reloaded shader '{name}' changed its uniform blocks or resources")]
    InterfaceChanged { name: String },

    #[error("device rejected pass '{pass}': {message}")]
    Backend { pass: String, message: String },

    #[error(transparent)]
    Shader(#[from] ShaderError),
}

/// Formats a pass renders into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassTargets {
    pub color: wgpu::TextureFormat,
    pub depth: Option<wgpu::TextureFormat>,
}

/// Describes a pass: which compiled stages it runs and what it draws into.
#[derive(Clone, Debug)]
pub struct EffectPassDesc<'a> {
    pub vertex_shader: &'a str,
    pub pixel_shader: Option<&'a str>,
    pub input_layout: InputLayout,
    pub topology: wgpu::PrimitiveTopology,
    pub targets: PassTargets,
}

/// A compiled stage: module plus the entry point it runs.
#[derive(Clone, Debug)]
struct CompiledStage {
    name: String,
    shader: LoadedShader,
    entry_point: String,
    kind: StageKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum BindingSource {
    /// Index into the helper's constant buffers.
    Uniform(usize),
    /// Name of a resource slot.
    Resource(String),
}

#[derive(Clone, Debug)]
enum BoundResource {
    TextureView(Arc<wgpu::TextureView>),
    Sampler(Arc<wgpu::Sampler>),
}

struct ResourceBinding {
    slot: ResourceSlot,
    bound: Option<BoundResource>,
}

#[derive(Clone, Copy, Debug)]
struct VariableSlot {
    buffer: usize,
    offset: u32,
    ty: VariableType,
}

/// Named bundle of compiled stages plus fixed-function state.
pub struct EffectPass {
    name: String,
    vertex: CompiledStage,
    fragment: Option<CompiledStage>,
    input_layout: InputLayout,
    topology: wgpu::PrimitiveTopology,
    targets: PassTargets,
    rasterizer: RasterizerDesc,
    depth_stencil: DepthStencilDesc,
    stencil_ref: u32,
    blend: Option<wgpu::BlendState>,
    /// Bindings per bind group, sorted by binding index.
    groups: Vec<Vec<(u32, BindingSource)>>,
    bind_group_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline: Option<wgpu::RenderPipeline>,
    bind_groups: Vec<wgpu::BindGroup>,
    bound_generation: Option<u64>,
}

impl EffectPass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_layout(&self) -> InputLayout {
        self.input_layout
    }

    pub fn topology(&self) -> wgpu::PrimitiveTopology {
        self.topology
    }

    pub fn targets(&self) -> PassTargets {
        self.targets
    }

    pub fn rasterizer_state(&self) -> RasterizerDesc {
        self.rasterizer
    }

    pub fn depth_stencil_state(&self) -> DepthStencilDesc {
        self.depth_stencil
    }

    pub fn stencil_ref(&self) -> u32 {
        self.stencil_ref
    }

    pub fn blend_state(&self) -> Option<wgpu::BlendState> {
        self.blend
    }

    /// Whether the pipeline has been built since the last state change.
    pub fn has_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Number of bind groups the pass binds, including empty gap groups.
    pub fn bind_group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn set_rasterizer_state(&mut self, state: RasterizerDesc) {
        if self.rasterizer != state {
            self.rasterizer = state;
            self.pipeline = None;
        }
    }

    pub fn set_depth_stencil_state(&mut self, state: DepthStencilDesc, stencil_ref: u32) {
        self.stencil_ref = stencil_ref;
        if self.depth_stencil != state {
            self.depth_stencil = state;
            self.pipeline = None;
        }
    }

    pub fn set_blend_state(&mut self, blend: Option<wgpu::BlendState>) {
        if self.blend != blend {
            self.blend = blend;
            self.pipeline = None;
        }
    }

    /// Names of the resource slots this pass reads.
    fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().flatten().filter_map(|(_, source)| match source {
            BindingSource::Resource(name) => Some(name.as_str()),
            BindingSource::Uniform(_) => None,
        })
    }

    fn build_pipeline(&self, device: &wgpu::Device, label: &str) -> wgpu::RenderPipeline {
        let layouts: Vec<&wgpu::BindGroupLayout> = self.bind_group_layouts.iter().collect();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &layouts,
            immediate_size: 0,
        });

        let color_targets = [Some(wgpu::ColorTargetState {
            format: self.targets.color,
            blend: self.blend,
            write_mask: wgpu::ColorWrites::ALL,
        })];

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.vertex.shader.module,
                entry_point: Some(self.vertex.entry_point.as_str()),
                buffers: self.input_layout.buffers(),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: self.rasterizer.primitive_state(self.topology),
            depth_stencil: self.depth_stencil.resolve(self.targets.depth),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: self.fragment.as_ref().map(|stage| wgpu::FragmentState {
                module: &stage.shader.module,
                entry_point: Some(stage.entry_point.as_str()),
                targets: &color_targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview_mask: None,
            cache: None,
        })
    }
}

/// Compiles stages, owns constant buffers and resource slots, and applies passes.
pub struct EffectHelper {
    gpu: DeviceHandle,
    library: ShaderLibrary,
    stages: FxHashMap<String, CompiledStage>,
    constant_buffers: Vec<ConstantBuffer>,
    variables: FxHashMap<String, VariableSlot>,
    resources: FxHashMap<String, ResourceBinding>,
    passes: FxHashMap<String, EffectPass>,
    /// Bumped whenever a bound resource or constant buffer object changes.
    generation: u64,
    debug_name: Option<String>,
}

impl EffectHelper {
    pub fn new(gpu: DeviceHandle) -> Self {
        Self {
            gpu,
            library: ShaderLibrary::new(),
            stages: FxHashMap::default(),
            constant_buffers: Vec::new(),
            variables: FxHashMap::default(),
            resources: FxHashMap::default(),
            passes: FxHashMap::default(),
            generation: 0,
            debug_name: None,
        }
    }

    /// Resolve file-based shaders against `dir`.
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library = ShaderLibrary::new().with_shader_dir(dir);
        self
    }

    pub fn device_handle(&self) -> &DeviceHandle {
        &self.gpu
    }

    /// Compile a stage from WGSL source and register its slots.
    pub fn create_shader_from_source(
        &mut self,
        name: &str,
        source: &str,
        entry_point: &str,
        stage: StageKind,
    ) -> Result<(), EffectError> {
        let shader = self.library.load_from_source(self.gpu.device(), name, source)?;
        self.register_stage(name, shader, entry_point, stage)
    }

    /// Compile a stage from a file in the shader directory and register its slots.
    pub fn create_shader_from_file(
        &mut self,
        name: &str,
        filename: &str,
        entry_point: &str,
        stage: StageKind,
    ) -> Result<(), EffectError> {
        let shader = self.library.load_from_file(self.gpu.device(), name, filename)?;
        self.register_stage(name, shader, entry_point, stage)
    }

    /// Re-read a stage from the file it was loaded from and swap it into every
    /// pass that runs it. Those passes rebuild their pipeline on next apply.
    ///
    /// The reloaded module must keep the entry point and declare the same
    /// uniform blocks and resources; otherwise the old module stays in use.
    pub fn reload_shader(&mut self, name: &str) -> Result<(), EffectError> {
        let current = self.stages.get(name).ok_or_else(|| EffectError::NameNotFound {
            name: name.to_string(),
        })?;
        let entry_point = current.entry_point.clone();
        let stage = current.kind;
        let old = Arc::clone(&current.shader.reflection);

        let shader = self.library.reload(self.gpu.device(), name)?;
        if shader.reflection.entry_point_stage(&entry_point) != Some(stage) {
            return Err(EffectError::EntryPointNotFound {
                shader: name.to_string(),
                entry_point,
                stage,
            });
        }
        if shader.reflection.uniform_blocks != old.uniform_blocks
            || shader.reflection.resources != old.resources
        {
            return Err(EffectError::InterfaceChanged {
                name: name.to_string(),
            });
        }

        for pass in self.passes.values_mut() {
            let mut swapped = false;
            for compiled in std::iter::once(&mut pass.vertex).chain(pass.fragment.as_mut()) {
                if compiled.name == name {
                    compiled.shader = shader.clone();
                    swapped = true;
                }
            }
            if swapped {
                pass.pipeline = None;
            }
        }
        if let Some(compiled) = self.stages.get_mut(name) {
            compiled.shader = shader;
        }
        log::info!("Reloaded stage '{}'", name);
        Ok(())
    }

    /// Number of modules compiled through this helper.
    pub fn shader_count(&self) -> usize {
        self.library.len()
    }

    fn register_stage(
        &mut self,
        name: &str,
        shader: LoadedShader,
        entry_point: &str,
        stage: StageKind,
    ) -> Result<(), EffectError> {
        if shader.reflection.entry_point_stage(entry_point) != Some(stage) {
            return Err(EffectError::EntryPointNotFound {
                shader: name.to_string(),
                entry_point: entry_point.to_string(),
                stage,
            });
        }

        for block in &shader.reflection.uniform_blocks {
            let slot = (block.group, block.binding);
            let buffer = match self.constant_buffers.iter().position(|cb| cb.slot() == slot) {
                Some(index) => {
                    if self.constant_buffers[index].bytes().len() != block.size as usize {
                        log::warn!(
                            "Uniform block '{}' at {:?} differs in size between stages; keeping the first",
                            block.name,
                            slot
                        );
                    }
                    index
                }
                None => {
                    self.constant_buffers.push(ConstantBuffer::new(block));
                    self.constant_buffers.len() - 1
                }
            };
            for member in &block.members {
                self.variables
                    .entry(member.name.clone())
                    .or_insert(VariableSlot {
                        buffer,
                        offset: member.offset,
                        ty: member.ty,
                    });
            }
        }

        for slot in &shader.reflection.resources {
            self.resources
                .entry(slot.name.clone())
                .or_insert_with(|| ResourceBinding {
                    slot: slot.clone(),
                    bound: None,
                });
        }

        log::debug!("Registered {:?} stage '{}' ({})", stage, name, entry_point);
        self.stages.insert(
            name.to_string(),
            CompiledStage {
                name: name.to_string(),
                shader,
                entry_point: entry_point.to_string(),
                kind: stage,
            },
        );
        Ok(())
    }

    /// Create a pass from previously compiled stages.
    pub fn add_effect_pass(&mut self, name: &str, desc: &EffectPassDesc) -> Result<(), EffectError> {
        if self.passes.contains_key(name) {
            return Err(EffectError::DuplicatePass {
                name: name.to_string(),
            });
        }

        let vertex = self.stage(desc.vertex_shader, StageKind::Vertex)?;
        let fragment = desc
            .pixel_shader
            .map(|ps| self.stage(ps, StageKind::Fragment))
            .transpose()?;

        let groups = self.collect_bindings(&vertex, fragment.as_ref());
        let device = self.gpu.device();
        let bind_group_layouts = groups
            .iter()
            .enumerate()
            .map(|(index, bindings)| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
                    .iter()
                    .map(|(binding, source)| self.layout_entry(*binding, source, &vertex, fragment.as_ref()))
                    .collect();
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{name}-group{index}-layout")),
                    entries: &entries,
                })
            })
            .collect();

        let pass = EffectPass {
            name: name.to_string(),
            vertex,
            fragment,
            input_layout: desc.input_layout,
            topology: desc.topology,
            targets: desc.targets,
            rasterizer: RasterizerDesc::DEFAULT,
            depth_stencil: DepthStencilDesc::DEFAULT,
            stencil_ref: 0,
            blend: None,
            groups,
            bind_group_layouts,
            pipeline: None,
            bind_groups: Vec::new(),
            bound_generation: None,
        };
        log::info!(
            "Created effect pass '{}' with {} bind group(s)",
            name,
            pass.groups.len()
        );
        self.passes.insert(name.to_string(), pass);
        Ok(())
    }

    fn stage(&self, name: &str, expected: StageKind) -> Result<CompiledStage, EffectError> {
        let stage = self
            .stages
            .get(name)
            .ok_or_else(|| EffectError::NameNotFound {
                name: name.to_string(),
            })?;
        if stage.shader.reflection.entry_point_stage(&stage.entry_point) != Some(expected) {
            return Err(EffectError::StageMismatch {
                name: name.to_string(),
                expected,
            });
        }
        Ok(stage.clone())
    }

    /// Union of the stages' bindings, one sorted list per group with gaps left empty.
    fn collect_bindings(
        &self,
        vertex: &CompiledStage,
        fragment: Option<&CompiledStage>,
    ) -> Vec<Vec<(u32, BindingSource)>> {
        let mut groups: Vec<Vec<(u32, BindingSource)>> = Vec::new();
        let mut add = |group: u32, binding: u32, source: BindingSource| {
            let group = group as usize;
            if groups.len() <= group {
                groups.resize_with(group + 1, Vec::new);
            }
            if !groups[group].iter().any(|(b, _)| *b == binding) {
                groups[group].push((binding, source));
            }
        };

        for stage in std::iter::once(vertex).chain(fragment) {
            let reflection = &stage.shader.reflection;
            for block in &reflection.uniform_blocks {
                let slot = (block.group, block.binding);
                if let Some(index) = self.constant_buffers.iter().position(|cb| cb.slot() == slot) {
                    add(block.group, block.binding, BindingSource::Uniform(index));
                }
            }
            for resource in &reflection.resources {
                add(
                    resource.group,
                    resource.binding,
                    BindingSource::Resource(resource.name.clone()),
                );
            }
        }

        for bindings in &mut groups {
            bindings.sort_by_key(|(binding, _)| *binding);
        }
        groups
    }

    fn layout_entry(
        &self,
        binding: u32,
        source: &BindingSource,
        vertex: &CompiledStage,
        fragment: Option<&CompiledStage>,
    ) -> wgpu::BindGroupLayoutEntry {
        let visibility = wgpu::ShaderStages::VERTEX_FRAGMENT;
        match source {
            BindingSource::Uniform(index) => {
                let slot = self.constant_buffers[*index].slot();
                std::iter::once(vertex)
                    .chain(fragment)
                    .flat_map(|stage| stage.shader.reflection.uniform_blocks.iter())
                    .find(|block| (block.group, block.binding) == slot)
                    .map(|block| block.layout_entry(visibility))
                    .unwrap_or(wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    })
            }
            BindingSource::Resource(name) => {
                let mut entry = self.resources[name].slot.layout_entry(visibility);
                entry.binding = binding;
                entry
            }
        }
    }

    pub fn has_effect_pass(&self, name: &str) -> bool {
        self.passes.contains_key(name)
    }

    pub fn effect_pass(&self, name: &str) -> Result<&EffectPass, EffectError> {
        self.passes.get(name).ok_or_else(|| EffectError::PassNotFound {
            name: name.to_string(),
        })
    }

    pub fn effect_pass_mut(&mut self, name: &str) -> Result<&mut EffectPass, EffectError> {
        self.passes
            .get_mut(name)
            .ok_or_else(|| EffectError::PassNotFound {
                name: name.to_string(),
            })
    }

    /// Read access to a constant-buffer variable.
    pub fn constant_buffer_variable(
        &self,
        name: &str,
    ) -> Result<ConstantBufferVariable<'_>, EffectError> {
        let (key, slot) = self
            .variables
            .get_key_value(name)
            .ok_or_else(|| EffectError::NameNotFound {
                name: name.to_string(),
            })?;
        Ok(self.constant_buffers[slot.buffer].variable(key, slot.offset, slot.ty))
    }

    /// Write access to a constant-buffer variable.
    pub fn constant_buffer_variable_mut(
        &mut self,
        name: &str,
    ) -> Result<ConstantBufferVariableMut<'_>, EffectError> {
        let Self {
            variables,
            constant_buffers,
            ..
        } = self;
        let (key, slot) = variables
            .get_key_value(name)
            .ok_or_else(|| EffectError::NameNotFound {
                name: name.to_string(),
            })?;
        Ok(constant_buffers[slot.buffer].variable_mut(key, slot.offset, slot.ty))
    }

    /// Bind a texture view to a texture slot.
    pub fn set_shader_resource_by_name(
        &mut self,
        name: &str,
        view: Arc<wgpu::TextureView>,
    ) -> Result<(), EffectError> {
        let binding = self.resource_mut(name)?;
        if !matches!(binding.slot.kind, ResourceKind::Texture { .. }) {
            return Err(EffectError::WrongResourceKind {
                name: name.to_string(),
                expected: "texture",
            });
        }
        binding.bound = Some(BoundResource::TextureView(view));
        self.generation += 1;
        Ok(())
    }

    /// Bind a sampler to a sampler slot.
    pub fn set_sampler_state_by_name(
        &mut self,
        name: &str,
        sampler: Arc<wgpu::Sampler>,
    ) -> Result<(), EffectError> {
        let binding = self.resource_mut(name)?;
        if !matches!(binding.slot.kind, ResourceKind::Sampler { .. }) {
            return Err(EffectError::WrongResourceKind {
                name: name.to_string(),
                expected: "sampler",
            });
        }
        binding.bound = Some(BoundResource::Sampler(sampler));
        self.generation += 1;
        Ok(())
    }

    /// Whether something is bound to the named resource slot.
    pub fn is_resource_bound(&self, name: &str) -> Result<bool, EffectError> {
        self.resources
            .get(name)
            .map(|binding| binding.bound.is_some())
            .ok_or_else(|| EffectError::NameNotFound {
                name: name.to_string(),
            })
    }

    fn resource_mut(&mut self, name: &str) -> Result<&mut ResourceBinding, EffectError> {
        self.resources
            .get_mut(name)
            .ok_or_else(|| EffectError::NameNotFound {
                name: name.to_string(),
            })
    }

    /// Prefix for labels of GPU objects created from now on.
    pub fn set_debug_object_name(&mut self, prefix: &str) {
        self.debug_name = Some(prefix.to_string());
    }

    pub fn debug_object_name(&self) -> Option<&str> {
        self.debug_name.as_deref()
    }

    /// Upload constants and bind the pass's pipeline and resources.
    ///
    /// Nothing is recorded into `render_pass` if any resource the pass reads
    /// is unbound.
    pub fn apply_pass(
        &mut self,
        name: &str,
        render_pass: &mut wgpu::RenderPass<'_>,
    ) -> Result<(), EffectError> {
        let Self {
            gpu,
            constant_buffers,
            resources,
            passes,
            generation,
            debug_name,
            ..
        } = self;
        let pass = passes.get_mut(name).ok_or_else(|| EffectError::PassNotFound {
            name: name.to_string(),
        })?;

        if let Some(unbound) = pass
            .resource_names()
            .find(|n| resources.get(*n).is_none_or(|r| r.bound.is_none()))
        {
            return Err(EffectError::UnboundResource {
                name: unbound.to_string(),
            });
        }

        let prefix = debug_name.as_deref();
        for cb in constant_buffers.iter_mut() {
            let label = object_label(prefix, cb.name());
            if cb.upload(gpu.device(), gpu.queue(), &label) {
                *generation += 1;
            }
        }

        let needs_pipeline = pass.pipeline.is_none();
        let needs_bind_groups = pass.bound_generation != Some(*generation);
        if needs_pipeline || needs_bind_groups {
            let device = gpu.device();
            let validation_scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
            let internal_scope = device.push_error_scope(wgpu::ErrorFilter::Internal);

            let pipeline = needs_pipeline.then(|| {
                let label = object_label(prefix, &format!("{name}.Pipeline"));
                pass.build_pipeline(device, &label)
            });
            let bind_groups: Option<Vec<wgpu::BindGroup>> = needs_bind_groups.then(|| {
                pass.groups
                    .iter()
                    .zip(&pass.bind_group_layouts)
                    .enumerate()
                    .map(|(index, (bindings, layout))| {
                        let entries: Vec<wgpu::BindGroupEntry> = bindings
                            .iter()
                            .filter_map(|(binding, source)| {
                                let resource = match source {
                                    BindingSource::Uniform(i) => {
                                        constant_buffers[*i].gpu_buffer()?.as_entire_binding()
                                    }
                                    BindingSource::Resource(n) => {
                                        match resources.get(n)?.bound.as_ref()? {
                                            BoundResource::TextureView(view) => {
                                                wgpu::BindingResource::TextureView(view)
                                            }
                                            BoundResource::Sampler(sampler) => {
                                                wgpu::BindingResource::Sampler(sampler)
                                            }
                                        }
                                    }
                                };
                                Some(wgpu::BindGroupEntry {
                                    binding: *binding,
                                    resource,
                                })
                            })
                            .collect();
                        device.create_bind_group(&wgpu::BindGroupDescriptor {
                            label: Some(&object_label(prefix, &format!("{name}.Group{index}"))),
                            layout,
                            entries: &entries,
                        })
                    })
                    .collect()
            });

            // Scopes pop innermost first.
            let internal_error = pollster::block_on(internal_scope.pop());
            let validation_error = pollster::block_on(validation_scope.pop());
            if let Some(error) = internal_error.or(validation_error) {
                log::error!("Pass '{}' rejected by the device: {}", name, error);
                return Err(EffectError::Backend {
                    pass: name.to_string(),
                    message: error.to_string(),
                });
            }

            if let Some(pipeline) = pipeline {
                pass.pipeline = Some(pipeline);
                log::debug!("Built pipeline for pass '{}'", name);
            }
            if let Some(bind_groups) = bind_groups {
                pass.bind_groups = bind_groups;
                pass.bound_generation = Some(*generation);
                log::debug!("Rebuilt bind groups for pass '{}'", name);
            }
        }

        if let Some(pipeline) = &pass.pipeline {
            render_pass.set_pipeline(pipeline);
        }
        for (index, bind_group) in pass.bind_groups.iter().enumerate() {
            render_pass.set_bind_group(index as u32, bind_group, &[]);
        }
        render_pass.set_stencil_reference(pass.stencil_ref);
        Ok(())
    }
}

fn object_label(prefix: Option<&str>, suffix: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}.{suffix}"),
        None => suffix.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_test_device;
    use crate::mesh::{MeshData, MeshGeometry};

    const SHADER: &str = r#"
        struct Params {
            tint: vec3<f32>,
            scale: f32,
            mode: i32,
        };

        @group(0) @binding(0) var<uniform> params: Params;
        @group(0) @binding(1) var color_tex: texture_2d<f32>;
        @group(0) @binding(2) var color_sampler: sampler;

        struct VsIn {
            @location(0) position: vec3<f32>,
            @location(2) uv: vec2<f32>,
        };

        struct VsOut {
            @builtin(position) clip: vec4<f32>,
            @location(0) uv: vec2<f32>,
        };

        @vertex
        fn vs(in: VsIn) -> VsOut {
            var out: VsOut;
            out.clip = vec4<f32>(in.position.xy * params.scale, 0.0, 1.0);
            out.uv = in.uv;
            return out;
        }

        @fragment
        fn fs(in: VsOut) -> @location(0) vec4<f32> {
            let c = textureSample(color_tex, color_sampler, in.uv);
            return vec4<f32>(c.rgb * params.tint, f32(params.mode));
        }
    "#;

    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    fn helper(gpu: &DeviceHandle) -> EffectHelper {
        let mut helper = EffectHelper::new(gpu.clone());
        helper
            .create_shader_from_source("TestVS", SHADER, "vs", StageKind::Vertex)
            .unwrap();
        helper
            .create_shader_from_source("TestPS", SHADER, "fs", StageKind::Fragment)
            .unwrap();
        helper
            .add_effect_pass(
                "Test",
                &EffectPassDesc {
                    vertex_shader: "TestVS",
                    pixel_shader: Some("TestPS"),
                    input_layout: InputLayout::POS_NORMAL_TEX,
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    targets: PassTargets {
                        color: FORMAT,
                        depth: None,
                    },
                },
            )
            .unwrap();
        helper
    }

    fn texture_view(gpu: &DeviceHandle, usage: wgpu::TextureUsages) -> Arc<wgpu::TextureView> {
        let texture = gpu.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("test-texture"),
            size: wgpu::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage,
            view_formats: &[],
        });
        Arc::new(texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    /// Run `f` inside a render pass targeting a small offscreen texture.
    fn with_render_pass<R>(
        gpu: &DeviceHandle,
        f: impl FnOnce(&mut wgpu::RenderPass<'_>) -> R,
    ) -> R {
        let target = texture_view(gpu, wgpu::TextureUsages::RENDER_ATTACHMENT);
        let mut encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        let result = {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("test-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            f(&mut render_pass)
        };
        gpu.queue().submit(Some(encoder.finish()));
        result
    }

    fn bind_all(gpu: &DeviceHandle, helper: &mut EffectHelper) {
        let view = texture_view(gpu, wgpu::TextureUsages::TEXTURE_BINDING);
        let sampler = Arc::new(gpu.device().create_sampler(&wgpu::SamplerDescriptor::default()));
        helper.set_shader_resource_by_name("color_tex", view).unwrap();
        helper.set_sampler_state_by_name("color_sampler", sampler).unwrap();
    }

    #[test]
    fn test_error_messages_name_the_slot() {
        let err = EffectError::NameNotFound {
            name: "g_Missing".into(),
        };
        assert!(err.to_string().contains("g_Missing"));

        let err = EffectError::UnboundResource {
            name: "g_DepthTexture".into(),
        };
        assert!(err.to_string().contains("g_DepthTexture"));
    }

    #[test]
    fn test_object_label_prefix() {
        assert_eq!(object_label(Some("Sky"), "Pass"), "Sky.Pass");
        assert_eq!(object_label(None, "Pass"), "Pass");
    }

    #[test]
    fn test_variables_are_reflected_by_name() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = helper(&gpu);
        helper
            .constant_buffer_variable_mut("scale")
            .unwrap()
            .set_float(0.5)
            .unwrap();
        helper
            .constant_buffer_variable_mut("tint")
            .unwrap()
            .set_float_vector(&[1.0, 0.5, 0.25])
            .unwrap();

        assert_eq!(
            helper.constant_buffer_variable("scale").unwrap().get_float().unwrap(),
            0.5
        );
        assert_eq!(
            helper
                .constant_buffer_variable("tint")
                .unwrap()
                .get_float_vector()
                .unwrap(),
            vec![1.0, 0.5, 0.25]
        );
    }

    #[test]
    fn test_unknown_variable_is_name_not_found() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = helper(&gpu);
        assert!(matches!(
            helper.constant_buffer_variable_mut("g_Nope"),
            Err(EffectError::NameNotFound { .. })
        ));
    }

    #[test]
    fn test_wrong_setter_is_type_mismatch() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = helper(&gpu);
        let result = helper
            .constant_buffer_variable_mut("mode")
            .unwrap()
            .set_float(1.0);
        assert!(matches!(result, Err(EffectError::TypeMismatch { .. })));
    }

    #[test]
    fn test_missing_entry_point_is_rejected() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = EffectHelper::new(gpu.clone());
        let result = helper.create_shader_from_source("Bad", SHADER, "fs", StageKind::Vertex);
        assert!(matches!(result, Err(EffectError::EntryPointNotFound { .. })));
    }

    #[test]
    fn test_invalid_source_is_shader_error() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = EffectHelper::new(gpu.clone());
        let result = helper.create_shader_from_source("Bad", "fn (", "vs", StageKind::Vertex);
        assert!(matches!(
            result,
            Err(EffectError::Shader(ShaderError::CompilationFailed { .. }))
        ));
    }

    #[test]
    fn test_duplicate_and_missing_passes() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = helper(&gpu);
        let desc = EffectPassDesc {
            vertex_shader: "TestVS",
            pixel_shader: None,
            input_layout: InputLayout::POS_NORMAL_TEX,
            topology: wgpu::PrimitiveTopology::TriangleList,
            targets: PassTargets {
                color: FORMAT,
                depth: None,
            },
        };
        assert!(matches!(
            helper.add_effect_pass("Test", &desc),
            Err(EffectError::DuplicatePass { .. })
        ));
        assert!(matches!(
            helper.effect_pass("Other"),
            Err(EffectError::PassNotFound { .. })
        ));
        assert!(helper.has_effect_pass("Test"));
    }

    #[test]
    fn test_pixel_shader_in_vertex_slot_is_rejected() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = helper(&gpu);
        let desc = EffectPassDesc {
            vertex_shader: "TestPS",
            pixel_shader: None,
            input_layout: InputLayout::POS_NORMAL_TEX,
            topology: wgpu::PrimitiveTopology::TriangleList,
            targets: PassTargets {
                color: FORMAT,
                depth: None,
            },
        };
        assert!(matches!(
            helper.add_effect_pass("Swapped", &desc),
            Err(EffectError::StageMismatch { .. })
        ));
    }

    #[test]
    fn test_resource_kind_is_checked() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = helper(&gpu);
        let view = texture_view(&gpu, wgpu::TextureUsages::TEXTURE_BINDING);
        assert!(matches!(
            helper.set_shader_resource_by_name("color_sampler", view.clone()),
            Err(EffectError::WrongResourceKind { .. })
        ));
        assert!(matches!(
            helper.set_shader_resource_by_name("g_Nope", view),
            Err(EffectError::NameNotFound { .. })
        ));
        assert!(!helper.is_resource_bound("color_tex").unwrap());
    }

    #[test]
    fn test_apply_with_unbound_resource_fails() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = helper(&gpu);
        let result = with_render_pass(&gpu, |rp| helper.apply_pass("Test", rp));
        assert!(matches!(result, Err(EffectError::UnboundResource { .. })));
        assert!(!helper.effect_pass("Test").unwrap().has_pipeline());
    }

    #[test]
    fn test_apply_builds_pipeline_and_uploads_constants() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = helper(&gpu);
        helper.set_debug_object_name("TestEffect");
        bind_all(&gpu, &mut helper);
        helper
            .constant_buffer_variable_mut("scale")
            .unwrap()
            .set_float(1.0)
            .unwrap();

        let mesh = MeshData::upload(gpu.device(), "quad", &MeshGeometry::fullscreen_quad()).unwrap();
        with_render_pass(&gpu, |rp| {
            helper.apply_pass("Test", rp).unwrap();
            rp.set_vertex_buffer(0, mesh.positions.slice(..));
            rp.set_vertex_buffer(1, mesh.normals.slice(..));
            rp.set_vertex_buffer(2, mesh.texcoord_arrays[0].slice(..));
            rp.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
            rp.draw_indexed(0..mesh.index_count, 0, 0..1);
        });

        let pass = helper.effect_pass("Test").unwrap();
        assert!(pass.has_pipeline());
        assert_eq!(pass.bind_group_count(), 1);
        assert!(helper.constant_buffers.iter().all(|cb| !cb.is_dirty()));
    }

    #[test]
    fn test_device_rejection_is_returned_not_raised() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = helper(&gpu);
        bind_all(&gpu, &mut helper);
        // A view without TEXTURE_BINDING usage cannot go into a bind group.
        let unusable = texture_view(&gpu, wgpu::TextureUsages::RENDER_ATTACHMENT);
        helper.set_shader_resource_by_name("color_tex", unusable).unwrap();

        let result = with_render_pass(&gpu, |rp| helper.apply_pass("Test", rp));
        match result {
            Err(EffectError::Backend { pass, message }) => {
                assert_eq!(pass, "Test");
                assert!(!message.is_empty());
            }
            other => panic!("expected a device rejection, got {other:?}"),
        }
        let pass = helper.effect_pass("Test").unwrap();
        assert!(!pass.has_pipeline());
        assert!(pass.bound_generation.is_none());

        bind_all(&gpu, &mut helper);
        with_render_pass(&gpu, |rp| helper.apply_pass("Test", rp)).unwrap();
        assert!(helper.effect_pass("Test").unwrap().has_pipeline());
    }

    #[test]
    fn test_reload_swaps_module_and_invalidates_pipeline() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wgsl");
        std::fs::write(&path, SHADER).unwrap();

        let mut helper = EffectHelper::new(gpu.clone()).with_shader_dir(dir.path());
        helper
            .create_shader_from_file("TestVS", "test.wgsl", "vs", StageKind::Vertex)
            .unwrap();
        helper
            .create_shader_from_file("TestPS", "test.wgsl", "fs", StageKind::Fragment)
            .unwrap();
        helper
            .add_effect_pass(
                "Test",
                &EffectPassDesc {
                    vertex_shader: "TestVS",
                    pixel_shader: Some("TestPS"),
                    input_layout: InputLayout::POS_NORMAL_TEX,
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    targets: PassTargets {
                        color: FORMAT,
                        depth: None,
                    },
                },
            )
            .unwrap();
        assert_eq!(helper.shader_count(), 2);
        bind_all(&gpu, &mut helper);
        with_render_pass(&gpu, |rp| helper.apply_pass("Test", rp)).unwrap();

        std::fs::write(&path, SHADER.replace("f32(params.mode)", "1.0")).unwrap();
        helper.reload_shader("TestPS").unwrap();
        assert!(!helper.effect_pass("Test").unwrap().has_pipeline());
        with_render_pass(&gpu, |rp| helper.apply_pass("Test", rp)).unwrap();
        assert!(helper.effect_pass("Test").unwrap().has_pipeline());

        // A new binding would invalidate the pass layout, so the old module stays.
        let widened = format!("{SHADER}\n@group(0) @binding(3) var extra_tex: texture_2d<f32>;\n");
        std::fs::write(&path, widened).unwrap();
        assert!(matches!(
            helper.reload_shader("TestPS"),
            Err(EffectError::InterfaceChanged { .. })
        ));
        assert!(helper.effect_pass("Test").unwrap().has_pipeline());

        assert!(matches!(
            helper.reload_shader("Missing"),
            Err(EffectError::NameNotFound { .. })
        ));
    }

    #[test]
    fn test_state_change_invalidates_pipeline() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = helper(&gpu);
        bind_all(&gpu, &mut helper);
        with_render_pass(&gpu, |rp| helper.apply_pass("Test", rp)).unwrap();
        assert!(helper.effect_pass("Test").unwrap().has_pipeline());

        let pass = helper.effect_pass_mut("Test").unwrap();
        pass.set_rasterizer_state(crate::render_states::RenderStates::RS_NO_CULL);
        assert!(!pass.has_pipeline());

        // Same state again keeps the rebuilt pipeline.
        with_render_pass(&gpu, |rp| helper.apply_pass("Test", rp)).unwrap();
        let pass = helper.effect_pass_mut("Test").unwrap();
        pass.set_rasterizer_state(crate::render_states::RenderStates::RS_NO_CULL);
        assert!(pass.has_pipeline());
    }

    #[test]
    fn test_rebinding_bumps_generation() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut helper = helper(&gpu);
        bind_all(&gpu, &mut helper);
        with_render_pass(&gpu, |rp| helper.apply_pass("Test", rp)).unwrap();
        let before = helper.effect_pass("Test").unwrap().bound_generation;

        bind_all(&gpu, &mut helper);
        with_render_pass(&gpu, |rp| helper.apply_pass("Test", rp)).unwrap();
        let after = helper.effect_pass("Test").unwrap().bound_generation;
        assert_ne!(before, after);
    }
}
