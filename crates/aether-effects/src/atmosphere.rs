//! Atmospheric scattering effect configurator.
//!
//! [`AtmosphereEffect`] owns the "Atmosphere" pass: it compiles the bundled
//! shader once per device, forwards per-frame parameters into named constant
//! buffer and resource slots, and applies the pass before the renderer draws.
//! Only one instance may be live at a time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use aether_render::{
    DeviceHandle, EffectError, EffectHelper, EffectPassDesc, InputLayout, Material, MeshData,
    MeshDataInput, PassTargets, RenderStates, ScalarType, StageKind, VariableType,
};
use glam::{Mat4, Vec3};

/// Bundled shader source, used when no override exists on disk.
pub const ATMOSPHERE_SHADER_SOURCE: &str = include_str!("shaders/Atmosphere.wgsl");

/// File name looked up in the configured shader directory.
pub const ATMOSPHERE_SHADER_FILE: &str = "Atmosphere.wgsl";

/// Name of the pass registered by [`AtmosphereEffect::init_all`].
pub const ATMOSPHERE_PASS: &str = "Atmosphere";

const VERTEX_ENTRY: &str = "AtmosphereVS";
const FRAGMENT_ENTRY: &str = "AtmospherePS";
const DEBUG_NAME: &str = "AtmosphereEffect";

/// Errors raised by [`AtmosphereEffect`].
#[derive(Debug, thiserror::Error)]
pub enum AtmosphereError {
    #[error("an AtmosphereEffect instance already exists")]
    DuplicateInstance,

    #[error("no AtmosphereEffect instance has been installed")]
    UninitializedInstance,

    #[error("render states must be initialised before the atmosphere effect")]
    DependencyNotReady,

    #[error("no GPU device was provided")]
    MissingDevice,

    #[error("AtmosphereEffect has not been initialised")]
    NotInitialized,

    #[error("no effect pass selected; call set_render_default first")]
    NoActivePass,

    #[error("no input layout selected; call set_render_default first")]
    NoActiveLayout,

    #[error(transparent)]
    Effect(#[from] EffectError),
}

/// Construction-time settings for [`AtmosphereEffect`].
#[derive(Clone, Debug)]
pub struct AtmosphereSettings {
    /// Directory checked for an `Atmosphere.wgsl` override.
    pub shader_dir: Option<PathBuf>,
    /// Format of the colour target the pass renders into.
    pub color_format: wgpu::TextureFormat,
    /// Format of the depth attachment bound while drawing, if any.
    pub depth_format: Option<wgpu::TextureFormat>,
    /// Label GPU objects with the effect's debug name.
    pub debug_labels: bool,
}

impl Default for AtmosphereSettings {
    fn default() -> Self {
        Self {
            shader_dir: None,
            color_format: wgpu::TextureFormat::Rgba8UnormSrgb,
            depth_format: None,
            debug_labels: cfg!(debug_assertions),
        }
    }
}

static INSTANCE_LIVE: AtomicBool = AtomicBool::new(false);
static INSTANCE: Mutex<Option<AtmosphereEffect>> = Mutex::new(None);

/// Holds the live-instance flag; clearing it on drop frees the slot.
#[derive(Debug)]
struct InstanceGuard;

impl InstanceGuard {
    fn acquire() -> Result<Self, AtmosphereError> {
        INSTANCE_LIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InstanceGuard)
            .map_err(|_| AtmosphereError::DuplicateInstance)
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        INSTANCE_LIVE.store(false, Ordering::Release);
    }
}

/// Configures and applies the atmosphere pass.
pub struct AtmosphereEffect {
    _guard: InstanceGuard,
    settings: AtmosphereSettings,
    helper: Option<EffectHelper>,
    active_layout: Option<InputLayout>,
    topology: wgpu::PrimitiveTopology,
    current_pass: Option<&'static str>,
    // View and projection are kept for the renderer but never reach the shader.
    view: Mat4,
    proj: Mat4,
    time: f32,
    render_target_size: (i32, i32),
    camera_look_at: Vec3,
    light_dir: Vec3,
    camera_right: Vec3,
}

impl AtmosphereEffect {
    /// Create the effect. Fails if another instance is live.
    pub fn new(settings: AtmosphereSettings) -> Result<Self, AtmosphereError> {
        let guard = InstanceGuard::acquire()?;
        Ok(Self {
            _guard: guard,
            settings,
            helper: None,
            active_layout: None,
            topology: wgpu::PrimitiveTopology::TriangleList,
            current_pass: None,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            time: 0.0,
            render_target_size: (0, 0),
            camera_look_at: Vec3::ZERO,
            light_dir: Vec3::ZERO,
            camera_right: Vec3::ZERO,
        })
    }

    /// Move `effect` into the process-wide slot.
    pub fn install(effect: AtmosphereEffect) {
        let mut slot = INSTANCE.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(effect);
        log::debug!("AtmosphereEffect installed");
    }

    /// Run `f` against the installed instance.
    pub fn with_instance<R>(f: impl FnOnce(&mut AtmosphereEffect) -> R) -> Result<R, AtmosphereError> {
        let mut slot = INSTANCE.lock().unwrap_or_else(PoisonError::into_inner);
        let effect = slot
            .as_mut()
            .ok_or(AtmosphereError::UninitializedInstance)?;
        Ok(f(effect))
    }

    /// Take the installed instance out of the process-wide slot.
    pub fn uninstall() -> Option<AtmosphereEffect> {
        INSTANCE
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Compile the shaders and build the pass for `device`.
    ///
    /// A missing device is reported without touching any state. Calling this
    /// again replaces the previous GPU objects.
    pub fn init_all(
        &mut self,
        device: Option<&DeviceHandle>,
        states: &RenderStates,
    ) -> Result<(), AtmosphereError> {
        let Some(gpu) = device else {
            log::warn!("AtmosphereEffect::init_all called without a device");
            return Err(AtmosphereError::MissingDevice);
        };
        let Some(linear_clamp) = states.ss_linear_clamp() else {
            return Err(AtmosphereError::DependencyNotReady);
        };

        let reinit = self.helper.is_some();
        if reinit {
            log::debug!("Re-initialising AtmosphereEffect; previous GPU objects are replaced");
        }

        let mut helper = EffectHelper::new(gpu.clone());
        match override_shader_dir(self.settings.shader_dir.as_deref()) {
            Some(dir) => {
                log::info!("Loading {} from {:?}", ATMOSPHERE_SHADER_FILE, dir);
                helper = helper.with_shader_dir(dir);
                helper.create_shader_from_file(
                    VERTEX_ENTRY,
                    ATMOSPHERE_SHADER_FILE,
                    VERTEX_ENTRY,
                    StageKind::Vertex,
                )?;
                helper.create_shader_from_file(
                    FRAGMENT_ENTRY,
                    ATMOSPHERE_SHADER_FILE,
                    FRAGMENT_ENTRY,
                    StageKind::Fragment,
                )?;
            }
            None => {
                helper.create_shader_from_source(
                    VERTEX_ENTRY,
                    ATMOSPHERE_SHADER_SOURCE,
                    VERTEX_ENTRY,
                    StageKind::Vertex,
                )?;
                helper.create_shader_from_source(
                    FRAGMENT_ENTRY,
                    ATMOSPHERE_SHADER_SOURCE,
                    FRAGMENT_ENTRY,
                    StageKind::Fragment,
                )?;
            }
        }

        helper.add_effect_pass(
            ATMOSPHERE_PASS,
            &EffectPassDesc {
                vertex_shader: VERTEX_ENTRY,
                pixel_shader: Some(FRAGMENT_ENTRY),
                input_layout: InputLayout::POS_NORMAL_TEX,
                topology: wgpu::PrimitiveTopology::TriangleList,
                targets: PassTargets {
                    color: self.settings.color_format,
                    depth: self.settings.depth_format,
                },
            },
        )?;
        let pass = helper.effect_pass_mut(ATMOSPHERE_PASS)?;
        pass.set_rasterizer_state(RenderStates::RS_NO_CULL);
        pass.set_depth_stencil_state(RenderStates::DSS_NO_DEPTH_TEST, 0);

        helper.set_sampler_state_by_name("g_Sampler", Arc::clone(linear_clamp))?;

        if self.settings.debug_labels {
            helper.set_debug_object_name(DEBUG_NAME);
        }

        self.helper = Some(helper);
        if reinit {
            self.reset_shader_values();
        }
        log::info!("AtmosphereEffect initialised");
        Ok(())
    }

    /// Select the atmosphere pass, the position/normal/texcoord layout and
    /// triangle lists.
    pub fn set_render_default(&mut self) {
        self.current_pass = Some(ATMOSPHERE_PASS);
        self.active_layout = Some(InputLayout::POS_NORMAL_TEX);
        self.topology = wgpu::PrimitiveTopology::TriangleList;
    }

    /// Placeholder: the world matrix is accepted and discarded.
    pub fn set_world_matrix(&mut self, _world: Mat4) {}

    pub fn set_view_matrix(&mut self, view: Mat4) {
        self.view = view;
    }

    pub fn set_proj_matrix(&mut self, proj: Mat4) {
        self.proj = proj;
    }

    /// Placeholder: material textures are not bound yet.
    pub fn set_material(&mut self, _material: &Material) {}

    pub fn set_render_target_size(&mut self, width: i32, height: i32) -> Result<(), AtmosphereError> {
        let helper = self.helper_mut()?;
        // Both slots are checked before either is written.
        for name in ["g_RenderTargetWidth", "g_RenderTargetHeight"] {
            let declared = helper.constant_buffer_variable(name)?.ty();
            if declared != VariableType::Scalar(ScalarType::Sint) {
                return Err(EffectError::TypeMismatch {
                    name: name.to_string(),
                    declared,
                    requested: "i32",
                }
                .into());
            }
        }
        helper
            .constant_buffer_variable_mut("g_RenderTargetWidth")?
            .set_sint(width)?;
        helper
            .constant_buffer_variable_mut("g_RenderTargetHeight")?
            .set_sint(height)?;
        self.render_target_size = (width, height);
        Ok(())
    }

    pub fn set_time(&mut self, time: f32) -> Result<(), AtmosphereError> {
        self.helper_mut()?
            .constant_buffer_variable_mut("g_Time")?
            .set_float(time)?;
        self.time = time;
        Ok(())
    }

    pub fn set_depth_texture(&mut self, view: Arc<wgpu::TextureView>) -> Result<(), AtmosphereError> {
        self.helper_mut()?
            .set_shader_resource_by_name("g_DepthTexture", view)?;
        Ok(())
    }

    pub fn set_lit_texture(&mut self, view: Arc<wgpu::TextureView>) -> Result<(), AtmosphereError> {
        self.helper_mut()?
            .set_shader_resource_by_name("g_LitTexture", view)?;
        Ok(())
    }

    pub fn set_camera_look_at(&mut self, look_at: Vec3) -> Result<(), AtmosphereError> {
        self.set_vec3("g_CameraLookAt", look_at)?;
        self.camera_look_at = look_at;
        Ok(())
    }

    pub fn set_light_dir(&mut self, dir: Vec3) -> Result<(), AtmosphereError> {
        self.set_vec3("g_LightDir", dir)?;
        self.light_dir = dir;
        Ok(())
    }

    pub fn set_camera_right(&mut self, right: Vec3) -> Result<(), AtmosphereError> {
        self.set_vec3("g_CameraRight", right)?;
        self.camera_right = right;
        Ok(())
    }

    fn set_vec3(&mut self, name: &str, value: Vec3) -> Result<(), AtmosphereError> {
        self.helper_mut()?
            .constant_buffer_variable_mut(name)?
            .set_float_vector(&value.to_array())?;
        Ok(())
    }

    /// A fresh helper starts with zeroed constants; mirror that locally.
    fn reset_shader_values(&mut self) {
        self.time = 0.0;
        self.render_target_size = (0, 0);
        self.camera_look_at = Vec3::ZERO;
        self.light_dir = Vec3::ZERO;
        self.camera_right = Vec3::ZERO;
    }

    fn helper_mut(&mut self) -> Result<&mut EffectHelper, AtmosphereError> {
        self.helper.as_mut().ok_or(AtmosphereError::NotInitialized)
    }

    /// Draw bindings for `mesh` under the active layout.
    ///
    /// Slots are positions, normals and the first texcoord channel; the last
    /// is `None` when the mesh has no texture coordinates.
    pub fn get_input_data<'a>(&self, mesh: &'a MeshData) -> Result<MeshDataInput<'a>, AtmosphereError> {
        let layout = self.active_layout.ok_or(AtmosphereError::NoActiveLayout)?;
        Ok(MeshDataInput {
            input_layout: layout,
            topology: self.topology,
            vertex_buffers: vec![
                Some(&mesh.positions),
                Some(&mesh.normals),
                mesh.texcoord_arrays.first(),
            ],
            strides: layout.strides(),
            offsets: vec![0; layout.slot_count()],
            index_buffer: &mesh.indices,
            index_count: mesh.index_count,
            index_format: wgpu::IndexFormat::Uint32,
        })
    }

    /// Bind the selected pass's pipeline, constants and resources.
    pub fn apply(&mut self, render_pass: &mut wgpu::RenderPass<'_>) -> Result<(), AtmosphereError> {
        let pass = self.current_pass.ok_or(AtmosphereError::NoActivePass)?;
        // g_ViewProj is never written.
        self.helper_mut()?.apply_pass(pass, render_pass)?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.helper.is_some()
    }

    pub fn settings(&self) -> &AtmosphereSettings {
        &self.settings
    }

    /// The effect helper, once initialised.
    pub fn helper(&self) -> Option<&EffectHelper> {
        self.helper.as_ref()
    }

    pub fn active_pass(&self) -> Option<&'static str> {
        self.current_pass
    }

    pub fn active_input_layout(&self) -> Option<InputLayout> {
        self.active_layout
    }

    pub fn topology(&self) -> wgpu::PrimitiveTopology {
        self.topology
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn proj_matrix(&self) -> Mat4 {
        self.proj
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn render_target_size(&self) -> (i32, i32) {
        self.render_target_size
    }

    pub fn camera_look_at(&self) -> Vec3 {
        self.camera_look_at
    }

    pub fn light_dir(&self) -> Vec3 {
        self.light_dir
    }

    pub fn camera_right(&self) -> Vec3 {
        self.camera_right
    }
}

/// `dir` if it holds an `Atmosphere.wgsl` override.
fn override_shader_dir(dir: Option<&Path>) -> Option<&Path> {
    dir.filter(|dir| dir.join(ATMOSPHERE_SHADER_FILE).is_file())
}
