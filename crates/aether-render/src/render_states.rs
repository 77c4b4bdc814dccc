//! Shared rasterizer, depth-stencil and sampler states.
//!
//! wgpu bakes rasterizer and depth state into the pipeline, so those are plain
//! descriptors combined with a topology or depth format when a pass builds its
//! pipeline. Samplers are real device objects; they exist only after
//! [`RenderStates::init_all`] and are shared between effects through `Arc`.

use std::sync::Arc;

/// Rasterizer state: culling, winding and fill mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterizerDesc {
    pub cull_mode: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    pub polygon_mode: wgpu::PolygonMode,
}

impl RasterizerDesc {
    /// Back-face culling with counter-clockwise front faces.
    pub const DEFAULT: RasterizerDesc = RasterizerDesc {
        cull_mode: Some(wgpu::Face::Back),
        front_face: wgpu::FrontFace::Ccw,
        polygon_mode: wgpu::PolygonMode::Fill,
    };

    /// Primitive state for a pipeline drawing `topology`.
    pub fn primitive_state(&self, topology: wgpu::PrimitiveTopology) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology,
            strip_index_format: None,
            front_face: self.front_face,
            cull_mode: self.cull_mode,
            unclipped_depth: false,
            polygon_mode: self.polygon_mode,
            conservative: false,
        }
    }
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Depth test and write configuration. Stencil is left disabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthStencilDesc {
    pub depth_write_enabled: bool,
    pub depth_compare: wgpu::CompareFunction,
}

impl DepthStencilDesc {
    /// Standard depth testing and writing.
    pub const DEFAULT: DepthStencilDesc = DepthStencilDesc {
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::Less,
    };

    /// Pipeline depth state for a pass rendering into `format`.
    ///
    /// Passes without a depth attachment get `None` whatever the descriptor says.
    pub fn resolve(&self, format: Option<wgpu::TextureFormat>) -> Option<wgpu::DepthStencilState> {
        format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.depth_write_enabled,
            depth_compare: self.depth_compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        })
    }
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self::DEFAULT
    }
}

struct SamplerStates {
    linear_wrap: Arc<wgpu::Sampler>,
    linear_clamp: Arc<wgpu::Sampler>,
    point_clamp: Arc<wgpu::Sampler>,
    anisotropic_wrap: Arc<wgpu::Sampler>,
    shadow_pcf: Arc<wgpu::Sampler>,
}

/// Process-wide render state objects, created once per device.
#[derive(Default)]
pub struct RenderStates {
    samplers: Option<SamplerStates>,
}

impl RenderStates {
    /// No culling.
    pub const RS_NO_CULL: RasterizerDesc = RasterizerDesc {
        cull_mode: None,
        front_face: wgpu::FrontFace::Ccw,
        polygon_mode: wgpu::PolygonMode::Fill,
    };

    /// Line fill, no culling. Requires `Features::POLYGON_MODE_LINE`.
    pub const RS_WIREFRAME: RasterizerDesc = RasterizerDesc {
        cull_mode: None,
        front_face: wgpu::FrontFace::Ccw,
        polygon_mode: wgpu::PolygonMode::Line,
    };

    /// Culls clockwise-wound triangles.
    pub const RS_CULL_CLOCKWISE: RasterizerDesc = RasterizerDesc {
        cull_mode: Some(wgpu::Face::Back),
        front_face: wgpu::FrontFace::Ccw,
        polygon_mode: wgpu::PolygonMode::Fill,
    };

    /// Depth test disabled, depth writes disabled.
    pub const DSS_NO_DEPTH_TEST: DepthStencilDesc = DepthStencilDesc {
        depth_write_enabled: false,
        depth_compare: wgpu::CompareFunction::Always,
    };

    /// Depth test enabled, writes disabled.
    pub const DSS_NO_DEPTH_WRITE: DepthStencilDesc = DepthStencilDesc {
        depth_write_enabled: false,
        depth_compare: wgpu::CompareFunction::Less,
    };

    /// Passes fragments at equal depth, for skyboxes drawn at the far plane.
    pub const DSS_LESS_EQUAL: DepthStencilDesc = DepthStencilDesc {
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::LessEqual,
    };

    /// Reverse-Z depth test.
    pub const DSS_GREATER_EQUAL: DepthStencilDesc = DepthStencilDesc {
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::GreaterEqual,
    };

    /// Uninitialised states; samplers are unavailable until [`Self::init_all`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the sampler objects. Calling again replaces them.
    pub fn init_all(&mut self, device: &wgpu::Device) {
        let sampler = |label: &str,
                       address_mode: wgpu::AddressMode,
                       filter: wgpu::FilterMode,
                       mipmap_filter: wgpu::MipmapFilterMode| {
            Arc::new(device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: address_mode,
                address_mode_v: address_mode,
                address_mode_w: address_mode,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter,
                ..Default::default()
            }))
        };

        let linear_wrap = sampler(
            "SSLinearWrap",
            wgpu::AddressMode::Repeat,
            wgpu::FilterMode::Linear,
            wgpu::MipmapFilterMode::Linear,
        );
        let linear_clamp = sampler(
            "SSLinearClamp",
            wgpu::AddressMode::ClampToEdge,
            wgpu::FilterMode::Linear,
            wgpu::MipmapFilterMode::Linear,
        );
        let point_clamp = sampler(
            "SSPointClamp",
            wgpu::AddressMode::ClampToEdge,
            wgpu::FilterMode::Nearest,
            wgpu::MipmapFilterMode::Nearest,
        );

        let anisotropic_wrap = Arc::new(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("SSAnisotropicWrap"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            anisotropy_clamp: 4,
            ..Default::default()
        }));

        let shadow_pcf = Arc::new(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("SSShadowPCF"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        }));

        if self.samplers.is_some() {
            log::debug!("Re-initialising render states");
        }
        self.samplers = Some(SamplerStates {
            linear_wrap,
            linear_clamp,
            point_clamp,
            anisotropic_wrap,
            shadow_pcf,
        });
        log::info!("Render states initialised");
    }

    /// Whether [`Self::init_all`] has run.
    pub fn is_init(&self) -> bool {
        self.samplers.is_some()
    }

    pub fn ss_linear_wrap(&self) -> Option<&Arc<wgpu::Sampler>> {
        self.samplers.as_ref().map(|s| &s.linear_wrap)
    }

    pub fn ss_linear_clamp(&self) -> Option<&Arc<wgpu::Sampler>> {
        self.samplers.as_ref().map(|s| &s.linear_clamp)
    }

    pub fn ss_point_clamp(&self) -> Option<&Arc<wgpu::Sampler>> {
        self.samplers.as_ref().map(|s| &s.point_clamp)
    }

    pub fn ss_anisotropic_wrap(&self) -> Option<&Arc<wgpu::Sampler>> {
        self.samplers.as_ref().map(|s| &s.anisotropic_wrap)
    }

    /// Comparison sampler for shadow map lookups.
    pub fn ss_shadow_pcf(&self) -> Option<&Arc<wgpu::Sampler>> {
        self.samplers.as_ref().map(|s| &s.shadow_pcf)
    }
}
