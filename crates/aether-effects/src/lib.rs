//! Shader effects built on `aether-render`.

mod atmosphere;

pub use atmosphere::{
    ATMOSPHERE_PASS, ATMOSPHERE_SHADER_FILE, ATMOSPHERE_SHADER_SOURCE, AtmosphereEffect,
    AtmosphereError, AtmosphereSettings,
};
