//! Shader module loading, validation, caching, and hot-reload.

use log::{debug, info};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use thiserror::Error;
use wgpu::{ShaderModuleDescriptor, ShaderSource};

use crate::reflect::{ShaderReflection, reflect_wgsl};

/// Error types for shader loading operations.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader '{name}' failed to compile: {message}")]
    CompilationFailed { name: String, message: String },

    #[error("shader file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to read shader file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("shader '{name}' not found in library")]
    NotLoaded { name: String },

    #[error("no shader directory configured for file-based loading")]
    NoShaderDir,
}

/// A compiled module together with its reflection data.
#[derive(Clone, Debug)]
pub struct LoadedShader {
    pub module: Arc<wgpu::ShaderModule>,
    pub reflection: Arc<ShaderReflection>,
    /// File the module was read from, relative to the shader directory.
    pub filename: Option<String>,
}

/// Central registry for compiled shader modules with hot-reload support.
///
/// Sources are validated with naga before they reach the device, so a bad
/// shader surfaces as [`ShaderError::CompilationFailed`] instead of a device
/// validation panic.
pub struct ShaderLibrary {
    shaders: HashMap<String, LoadedShader>,
    shader_dir: Option<PathBuf>,
}

impl ShaderLibrary {
    /// Create a new empty shader library.
    pub fn new() -> Self {
        Self {
            shaders: HashMap::new(),
            shader_dir: None,
        }
    }

    /// Set the directory to load .wgsl files from.
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = Some(dir.into());
        self
    }

    pub fn shader_dir(&self) -> Option<&PathBuf> {
        self.shader_dir.as_ref()
    }

    /// Load a shader from a WGSL source string.
    pub fn load_from_source(
        &mut self,
        device: &wgpu::Device,
        name: &str,
        source: &str,
    ) -> Result<LoadedShader, ShaderError> {
        self.compile(device, name, source, None)
    }

    /// Load a shader from a file in the shader directory.
    pub fn load_from_file(
        &mut self,
        device: &wgpu::Device,
        name: &str,
        filename: &str,
    ) -> Result<LoadedShader, ShaderError> {
        let source = self.read_source(filename)?;
        self.compile(device, name, &source, Some(filename.to_string()))
    }

    /// Get a previously loaded shader by name.
    pub fn get(&self, name: &str) -> Option<LoadedShader> {
        self.shaders.get(name).cloned()
    }

    /// Reload a shader from the file it was originally loaded from.
    pub fn reload(
        &mut self,
        device: &wgpu::Device,
        name: &str,
    ) -> Result<LoadedShader, ShaderError> {
        let filename = self
            .shaders
            .get(name)
            .ok_or_else(|| ShaderError::NotLoaded {
                name: name.to_string(),
            })?
            .filename
            .clone()
            .unwrap_or_else(|| format!("{name}.wgsl"));

        info!("Reloading shader '{}'", name);
        self.load_from_file(device, name, &filename)
    }

    /// Number of loaded shaders.
    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    /// Check if the shader library is empty.
    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    fn read_source(&self, filename: &str) -> Result<String, ShaderError> {
        let shader_dir = self.shader_dir.as_ref().ok_or(ShaderError::NoShaderDir)?;
        let path = shader_dir.join(filename);

        debug!("Reading shader source from {:?}", path);

        if !path.exists() {
            return Err(ShaderError::FileNotFound { path });
        }
        Ok(std::fs::read_to_string(&path)?)
    }

    fn compile(
        &mut self,
        device: &wgpu::Device,
        name: &str,
        source: &str,
        filename: Option<String>,
    ) -> Result<LoadedShader, ShaderError> {
        let reflection = reflect_wgsl(name, source)?;

        let module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(name),
            source: ShaderSource::Wgsl(source.into()),
        });

        let shader = LoadedShader {
            module: Arc::new(module),
            reflection: Arc::new(reflection),
            filename,
        };
        let replaced = self
            .shaders
            .insert(name.to_string(), shader.clone())
            .is_some();

        if replaced {
            info!("Replaced shader '{}'", name);
        } else {
            info!("Loaded shader '{}'", name);
        }

        Ok(shader)
    }
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_test_device;

    const VALID_SHADER: &str = r#"
        @vertex
        fn vs_main(@builtin(vertex_index) idx: u32) -> @builtin(position) vec4<f32> {
            return vec4<f32>(0.0, 0.0, 0.0, 1.0);
        }

        @fragment
        fn fs_main() -> @location(0) vec4<f32> {
            return vec4<f32>(1.0, 0.0, 0.0, 1.0);
        }
    "#;

    const INVALID_SHADER: &str = r#"
        @vertex
        fn vs_main() -> @builtin(position) vec4<f32> {
            return undeclared_variable;
        }
    "#;

    #[test]
    fn test_load_valid_shader_succeeds() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut library = ShaderLibrary::new();
        let shader = library
            .load_from_source(gpu.device(), "test", VALID_SHADER)
            .unwrap();
        assert_eq!(shader.reflection.entry_points.len(), 2);
        assert!(shader.filename.is_none());
    }

    #[test]
    fn test_invalid_shader_is_an_error_not_a_panic() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut library = ShaderLibrary::new();
        let result = library.load_from_source(gpu.device(), "bad", INVALID_SHADER);
        assert!(matches!(result, Err(ShaderError::CompilationFailed { .. })));
        assert!(library.is_empty());
    }

    #[test]
    fn test_cache_returns_same_module_for_same_name() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut library = ShaderLibrary::new();
        library
            .load_from_source(gpu.device(), "shared", VALID_SHADER)
            .unwrap();

        let a = library.get("shared").unwrap();
        let b = library.get("shared").unwrap();
        assert!(Arc::ptr_eq(&a.module, &b.module));
    }

    #[test]
    fn test_shader_library_starts_empty() {
        let library = ShaderLibrary::new();
        assert!(library.is_empty());
        assert_eq!(library.len(), 0);
    }

    #[test]
    fn test_get_nonexistent_shader_returns_none() {
        let library = ShaderLibrary::new();
        assert!(library.get("nonexistent").is_none());
    }

    #[test]
    fn test_load_from_file_without_shader_dir_returns_error() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut library = ShaderLibrary::new();
        let result = library.load_from_file(gpu.device(), "test", "test.wgsl");
        assert!(matches!(result, Err(ShaderError::NoShaderDir)));
    }

    #[test]
    fn test_load_from_missing_file_returns_not_found() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let mut library = ShaderLibrary::new().with_shader_dir(dir.path());
        let result = library.load_from_file(gpu.device(), "missing", "missing.wgsl");
        assert!(matches!(result, Err(ShaderError::FileNotFound { .. })));
    }

    #[test]
    fn test_reload_uses_recorded_filename() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("custom_name.wgsl"), VALID_SHADER).unwrap();
        let mut library = ShaderLibrary::new().with_shader_dir(dir.path());

        let original = library
            .load_from_file(gpu.device(), "sky", "custom_name.wgsl")
            .unwrap();
        let reloaded = library.reload(gpu.device(), "sky").unwrap();

        assert!(!Arc::ptr_eq(&original.module, &reloaded.module));
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn test_reload_unknown_shader_is_not_loaded() {
        let Some(gpu) = create_test_device() else {
            return;
        };
        let mut library = ShaderLibrary::new();
        assert!(matches!(
            library.reload(gpu.device(), "ghost"),
            Err(ShaderError::NotLoaded { .. })
        ));
    }
}
