//! Headless atmosphere demo: loads config, brings up a device, initialises the
//! atmosphere effect and renders one offscreen frame.

mod frame;

use std::path::Path;
use std::time::Instant;

use aether_config::{CliArgs, Config, default_config_dir};
use aether_effects::{AtmosphereEffect, AtmosphereSettings};
use aether_render::{DeviceHandle, RenderStates};
use clap::Parser;
use glam::Vec3;

fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = match args.config.clone().map_or_else(default_config_dir, Ok) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Failed to resolve config directory: {e}");
            std::process::exit(1);
        }
    };

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    aether_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(e) = run(&config, &log_dir) {
        tracing::error!("Atmosphere demo failed: {e}");
        std::process::exit(1);
    }
}

fn run(config: &Config, log_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    tracing::info!(
        "Rendering {}x{} atmosphere frame (logs in {:?})",
        config.render.target_width,
        config.render.target_height,
        log_dir
    );

    let gpu = pollster::block_on(DeviceHandle::request_headless())?;

    let mut states = RenderStates::new();
    states.init_all(gpu.device());

    let color_format = frame::parse_color_format(&config.render.color_format).unwrap_or_else(|| {
        tracing::warn!(
            "Unsupported color format '{}', using rgba8unorm-srgb",
            config.render.color_format
        );
        wgpu::TextureFormat::Rgba8UnormSrgb
    });

    let settings = AtmosphereSettings {
        shader_dir: config.render.shader_dir.clone(),
        color_format,
        depth_format: config.render.depth_enabled.then_some(frame::DEPTH_FORMAT),
        debug_labels: config.debug.label_gpu_objects,
    };
    let mut effect = AtmosphereEffect::new(settings)?;
    effect.init_all(Some(&gpu), &states)?;
    effect.set_render_default();

    let atmosphere = &config.atmosphere;
    let width = i32::try_from(config.render.target_width).unwrap_or(i32::MAX);
    let height = i32::try_from(config.render.target_height).unwrap_or(i32::MAX);
    effect.set_render_target_size(width, height)?;
    effect.set_light_dir(Vec3::from(atmosphere.light_dir))?;
    effect.set_camera_look_at(Vec3::from(atmosphere.camera_look_at))?;
    effect.set_camera_right(Vec3::from(atmosphere.camera_right))?;
    effect.set_time(started.elapsed().as_secs_f32() * atmosphere.time_scale)?;

    let average = frame::render_frame(&gpu, &mut effect, config, color_format)?;
    tracing::info!(
        "Frame rendered in {:.1} ms, average colour [{:.3}, {:.3}, {:.3}]",
        started.elapsed().as_secs_f64() * 1000.0,
        average[0],
        average[1],
        average[2]
    );
    Ok(())
}
