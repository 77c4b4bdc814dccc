//! One offscreen atmosphere frame: scene inputs, the effect pass, and readback.

use std::sync::{Arc, mpsc};

use aether_config::Config;
use aether_effects::{AtmosphereEffect, AtmosphereError};
use aether_render::{DeviceHandle, MeshData, MeshError, MeshGeometry};

/// Scene depth and the atmosphere pass's optional depth attachment.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Format of the lit scene texture the effect samples.
const LIT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Atmosphere(#[from] AtmosphereError),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error("failed to map readback buffer: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),

    #[error("readback callback was dropped")]
    ReadbackDropped,

    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
}

type MapResult = Result<(), wgpu::BufferAsyncError>;

/// Wait for a buffer map once the device has been polled.
///
/// A failed poll means the map callback may never run, so it is reported
/// before blocking on the channel.
fn finish_readback(
    poll: Result<wgpu::PollStatus, wgpu::PollError>,
    mapped: &mpsc::Receiver<MapResult>,
) -> Result<(), FrameError> {
    poll?;
    mapped.recv().map_err(|_| FrameError::ReadbackDropped)??;
    Ok(())
}

/// Map a config colour-format name to a 4-byte-per-pixel texture format.
pub fn parse_color_format(name: &str) -> Option<wgpu::TextureFormat> {
    match name.to_ascii_lowercase().as_str() {
        "rgba8unorm" => Some(wgpu::TextureFormat::Rgba8Unorm),
        "rgba8unorm-srgb" => Some(wgpu::TextureFormat::Rgba8UnormSrgb),
        "bgra8unorm" => Some(wgpu::TextureFormat::Bgra8Unorm),
        "bgra8unorm-srgb" => Some(wgpu::TextureFormat::Bgra8UnormSrgb),
        _ => None,
    }
}

/// Checkerboard standing in for a lit scene, RGBA8.
pub fn checker_pixels(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let light = ((x / 16) + (y / 16)) % 2 == 0;
            let value = if light { 200 } else { 60 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

/// Average of the first three channels over tightly packed 4-byte pixels.
pub fn average_rgb(pixels: &[u8]) -> [f32; 3] {
    let count = (pixels.len() / 4).max(1) as f32;
    let mut sum = [0.0f32; 3];
    for pixel in pixels.chunks_exact(4) {
        for (acc, &channel) in sum.iter_mut().zip(pixel) {
            *acc += f32::from(channel) / 255.0;
        }
    }
    sum.map(|s| s / count)
}

fn create_texture(
    gpu: &DeviceHandle,
    label: &str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    gpu.device().create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    })
}

/// Render one frame and return the average colour of the target.
pub fn render_frame(
    gpu: &DeviceHandle,
    effect: &mut AtmosphereEffect,
    config: &Config,
    color_format: wgpu::TextureFormat,
) -> Result<[f32; 3], FrameError> {
    let width = config.render.target_width.max(1);
    let height = config.render.target_height.max(1);

    let scene_depth = create_texture(
        gpu,
        "scene-depth",
        width,
        height,
        DEPTH_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
    );
    let scene_depth_view = Arc::new(scene_depth.create_view(&wgpu::TextureViewDescriptor::default()));

    let lit = create_texture(
        gpu,
        "scene-lit",
        width,
        height,
        LIT_FORMAT,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    gpu.queue().write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &lit,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &checker_pixels(width, height),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: None,
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    let lit_view = Arc::new(lit.create_view(&wgpu::TextureViewDescriptor::default()));

    let target = create_texture(
        gpu,
        "atmosphere-target",
        width,
        height,
        color_format,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    );
    let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

    let pass_depth_view = config.render.depth_enabled.then(|| {
        create_texture(
            gpu,
            "atmosphere-depth",
            width,
            height,
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        )
        .create_view(&wgpu::TextureViewDescriptor::default())
    });

    effect.set_depth_texture(scene_depth_view.clone())?;
    effect.set_lit_texture(lit_view)?;

    let quad = MeshData::upload(gpu.device(), "fullscreen-quad", &MeshGeometry::fullscreen_quad())?;
    let input = effect.get_input_data(&quad)?;

    let mut encoder = gpu
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("atmosphere-frame"),
        });

    // Empty scene: everything sits at the far plane.
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("scene-depth-clear"),
        color_attachments: &[],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &scene_depth_view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    });

    {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("atmosphere"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: pass_depth_view.as_ref().map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        effect.apply(&mut render_pass)?;
        input.bind(&mut render_pass)?;
        input.draw(&mut render_pass);
    }

    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = unpadded.div_ceil(align) * align;
    let readback = gpu.device().create_buffer(&wgpu::BufferDescriptor {
        label: Some("atmosphere-readback"),
        size: u64::from(padded * height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &target,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    gpu.queue().submit(Some(encoder.finish()));

    let slice = readback.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let poll = gpu.device().poll(wgpu::PollType::Wait {
        submission_index: None,
        timeout: None,
    });
    finish_readback(poll, &rx)?;

    let mapped = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((unpadded * height) as usize);
    for row in mapped.chunks_exact(padded as usize) {
        pixels.extend_from_slice(&row[..unpadded as usize]);
    }
    drop(mapped);
    readback.unmap();

    let mut average = average_rgb(&pixels);
    if matches!(
        color_format,
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
    ) {
        average.swap(0, 2);
    }
    Ok(average)
}
