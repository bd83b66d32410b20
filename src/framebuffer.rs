// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use crate::config::{GridSizing, SimulationConfig};
use crate::context::GpuContext;
use crate::error::{FluidError, Result};

/// Size of the visible surface in CSS pixels plus its device pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub css_width: f64,
    pub css_height: f64,
    pub device_pixel_ratio: f64,
}

impl Viewport {
    pub fn new(css_width: f64, css_height: f64, device_pixel_ratio: f64) -> Self {
        Self {
            css_width,
            css_height,
            device_pixel_ratio,
        }
    }

    /// Viewport for a surface already measured in physical pixels.
    pub fn from_physical(width: u32, height: u32, device_pixel_ratio: f64) -> Self {
        let dpr = if device_pixel_ratio > 0.0 { device_pixel_ratio } else { 1.0 };
        Self::new(width as f64 / dpr, height as f64 / dpr, dpr)
    }

    /// round(css size * dpr), never zero.
    pub fn physical_size(&self) -> (u32, u32) {
        let scale = |css: f64| ((css * self.device_pixel_ratio).round().max(1.0)) as u32;
        (scale(self.css_width), scale(self.css_height))
    }

    pub fn aspect_ratio(&self) -> f32 {
        let (w, h) = self.physical_size();
        w as f32 / h as f32
    }
}

/// Field dimensions for a grid resolution: the shorter side is
/// `resolution`, the longer side is scaled by the surface aspect ratio.
pub fn resolution_size(resolution: u32, surface: (u32, u32)) -> (u32, u32) {
    let (w, h) = (surface.0.max(1) as f32, surface.1.max(1) as f32);
    let aspect = if w >= h { w / h } else { h / w };
    let min = resolution.max(1);
    let max = ((min as f32) * aspect).round() as u32;
    if w > h {
        (max, min)
    } else {
        (min, max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolDims {
    pub sim: (u32, u32),
    pub dye: (u32, u32),
}

impl PoolDims {
    pub fn plan(config: &SimulationConfig, viewport: &Viewport) -> Self {
        let surface = viewport.physical_size();
        match config.grid_sizing {
            GridSizing::Resolution => Self {
                sim: resolution_size(config.sim_resolution, surface),
                dye: resolution_size(config.dye_resolution, surface),
            },
            GridSizing::Viewport => Self {
                sim: surface,
                dye: surface,
            },
        }
    }

    pub fn sim_texel_size(&self) -> [f32; 2] {
        [1.0 / self.sim.0 as f32, 1.0 / self.sim.1 as f32]
    }

    pub fn dye_texel_size(&self) -> [f32; 2] {
        [1.0 / self.dye.0 as f32, 1.0 / self.dye.1 as f32]
    }
}

pub struct RenderTarget {
    label: String,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    filter: wgpu::FilterMode,
}

impl RenderTarget {
    pub fn new(
        ctx: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        filter: wgpu::FilterMode,
    ) -> Result<Self> {
        let (width, height) = (width.max(1), height.max(1));
        let max = ctx.max_texture_dimension();
        if width > max || height > max {
            return Err(FluidError::ResourceExhaustion {
                label: label.to_string(),
                width,
                height,
                reason: format!("device limit is {max}x{max}"),
            });
        }

        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
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
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(FluidError::ResourceExhaustion {
                label: label.to_string(),
                width,
                height,
                reason: err.to_string(),
            });
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            label: label.to_string(),
            texture,
            view,
            sampler,
            width,
            height,
            format,
            filter,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn filter(&self) -> wgpu::FilterMode {
        self.filter
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    pub fn texel_size(&self) -> [f32; 2] {
        [1.0 / self.width as f32, 1.0 / self.height as f32]
    }

    pub fn channels(&self) -> usize {
        channel_count(self.format)
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }

    /// Overwrites the texture with `data` (channels per texel, rows top-down).
    pub fn upload(&self, queue: &wgpu::Queue, data: &[f32]) -> Result<()> {
        let channels = self.channels();
        let expected = (self.width * self.height) as usize * channels;
        if data.len() != expected {
            return Err(FluidError::FieldSize {
                label: self.label.clone(),
                expected,
                actual: data.len(),
            });
        }
        let bytes = encode_texels(self.format, data).ok_or_else(|| FluidError::Readback {
            label: self.label.clone(),
            reason: format!("cannot encode {:?}", self.format),
        })?;
        let bytes_per_texel = bytes.len() as u32 / (self.width * self.height);

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.width * bytes_per_texel),
                rows_per_image: Some(self.height),
            },
            self.extent(),
        );
        Ok(())
    }

    /// Copies the texture back to the CPU. Blocks until the GPU is done.
    pub fn read(&self, ctx: &GpuContext) -> Result<FieldSnapshot> {
        let readback_error = |reason: String| FluidError::Readback {
            label: self.label.clone(),
            reason,
        };

        let bytes_per_texel = self
            .format
            .block_copy_size(None)
            .ok_or_else(|| readback_error(format!("unsupported format {:?}", self.format)))?;
        let unpadded_row = self.width * bytes_per_texel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = unpadded_row.div_ceil(align) * align;

        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Readback"),
            size: (padded_row * self.height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Field Readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            self.extent(),
        );
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        ctx.device.poll(wgpu::Maintain::Wait);
        match pollster::block_on(receiver.receive()) {
            Some(Ok(())) => {}
            Some(Err(err)) => return Err(readback_error(err.to_string())),
            None => return Err(readback_error("map callback dropped".to_string())),
        }

        let channels = self.channels();
        let mut data = Vec::with_capacity((self.width * self.height) as usize * channels);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(padded_row as usize) {
                let texels = &row[..unpadded_row as usize];
                if !decode_texels(self.format, texels, &mut data) {
                    return Err(readback_error(format!("cannot decode {:?}", self.format)));
                }
            }
        }
        staging.unmap();

        Ok(FieldSnapshot {
            width: self.width,
            height: self.height,
            channels,
            data,
        })
    }
}

fn channel_count(format: wgpu::TextureFormat) -> usize {
    use wgpu::TextureFormat as F;
    match format {
        F::R16Float | F::R32Float | F::R8Unorm => 1,
        F::Rg16Float | F::Rg32Float | F::Rg8Unorm => 2,
        _ => 4,
    }
}

fn encode_texels(format: wgpu::TextureFormat, data: &[f32]) -> Option<Vec<u8>> {
    use wgpu::TextureFormat as F;
    match format {
        F::R32Float | F::Rg32Float | F::Rgba32Float => {
            Some(data.iter().flat_map(|v| v.to_le_bytes()).collect())
        }
        F::R16Float | F::Rg16Float | F::Rgba16Float => Some(
            data.iter()
                .flat_map(|v| half::f16::from_f32(*v).to_le_bytes())
                .collect(),
        ),
        F::Rgba8Unorm | F::Rgba8UnormSrgb => Some(
            data.iter()
                .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
                .collect(),
        ),
        _ => None,
    }
}

// Output is always RGBA channel order.
fn decode_texels(format: wgpu::TextureFormat, bytes: &[u8], out: &mut Vec<f32>) -> bool {
    use wgpu::TextureFormat as F;
    match format {
        F::R32Float | F::Rg32Float | F::Rgba32Float => {
            out.extend(
                bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
        }
        F::R16Float | F::Rg16Float | F::Rgba16Float => {
            out.extend(
                bytes
                    .chunks_exact(2)
                    .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32()),
            );
        }
        F::Rgba8Unorm | F::Rgba8UnormSrgb => {
            out.extend(bytes.iter().map(|b| *b as f32 / 255.0));
        }
        F::Bgra8Unorm | F::Bgra8UnormSrgb => {
            for px in bytes.chunks_exact(4) {
                out.extend([px[2], px[1], px[0], px[3]].iter().map(|b| *b as f32 / 255.0));
            }
        }
        _ => return false,
    }
    true
}

/// CPU copy of a field: `channels` floats per texel, rows top-down.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSnapshot {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl FieldSnapshot {
    pub fn texel(&self, x: u32, y: u32) -> &[f32] {
        let start = (y as usize * self.width as usize + x as usize) * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Texel under simulation coordinates (`v` up, both in [0, 1]).
    pub fn at_uv(&self, u: f32, v: f32) -> &[f32] {
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = (((1.0 - v) * self.height as f32) as u32).min(self.height - 1);
        self.texel(x, y)
    }

    pub fn max_channel(&self, channels: usize) -> f32 {
        self.data
            .chunks_exact(self.channels)
            .flat_map(|t| t.iter().take(channels))
            .fold(f32::NEG_INFINITY, |acc, v| acc.max(*v))
    }

    /// Largest absolute value of any channel within a uv-space box.
    pub fn max_abs_in(&self, u: std::ops::Range<f32>, v: std::ops::Range<f32>) -> f32 {
        let mut max = 0.0f32;
        for y in 0..self.height {
            let tv = 1.0 - (y as f32 + 0.5) / self.height as f32;
            if !v.contains(&tv) {
                continue;
            }
            for x in 0..self.width {
                let tu = (x as f32 + 0.5) / self.width as f32;
                if u.contains(&tu) {
                    for value in self.texel(x, y) {
                        max = max.max(value.abs());
                    }
                }
            }
        }
        max
    }
}

/// Two targets with swappable read/write roles. Swapping flips an index;
/// no texture data moves.
#[derive(Debug)]
pub struct DoubleBuffer<T = RenderTarget> {
    slots: [T; 2],
    read: usize,
}

impl<T> DoubleBuffer<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            slots: [first, second],
            read: 0,
        }
    }

    pub fn read(&self) -> &T {
        &self.slots[self.read]
    }

    pub fn write(&self) -> &T {
        &self.slots[1 - self.read]
    }

    pub fn swap(&mut self) {
        self.read = 1 - self.read;
    }

    pub fn read_index(&self) -> usize {
        self.read
    }

    pub fn both(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}

pub fn create_single(
    ctx: &GpuContext,
    label: &str,
    (width, height): (u32, u32),
    format: wgpu::TextureFormat,
    filter: wgpu::FilterMode,
) -> Result<RenderTarget> {
    RenderTarget::new(ctx, label, width, height, format, filter)
}

pub fn create_double(
    ctx: &GpuContext,
    label: &str,
    size: (u32, u32),
    format: wgpu::TextureFormat,
    filter: wgpu::FilterMode,
) -> Result<DoubleBuffer> {
    Ok(DoubleBuffer::new(
        create_single(ctx, &format!("{label} A"), size, format, filter)?,
        create_single(ctx, &format!("{label} B"), size, format, filter)?,
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Velocity,
    Dye,
    Pressure,
    Divergence,
    Curl,
}

pub struct FramebufferPool {
    pub velocity: DoubleBuffer,
    pub dye: DoubleBuffer,
    pub pressure: DoubleBuffer,
    pub divergence: RenderTarget,
    pub curl: RenderTarget,
    dims: PoolDims,
    viewport: Viewport,
}

impl FramebufferPool {
    pub fn new(ctx: &GpuContext, config: &SimulationConfig, viewport: Viewport) -> Result<Self> {
        let dims = PoolDims::plan(config, &viewport);
        let formats = ctx.formats();
        let linear = wgpu::FilterMode::Linear;
        let nearest = wgpu::FilterMode::Nearest;

        let pool = Self {
            velocity: create_double(ctx, "Velocity", dims.sim, formats.rg, linear)?,
            dye: create_double(ctx, "Dye", dims.dye, formats.rgba, linear)?,
            pressure: create_double(ctx, "Pressure", dims.sim, formats.r, nearest)?,
            divergence: create_single(ctx, "Divergence", dims.sim, formats.r, nearest)?,
            curl: create_single(ctx, "Curl", dims.sim, formats.r, nearest)?,
            dims,
            viewport,
        };
        log::info!(
            "allocated fields: sim {}x{}, dye {}x{}",
            dims.sim.0,
            dims.sim.1,
            dims.dye.0,
            dims.dye.1
        );
        Ok(pool)
    }

    /// Discards every target and allocates fresh ones for the new size.
    /// Simulation state does not survive. On failure the pool is untouched.
    pub fn resize_all(
        &mut self,
        ctx: &GpuContext,
        config: &SimulationConfig,
        viewport: Viewport,
    ) -> Result<()> {
        *self = Self::new(ctx, config, viewport)?;
        Ok(())
    }

    /// True when the allocated sizes are what `config` and `viewport` ask for.
    pub fn matches(&self, config: &SimulationConfig, viewport: &Viewport) -> bool {
        self.dims == PoolDims::plan(config, viewport)
    }

    pub fn dims(&self) -> PoolDims {
        self.dims
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    // Read side for double buffers.
    pub fn target(&self, field: Field) -> &RenderTarget {
        match field {
            Field::Velocity => self.velocity.read(),
            Field::Dye => self.dye.read(),
            Field::Pressure => self.pressure.read(),
            Field::Divergence => &self.divergence,
            Field::Curl => &self.curl,
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &RenderTarget> {
        self.velocity
            .both()
            .chain(self.dye.both())
            .chain(self.pressure.both())
            .chain([&self.divergence, &self.curl])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_swap_is_an_involution() {
        let mut buffer = DoubleBuffer::new("a", "b");
        assert_eq!((*buffer.read(), *buffer.write()), ("a", "b"));
        assert_eq!(buffer.read_index(), 0);
        buffer.swap();
        assert_eq!((*buffer.read(), *buffer.write()), ("b", "a"));
        assert_eq!(buffer.read_index(), 1);
        buffer.swap();
        assert_eq!((*buffer.read(), *buffer.write()), ("a", "b"));
    }

    #[test]
    fn read_and_write_are_never_the_same_slot() {
        let mut buffer = DoubleBuffer::new(1, 2);
        for _ in 0..5 {
            assert_ne!(buffer.read(), buffer.write());
            buffer.swap();
        }
    }

    #[test]
    fn physical_size_rounds_css_times_dpr() {
        let viewport = Viewport::new(333.0, 201.0, 1.5);
        assert_eq!(viewport.physical_size(), (500, 302));
        let viewport = Viewport::new(0.0, 10.0, 2.0);
        assert_eq!(viewport.physical_size(), (1, 20));
    }

    #[test]
    fn from_physical_round_trips() {
        let viewport = Viewport::from_physical(1917, 1081, 1.25);
        assert_eq!(viewport.physical_size(), (1917, 1081));
    }

    #[test]
    fn resolution_size_follows_aspect() {
        assert_eq!(resolution_size(128, (1600, 800)), (256, 128));
        assert_eq!(resolution_size(128, (800, 1600)), (128, 256));
        assert_eq!(resolution_size(128, (500, 500)), (128, 128));
    }

    #[test]
    fn plan_uses_grid_sizing_policy() {
        let viewport = Viewport::new(400.0, 200.0, 2.0);
        let config = SimulationConfig::default();
        let dims = PoolDims::plan(&config, &viewport);
        assert_eq!(dims.sim, (256, 128));
        assert_eq!(dims.dye, (2048, 1024));

        let config = SimulationConfig {
            grid_sizing: GridSizing::Viewport,
            ..SimulationConfig::default()
        };
        let dims = PoolDims::plan(&config, &viewport);
        assert_eq!(dims.sim, (800, 400));
        assert_eq!(dims.dye, (800, 400));
    }

    #[test]
    fn half_float_texels_round_trip_through_bytes() {
        let values = [0.0f32, 0.5, -1.25, 3.0];
        let bytes = encode_texels(wgpu::TextureFormat::Rgba16Float, &values).unwrap();
        let mut decoded = Vec::new();
        assert!(decode_texels(wgpu::TextureFormat::Rgba16Float, &bytes, &mut decoded));
        assert_eq!(decoded, values);
    }

    #[test]
    fn bgra_texels_decode_as_rgba() {
        let mut decoded = Vec::new();
        assert!(decode_texels(wgpu::TextureFormat::Bgra8Unorm, &[0, 0, 255, 255], &mut decoded));
        assert_eq!(decoded, vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn snapshot_uv_lookup_is_y_up() {
        let snapshot = FieldSnapshot {
            width: 2,
            height: 2,
            channels: 1,
            data: vec![1.0, 2.0, 3.0, 4.0],
        };
        assert_eq!(snapshot.at_uv(0.1, 0.9), &[1.0]);
        assert_eq!(snapshot.at_uv(0.9, 0.1), &[4.0]);
        assert_eq!(snapshot.max_abs_in(0.0..0.5, 0.0..0.5), 3.0);
    }
}
