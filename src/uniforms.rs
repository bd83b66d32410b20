// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use bytemuck::{Pod, Zeroable};

/// Parameter block shared by every pass (`PassUniforms` in fluid_common.wgsl).
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct PassUniforms {
    pub texel_size: [f32; 2], // offset 0
    pub point: [f32; 2],      // offset 8
    pub color: [f32; 4],      // offset 16
    pub dt: f32,              // offset 32
    pub dissipation: f32,     // offset 36
    pub curl: f32,            // offset 40
    pub radius: f32,          // offset 44
    pub aspect_ratio: f32,    // offset 48
    pub scale: f32,           // offset 52
    pub _pad: [f32; 2],       // offset 56, struct size 64
}

/// Slots available per frame. A frame uses at most eleven: the Jacobi
/// iterations share one.
pub const MAX_PASSES_PER_FRAME: u32 = 16;

/// One uniform buffer holding every pass's parameters for a frame at
/// separate dynamic offsets. Writes are staged on the CPU and flushed once
/// before submit so passes recorded earlier never see later parameters.
pub struct UniformArena {
    buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    stride: u32,
    staging: Vec<u8>,
    len: u32,
}

impl UniformArena {
    pub fn new(device: &wgpu::Device) -> Self {
        let size = std::mem::size_of::<PassUniforms>() as u32;
        let align = device.limits().min_uniform_buffer_offset_alignment;
        let stride = size.div_ceil(align) * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pass Uniforms"),
            size: (stride * MAX_PASSES_PER_FRAME) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Uniforms Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(size as u64),
                },
                count: None,
            }],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Uniforms"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(size as u64),
                }),
            }],
        });

        Self {
            buffer,
            bind_group_layout,
            bind_group,
            stride,
            staging: Vec::with_capacity((stride * MAX_PASSES_PER_FRAME) as usize),
            len: 0,
        }
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    /// Stages `uniforms` and returns its dynamic offset.
    pub fn push(&mut self, uniforms: &PassUniforms) -> u32 {
        debug_assert!(self.len < MAX_PASSES_PER_FRAME, "too many passes in one frame");
        let slot = self.len % MAX_PASSES_PER_FRAME;
        let offset = slot * self.stride;
        let start = offset as usize;
        let end = start + std::mem::size_of::<PassUniforms>();
        if self.staging.len() < end {
            self.staging.resize(start + self.stride as usize, 0);
        }
        self.staging[start..end].copy_from_slice(bytemuck::bytes_of(uniforms));
        self.len += 1;
        offset
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn reset(&mut self) {
        self.staging.clear();
        self.len = 0;
    }

    /// Uploads staged parameters and starts a new frame.
    pub fn flush(&mut self, queue: &wgpu::Queue) {
        if !self.staging.is_empty() {
            queue.write_buffer(&self.buffer, 0, &self.staging);
        }
        self.reset();
    }
}
