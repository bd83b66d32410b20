// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use crate::config::{Palette, SimulationConfig, SplatColorMode};
use crate::context::GpuContext;
use crate::error::Result;
use crate::framebuffer::{Field, FieldSnapshot, FramebufferPool, RenderTarget, Viewport};
use crate::pointer::Splat;
use crate::programs::{Program, ProgramCache, ProgramKind};
use crate::uniforms::{PassUniforms, UniformArena};

/// Owns the device and every resource of one running simulation.
pub struct FluidSession {
    ctx: GpuContext,
    programs: ProgramCache,
    pool: FramebufferPool,
    uniforms: UniformArena,
    output_format: wgpu::TextureFormat,
    elapsed: f32,
    palette: Palette,
    // Jacobi input groups, indexed by the pressure buffer's read slot.
    // Dropped whenever the pool is reallocated.
    pressure_groups: Option<[wgpu::BindGroup; 2]>,
}

fn draw(
    device: &wgpu::Device,
    encoder: &mut wgpu::CommandEncoder,
    program: &Program,
    uniforms: &UniformArena,
    offset: u32,
    inputs: &[(&str, &RenderTarget)],
    output: &wgpu::TextureView,
) -> Result<()> {
    let bind_group = program.bind(device, inputs)?;
    record(encoder, program, uniforms, offset, &bind_group, output);
    Ok(())
}

fn record(
    encoder: &mut wgpu::CommandEncoder,
    program: &Program,
    uniforms: &UniformArena,
    offset: u32,
    bind_group: &wgpu::BindGroup,
    output: &wgpu::TextureView,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(program.kind().name()),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: output,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    pass.set_pipeline(program.pipeline());
    pass.set_bind_group(0, uniforms.bind_group(), &[offset]);
    pass.set_bind_group(1, bind_group, &[]);
    pass.draw(0..3, 0..1);
}

impl FluidSession {
    /// Compiles every program and allocates the fields. `output_format` is
    /// the format the display pass renders into.
    pub fn new(
        ctx: GpuContext,
        config: &SimulationConfig,
        viewport: Viewport,
        output_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let uniforms = UniformArena::new(&ctx.device);
        let programs = ProgramCache::new(&ctx, uniforms.layout(), &[output_format])?;
        let pool = FramebufferPool::new(&ctx, config, viewport)?;
        Ok(Self {
            ctx,
            programs,
            pool,
            uniforms,
            output_format,
            elapsed: 0.0,
            palette: config.palette(),
            pressure_groups: None,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn pool(&self) -> &FramebufferPool {
        &self.pool
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    pub fn output_format(&self) -> wgpu::TextureFormat {
        self.output_format
    }

    /// Simulated seconds since the session started. Paused frames do not
    /// advance it.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Reallocates the fields for a new viewport when the planned sizes
    /// change. Returns whether anything was replaced.
    pub fn resize(&mut self, config: &SimulationConfig, viewport: Viewport) -> Result<bool> {
        if self.pool.matches(config, &viewport) {
            return Ok(false);
        }
        self.pool.resize_all(&self.ctx, config, viewport)?;
        self.pressure_groups = None;
        Ok(true)
    }

    /// Unconditionally replaces every field, keeping the viewport.
    pub fn reallocate(&mut self, config: &SimulationConfig) -> Result<()> {
        let viewport = self.pool.viewport();
        self.pool.resize_all(&self.ctx, config, viewport)?;
        self.pressure_groups = None;
        Ok(())
    }

    pub fn has_cached_pressure_groups(&self) -> bool {
        self.pressure_groups.is_some()
    }

    pub fn create_output(&self, width: u32, height: u32) -> Result<RenderTarget> {
        RenderTarget::new(
            &self.ctx,
            "Display Output",
            width,
            height,
            self.output_format,
            wgpu::FilterMode::Linear,
        )
    }

    pub fn upload_field(&self, field: Field, data: &[f32]) -> Result<()> {
        self.pool.target(field).upload(&self.ctx.queue, data)
    }

    pub fn read_field(&self, field: Field) -> Result<FieldSnapshot> {
        self.pool.target(field).read(&self.ctx)
    }

    pub fn begin_frame(&mut self) -> wgpu::CommandEncoder {
        self.uniforms.reset();
        self.ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Fluid Frame"),
            })
    }

    pub fn submit(&mut self, encoder: wgpu::CommandEncoder) {
        self.uniforms.flush(&self.ctx.queue);
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Runs one frame: the solver step unless paused, then the display
    /// composite into `output`. Field sizes are left alone; resolution
    /// changes go through `reallocate`.
    pub fn frame(
        &mut self,
        dt: f32,
        config: &SimulationConfig,
        splat: Option<Splat>,
        output: &wgpu::TextureView,
    ) -> Result<()> {
        let mut encoder = self.begin_frame();
        if !config.paused {
            self.step(&mut encoder, dt, config, splat.as_ref())?;
        }
        self.display(&mut encoder, config.shading, output)?;
        self.submit(encoder);
        if !config.paused {
            self.elapsed += dt;
        }
        Ok(())
    }

    pub fn step(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        dt: f32,
        config: &SimulationConfig,
        splat: Option<&Splat>,
    ) -> Result<()> {
        self.compute_curl(encoder)?;
        self.confine_vorticity(encoder, dt, config.curl)?;
        self.advect_velocity(encoder, dt, config.velocity_dissipation)?;
        self.advect_dye(encoder, dt, config.density_dissipation)?;
        if let Some(splat) = splat {
            let color = match config.splat_color {
                SplatColorMode::Pressed => splat.color,
                SplatColorMode::Palette => {
                    self.palette.refresh(&config.color_palette);
                    self.palette.color_at(self.elapsed, config.color_speed)
                }
            };
            self.splat(encoder, splat, color, config)?;
        }
        self.compute_divergence(encoder)?;
        self.retain_pressure(encoder, config.pressure)?;
        self.relax_pressure(encoder, config.pressure_iterations)?;
        self.subtract_gradient(encoder)
    }

    fn sim_params(&self) -> PassUniforms {
        PassUniforms {
            texel_size: self.pool.dims().sim_texel_size(),
            ..Default::default()
        }
    }

    pub fn compute_curl(&mut self, encoder: &mut wgpu::CommandEncoder) -> Result<()> {
        let program = self.programs.get(ProgramKind::Curl, self.pool.curl.format())?;
        let params = self.sim_params();
        let offset = self.uniforms.push(&params);
        draw(
            &self.ctx.device,
            encoder,
            program,
            &self.uniforms,
            offset,
            &[("u_velocity", self.pool.velocity.read())],
            self.pool.curl.view(),
        )
    }

    pub fn confine_vorticity(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        dt: f32,
        curl: f32,
    ) -> Result<()> {
        let velocity = &self.pool.velocity;
        let program = self.programs.get(ProgramKind::Vorticity, velocity.write().format())?;
        let params = PassUniforms {
            dt,
            curl,
            ..self.sim_params()
        };
        let offset = self.uniforms.push(&params);
        draw(
            &self.ctx.device,
            encoder,
            program,
            &self.uniforms,
            offset,
            &[("u_velocity", velocity.read()), ("u_curl", &self.pool.curl)],
            velocity.write().view(),
        )?;
        self.pool.velocity.swap();
        Ok(())
    }

    pub fn advect_velocity(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        dt: f32,
        dissipation: f32,
    ) -> Result<()> {
        let velocity = &self.pool.velocity;
        let program = self.programs.get(ProgramKind::Advection, velocity.write().format())?;
        let params = PassUniforms {
            dt,
            dissipation,
            ..self.sim_params()
        };
        let offset = self.uniforms.push(&params);
        draw(
            &self.ctx.device,
            encoder,
            program,
            &self.uniforms,
            offset,
            &[("u_velocity", velocity.read()), ("u_source", velocity.read())],
            velocity.write().view(),
        )?;
        self.pool.velocity.swap();
        Ok(())
    }

    /// Velocity is in simulation texels per second, so the offset uses the
    /// simulation texel size even though dye is finer.
    pub fn advect_dye(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        dt: f32,
        dissipation: f32,
    ) -> Result<()> {
        let dye = &self.pool.dye;
        let program = self.programs.get(ProgramKind::Advection, dye.write().format())?;
        let params = PassUniforms {
            dt,
            dissipation,
            ..self.sim_params()
        };
        let offset = self.uniforms.push(&params);
        draw(
            &self.ctx.device,
            encoder,
            program,
            &self.uniforms,
            offset,
            &[
                ("u_velocity", self.pool.velocity.read()),
                ("u_source", dye.read()),
            ],
            dye.write().view(),
        )?;
        self.pool.dye.swap();
        Ok(())
    }

    /// Gaussian impulse at the splat point: momentum from the pointer
    /// displacement, then `color` into the dye.
    pub fn splat(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        splat: &Splat,
        color: [f32; 3],
        config: &SimulationConfig,
    ) -> Result<()> {
        let base = PassUniforms {
            point: splat.point,
            radius: config.splat_radius / 100.0,
            aspect_ratio: self.pool.viewport().aspect_ratio(),
            ..self.sim_params()
        };

        let velocity = &self.pool.velocity;
        let program = self.programs.get(ProgramKind::Splat, velocity.write().format())?;
        let offset = self.uniforms.push(&PassUniforms {
            color: [
                splat.delta[0] * config.splat_force,
                splat.delta[1] * config.splat_force,
                0.0,
                1.0,
            ],
            ..base
        });
        draw(
            &self.ctx.device,
            encoder,
            program,
            &self.uniforms,
            offset,
            &[("u_target", velocity.read())],
            velocity.write().view(),
        )?;
        self.pool.velocity.swap();

        let dye = &self.pool.dye;
        let program = self.programs.get(ProgramKind::Splat, dye.write().format())?;
        let offset = self.uniforms.push(&PassUniforms {
            color: [color[0], color[1], color[2], 1.0],
            texel_size: self.pool.dims().dye_texel_size(),
            ..base
        });
        draw(
            &self.ctx.device,
            encoder,
            program,
            &self.uniforms,
            offset,
            &[("u_target", dye.read())],
            dye.write().view(),
        )?;
        self.pool.dye.swap();
        Ok(())
    }

    pub fn compute_divergence(&mut self, encoder: &mut wgpu::CommandEncoder) -> Result<()> {
        let program = self
            .programs
            .get(ProgramKind::Divergence, self.pool.divergence.format())?;
        let params = self.sim_params();
        let offset = self.uniforms.push(&params);
        draw(
            &self.ctx.device,
            encoder,
            program,
            &self.uniforms,
            offset,
            &[("u_velocity", self.pool.velocity.read())],
            self.pool.divergence.view(),
        )
    }

    /// Scales last frame's pressure by `fraction` to seed the relaxation.
    pub fn retain_pressure(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        fraction: f32,
    ) -> Result<()> {
        let pressure = &self.pool.pressure;
        let program = self.programs.get(ProgramKind::Clear, pressure.write().format())?;
        let params = PassUniforms {
            scale: fraction,
            ..self.sim_params()
        };
        let offset = self.uniforms.push(&params);
        draw(
            &self.ctx.device,
            encoder,
            program,
            &self.uniforms,
            offset,
            &[("u_texture", pressure.read())],
            pressure.write().view(),
        )?;
        self.pool.pressure.swap();
        Ok(())
    }

    /// Jacobi relaxation. All iterations share one parameter slot and
    /// alternate between two cached input groups.
    pub fn relax_pressure(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        iterations: u32,
    ) -> Result<()> {
        let program = self
            .programs
            .get(ProgramKind::Pressure, self.pool.pressure.write().format())?;
        let groups = match self.pressure_groups.take() {
            Some(groups) => groups,
            None => self.pressure_bind_groups(program)?,
        };

        let params = self.sim_params();
        let offset = self.uniforms.push(&params);
        for _ in 0..iterations {
            let pressure = &mut self.pool.pressure;
            record(
                encoder,
                program,
                &self.uniforms,
                offset,
                &groups[pressure.read_index()],
                pressure.write().view(),
            );
            pressure.swap();
        }
        self.pressure_groups = Some(groups);
        Ok(())
    }

    fn pressure_bind_groups(&self, program: &Program) -> Result<[wgpu::BindGroup; 2]> {
        let pressure = &self.pool.pressure;
        let divergence = &self.pool.divergence;
        let read = program.bind(
            &self.ctx.device,
            &[("u_pressure", pressure.read()), ("u_divergence", divergence)],
        )?;
        let written = program.bind(
            &self.ctx.device,
            &[("u_pressure", pressure.write()), ("u_divergence", divergence)],
        )?;
        Ok(if pressure.read_index() == 0 {
            [read, written]
        } else {
            [written, read]
        })
    }

    pub fn subtract_gradient(&mut self, encoder: &mut wgpu::CommandEncoder) -> Result<()> {
        let velocity = &self.pool.velocity;
        let program = self
            .programs
            .get(ProgramKind::GradientSubtract, velocity.write().format())?;
        let params = self.sim_params();
        let offset = self.uniforms.push(&params);
        draw(
            &self.ctx.device,
            encoder,
            program,
            &self.uniforms,
            offset,
            &[
                ("u_pressure", self.pool.pressure.read()),
                ("u_velocity", velocity.read()),
            ],
            velocity.write().view(),
        )?;
        self.pool.velocity.swap();
        Ok(())
    }

    /// Composites the dye into `output`. Shading picks the pre-built
    /// shaded program.
    pub fn display(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        shading: bool,
        output: &wgpu::TextureView,
    ) -> Result<()> {
        let kind = if shading {
            ProgramKind::DisplayShaded
        } else {
            ProgramKind::Display
        };
        let program = self.programs.get(kind, self.output_format)?;
        let offset = self.uniforms.push(&PassUniforms {
            texel_size: self.pool.dims().dye_texel_size(),
            ..Default::default()
        });
        draw(
            &self.ctx.device,
            encoder,
            program,
            &self.uniforms,
            offset,
            &[("u_texture", self.pool.dye.read())],
            output,
        )
    }
}
