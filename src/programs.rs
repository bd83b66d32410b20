// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::context::{FieldFormats, GpuContext};
use crate::error::{FluidError, Result};
use crate::framebuffer::RenderTarget;

const COMMON_SOURCE: &str = include_str!("../shaders/fluid_common.wgsl");

/// Bind group holding a program's field inputs. Group 0 is the pass
/// parameter block.
pub const INPUT_GROUP: u32 = 1;

/// Velocity components are clamped to this magnitude after vorticity
/// confinement. Fed to vorticity.wgsl as the `VELOCITY_LIMIT` override.
pub const VELOCITY_LIMIT: f32 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramKind {
    /// Scales a field; keeps a fraction of last frame's pressure.
    Clear,
    Splat,
    Advection,
    Divergence,
    Curl,
    Vorticity,
    Pressure,
    GradientSubtract,
    Display,
    DisplayShaded,
}

impl ProgramKind {
    pub const ALL: [ProgramKind; 10] = [
        ProgramKind::Clear,
        ProgramKind::Splat,
        ProgramKind::Advection,
        ProgramKind::Divergence,
        ProgramKind::Curl,
        ProgramKind::Vorticity,
        ProgramKind::Pressure,
        ProgramKind::GradientSubtract,
        ProgramKind::Display,
        ProgramKind::DisplayShaded,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProgramKind::Clear => "clear",
            ProgramKind::Splat => "splat",
            ProgramKind::Advection => "advection",
            ProgramKind::Divergence => "divergence",
            ProgramKind::Curl => "curl",
            ProgramKind::Vorticity => "vorticity",
            ProgramKind::Pressure => "pressure",
            ProgramKind::GradientSubtract => "gradient_subtract",
            ProgramKind::Display => "display",
            ProgramKind::DisplayShaded => "display_shaded",
        }
    }

    fn fragment_source(self) -> &'static str {
        match self {
            ProgramKind::Clear => include_str!("../shaders/clear.wgsl"),
            ProgramKind::Splat => include_str!("../shaders/splat.wgsl"),
            ProgramKind::Advection => include_str!("../shaders/advection.wgsl"),
            ProgramKind::Divergence => include_str!("../shaders/divergence.wgsl"),
            ProgramKind::Curl => include_str!("../shaders/curl.wgsl"),
            ProgramKind::Vorticity => include_str!("../shaders/vorticity.wgsl"),
            ProgramKind::Pressure => include_str!("../shaders/pressure.wgsl"),
            ProgramKind::GradientSubtract => include_str!("../shaders/gradient_subtract.wgsl"),
            ProgramKind::Display | ProgramKind::DisplayShaded => {
                include_str!("../shaders/display.wgsl")
            }
        }
    }

    /// Keywords switched on for this variant. Each maps to a WGSL
    /// `override` constant set to true.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            ProgramKind::DisplayShaded => &["SHADING"],
            _ => &[],
        }
    }

    /// Pipeline-overridable constants: every keyword set to true, plus the
    /// numeric limits a program declares.
    pub fn constants(self) -> HashMap<String, f64> {
        let mut constants: HashMap<String, f64> = self
            .keywords()
            .iter()
            .map(|keyword| (keyword.to_string(), 1.0))
            .collect();
        if self == ProgramKind::Vorticity {
            constants.insert("VELOCITY_LIMIT".to_string(), f64::from(VELOCITY_LIMIT));
        }
        constants
    }

    /// Field formats this program renders into. Display targets depend on
    /// the output surface and are supplied by the caller.
    fn field_targets(self, formats: &FieldFormats) -> Vec<wgpu::TextureFormat> {
        match self {
            ProgramKind::Clear
            | ProgramKind::Divergence
            | ProgramKind::Curl
            | ProgramKind::Pressure => vec![formats.r],
            ProgramKind::Vorticity | ProgramKind::GradientSubtract => vec![formats.rg],
            ProgramKind::Splat | ProgramKind::Advection => vec![formats.rg, formats.rgba],
            ProgramKind::Display | ProgramKind::DisplayShaded => Vec::new(),
        }
    }

    fn is_display(self) -> bool {
        matches!(self, ProgramKind::Display | ProgramKind::DisplayShaded)
    }
}

// Shared vertex stage followed by the fragment stage.
pub fn shader_source(kind: ProgramKind) -> String {
    format!("{}\n{}", COMMON_SOURCE, kind.fragment_source())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderInput {
    pub texture: u32,
    pub sampler: u32,
}

/// Collects the texture inputs declared in the input group. A texture
/// `u_x` pairs with the sampler `u_x_sampler`.
pub fn reflect_inputs(module: &naga::Module) -> BTreeMap<String, ShaderInput> {
    let mut textures = BTreeMap::new();
    let mut samplers = HashMap::new();

    for (_, var) in module.global_variables.iter() {
        let (Some(binding), Some(name)) = (&var.binding, &var.name) else {
            continue;
        };
        if binding.group != INPUT_GROUP {
            continue;
        }
        match module.types[var.ty].inner {
            naga::TypeInner::Image { .. } => {
                textures.insert(name.clone(), binding.binding);
            }
            naga::TypeInner::Sampler { .. } => {
                samplers.insert(name.clone(), binding.binding);
            }
            _ => {}
        }
    }

    textures
        .into_iter()
        .filter_map(|(name, texture)| {
            let sampler = samplers.get(&format!("{name}_sampler")).copied();
            if sampler.is_none() {
                log::warn!("texture `{name}` has no matching sampler");
            }
            sampler.map(|sampler| (name, ShaderInput { texture, sampler }))
        })
        .collect()
}

/// A compiled pass: pipeline, input layout and name lookup table.
pub struct Program {
    kind: ProgramKind,
    format: wgpu::TextureFormat,
    pipeline: wgpu::RenderPipeline,
    input_layout: Arc<wgpu::BindGroupLayout>,
    inputs: BTreeMap<String, ShaderInput>,
}

impl Program {
    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }

    pub fn input(&self, name: &str) -> Option<ShaderInput> {
        self.inputs.get(name).copied()
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    /// Builds the input bind group. Every declared input must be bound
    /// exactly by name.
    pub fn bind(
        &self,
        device: &wgpu::Device,
        targets: &[(&str, &RenderTarget)],
    ) -> Result<wgpu::BindGroup> {
        let mut entries = Vec::with_capacity(targets.len() * 2);
        for (name, target) in targets {
            let input = self.input(name).ok_or_else(|| FluidError::UnknownInput {
                program: self.kind.name(),
                input: name.to_string(),
            })?;
            entries.push(wgpu::BindGroupEntry {
                binding: input.texture,
                resource: wgpu::BindingResource::TextureView(target.view()),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: input.sampler,
                resource: wgpu::BindingResource::Sampler(target.sampler()),
            });
        }

        if let Some(missing) = self
            .inputs
            .keys()
            .find(|name| !targets.iter().any(|(bound, _)| *bound == name.as_str()))
        {
            return Err(FluidError::MissingInput {
                program: self.kind.name(),
                input: missing.clone(),
            });
        }

        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.kind.name()),
            layout: &self.input_layout,
            entries: &entries,
        }))
    }
}

pub struct ProgramCache {
    programs: HashMap<(ProgramKind, wgpu::TextureFormat), Program>,
}

impl ProgramCache {
    /// Compiles each program for every format it writes. Display variants
    /// are built for each of `display_formats`.
    pub fn new(
        ctx: &GpuContext,
        uniform_layout: &wgpu::BindGroupLayout,
        display_formats: &[wgpu::TextureFormat],
    ) -> Result<Self> {
        let formats = ctx.formats();
        let mut programs = HashMap::new();

        for kind in ProgramKind::ALL {
            let source = shader_source(kind);
            let module = naga::front::wgsl::parse_str(&source).map_err(|err| {
                FluidError::ShaderCompile {
                    program: kind.name(),
                    message: err.emit_to_string(&source),
                }
            })?;
            let inputs = reflect_inputs(&module);

            let targets = if kind.is_display() {
                display_formats.to_vec()
            } else {
                kind.field_targets(&formats)
            };

            ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let shader = ctx
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(kind.name()),
                    source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
                });
            let input_layout = Arc::new(input_layout(&ctx.device, kind, &inputs));
            let pipeline_layout = ctx
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(kind.name()),
                    bind_group_layouts: &[uniform_layout, &input_layout],
                    push_constant_ranges: &[],
                });
            let constants = kind.constants();

            let mut built = Vec::with_capacity(targets.len());
            for format in targets {
                let pipeline = create_pipeline(
                    &ctx.device,
                    kind,
                    &shader,
                    &pipeline_layout,
                    &constants,
                    format,
                );
                built.push((format, pipeline));
            }
            if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
                return Err(FluidError::ProgramLink {
                    program: kind.name(),
                    message: err.to_string(),
                });
            }

            for (format, pipeline) in built {
                programs.insert(
                    (kind, format),
                    Program {
                        kind,
                        format,
                        pipeline,
                        input_layout: Arc::clone(&input_layout),
                        inputs: inputs.clone(),
                    },
                );
            }
        }

        log::info!("compiled {} programs", programs.len());
        Ok(Self { programs })
    }

    pub fn get(&self, kind: ProgramKind, format: wgpu::TextureFormat) -> Result<&Program> {
        self.programs
            .get(&(kind, format))
            .ok_or(FluidError::MissingProgram {
                program: kind.name(),
                format,
            })
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

fn input_layout(
    device: &wgpu::Device,
    kind: ProgramKind,
    inputs: &BTreeMap<String, ShaderInput>,
) -> wgpu::BindGroupLayout {
    let entries: Vec<_> = inputs
        .values()
        .flat_map(|input| {
            [
                wgpu::BindGroupLayoutEntry {
                    binding: input.texture,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: input.sampler,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ]
        })
        .collect();

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(kind.name()),
        entries: &entries,
    })
}

fn create_pipeline(
    device: &wgpu::Device,
    kind: ProgramKind,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    constants: &HashMap<String, f64>,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(kind.name()),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: "vs_main",
            buffers: &[],
            // Overrides resolve per stage, so both stages get every value.
            compilation_options: wgpu::PipelineCompilationOptions {
                constants,
                ..Default::default()
            },
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions {
                constants,
                ..Default::default()
            },
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniforms::PassUniforms;
    use std::mem::{offset_of, size_of};

    fn parse(kind: ProgramKind) -> naga::Module {
        let source = shader_source(kind);
        naga::front::wgsl::parse_str(&source)
            .unwrap_or_else(|e| panic!("{} failed to parse:\n{}", kind.name(), e.emit_to_string(&source)))
    }

    #[test]
    fn every_program_parses_and_validates() {
        for kind in ProgramKind::ALL {
            let module = parse(kind);
            let mut validator = naga::valid::Validator::new(
                naga::valid::ValidationFlags::all(),
                naga::valid::Capabilities::all(),
            );
            if let Err(e) = validator.validate(&module) {
                panic!("{} failed to validate: {e:?}", kind.name());
            }
        }
    }

    #[test]
    fn pass_uniforms_layout_matches_wgsl() {
        let module = parse(ProgramKind::Splat);
        let mut layouter = naga::proc::Layouter::default();
        layouter.update(module.to_ctx()).expect("layout");

        let (handle, ty) = module
            .types
            .iter()
            .find(|(_, ty)| ty.name.as_deref() == Some("PassUniforms"))
            .expect("PassUniforms declared");
        assert_eq!(layouter[handle].size as usize, size_of::<PassUniforms>());

        let naga::TypeInner::Struct { members, .. } = &ty.inner else {
            panic!("PassUniforms is not a struct");
        };
        let offset = |name: &str| {
            members
                .iter()
                .find(|m| m.name.as_deref() == Some(name))
                .map(|m| m.offset as usize)
                .unwrap_or_else(|| panic!("member {name} missing"))
        };
        assert_eq!(offset("texel_size"), offset_of!(PassUniforms, texel_size));
        assert_eq!(offset("point"), offset_of!(PassUniforms, point));
        assert_eq!(offset("color"), offset_of!(PassUniforms, color));
        assert_eq!(offset("dt"), offset_of!(PassUniforms, dt));
        assert_eq!(offset("dissipation"), offset_of!(PassUniforms, dissipation));
        assert_eq!(offset("curl"), offset_of!(PassUniforms, curl));
        assert_eq!(offset("radius"), offset_of!(PassUniforms, radius));
        assert_eq!(offset("aspect_ratio"), offset_of!(PassUniforms, aspect_ratio));
        assert_eq!(offset("scale"), offset_of!(PassUniforms, scale));
    }

    #[test]
    fn reflection_finds_named_inputs() {
        let inputs = reflect_inputs(&parse(ProgramKind::Advection));
        let names: Vec<_> = inputs.keys().map(String::as_str).collect();
        assert_eq!(names, ["u_source", "u_velocity"]);
        assert_eq!(inputs["u_velocity"], ShaderInput { texture: 0, sampler: 1 });
        assert_eq!(inputs["u_source"], ShaderInput { texture: 2, sampler: 3 });

        let inputs = reflect_inputs(&parse(ProgramKind::Display));
        assert_eq!(inputs.len(), 1);
        assert!(inputs.contains_key("u_texture"));
    }

    #[test]
    fn uniform_block_is_not_an_input() {
        for kind in ProgramKind::ALL {
            let inputs = reflect_inputs(&parse(kind));
            assert!(!inputs.is_empty(), "{} has no inputs", kind.name());
            assert!(!inputs.contains_key("params"));
        }
    }

    #[test]
    fn only_shaded_display_sets_keywords() {
        for kind in ProgramKind::ALL {
            let expected: &[&str] = if kind == ProgramKind::DisplayShaded {
                &["SHADING"]
            } else {
                &[]
            };
            assert_eq!(kind.keywords(), expected);
        }
        let module = parse(ProgramKind::DisplayShaded);
        assert!(module
            .overrides
            .iter()
            .any(|(_, o)| o.name.as_deref() == Some("SHADING")));
    }

    #[test]
    fn every_declared_override_gets_a_value() {
        for kind in ProgramKind::ALL {
            let constants = kind.constants();
            for (_, o) in parse(kind).overrides.iter() {
                let name = o.name.as_deref().expect("named override");
                assert!(
                    o.init.is_some() || constants.contains_key(name),
                    "{} leaves {name} unset",
                    kind.name()
                );
            }
        }
        assert_eq!(
            ProgramKind::Vorticity.constants()["VELOCITY_LIMIT"],
            f64::from(VELOCITY_LIMIT)
        );
        assert!(!ProgramKind::Advection.constants().contains_key("VELOCITY_LIMIT"));
    }
}
