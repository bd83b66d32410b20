// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use crate::error::{FluidError, Result};

/// Texture precision available on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityTier {
    /// 32-bit float fields with linear filtering (`FLOAT32_FILTERABLE`).
    Full,
    /// 16-bit float fields, filterable on every adapter.
    Half,
}

/// Texture formats for the three field shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldFormats {
    pub rgba: wgpu::TextureFormat,
    pub rg: wgpu::TextureFormat,
    // r: pressure, divergence, curl
    pub r: wgpu::TextureFormat,
}

impl CapabilityTier {
    pub fn formats(self) -> FieldFormats {
        match self {
            CapabilityTier::Full => FieldFormats {
                rgba: wgpu::TextureFormat::Rgba32Float,
                rg: wgpu::TextureFormat::Rg32Float,
                r: wgpu::TextureFormat::R32Float,
            },
            CapabilityTier::Half => FieldFormats {
                rgba: wgpu::TextureFormat::Rgba16Float,
                rg: wgpu::TextureFormat::Rg16Float,
                r: wgpu::TextureFormat::R16Float,
            },
        }
    }

    fn required_features(self) -> wgpu::Features {
        match self {
            CapabilityTier::Full => wgpu::Features::FLOAT32_FILTERABLE,
            CapabilityTier::Half => wgpu::Features::empty(),
        }
    }
}

impl FieldFormats {
    pub fn all(&self) -> [wgpu::TextureFormat; 3] {
        [self.rgba, self.rg, self.r]
    }
}

/// Adapter, device and queue plus the negotiated tier. Owned by exactly one
/// fluid session; never shared with another renderer.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    tier: CapabilityTier,
}

impl GpuContext {
    /// Acquires an adapter (compatible with `surface` when given) and a
    /// device, trying the full tier before falling back to half floats.
    pub async fn new(
        instance: wgpu::Instance,
        surface: Option<&wgpu::Surface<'_>>,
        preferred: CapabilityTier,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(FluidError::ContextUnavailable)?;

        let info = adapter.get_info();
        log::info!("adapter: {} ({:?})", info.name, info.backend);

        let tiers: &[CapabilityTier] = match preferred {
            CapabilityTier::Full => &[CapabilityTier::Full, CapabilityTier::Half],
            CapabilityTier::Half => &[CapabilityTier::Half],
        };

        let mut last_error = None;
        for &tier in tiers {
            if !tier_supported(&adapter, tier) {
                log::info!("{tier:?} tier unsupported by adapter");
                continue;
            }
            match adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("Fluid Device"),
                        required_features: tier.required_features(),
                        required_limits: wgpu::Limits::downlevel_defaults()
                            .using_resolution(adapter.limits()),
                        memory_hints: Default::default(),
                    },
                    None,
                )
                .await
            {
                Ok((device, queue)) => {
                    log::info!("{tier:?} tier, field formats {:?}", tier.formats());
                    return Ok(Self {
                        instance,
                        adapter,
                        device,
                        queue,
                        tier,
                    });
                }
                Err(err) => {
                    log::warn!("{tier:?} tier device request failed: {err}");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) => Err(FluidError::DeviceRequest(err)),
            None => Err(FluidError::ContextUnavailable),
        }
    }

    /// Blocking context without a surface (offscreen rendering and tests).
    pub fn headless(preferred: CapabilityTier) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        pollster::block_on(Self::new(instance, None, preferred))
    }

    pub fn tier(&self) -> CapabilityTier {
        self.tier
    }

    pub fn formats(&self) -> FieldFormats {
        self.tier.formats()
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }
}

// Feature present and every field format renderable + filterable.
fn tier_supported(adapter: &wgpu::Adapter, tier: CapabilityTier) -> bool {
    if !adapter.features().contains(tier.required_features()) {
        return false;
    }
    tier.formats().all().into_iter().all(|format| {
        let features = adapter.get_texture_format_features(format);
        let usable = features.allowed_usages.contains(
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        // 32-bit float filtering comes from the device feature, not the format flags.
        let filterable = tier == CapabilityTier::Full
            || features
                .flags
                .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE);
        usable && filterable
    })
}

pub struct SurfaceTarget {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

impl SurfaceTarget {
    /// Alpha-enabled, no depth, FIFO presentation so frames follow the
    /// display refresh.
    pub fn new(
        surface: wgpu::Surface<'static>,
        ctx: &GpuContext,
        width: u32,
        height: u32,
    ) -> Self {
        let caps = surface.get_capabilities(&ctx.adapter);
        // The display pass writes final values; avoid a second sRGB encode.
        let format = caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .copied()
            .unwrap_or(caps.formats[0]);
        let alpha_mode = [
            wgpu::CompositeAlphaMode::PreMultiplied,
            wgpu::CompositeAlphaMode::PostMultiplied,
        ]
        .into_iter()
        .find(|mode| caps.alpha_modes.contains(mode))
        .unwrap_or(caps.alpha_modes[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&ctx.device, &config);
        log::info!("surface {}x{} {:?} {:?}", config.width, config.height, format, alpha_mode);
        Self { surface, config }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(device, &self.config);
        }
    }

    pub fn reconfigure(&self, device: &wgpu::Device) {
        self.surface.configure(device, &self.config);
    }
}
