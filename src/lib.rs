// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Real-time stable-fluids solver rendered with wgpu fragment passes.
//!
//! A [`FluidSession`] owns the device, the compiled programs and every field
//! texture. A [`FrameDriver`] advances it once per display refresh, reading
//! live settings from a [`ConfigBridge`] and pointer input from a
//! [`PointerTracker`].

pub mod bridge;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod framebuffer;
pub mod pointer;
pub mod programs;
pub mod solver;
pub mod uniforms;

pub use bridge::{ConfigBridge, ConfigChange, ConfigCommand, ConfigUpdate};
pub use config::{GridSizing, SimulationConfig, SplatColorMode};
pub use context::{CapabilityTier, FieldFormats, GpuContext, SurfaceTarget};
pub use driver::{clamp_dt, FrameDriver, MAX_FRAME_DT};
pub use error::{FluidError, Result};
pub use framebuffer::{DoubleBuffer, Field, FieldSnapshot, FramebufferPool, RenderTarget, Viewport};
pub use pointer::{PointerTracker, Splat};
pub use programs::{ProgramCache, ProgramKind, VELOCITY_LIMIT};
pub use solver::FluidSession;
