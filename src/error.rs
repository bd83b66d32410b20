// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FluidError>;

#[derive(Debug, Error)]
pub enum FluidError {
    /// No adapter could be acquired at any capability tier. Callers render
    /// nothing and keep running.
    #[error("no graphics adapter is available")]
    ContextUnavailable,

    #[error("graphics device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("shader `{program}` failed to compile:\n{message}")]
    ShaderCompile {
        program: &'static str,
        message: String,
    },

    #[error("program `{program}` failed to link: {message}")]
    ProgramLink {
        program: &'static str,
        message: String,
    },

    #[error("program `{program}` has no input named `{input}`")]
    UnknownInput {
        program: &'static str,
        input: String,
    },

    #[error("program `{program}` input `{input}` was not bound")]
    MissingInput {
        program: &'static str,
        input: String,
    },

    #[error("program `{program}` was not built for {format:?}")]
    MissingProgram {
        program: &'static str,
        format: wgpu::TextureFormat,
    },

    #[error("cannot allocate {label} at {width}x{height}: {reason}")]
    ResourceExhaustion {
        label: String,
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("{label} holds {expected} values, got {actual}")]
    FieldSize {
        label: String,
        expected: usize,
        actual: usize,
    },

    #[error("failed to read back {label}: {reason}")]
    Readback { label: String, reason: String },

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
}
