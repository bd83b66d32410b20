// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use winit::{
    event::{ElementState, Event, KeyEvent, MouseButton, WindowEvent},
    event_loop::{EventLoop, EventLoopProxy},
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

use aether_fluid::{
    CapabilityTier, ConfigBridge, ConfigCommand, ConfigUpdate, FluidError, FluidSession,
    FrameDriver, GpuContext, PointerTracker, SimulationConfig, SplatColorMode, SurfaceTarget,
    Viewport,
};

#[derive(Parser, Debug)]
#[command(name = "aether-fluid", version, about = "Interactive GPU fluid simulation")]
struct Cli {
    /// Initial configuration (JSON, camelCase keys, missing keys use defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Window width in logical pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Window height in logical pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Read configuration updates from stdin, one JSON object per line
    #[arg(long)]
    listen: bool,

    /// Seed for pointer splat colors
    #[arg(long)]
    seed: Option<u64>,

    /// Start on 16-bit float fields even when 32-bit filtering is available
    #[arg(long)]
    half_precision: bool,
}

/// Everything that exists only when a device could be acquired.
struct FluidApp {
    window: Arc<Window>,
    surface: SurfaceTarget,
    session: FluidSession,
    driver: FrameDriver,
    pointer: PointerTracker,
}

impl FluidApp {
    fn viewport(&self) -> Viewport {
        Viewport::from_physical(
            self.surface.config.width,
            self.surface.config.height,
            self.window.scale_factor(),
        )
    }

    fn resize(&mut self, width: u32, height: u32, bridge: &ConfigBridge) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface
            .resize(&self.session.context().device, width, height);
        let viewport = self.viewport();
        match self.session.resize(bridge.config(), viewport) {
            Ok(true) => log::info!("resized to {width}x{height}"),
            Ok(false) => {}
            Err(err) => log::error!("resize failed: {err}"),
        }
    }

    fn render(&mut self, bridge: &mut ConfigBridge) -> aether_fluid::Result<bool> {
        let frame = self.surface.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let keep_running = self.driver.tick(
            Instant::now(),
            &mut self.session,
            bridge,
            &mut self.pointer,
            &view,
        )?;
        frame.present();
        Ok(keep_running)
    }
}

fn create_app(
    window: Arc<Window>,
    config: &SimulationConfig,
    pointer: PointerTracker,
    tier: CapabilityTier,
) -> anyhow::Result<Option<FluidApp>> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let surface = instance
        .create_surface(window.clone())
        .context("creating window surface")?;

    let ctx = match pollster::block_on(GpuContext::new(instance, Some(&surface), tier)) {
        Ok(ctx) => ctx,
        Err(FluidError::ContextUnavailable) => {
            log::error!("no graphics adapter available; the window stays blank");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    let size = window.inner_size();
    let surface = SurfaceTarget::new(surface, &ctx, size.width, size.height);
    let viewport = Viewport::from_physical(
        surface.config.width,
        surface.config.height,
        window.scale_factor(),
    );
    let session = FluidSession::new(ctx, config, viewport, surface.format())
        .context("starting fluid session")?;

    Ok(Some(FluidApp {
        window,
        surface,
        session,
        driver: FrameDriver::new(),
        pointer,
    }))
}

/// Forwards stdin lines to the event loop. Parsing happens here; applying
/// stays on the main thread.
fn spawn_stdin_listener(proxy: EventLoopProxy<ConfigUpdate>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log::warn!("stdin closed: {err}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match ConfigCommand::parse(&line) {
                Ok(Some(update)) => {
                    if proxy.send_event(update).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => log::warn!("ignoring malformed config update: {err:#}"),
            }
        }
        log::debug!("stdin listener finished");
    });
}

/// Key bindings: Space pause, S shading, C splat color mode.
fn key_update(code: KeyCode, config: &SimulationConfig) -> Option<ConfigUpdate> {
    match code {
        KeyCode::Space => Some(ConfigUpdate {
            paused: Some(!config.paused),
            ..Default::default()
        }),
        KeyCode::KeyS => Some(ConfigUpdate {
            shading: Some(!config.shading),
            ..Default::default()
        }),
        KeyCode::KeyC => Some(ConfigUpdate {
            splat_color: Some(match config.splat_color {
                SplatColorMode::Pressed => SplatColorMode::Palette,
                SplatColorMode::Palette => SplatColorMode::Pressed,
            }),
            ..Default::default()
        }),
        _ => None,
    }
}

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("aether_fluid=info"))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SimulationConfig::load_from_disk(path)?,
        None => SimulationConfig::default(),
    };
    let mut bridge = ConfigBridge::new(config);
    let pointer = cli
        .seed
        .map(PointerTracker::with_seed)
        .unwrap_or_default();
    let tier = if cli.half_precision {
        CapabilityTier::Half
    } else {
        CapabilityTier::Full
    };

    let event_loop = EventLoop::<ConfigUpdate>::with_user_event()
        .build()
        .context("creating event loop")?;
    let window = Arc::new(
        event_loop
            .create_window(
                winit::window::WindowAttributes::default()
                    .with_title("Aether Fluid")
                    .with_transparent(true)
                    .with_inner_size(winit::dpi::LogicalSize::new(cli.width, cli.height)),
            )
            .context("creating window")?,
    );

    let mut app = create_app(window.clone(), bridge.config(), pointer, tier)?;

    if cli.listen {
        spawn_stdin_listener(event_loop.create_proxy());
        log::info!("listening for config updates on stdin");
    }

    event_loop.run(move |event, target| match event {
        Event::UserEvent(update) => {
            let change = bridge.apply(&update);
            if change.changed {
                log::info!("config updated");
            }
        }
        Event::WindowEvent { event, window_id } if window_id == window.id() => match event {
            WindowEvent::CloseRequested => {
                if let Some(app) = app.as_mut() {
                    app.driver.cancel();
                }
                target.exit();
            }
            WindowEvent::Resized(physical_size) => {
                if let Some(app) = app.as_mut() {
                    app.resize(physical_size.width, physical_size.height, &bridge);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if code == KeyCode::Escape {
                    target.exit();
                } else if let Some(update) = key_update(code, bridge.config()) {
                    bridge.apply(&update);
                    log::info!("{code:?}: {update:?}");
                }
            }
            WindowEvent::MouseInput {
                state: button_state,
                button: MouseButton::Left,
                ..
            } => {
                if let Some(app) = app.as_mut() {
                    match button_state {
                        ElementState::Pressed => app.pointer.on_down(),
                        ElementState::Released => app.pointer.on_up(),
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some(app) = app.as_mut() {
                    let size = &app.surface.config;
                    app.pointer.on_move(
                        position.x as f32,
                        position.y as f32,
                        size.width as f32,
                        size.height as f32,
                    );
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = app.as_mut() else {
                    return;
                };
                match state.render(&mut bridge) {
                    Ok(true) => {}
                    Ok(false) => target.exit(),
                    Err(FluidError::Surface(
                        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated,
                    )) => state
                        .surface
                        .reconfigure(&state.session.context().device),
                    Err(FluidError::Surface(wgpu::SurfaceError::OutOfMemory)) => {
                        log::error!("surface out of memory");
                        target.exit();
                    }
                    Err(err) => log::warn!("frame skipped: {err}"),
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            if let Some(app) = app.as_ref() {
                if app.driver.is_running() {
                    app.window.request_redraw();
                }
            }
        }
        _ => {}
    })?;

    Ok(())
}
