// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::time::Instant;

use crate::bridge::ConfigBridge;
use crate::error::Result;
use crate::pointer::PointerTracker;
use crate::solver::FluidSession;

/// Longest step a single frame may take, in seconds. Long stalls (a hidden
/// window, a debugger break) would otherwise blow the solver up.
pub const MAX_FRAME_DT: f32 = 0.016;

/// Clamps a frame step to `[0, MAX_FRAME_DT]`. Non-finite steps become zero.
pub fn clamp_dt(seconds: f32) -> f32 {
    if seconds.is_finite() {
        seconds.clamp(0.0, MAX_FRAME_DT)
    } else {
        0.0
    }
}

/// Runs the session once per display refresh. Frames are strictly
/// sequential: every call borrows the session mutably.
#[derive(Debug, Default)]
pub struct FrameDriver {
    last_frame: Option<Instant>,
    cancelled: bool,
    frames: u64,
}

impl FrameDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wall-clock step since the previous call, clamped. The first call
    /// returns zero.
    pub fn frame_dt(&mut self, now: Instant) -> f32 {
        let dt = self
            .last_frame
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame = Some(now);
        clamp_dt(dt)
    }

    /// One refresh tick. Returns whether the caller should schedule
    /// another.
    pub fn tick(
        &mut self,
        now: Instant,
        session: &mut FluidSession,
        bridge: &mut ConfigBridge,
        pointer: &mut PointerTracker,
        output: &wgpu::TextureView,
    ) -> Result<bool> {
        if self.cancelled {
            return Ok(false);
        }
        let dt = self.frame_dt(now);
        self.advance(dt, session, bridge, pointer, output)?;
        Ok(self.is_running())
    }

    pub fn advance(
        &mut self,
        dt: f32,
        session: &mut FluidSession,
        bridge: &mut ConfigBridge,
        pointer: &mut PointerTracker,
        output: &wgpu::TextureView,
    ) -> Result<()> {
        if self.cancelled {
            return Ok(());
        }

        if bridge.take_reallocation() {
            log::info!("reallocating fields after config change");
            session.reallocate(bridge.config())?;
        }

        let config = bridge.config();
        let splat = if config.paused {
            pointer.discard();
            None
        } else {
            pointer.take_splat()
        };
        session.frame(clamp_dt(dt), config, splat, output)?;
        self.frames += 1;
        Ok(())
    }

    pub fn cancel(&mut self) {
        if !self.cancelled {
            log::info!("frame driver stopped after {} frames", self.frames);
        }
        self.cancelled = true;
    }

    pub fn is_running(&self) -> bool {
        !self.cancelled
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn dt_is_clamped() {
        assert_eq!(clamp_dt(0.008), 0.008);
        assert_eq!(clamp_dt(0.5), MAX_FRAME_DT);
        assert_eq!(clamp_dt(-1.0), 0.0);
        assert_eq!(clamp_dt(f32::NAN), 0.0);
        assert_eq!(clamp_dt(f32::INFINITY), 0.0);
    }

    #[test]
    fn first_frame_has_zero_dt() {
        let mut driver = FrameDriver::new();
        let start = Instant::now();
        assert_eq!(driver.frame_dt(start), 0.0);
        let dt = driver.frame_dt(start + Duration::from_millis(8));
        assert!((dt - 0.008).abs() < 1e-6);
    }

    #[test]
    fn long_stall_is_clamped() {
        let mut driver = FrameDriver::new();
        let start = Instant::now();
        driver.frame_dt(start);
        assert_eq!(driver.frame_dt(start + Duration::from_secs(3)), MAX_FRAME_DT);
    }

    #[test]
    fn clock_going_backwards_gives_zero() {
        let mut driver = FrameDriver::new();
        let start = Instant::now() + Duration::from_secs(1);
        driver.frame_dt(start);
        assert_eq!(driver.frame_dt(start - Duration::from_millis(5)), 0.0);
    }

    #[test]
    fn cancel_stops_the_driver() {
        let mut driver = FrameDriver::new();
        assert!(driver.is_running());
        driver.cancel();
        driver.cancel();
        assert!(!driver.is_running());
        assert_eq!(driver.frames(), 0);
    }
}
