// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Upper bound per channel for press colors. Splats add up on the display, so
/// colors stay dim.
pub const MAX_PRESS_CHANNEL: f32 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splat {
    /// Normalized position, y up.
    pub point: [f32; 2],
    /// Displacement since the previous frame, normalized units.
    pub delta: [f32; 2],
    pub color: [f32; 3],
}

/// Tracks the pointer between frames. Never touches GPU state.
#[derive(Debug)]
pub struct PointerTracker {
    position: Option<[f32; 2]>,
    delta: [f32; 2],
    down: bool,
    moved: bool,
    color: [f32; 3],
    rng: StdRng,
}

impl Default for PointerTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerTracker {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            position: None,
            delta: [0.0, 0.0],
            down: false,
            moved: false,
            color: [0.1, 0.1, 0.1],
            rng,
        }
    }

    /// Pointer moved to `(px, py)` device pixels on a surface of
    /// `width x height` pixels.
    pub fn on_move(&mut self, px: f32, py: f32, width: f32, height: f32) {
        let x = px / width.max(1.0);
        let y = 1.0 - py / height.max(1.0);
        if let Some([old_x, old_y]) = self.position {
            self.delta[0] += x - old_x;
            self.delta[1] += y - old_y;
        }
        self.position = Some([x, y]);
        self.moved = true;
    }

    pub fn on_down(&mut self) {
        self.down = true;
        self.color = [
            self.rng.gen_range(0.0..MAX_PRESS_CHANNEL),
            self.rng.gen_range(0.0..MAX_PRESS_CHANNEL),
            self.rng.gen_range(0.0..MAX_PRESS_CHANNEL),
        ];
    }

    pub fn on_up(&mut self) {
        self.down = false;
    }

    pub fn is_down(&self) -> bool {
        self.down
    }

    pub fn has_moved(&self) -> bool {
        self.moved
    }

    pub fn position(&self) -> Option<[f32; 2]> {
        self.position
    }

    pub fn color(&self) -> [f32; 3] {
        self.color
    }

    /// Consumes this frame's input. Yields a splat when the pointer moved or
    /// is held down, then clears the moved flag and the displacement.
    pub fn take_splat(&mut self) -> Option<Splat> {
        if !(self.moved || self.down) {
            return None;
        }
        let point = self.position?;
        let splat = Splat {
            point,
            delta: self.delta,
            color: self.color,
        };
        self.discard();
        Some(splat)
    }

    pub fn discard(&mut self) {
        self.moved = false;
        self.delta = [0.0, 0.0];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_normalizes_and_flips_y() {
        let mut pointer = PointerTracker::with_seed(1);
        pointer.on_move(200.0, 100.0, 400.0, 400.0);
        assert_eq!(pointer.position(), Some([0.5, 0.75]));
        assert!(pointer.has_moved());
    }

    #[test]
    fn first_move_has_no_displacement() {
        let mut pointer = PointerTracker::with_seed(1);
        pointer.on_move(300.0, 300.0, 400.0, 400.0);
        let splat = pointer.take_splat().unwrap();
        assert_eq!(splat.delta, [0.0, 0.0]);
    }

    #[test]
    fn displacement_is_y_up() {
        let mut pointer = PointerTracker::with_seed(1);
        pointer.on_move(100.0, 200.0, 400.0, 400.0);
        pointer.take_splat();
        pointer.on_move(140.0, 160.0, 400.0, 400.0);
        let splat = pointer.take_splat().unwrap();
        assert!((splat.delta[0] - 0.1).abs() < 1e-6);
        assert!((splat.delta[1] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn moves_within_one_frame_accumulate() {
        let mut pointer = PointerTracker::with_seed(1);
        pointer.on_move(0.0, 0.0, 100.0, 100.0);
        pointer.take_splat();
        pointer.on_move(10.0, 0.0, 100.0, 100.0);
        pointer.on_move(30.0, 0.0, 100.0, 100.0);
        let splat = pointer.take_splat().unwrap();
        assert!((splat.delta[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn moved_flag_is_consumed_once() {
        let mut pointer = PointerTracker::with_seed(1);
        pointer.on_move(10.0, 10.0, 100.0, 100.0);
        assert!(pointer.take_splat().is_some());
        assert!(!pointer.has_moved());
        assert!(pointer.take_splat().is_none());
    }

    #[test]
    fn held_pointer_splats_every_frame_without_force() {
        let mut pointer = PointerTracker::with_seed(1);
        pointer.on_move(10.0, 10.0, 100.0, 100.0);
        pointer.on_move(20.0, 10.0, 100.0, 100.0);
        pointer.on_down();
        assert!(pointer.take_splat().is_some());
        let held = pointer.take_splat().unwrap();
        assert_eq!(held.delta, [0.0, 0.0]);
        pointer.on_up();
        assert!(pointer.take_splat().is_none());
    }

    #[test]
    fn press_colors_stay_dim() {
        let mut pointer = PointerTracker::with_seed(7);
        for _ in 0..100 {
            pointer.on_down();
            for channel in pointer.color() {
                assert!((0.0..MAX_PRESS_CHANNEL).contains(&channel));
            }
            pointer.on_up();
        }
    }

    #[test]
    fn no_splat_before_any_position() {
        let mut pointer = PointerTracker::with_seed(1);
        pointer.on_down();
        assert!(pointer.take_splat().is_none());
    }
}
