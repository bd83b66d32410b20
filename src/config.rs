// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// Multiplier on pointer displacement for injected velocity.
pub const SPLAT_FORCE: f32 = 6000.0;
pub const PRESSURE_ITERATIONS: u32 = 20;

/// How the dye color of a splat is chosen while dragging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplatColorMode {
    /// One color drawn at press time and held for the whole drag.
    #[default]
    Pressed,
    /// Cycle through `color_palette` by elapsed simulation time.
    Palette,
}

/// How field dimensions are derived from the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridSizing {
    /// Shorter side equals the configured resolution, longer side follows the
    /// viewport aspect ratio.
    #[default]
    Resolution,
    /// Every field takes the surface's physical pixel size.
    Viewport,
}

/// Live simulation parameters. Field names serialize in camelCase so the
/// studio's state layer can hand its fluid config over unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationConfig {
    pub sim_resolution: u32,
    pub dye_resolution: u32,
    pub density_dissipation: f32,
    pub velocity_dissipation: f32,
    /// Fraction of last frame's pressure kept as the Jacobi starting guess.
    pub pressure: f32,
    pub pressure_iterations: u32,
    pub curl: f32,
    pub splat_radius: f32,
    pub splat_force: f32,
    pub shading: bool,
    pub paused: bool,
    pub splat_color: SplatColorMode,
    /// Palette steps per second in `SplatColorMode::Palette`.
    pub color_speed: f32,
    pub color_palette: Vec<String>,
    pub grid_sizing: GridSizing,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sim_resolution: 128,
            dye_resolution: 1024,
            density_dissipation: 3.5,
            velocity_dissipation: 2.0,
            pressure: 0.8,
            pressure_iterations: PRESSURE_ITERATIONS,
            curl: 30.0,
            splat_radius: 0.25,
            splat_force: SPLAT_FORCE,
            shading: true,
            paused: false,
            splat_color: SplatColorMode::Pressed,
            color_speed: 10.0,
            color_palette: vec![
                "#8b5cf6".to_string(),
                "#2563eb".to_string(),
                "#60a5fa".to_string(),
                "#a855f7".to_string(),
                "#ec4899".to_string(),
            ],
            grid_sizing: GridSizing::Resolution,
        }
    }
}

impl SimulationConfig {
    pub fn load_from_disk(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to_disk(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    pub fn palette(&self) -> Palette {
        Palette::parse(&self.color_palette)
    }
}

/// Parsed splat palette, kept alongside the entries it came from so a live
/// config is only re-parsed when its palette actually changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    entries: Vec<String>,
    colors: Vec<[f32; 3]>,
}

impl Palette {
    /// Invalid entries are skipped with a warning. An empty result falls back
    /// to white so palette mode always has a color.
    pub fn parse(entries: &[String]) -> Self {
        let mut colors = Vec::with_capacity(entries.len());
        for entry in entries {
            match parse_hex_color(entry) {
                Some(rgb) => colors.push(rgb),
                None => log::warn!("ignoring invalid palette color {entry:?}"),
            }
        }
        if colors.is_empty() {
            colors.push([1.0, 1.0, 1.0]);
        }
        Self {
            entries: entries.to_vec(),
            colors,
        }
    }

    /// Re-parses when `entries` differ from the cached source. Returns
    /// whether it did.
    pub fn refresh(&mut self, entries: &[String]) -> bool {
        if self.entries == entries {
            return false;
        }
        *self = Self::parse(entries);
        true
    }

    pub fn colors(&self) -> &[[f32; 3]] {
        &self.colors
    }

    pub fn color_at(&self, elapsed: f32, speed: f32) -> [f32; 3] {
        let step = (elapsed.max(0.0) * speed.max(0.0)).floor() as usize;
        self.colors[step % self.colors.len()]
    }
}

/// Parses `#rrggbb` (leading `#` optional) into linear 0..1 channels.
pub fn parse_hex_color(hex: &str) -> Option<[f32; 3]> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&digits[range], 16)
            .ok()
            .map(|v| v as f32 / 255.0)
    };
    Some([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_studio_fluid_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.sim_resolution, 128);
        assert_eq!(config.dye_resolution, 1024);
        assert_eq!(config.density_dissipation, 3.5);
        assert_eq!(config.velocity_dissipation, 2.0);
        assert_eq!(config.curl, 30.0);
        assert_eq!(config.splat_radius, 0.25);
        assert!(config.shading);
        assert!(!config.paused);
        assert_eq!(config.pressure_iterations, 20);
    }

    #[test]
    fn partial_camel_case_json_fills_defaults() {
        let json = r#"{ "simResolution": 64, "densityDissipation": 1.5, "shading": false }"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sim_resolution, 64);
        assert_eq!(config.density_dissipation, 1.5);
        assert!(!config.shading);
        assert_eq!(config.dye_resolution, 1024);
        assert_eq!(config.splat_color, SplatColorMode::Pressed);
    }

    #[test]
    fn enum_fields_use_lowercase_names() {
        let json = r#"{ "splatColor": "palette", "gridSizing": "viewport" }"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.splat_color, SplatColorMode::Palette);
        assert_eq!(config.grid_sizing, GridSizing::Viewport);
    }

    #[test]
    fn save_then_load_preserves_config() {
        let dir = std::env::temp_dir().join(format!("aether-fluid-config-{}", std::process::id()));
        let path = dir.join("fluid.json");
        let config = SimulationConfig {
            curl: 12.5,
            paused: true,
            ..SimulationConfig::default()
        };
        config.save_to_disk(&path).unwrap();
        let loaded = SimulationConfig::load_from_disk(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn hex_colors_parse_with_and_without_hash() {
        assert_eq!(parse_hex_color("#ff0000"), Some([1.0, 0.0, 0.0]));
        assert_eq!(parse_hex_color("00ff00"), Some([0.0, 1.0, 0.0]));
        assert_eq!(parse_hex_color("#12345"), None);
        assert_eq!(parse_hex_color("#gg0000"), None);
    }

    #[test]
    fn palette_skips_invalid_entries_and_falls_back_to_white() {
        let mut config = SimulationConfig {
            color_palette: vec!["nope".into(), "#0000ff".into()],
            ..SimulationConfig::default()
        };
        assert_eq!(config.palette().colors(), [[0.0, 0.0, 1.0]]);

        config.color_palette.clear();
        assert_eq!(config.palette().colors(), [[1.0, 1.0, 1.0]]);
    }

    #[test]
    fn palette_cycles_with_color_speed() {
        let config = SimulationConfig {
            color_palette: vec!["#ff0000".into(), "#00ff00".into()],
            color_speed: 10.0,
            ..SimulationConfig::default()
        };
        let palette = config.palette();
        assert_eq!(palette.color_at(0.05, config.color_speed), [1.0, 0.0, 0.0]);
        assert_eq!(palette.color_at(0.15, config.color_speed), [0.0, 1.0, 0.0]);
        assert_eq!(palette.color_at(0.25, config.color_speed), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn palette_reparses_only_when_entries_change() {
        let mut config = SimulationConfig::default();
        let mut palette = config.palette();
        assert!(!palette.refresh(&config.color_palette));
        assert!(!palette.refresh(&config.color_palette.clone()));

        config.color_palette = vec!["#00ff00".into()];
        assert!(palette.refresh(&config.color_palette));
        assert_eq!(palette.colors(), [[0.0, 1.0, 0.0]]);
        assert!(!palette.refresh(&config.color_palette));
    }
}
