// Aether Fluid - GPU Stable-Fluids Simulation
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use crate::config::{GridSizing, SimulationConfig, SplatColorMode};
use serde::{Deserialize, Serialize};

/// Partial configuration change. Every field is optional; unknown keys are
/// ignored so updates produced for other generators do not fail to parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub sim_resolution: Option<u32>,
    pub dye_resolution: Option<u32>,
    pub density_dissipation: Option<f32>,
    pub velocity_dissipation: Option<f32>,
    pub pressure: Option<f32>,
    pub pressure_iterations: Option<u32>,
    pub curl: Option<f32>,
    pub splat_radius: Option<f32>,
    pub splat_force: Option<f32>,
    pub shading: Option<bool>,
    pub paused: Option<bool>,
    pub splat_color: Option<SplatColorMode>,
    pub color_speed: Option<f32>,
    pub color_palette: Option<Vec<String>>,
    pub grid_sizing: Option<GridSizing>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChange {
    pub changed: bool,
    pub needs_reallocation: bool,
}

impl ConfigUpdate {
    pub fn apply_to(&self, config: &mut SimulationConfig) -> ConfigChange {
        let before = config.clone();

        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(value) = &self.$field {
                        config.$field = value.clone();
                    }
                )*
            };
        }
        merge!(
            sim_resolution,
            dye_resolution,
            density_dissipation,
            velocity_dissipation,
            pressure,
            pressure_iterations,
            curl,
            splat_radius,
            splat_force,
            shading,
            paused,
            splat_color,
            color_speed,
            color_palette,
            grid_sizing,
        );

        ConfigChange {
            changed: before != *config,
            needs_reallocation: before.sim_resolution != config.sim_resolution
                || before.dye_resolution != config.dye_resolution
                || before.grid_sizing != config.grid_sizing,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandEnvelope {
    intent: String,
    #[serde(default)]
    config_update: Option<ConfigUpdate>,
    #[serde(default)]
    message: Option<String>,
}

/// Text commands arriving from outside the render loop.
pub struct ConfigCommand;

impl ConfigCommand {
    /// Accepts a bare update object or a command envelope
    /// `{"intent": "fluid", "configUpdate": {...}, "message": "..."}`.
    /// Envelopes aimed at another generator yield `Ok(None)`.
    pub fn parse(line: &str) -> anyhow::Result<Option<ConfigUpdate>> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        if value.get("intent").is_none() {
            return Ok(Some(serde_json::from_value(value)?));
        }

        let envelope: CommandEnvelope = serde_json::from_value(value)?;
        if envelope.intent != "fluid" {
            log::debug!("ignoring command for generator {:?}", envelope.intent);
            return Ok(None);
        }
        if let Some(message) = &envelope.message {
            log::info!("{message}");
        }
        Ok(envelope.config_update)
    }
}

/// Owns the live configuration. The frame driver borrows it every tick, so
/// updates take effect on the next frame. Resolution changes are latched as
/// a reallocation request instead of being polled from the config.
#[derive(Debug, Clone)]
pub struct ConfigBridge {
    config: SimulationConfig,
    reallocation_pending: bool,
}

impl ConfigBridge {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            reallocation_pending: false,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn apply(&mut self, update: &ConfigUpdate) -> ConfigChange {
        let change = update.apply_to(&mut self.config);
        if change.needs_reallocation {
            log::info!(
                "resolution change requested: sim {} dye {} ({:?})",
                self.config.sim_resolution,
                self.config.dye_resolution,
                self.config.grid_sizing
            );
            self.reallocation_pending = true;
        }
        change
    }

    pub fn replace(&mut self, config: SimulationConfig) {
        if config.sim_resolution != self.config.sim_resolution
            || config.dye_resolution != self.config.dye_resolution
            || config.grid_sizing != self.config.grid_sizing
        {
            self.reallocation_pending = true;
        }
        self.config = config;
    }

    pub fn take_reallocation(&mut self) -> bool {
        std::mem::take(&mut self.reallocation_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_parameters_do_not_request_reallocation() {
        let mut bridge = ConfigBridge::new(SimulationConfig::default());
        let change = bridge.apply(&ConfigUpdate {
            curl: Some(55.0),
            shading: Some(false),
            ..ConfigUpdate::default()
        });
        assert!(change.changed);
        assert!(!change.needs_reallocation);
        assert_eq!(bridge.config().curl, 55.0);
        assert!(!bridge.config().shading);
        assert!(!bridge.take_reallocation());
    }

    #[test]
    fn resolution_change_is_latched_until_taken() {
        let mut bridge = ConfigBridge::new(SimulationConfig::default());
        let change = bridge.apply(&ConfigUpdate {
            dye_resolution: Some(512),
            ..ConfigUpdate::default()
        });
        assert!(change.needs_reallocation);
        assert!(bridge.take_reallocation());
        assert!(!bridge.take_reallocation());
    }

    #[test]
    fn setting_same_value_is_not_a_change() {
        let mut bridge = ConfigBridge::new(SimulationConfig::default());
        let change = bridge.apply(&ConfigUpdate {
            sim_resolution: Some(128),
            ..ConfigUpdate::default()
        });
        assert_eq!(change, ConfigChange::default());
    }

    #[test]
    fn replace_with_new_grid_sizing_requests_reallocation() {
        let mut bridge = ConfigBridge::new(SimulationConfig::default());
        bridge.replace(SimulationConfig {
            grid_sizing: GridSizing::Viewport,
            ..SimulationConfig::default()
        });
        assert!(bridge.take_reallocation());
    }

    #[test]
    fn bare_update_is_parsed() {
        let update = ConfigCommand::parse(r#"{"curl": 80, "splatRadius": 0.5}"#)
            .unwrap()
            .unwrap();
        assert_eq!(update.curl, Some(80.0));
        assert_eq!(update.splat_radius, Some(0.5));
        assert_eq!(update.shading, None);
    }

    #[test]
    fn fluid_envelope_yields_its_update() {
        let line = r#"{"intent":"fluid","configUpdate":{"densityDissipation":0.5},"message":"Thinner dye"}"#;
        let update = ConfigCommand::parse(line).unwrap().unwrap();
        assert_eq!(update.density_dissipation, Some(0.5));
    }

    #[test]
    fn other_generator_envelope_is_ignored() {
        let line = r#"{"intent":"planet","configUpdate":{"detail":20}}"#;
        assert_eq!(ConfigCommand::parse(line).unwrap(), None);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let update = ConfigCommand::parse(r#"{"wireframe": true, "paused": true}"#)
            .unwrap()
            .unwrap();
        assert_eq!(update.paused, Some(true));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(ConfigCommand::parse("{curl: 3").is_err());
    }
}
