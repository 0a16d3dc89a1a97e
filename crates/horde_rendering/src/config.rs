//! Renderer configuration.
//!
//! Loaded once at startup, usually from a TOML file:
//!
//! ```toml
//! instances_per_model = 1000
//! seed = 7
//! submit_mode = "auto"
//!
//! [placement]
//! kind = "random_in_volume"
//! center = [0.0, 0.0, 0.0]
//! extent = [100.0, 10.0, 100.0]
//! ```

use std::path::Path;

use horde_shared::{DEFAULT_MAX_INSTANCES, MAX_INSTANCES_PER_DRAW_CALL};
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// How instance positions are generated for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// Square grid in the XY plane, centred on `origin`.
    ///
    /// `ceil(sqrt(n))` columns; rows fill bottom to top.
    Grid {
        /// Distance between neighbours along X and Y.
        spacing: [f32; 2],
        /// Grid centre.
        origin: [f32; 3],
    },
    /// Uniformly random inside an axis-aligned box.
    RandomInVolume {
        /// Box centre.
        center: [f32; 3],
        /// Full box size per axis.
        extent: [f32; 3],
    },
    /// Uniformly random on the surface of a sphere.
    RandomOnSphere {
        /// Sphere centre.
        center: [f32; 3],
        /// Sphere radius.
        radius: f32,
    },
}

impl PlacementPolicy {
    fn is_finite(&self) -> bool {
        let all = |v: &[f32]| v.iter().all(|x| x.is_finite());
        match self {
            Self::Grid { spacing, origin } => all(spacing) && all(origin),
            Self::RandomInVolume { center, extent } => {
                all(center) && all(extent) && extent.iter().all(|e| *e >= 0.0)
            }
            Self::RandomOnSphere { center, radius } => all(center) && radius.is_finite() && *radius >= 0.0,
        }
    }
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self::RandomInVolume {
            center: [0.0, 0.0, 0.0],
            extent: [100.0, 10.0, 100.0],
        }
    }
}

/// Which draw path the submitter uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Indirect when device and backend support it, batched otherwise.
    #[default]
    Auto,
    /// Indirect only; setup fails if unsupported.
    Indirect,
    /// Always batched direct draws.
    Batched,
}

/// Configuration for the instanced renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Instances generated for every model.
    pub instances_per_model: u32,
    /// Hard cap on the total population across all models.
    pub max_total_instances: u32,
    /// Placement used by models without an override.
    pub placement: PlacementPolicy,
    /// Per-model placement overrides, indexed by model id.
    pub model_placements: Vec<PlacementPolicy>,
    /// Give every instance a random orientation.
    pub random_rotation: bool,
    /// Give every instance a random opaque color.
    pub colorize: bool,
    /// Seed for all placement randomness.
    pub seed: u64,
    /// Draw path selection.
    pub submit_mode: SubmitMode,
    /// Per-call instance cap of the batched path.
    pub max_instances_per_batch: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            instances_per_model: 1000,
            max_total_instances: DEFAULT_MAX_INSTANCES,
            placement: PlacementPolicy::default(),
            model_placements: Vec::new(),
            random_rotation: true,
            colorize: false,
            seed: 0,
            submit_mode: SubmitMode::Auto,
            max_instances_per_batch: MAX_INSTANCES_PER_DRAW_CALL,
        }
    }
}

impl RendererConfig {
    /// Parses a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ConfigParse`] on malformed TOML.
    pub fn from_toml_str(text: &str) -> RenderResult<Self> {
        toml::from_str(text).map_err(|e| RenderError::ConfigParse(e.to_string()))
    }

    /// Reads and parses a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ConfigParse`] if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> RenderResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RenderError::ConfigParse(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Placement policy for a model.
    #[must_use]
    pub fn placement_for(&self, model: u32) -> &PlacementPolicy {
        self.model_placements
            .get(model as usize)
            .unwrap_or(&self.placement)
    }

    /// Total population for `model_count` models.
    #[must_use]
    pub fn total_instances(&self, model_count: usize) -> u64 {
        u64::from(self.instances_per_model) * model_count as u64
    }

    /// Checks the config against a model table size.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Configuration`] describing the first problem found.
    pub fn validate(&self, model_count: usize) -> RenderResult<()> {
        if model_count == 0 {
            return Err(RenderError::Configuration("no models".into()));
        }
        if self.instances_per_model == 0 {
            return Err(RenderError::Configuration("instances_per_model is zero".into()));
        }
        if self.max_instances_per_batch == 0 {
            return Err(RenderError::Configuration("max_instances_per_batch is zero".into()));
        }
        let total = self.total_instances(model_count);
        if total > u64::from(self.max_total_instances) {
            return Err(RenderError::Configuration(format!(
                "{total} instances exceed the hard cap of {}",
                self.max_total_instances
            )));
        }
        if self.model_placements.len() > model_count {
            return Err(RenderError::Configuration(format!(
                "{} placement overrides for {model_count} models",
                self.model_placements.len()
            )));
        }
        if !self.placement.is_finite() || !self.model_placements.iter().all(PlacementPolicy::is_finite) {
            return Err(RenderError::Configuration("placement has non-finite or negative extents".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml() {
        let config = RendererConfig::from_toml_str(
            r#"
            instances_per_model = 250
            seed = 99
            submit_mode = "batched"

            [placement]
            kind = "grid"
            spacing = [2.0, 2.0]
            origin = [0.0, 0.0, 5.0]

            [[model_placements]]
            kind = "random_on_sphere"
            center = [0.0, 0.0, 0.0]
            radius = 10.0
            "#,
        )
        .unwrap();

        assert_eq!(config.instances_per_model, 250);
        assert_eq!(config.seed, 99);
        assert_eq!(config.submit_mode, SubmitMode::Batched);
        assert_eq!(config.max_instances_per_batch, MAX_INSTANCES_PER_DRAW_CALL);
        assert!(matches!(config.placement_for(0), PlacementPolicy::RandomOnSphere { .. }));
        assert!(matches!(config.placement_for(1), PlacementPolicy::Grid { .. }));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = RendererConfig::from_toml_str("instances_per_model = \"many\"").unwrap_err();
        assert!(matches!(err, RenderError::ConfigParse(_)));
    }

    #[test]
    fn test_validate_rejects_hard_cap() {
        let config = RendererConfig {
            instances_per_model: 600,
            max_total_instances: 1000,
            ..RendererConfig::default()
        };
        assert!(config.validate(1).is_ok());
        assert!(matches!(config.validate(2), Err(RenderError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_counts() {
        let zero = RendererConfig { instances_per_model: 0, ..RendererConfig::default() };
        assert!(zero.validate(3).is_err());
        assert!(RendererConfig::default().validate(0).is_err());

        let no_batch = RendererConfig { max_instances_per_batch: 0, ..RendererConfig::default() };
        assert!(no_batch.validate(3).is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_placement() {
        let config = RendererConfig {
            placement: PlacementPolicy::RandomOnSphere { center: [0.0; 3], radius: f32::NAN },
            ..RendererConfig::default()
        };
        assert!(config.validate(1).is_err());
    }
}
