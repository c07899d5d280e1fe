//! Scale profiles and the Scale Resolver
//!
//! A scale profile bundles the spatial parameters of an area sample. The
//! resolver maps `(layer, method)` to the concrete profiles a policy asks for,
//! so one method may run at several scales at once.

use crate::registry::PolicyTable;
use crate::types::{GradingError, GradingResult, SamplingMethod};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Named scale, ordered by cost (`Quick < Default < Detailed`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleName {
    Quick,
    Default,
    Detailed,
}

impl ScaleName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleName::Quick => "quick",
            ScaleName::Default => "default",
            ScaleName::Detailed => "detailed",
        }
    }
}

impl fmt::Display for ScaleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spatial parameters of one scale, as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleDimensions {
    /// Radius of the sampled circle
    pub radius_meters: f64,
    /// Minimum spacing between grid cells
    pub grid_resolution_meters: f64,
    /// Hard cap on grid cells per area sample
    pub max_samples: usize,
}

/// Concrete scale used by an area sampling task
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaleProfile {
    pub name: ScaleName,
    pub radius_meters: f64,
    pub grid_resolution_meters: f64,
    pub max_samples: usize,
}

impl ScaleProfile {
    /// Grid spacing that keeps the cell count within `max_samples`
    ///
    /// `max(grid_resolution, 2·radius / √max_samples)`
    pub fn effective_spacing(&self) -> f64 {
        let cap_spacing = 2.0 * self.radius_meters / (self.max_samples.max(1) as f64).sqrt();
        self.grid_resolution_meters.max(cap_spacing)
    }
}

/// The three configured scale profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleCatalog {
    pub quick: ScaleDimensions,
    pub default: ScaleDimensions,
    pub detailed: ScaleDimensions,
}

impl Default for ScaleCatalog {
    fn default() -> Self {
        Self {
            quick: ScaleDimensions {
                radius_meters: 250.0,
                grid_resolution_meters: 50.0,
                max_samples: 100,
            },
            default: ScaleDimensions {
                radius_meters: 500.0,
                grid_resolution_meters: 50.0,
                max_samples: 400,
            },
            detailed: ScaleDimensions {
                radius_meters: 1000.0,
                grid_resolution_meters: 25.0,
                max_samples: 1600,
            },
        }
    }
}

impl ScaleCatalog {
    /// Profile for a named scale
    pub fn profile(&self, name: ScaleName) -> ScaleProfile {
        let dims = match name {
            ScaleName::Quick => self.quick,
            ScaleName::Default => self.default,
            ScaleName::Detailed => self.detailed,
        };
        ScaleProfile {
            name,
            radius_meters: dims.radius_meters,
            grid_resolution_meters: dims.grid_resolution_meters,
            max_samples: dims.max_samples,
        }
    }

    /// Reject non-positive radii/spacings, zero caps and radii that do not
    /// strictly grow from quick to detailed
    pub fn validate(&self) -> GradingResult<()> {
        for name in [ScaleName::Quick, ScaleName::Default, ScaleName::Detailed] {
            let profile = self.profile(name);
            if !(profile.radius_meters.is_finite() && profile.radius_meters > 0.0) {
                return Err(GradingError::InvalidConfiguration(format!(
                    "scale '{}' must have a positive radius",
                    name
                )));
            }
            if !(profile.grid_resolution_meters.is_finite() && profile.grid_resolution_meters > 0.0) {
                return Err(GradingError::InvalidConfiguration(format!(
                    "scale '{}' must have a positive grid resolution",
                    name
                )));
            }
            if profile.max_samples == 0 {
                return Err(GradingError::InvalidConfiguration(format!(
                    "scale '{}' must allow at least one sample",
                    name
                )));
            }
        }

        if !(self.quick.radius_meters < self.default.radius_meters
            && self.default.radius_meters < self.detailed.radius_meters)
        {
            return Err(GradingError::InvalidConfiguration(format!(
                "scale radii must increase quick < default < detailed (got {} / {} / {} m)",
                self.quick.radius_meters, self.default.radius_meters, self.detailed.radius_meters
            )));
        }
        Ok(())
    }
}

/// Resolves `(layer, method)` into concrete scale profiles
#[derive(Debug, Clone)]
pub struct ScaleResolver {
    table: Arc<PolicyTable>,
    scales: ScaleCatalog,
}

impl ScaleResolver {
    pub fn new(table: Arc<PolicyTable>, scales: ScaleCatalog) -> Self {
        Self { table, scales }
    }

    /// Scales required for `method` on `layer_id`
    ///
    /// Override scales for the method in declaration order when the policy
    /// defines any, else the base scale. Point reads have no spatial scale and
    /// resolve to an empty list.
    ///
    /// # Errors
    /// `UnknownLayer` for an id outside the table, `InvalidConfiguration` for
    /// a method the policy does not declare.
    pub fn resolve(&self, layer_id: &str, method: SamplingMethod) -> GradingResult<Vec<ScaleProfile>> {
        self.resolve_with_ceiling(layer_id, method, ScaleName::Detailed)
    }

    /// Like [`resolve`](Self::resolve), clamping every scale to `ceiling`
    ///
    /// Scales that collapse onto the same name after clamping appear once.
    pub fn resolve_with_ceiling(
        &self,
        layer_id: &str,
        method: SamplingMethod,
        ceiling: ScaleName,
    ) -> GradingResult<Vec<ScaleProfile>> {
        let policy = self.table.get_policy(layer_id)?;
        if !policy.methods.contains(&method) {
            return Err(GradingError::InvalidConfiguration(format!(
                "layer '{}' does not declare method '{}'",
                layer_id, method
            )));
        }
        if !method.is_area() {
            return Ok(Vec::new());
        }

        let overrides: Vec<ScaleName> = policy
            .overrides
            .iter()
            .filter(|o| o.method == method)
            .map(|o| o.scale)
            .collect();
        let names = if overrides.is_empty() {
            vec![policy.base_scale]
        } else {
            overrides
        };

        let mut resolved: Vec<ScaleName> = Vec::with_capacity(names.len());
        for name in names {
            let clamped = name.min(ceiling);
            if !resolved.contains(&clamped) {
                resolved.push(clamped);
            }
        }

        Ok(resolved.into_iter().map(|n| self.scales.profile(n)).collect())
    }
}
