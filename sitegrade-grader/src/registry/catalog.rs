//! Layer catalog file format
//!
//! One `[[layer]]` table per layer, carrying both the descriptor and the
//! grading policy:
//!
//! ```toml
//! [[layer]]
//! id = "noise_road"
//! display_name = "Road traffic noise (24h)"
//! category = "noise"
//! unit = "dB(A)"
//! value_kind = "numeric"
//! methods = ["max"]
//! base_scale = "default"
//! priority = 10
//! critical = true
//! overrides = [{ method = "max", scale = "quick" }, { method = "max", scale = "default" }]
//! ```

use super::{GradingPolicy, LayerCategory, LayerDescriptor, ScaleOverride, ValueKind};
use crate::scale::ScaleName;
use crate::types::SamplingMethod;
use serde::{Deserialize, Serialize};

/// Default catalog shipped with the service
pub const BUILTIN_CATALOG: &str = include_str!("../../catalog/default_layers.toml");

/// Whole catalog file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(rename = "layer", default)]
    pub layers: Vec<CatalogEntry>,
}

/// One `[[layer]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub display_name: String,
    pub category: LayerCategory,
    #[serde(default)]
    pub unit: String,
    pub value_kind: ValueKind,
    pub methods: Vec<SamplingMethod>,
    #[serde(default = "default_base_scale")]
    pub base_scale: ScaleName,
    #[serde(default)]
    pub overrides: Vec<ScaleOverride>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub critical: bool,
}

fn default_base_scale() -> ScaleName {
    ScaleName::Default
}

fn default_priority() -> i32 {
    100
}

impl CatalogFile {
    /// Split entries into descriptors and policies, keeping declaration order
    pub fn into_parts(self) -> (Vec<LayerDescriptor>, Vec<GradingPolicy>) {
        self.layers
            .into_iter()
            .map(|entry| {
                let descriptor = LayerDescriptor {
                    id: entry.id.clone(),
                    display_name: entry.display_name,
                    category: entry.category,
                    unit: entry.unit,
                    value_kind: entry.value_kind,
                };
                let policy = GradingPolicy {
                    layer_id: entry.id,
                    methods: entry.methods.into_iter().collect(),
                    base_scale: entry.base_scale,
                    overrides: entry.overrides,
                    priority: entry.priority,
                    critical: entry.critical,
                };
                (descriptor, policy)
            })
            .unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PolicyTable;

    #[test]
    fn test_entry_defaults() {
        let file: CatalogFile = toml::from_str(
            r#"
            [[layer]]
            id = "elevation"
            display_name = "Elevation"
            category = "topography"
            value_kind = "numeric"
            methods = ["point"]
            "#,
        )
        .unwrap();
        let (layers, policies) = file.into_parts();
        assert_eq!(layers[0].unit, "");
        assert_eq!(policies[0].base_scale, ScaleName::Default);
        assert_eq!(policies[0].priority, 100);
        assert!(!policies[0].critical);
    }

    #[test]
    fn test_unknown_category_is_rejected_at_parse() {
        let result = PolicyTable::from_toml_str(
            r#"
            [[layer]]
            id = "x"
            display_name = "X"
            category = "weather"
            value_kind = "numeric"
            methods = ["point"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_builtin_covers_every_category() {
        let file: CatalogFile = toml::from_str(BUILTIN_CATALOG).unwrap();
        for category in [
            LayerCategory::AirQuality,
            LayerCategory::Noise,
            LayerCategory::Climate,
            LayerCategory::Nature,
            LayerCategory::Historical,
            LayerCategory::Soil,
            LayerCategory::Topography,
        ] {
            assert!(
                file.layers.iter().any(|l| l.category == category),
                "no builtin layer for {:?}",
                category
            );
        }
    }
}
