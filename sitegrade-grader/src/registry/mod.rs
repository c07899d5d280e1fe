//! Layer Registry & Grading Policy Table
//!
//! Static catalog of samplable layers and the per-layer grading rules.
//! Built once at startup, validated as a whole, then shared read-only
//! (`Arc<PolicyTable>`) with the resolver and orchestrator.
//!
//! # Validation (fail fast, before any task launches)
//! - Layer ids are unique and non-empty; every layer has exactly one policy
//! - Every policy declares at least one method
//! - `average`/`max` are rejected on categorical layers
//! - Overrides name a declared area method

mod catalog;

pub use catalog::{CatalogEntry, CatalogFile, BUILTIN_CATALOG};

use crate::scale::ScaleName;
use crate::types::{GradingError, GradingResult, SamplingMethod};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::info;

/// Thematic category of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerCategory {
    AirQuality,
    Noise,
    Climate,
    Nature,
    Historical,
    Soil,
    Topography,
}

/// Kind of value a layer returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Numeric,
    /// Class codes; area aggregation is meaningless
    Categorical,
    /// Numeric with occasional class codes (e.g. "no measurement")
    Mixed,
}

/// Identity of a samplable layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub id: String,
    pub display_name: String,
    pub category: LayerCategory,
    pub unit: String,
    pub value_kind: ValueKind,
}

/// Additional scale for one method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleOverride {
    pub method: SamplingMethod,
    pub scale: ScaleName,
}

/// Grading rules for one layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingPolicy {
    pub layer_id: String,
    pub methods: BTreeSet<SamplingMethod>,
    pub base_scale: ScaleName,
    #[serde(default)]
    pub overrides: Vec<ScaleOverride>,
    /// Lower runs first
    pub priority: i32,
    #[serde(default)]
    pub critical: bool,
}

/// Validated, immutable catalog of layers and their policies
#[derive(Debug, Clone)]
pub struct PolicyTable {
    /// Declaration order
    layers: Vec<LayerDescriptor>,
    /// Aligned with `layers`
    policies: Vec<GradingPolicy>,
    index: HashMap<String, usize>,
    /// Indices into `layers`: critical first, ascending priority, declaration order
    priority_order: Vec<usize>,
}

impl PolicyTable {
    /// Validate and freeze a catalog
    ///
    /// `policies` may be given in any order; declaration order is the order of
    /// `layers`.
    ///
    /// # Errors
    /// `InvalidConfiguration` describing the first problem found.
    pub fn new(layers: Vec<LayerDescriptor>, policies: Vec<GradingPolicy>) -> GradingResult<Self> {
        let mut index = HashMap::with_capacity(layers.len());
        for (i, layer) in layers.iter().enumerate() {
            if layer.id.trim().is_empty() {
                return Err(invalid(format!("layer #{} has an empty id", i + 1)));
            }
            if layer.display_name.trim().is_empty() {
                return Err(invalid(format!("layer '{}' has an empty display name", layer.id)));
            }
            if index.insert(layer.id.clone(), i).is_some() {
                return Err(invalid(format!("duplicate layer id '{}'", layer.id)));
            }
        }

        let mut slots: Vec<Option<GradingPolicy>> = vec![None; layers.len()];
        for policy in policies {
            let Some(&i) = index.get(&policy.layer_id) else {
                return Err(invalid(format!(
                    "policy references unknown layer '{}'",
                    policy.layer_id
                )));
            };
            validate_policy(&layers[i], &policy)?;
            if slots[i].replace(policy).is_some() {
                return Err(invalid(format!("duplicate policy for layer '{}'", layers[i].id)));
            }
        }

        let mut policies = Vec::with_capacity(layers.len());
        for (layer, slot) in layers.iter().zip(slots) {
            match slot {
                Some(policy) => policies.push(policy),
                None => return Err(invalid(format!("layer '{}' has no grading policy", layer.id))),
            }
        }

        let mut priority_order: Vec<usize> = (0..layers.len()).collect();
        // Stable sort keeps declaration order for ties
        priority_order.sort_by_key(|&i| (!policies[i].critical, policies[i].priority));

        Ok(Self {
            layers,
            policies,
            index,
            priority_order,
        })
    }

    /// Parse and validate a catalog in TOML form
    pub fn from_toml_str(content: &str) -> GradingResult<Self> {
        let file: CatalogFile = toml::from_str(content)
            .map_err(|e| invalid(format!("failed to parse layer catalog: {}", e)))?;
        let (layers, policies) = file.into_parts();
        Self::new(layers, policies)
    }

    /// Load a catalog file from disk
    pub fn load(path: &Path) -> GradingResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            invalid(format!("failed to read layer catalog {}: {}", path.display(), e))
        })?;
        let table = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            layers = table.len(),
            critical = table.list_critical().len(),
            "Layer catalog loaded"
        );
        Ok(table)
    }

    /// Catalog compiled into the binary
    pub fn builtin() -> GradingResult<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Policy for a layer
    pub fn get_policy(&self, layer_id: &str) -> GradingResult<&GradingPolicy> {
        self.index
            .get(layer_id)
            .map(|&i| &self.policies[i])
            .ok_or_else(|| GradingError::UnknownLayer(layer_id.to_string()))
    }

    /// Descriptor for a layer
    pub fn get_layer(&self, layer_id: &str) -> GradingResult<&LayerDescriptor> {
        self.index
            .get(layer_id)
            .map(|&i| &self.layers[i])
            .ok_or_else(|| GradingError::UnknownLayer(layer_id.to_string()))
    }

    /// Layers in execution order
    pub fn list_by_priority(&self) -> Vec<(&LayerDescriptor, &GradingPolicy)> {
        self.priority_order
            .iter()
            .map(|&i| (&self.layers[i], &self.policies[i]))
            .collect()
    }

    /// Critical layers in execution order
    pub fn list_critical(&self) -> Vec<(&LayerDescriptor, &GradingPolicy)> {
        self.list_by_priority()
            .into_iter()
            .filter(|(_, policy)| policy.critical)
            .collect()
    }
}

fn validate_policy(layer: &LayerDescriptor, policy: &GradingPolicy) -> GradingResult<()> {
    if policy.methods.is_empty() {
        return Err(invalid(format!("layer '{}' declares no sampling method", layer.id)));
    }

    if layer.value_kind == ValueKind::Categorical {
        if let Some(method) = policy.methods.iter().find(|m| m.is_area()) {
            return Err(invalid(format!(
                "layer '{}' is categorical and cannot be sampled with '{}'",
                layer.id, method
            )));
        }
    }

    for scale_override in &policy.overrides {
        if !scale_override.method.is_area() {
            return Err(invalid(format!(
                "layer '{}' overrides the scale of point reads, which have no scale",
                layer.id
            )));
        }
        if !policy.methods.contains(&scale_override.method) {
            return Err(invalid(format!(
                "layer '{}' overrides undeclared method '{}'",
                layer.id, scale_override.method
            )));
        }
    }

    Ok(())
}

fn invalid(message: String) -> GradingError {
    GradingError::InvalidConfiguration(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(id: &str, value_kind: ValueKind) -> LayerDescriptor {
        LayerDescriptor {
            id: id.to_string(),
            display_name: format!("Layer {}", id),
            category: LayerCategory::Nature,
            unit: String::new(),
            value_kind,
        }
    }

    fn policy(id: &str, methods: &[SamplingMethod], priority: i32, critical: bool) -> GradingPolicy {
        GradingPolicy {
            layer_id: id.to_string(),
            methods: methods.iter().copied().collect(),
            base_scale: ScaleName::Default,
            overrides: Vec::new(),
            priority,
            critical,
        }
    }

    #[test]
    fn test_builtin_catalog_is_valid() {
        let table = PolicyTable::builtin().unwrap();
        assert!(table.len() >= 24);
        assert!(!table.list_critical().is_empty());
    }

    #[test]
    fn test_categorical_area_method_rejected() {
        for method in [SamplingMethod::Average, SamplingMethod::Max] {
            let result = PolicyTable::new(
                vec![layer("biotope", ValueKind::Categorical)],
                vec![policy("biotope", &[SamplingMethod::Point, method], 1, false)],
            );
            assert!(matches!(result, Err(GradingError::InvalidConfiguration(_))));
        }
    }

    #[test]
    fn test_mixed_layer_allows_area_methods() {
        let result = PolicyTable::new(
            vec![layer("heat", ValueKind::Mixed)],
            vec![policy("heat", &[SamplingMethod::Average], 1, false)],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_duplicate_layer_id_rejected() {
        let result = PolicyTable::new(
            vec![layer("a", ValueKind::Numeric), layer("a", ValueKind::Numeric)],
            vec![policy("a", &[SamplingMethod::Point], 1, false)],
        );
        assert!(matches!(result, Err(GradingError::InvalidConfiguration(msg)) if msg.contains("duplicate layer")));
    }

    #[test]
    fn test_missing_and_duplicate_policy_rejected() {
        let missing = PolicyTable::new(
            vec![layer("a", ValueKind::Numeric), layer("b", ValueKind::Numeric)],
            vec![policy("a", &[SamplingMethod::Point], 1, false)],
        );
        assert!(missing.is_err());

        let duplicate = PolicyTable::new(
            vec![layer("a", ValueKind::Numeric)],
            vec![
                policy("a", &[SamplingMethod::Point], 1, false),
                policy("a", &[SamplingMethod::Max], 2, false),
            ],
        );
        assert!(duplicate.is_err());

        let unknown = PolicyTable::new(
            vec![layer("a", ValueKind::Numeric)],
            vec![
                policy("a", &[SamplingMethod::Point], 1, false),
                policy("ghost", &[SamplingMethod::Point], 1, false),
            ],
        );
        assert!(unknown.is_err());
    }

    #[test]
    fn test_override_rules() {
        let mut p = policy("a", &[SamplingMethod::Max], 1, false);
        p.overrides.push(ScaleOverride {
            method: SamplingMethod::Average,
            scale: ScaleName::Quick,
        });
        assert!(PolicyTable::new(vec![layer("a", ValueKind::Numeric)], vec![p]).is_err());

        let mut p = policy("a", &[SamplingMethod::Point], 1, false);
        p.overrides.push(ScaleOverride {
            method: SamplingMethod::Point,
            scale: ScaleName::Quick,
        });
        assert!(PolicyTable::new(vec![layer("a", ValueKind::Numeric)], vec![p]).is_err());
    }

    #[test]
    fn test_empty_methods_rejected() {
        let result = PolicyTable::new(
            vec![layer("a", ValueKind::Numeric)],
            vec![policy("a", &[], 1, false)],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_priority_order_is_deterministic() {
        let table = PolicyTable::new(
            vec![
                layer("low", ValueKind::Numeric),
                layer("crit_late", ValueKind::Numeric),
                layer("tie_first", ValueKind::Numeric),
                layer("tie_second", ValueKind::Numeric),
                layer("crit_early", ValueKind::Numeric),
            ],
            vec![
                policy("low", &[SamplingMethod::Point], 1, false),
                policy("crit_late", &[SamplingMethod::Point], 50, true),
                policy("tie_first", &[SamplingMethod::Point], 5, false),
                policy("tie_second", &[SamplingMethod::Point], 5, false),
                policy("crit_early", &[SamplingMethod::Point], 10, true),
            ],
        )
        .unwrap();

        let order: Vec<&str> = table
            .list_by_priority()
            .iter()
            .map(|(l, _)| l.id.as_str())
            .collect();
        assert_eq!(order, vec!["crit_early", "crit_late", "low", "tie_first", "tie_second"]);

        let critical: Vec<&str> = table
            .list_critical()
            .iter()
            .map(|(l, _)| l.id.as_str())
            .collect();
        assert_eq!(critical, vec!["crit_early", "crit_late"]);
    }

    #[test]
    fn test_lookup() {
        let table = PolicyTable::new(
            vec![layer("a", ValueKind::Numeric)],
            vec![policy("a", &[SamplingMethod::Point], 1, true)],
        )
        .unwrap();
        assert!(table.get_policy("a").unwrap().critical);
        assert_eq!(table.get_layer("a").unwrap().id, "a");
        assert_eq!(
            table.get_policy("b").unwrap_err(),
            GradingError::UnknownLayer("b".to_string())
        );
    }
}
