//! Task list construction
//!
//! One task per `(layer, method, scale)`; point reads carry no scale.
//! Task order is execution order: layers by priority, methods
//! `Point < Average < Max`, scales in resolver order.

use crate::registry::PolicyTable;
use crate::scale::{ScaleName, ScaleProfile, ScaleResolver};
use crate::types::{GradingResult, SamplingMethod};
use serde::Serialize;
use std::fmt;

/// One unit of sampling work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradingTask {
    pub layer_id: String,
    pub layer_name: String,
    pub method: SamplingMethod,
    /// `None` for point reads
    pub scale: Option<ScaleProfile>,
    pub critical: bool,
    pub priority: i32,
}

impl GradingTask {
    /// Scale name, if this is an area task
    pub fn scale_name(&self) -> Option<ScaleName> {
        self.scale.map(|s| s.name)
    }
}

impl fmt::Display for GradingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scale {
            Some(scale) => write!(f, "{}@{}", self.method, scale.name),
            None => write!(f, "{}", self.method),
        }
    }
}

/// Expand the policy table into tasks, clamping scales to `ceiling`
pub fn build_tasks(
    table: &PolicyTable,
    resolver: &ScaleResolver,
    ceiling: ScaleName,
) -> GradingResult<Vec<GradingTask>> {
    let mut tasks = Vec::new();

    for (layer, policy) in table.list_by_priority() {
        for &method in &policy.methods {
            let make_task = |scale: Option<ScaleProfile>| GradingTask {
                layer_id: layer.id.clone(),
                layer_name: layer.display_name.clone(),
                method,
                scale,
                critical: policy.critical,
                priority: policy.priority,
            };

            if method.is_area() {
                for profile in resolver.resolve_with_ceiling(&layer.id, method, ceiling)? {
                    tasks.push(make_task(Some(profile)));
                }
            } else {
                tasks.push(make_task(None));
            }
        }
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::ScaleCatalog;
    use std::sync::Arc;

    const CATALOG: &str = r#"
        [[layer]]
        id = "ndvi"
        display_name = "Vegetation"
        category = "nature"
        value_kind = "numeric"
        methods = ["average"]
        priority = 50

        [[layer]]
        id = "noise_road"
        display_name = "Road traffic noise"
        category = "noise"
        value_kind = "numeric"
        methods = ["point", "max"]
        priority = 10
        critical = true
        overrides = [{ method = "max", scale = "quick" }, { method = "max", scale = "default" }]

        [[layer]]
        id = "monument"
        display_name = "Monument"
        category = "historical"
        value_kind = "categorical"
        methods = ["point"]
        priority = 60
        critical = true
    "#;

    fn setup() -> (Arc<PolicyTable>, ScaleResolver) {
        let table = Arc::new(PolicyTable::from_toml_str(CATALOG).unwrap());
        let resolver = ScaleResolver::new(table.clone(), ScaleCatalog::default());
        (table, resolver)
    }

    #[test]
    fn test_tasks_follow_priority_and_method_order() {
        let (table, resolver) = setup();
        let tasks = build_tasks(&table, &resolver, ScaleName::Detailed).unwrap();
        let labels: Vec<String> = tasks
            .iter()
            .map(|t| format!("{}:{}", t.layer_id, t))
            .collect();
        assert_eq!(
            labels,
            vec![
                "noise_road:point",
                "noise_road:max@quick",
                "noise_road:max@default",
                "monument:point",
                "ndvi:average@default",
            ]
        );
    }

    #[test]
    fn test_ceiling_collapses_dual_scale_tasks() {
        let (table, resolver) = setup();
        let tasks = build_tasks(&table, &resolver, ScaleName::Quick).unwrap();
        assert_eq!(tasks.len(), 4);
        assert!(tasks
            .iter()
            .filter_map(|t| t.scale_name())
            .all(|name| name == ScaleName::Quick));
    }
}
