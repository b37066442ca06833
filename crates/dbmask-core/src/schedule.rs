//! Dependency-ordered table scheduling.
//!
//! Blueprints declare which tables must be fully processed before them; this
//! module linearizes that relation with Kahn's algorithm. Ties are broken by
//! declaration order, so a fixed blueprint set always schedules identically.

use std::collections::HashMap;

use crate::blueprint::Blueprint;
use crate::error::{CoreError, Result};

/// Computes the processing order for a blueprint set.
///
/// Returns indices into `blueprints` such that every table appears after all
/// tables it (transitively) depends on. Dependencies naming tables with no
/// blueprint of their own are satisfied vacuously. A cycle is a fatal
/// configuration error reporting the unresolved table set.
pub fn processing_order(blueprints: &[Blueprint]) -> Result<Vec<usize>> {
    let index_of: HashMap<&str, usize> = blueprints
        .iter()
        .enumerate()
        .map(|(i, b)| (b.table.as_str(), i))
        .collect();

    // in_degree counts only dependencies that resolve to a known blueprint.
    let mut in_degree = vec![0usize; blueprints.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); blueprints.len()];
    for (i, blueprint) in blueprints.iter().enumerate() {
        for dependency in &blueprint.dependencies {
            if let Some(&dep) = index_of.get(dependency.as_str()) {
                in_degree[i] += 1;
                dependents[dep].push(i);
            }
        }
    }

    let mut order = Vec::with_capacity(blueprints.len());
    let mut done = vec![false; blueprints.len()];
    loop {
        // First-declared among the currently removable nodes goes next.
        let Some(next) = (0..blueprints.len()).find(|&i| !done[i] && in_degree[i] == 0) else {
            break;
        };
        done[next] = true;
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
        }
    }

    if order.len() != blueprints.len() {
        let tables = blueprints
            .iter()
            .enumerate()
            .filter(|(i, _)| !done[*i])
            .map(|(_, b)| b.table.clone())
            .collect();
        return Err(CoreError::CircularDependency { tables });
    }

    Ok(order)
}
