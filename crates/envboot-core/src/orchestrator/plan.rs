//! Execution order: Kahn's algorithm with the ready set ordered by
//! declaration index, so ties always fall back to manifest order.

use std::collections::{BTreeSet, HashMap};

use crate::descriptor::StepDef;
use crate::error::ConfigError;

/// Indices into `steps` in a dependency-respecting, declaration-stable order.
pub fn execution_order(env: &str, steps: &[StepDef]) -> Result<Vec<usize>, ConfigError> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut indegree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            let &d = index
                .get(dep.as_str())
                .ok_or_else(|| ConfigError::UnknownDependency {
                    env: env.to_string(),
                    step: step.id.clone(),
                    dependency: dep.clone(),
                })?;
            indegree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &child in &dependents[next] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() != steps.len() {
        let stuck = (0..steps.len())
            .filter(|i| indegree[*i] > 0)
            .map(|i| steps[i].id.clone())
            .collect();
        return Err(ConfigError::Cycle(stuck));
    }
    Ok(order)
}
