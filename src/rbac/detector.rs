//! Consistency checks over the role graph.
//!
//! The cycle detectors are gates: a grouping mutation that makes either of
//! them fail is rolled back. The effect-conflict detector is advisory.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};

use crate::errors::AuthzError;
use crate::model::Model;
use crate::rbac::{Link, RoleManager};

/// A check over the role graph alone.
pub trait Detector: Send + Sync {
    fn check(&self, rm: &dyn RoleManager) -> Result<(), AuthzError>;
}

/// A check over the model's policies together with the role graph.
pub trait ModelDetector: Send + Sync {
    fn check_model(&self, model: &Model, rm: &dyn RoleManager) -> Result<(), AuthzError>;
}

/// Adjacency per domain, in edge insertion order.
type Graphs = IndexMap<String, IndexMap<String, Vec<String>>>;

fn build_graphs(rm: &dyn RoleManager) -> Result<Graphs, AuthzError> {
    let enumerable = rm.as_enumerable().ok_or(AuthzError::CannotEnumerate)?;
    let mut graphs: Graphs = IndexMap::new();
    for Link { user, role, domain } in enumerable.links() {
        let graph = graphs.entry(domain).or_default();
        graph.entry(role.clone()).or_default();
        graph.entry(user).or_default().push(role);
    }
    Ok(graphs)
}

fn in_domain(message: String, domain: &str) -> String {
    if domain.is_empty() {
        message
    } else {
        format!("{message} (domain `{domain}`)")
    }
}

// ─── DFS ────────────────────────────────────────────────────────────────

/// Depth-first search with a recursion stack; reports the cyclic path.
#[derive(Debug, Default, Clone, Copy)]
pub struct DfsDetector;

impl Detector for DfsDetector {
    fn check(&self, rm: &dyn RoleManager) -> Result<(), AuthzError> {
        for (domain, graph) in build_graphs(rm)? {
            let mut visited = HashSet::new();
            let mut path = Vec::new();
            for name in graph.keys() {
                if !visited.contains(name.as_str()) {
                    if let Some(cycle) = dfs_cycle_check(name, &graph, &mut visited, &mut path) {
                        tracing::warn!(cycle = %cycle, domain = %domain, "Role inheritance cycle detected");
                        return Err(AuthzError::CycleDetected(in_domain(cycle, &domain)));
                    }
                }
            }
        }
        Ok(())
    }
}

fn dfs_cycle_check<'g>(
    name: &'g str,
    graph: &'g IndexMap<String, Vec<String>>,
    visited: &mut HashSet<&'g str>,
    path: &mut Vec<&'g str>,
) -> Option<String> {
    visited.insert(name);
    path.push(name);

    if let Some(parents) = graph.get(name) {
        for parent in parents {
            if let Some(start) = path.iter().position(|n| *n == parent.as_str()) {
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(parent);
                return Some(cycle.join(" -> "));
            }
            if !visited.contains(parent.as_str()) {
                if let Some(cycle) = dfs_cycle_check(parent, graph, visited, path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    None
}

// ─── Kahn ───────────────────────────────────────────────────────────────

/// Topological sort; nodes left with in-degree > 0 sit on a cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopologicalDetector;

impl Detector for TopologicalDetector {
    fn check(&self, rm: &dyn RoleManager) -> Result<(), AuthzError> {
        for (domain, graph) in build_graphs(rm)? {
            let mut in_degree: IndexMap<&str, usize> =
                graph.keys().map(|n| (n.as_str(), 0)).collect();
            for parents in graph.values() {
                for parent in parents {
                    *in_degree.entry(parent.as_str()).or_default() += 1;
                }
            }

            let mut queue: VecDeque<&str> = in_degree
                .iter()
                .filter(|(_, d)| **d == 0)
                .map(|(n, _)| *n)
                .collect();
            let mut removed = 0;
            while let Some(node) = queue.pop_front() {
                removed += 1;
                for parent in graph.get(node).into_iter().flatten() {
                    if let Some(d) = in_degree.get_mut(parent.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(parent);
                        }
                    }
                }
            }

            if removed < in_degree.len() {
                let remaining: Vec<&str> = in_degree
                    .iter()
                    .filter(|(_, d)| **d > 0)
                    .map(|(n, _)| *n)
                    .collect();
                let message = format!("roles on a cycle: {}", remaining.join(", "));
                tracing::warn!(roles = %remaining.join(", "), domain = %domain, "Role inheritance cycle detected");
                return Err(AuthzError::CycleDetected(in_domain(message, &domain)));
            }
        }
        Ok(())
    }
}

// ─── Effect conflicts ───────────────────────────────────────────────────

/// Flags a user whose own policy contradicts the policy of a role it holds
/// for the same object and action.
#[derive(Debug, Default, Clone, Copy)]
pub struct EffectConflictDetector;

impl ModelDetector for EffectConflictDetector {
    fn check_model(&self, model: &Model, _rm: &dyn RoleManager) -> Result<(), AuthzError> {
        let policies = model.get_policy("p", "p")?;
        let Ok(grouping) = model.get_policy("g", "g") else {
            return Ok(());
        };
        let eft_index = model.field_index("p", "eft");

        // (sub, obj, act) -> effect; later rows override earlier ones
        let mut effects: IndexMap<(&str, &str, &str), &str> = IndexMap::new();
        for rule in &policies {
            let [sub, obj, act, ..] = rule.as_slice() else {
                continue;
            };
            let effect = eft_index
                .and_then(|i| rule.get(i))
                .map(String::as_str)
                .unwrap_or("allow");
            effects.insert((sub, obj, act), effect);
        }

        let mut seen: IndexSet<(&str, &str)> = IndexSet::new();
        for rule in &grouping {
            let [user, role, ..] = rule.as_slice() else {
                continue;
            };
            if !seen.insert((user, role)) {
                continue;
            }
            for (&(sub, obj, act), &effect) in &effects {
                if sub != user {
                    continue;
                }
                let Some(&role_effect) = effects.get(&(role.as_str(), obj, act)) else {
                    continue;
                };
                if opposite(effect, role_effect) {
                    return Err(AuthzError::EffectConflict(format!(
                        "user '{user}' has '{effect}' effect for ({obj}, {act}), but role '{role}' has '{role_effect}' effect for the same action"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn opposite(a: &str, b: &str) -> bool {
    let pairs: HashMap<&str, &str> = HashMap::from([("allow", "deny"), ("deny", "allow")]);
    pairs.get(a) == Some(&b)
}
