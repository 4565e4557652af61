use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

use crate::errors::AuthzError;
use crate::rbac::{
    single_domain, Enumerable, Link, MatchingFn, RoleManager, DEFAULT_MAX_HIERARCHY_LEVEL,
};

/// Nodes of one domain: name -> direct parents, both in insertion order.
#[derive(Debug, Default)]
struct RoleTable {
    nodes: RwLock<IndexMap<String, IndexSet<String>>>,
}

impl RoleTable {
    fn snapshot(&self) -> Vec<(String, IndexSet<String>)> {
        self.nodes
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// In-memory role manager with per-domain tables and optional pattern
/// matching for role names and domains.
pub struct DefaultRoleManager {
    domains: DashMap<String, Arc<RoleTable>>,
    max_hierarchy_level: usize,
    matching_fn: RwLock<Option<MatchingFn>>,
    domain_matching_fn: RwLock<Option<MatchingFn>>,
    match_cache: DashMap<(String, String), bool>,
    domain_match_cache: DashMap<(String, String), bool>,
}

impl fmt::Debug for DefaultRoleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultRoleManager")
            .field("domains", &self.get_all_domains())
            .field("max_hierarchy_level", &self.max_hierarchy_level)
            .field("matching_fn", &self.matching_fn.read().is_some())
            .field("domain_matching_fn", &self.domain_matching_fn.read().is_some())
            .finish()
    }
}

impl Default for DefaultRoleManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HIERARCHY_LEVEL)
    }
}

impl DefaultRoleManager {
    pub fn new(max_hierarchy_level: usize) -> Self {
        Self {
            domains: DashMap::new(),
            max_hierarchy_level,
            matching_fn: RwLock::new(None),
            domain_matching_fn: RwLock::new(None),
            match_cache: DashMap::new(),
            domain_match_cache: DashMap::new(),
        }
    }

    pub fn max_hierarchy_level(&self) -> usize {
        self.max_hierarchy_level
    }

    fn table(&self, domain: &str) -> Option<Arc<RoleTable>> {
        self.domains.get(domain).map(|t| Arc::clone(t.value()))
    }

    fn table_or_create(&self, domain: &str) -> Arc<RoleTable> {
        Arc::clone(
            self.domains
                .entry(domain.to_string())
                .or_default()
                .value(),
        )
    }

    /// `name == pattern`, or the configured name matcher says so.
    fn name_matches(&self, name: &str, pattern: &str) -> bool {
        if name == pattern {
            return true;
        }
        let Some(matcher) = self.matching_fn.read().clone() else {
            return false;
        };
        cached_match(&self.match_cache, &matcher, name, pattern)
    }

    fn domain_matches(&self, domain: &str, pattern: &str) -> bool {
        if domain == pattern {
            return true;
        }
        let Some(matcher) = self.domain_matching_fn.read().clone() else {
            return false;
        };
        cached_match(&self.domain_match_cache, &matcher, domain, pattern)
    }

    /// Tables of every stored domain that the requested domain matches,
    /// ordered by domain name.
    fn matched_tables(&self, domain: &str) -> Vec<Arc<RoleTable>> {
        if self.domain_matching_fn.read().is_none() {
            return self.table(domain).into_iter().collect();
        }
        let mut matched: Vec<(String, Arc<RoleTable>)> = self
            .domains
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        matched.retain(|(d, _)| self.domain_matches(domain, d));
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        matched.into_iter().map(|(_, t)| t).collect()
    }

    /// Direct parents of `name` in one table, including those of pattern
    /// nodes that `name` matches.
    fn parents_of(&self, table: &RoleTable, name: &str) -> Vec<String> {
        if self.matching_fn.read().is_none() {
            return table
                .nodes
                .read()
                .get(name)
                .map(|parents| parents.iter().cloned().collect())
                .unwrap_or_default();
        }
        let mut out = Vec::new();
        for (node, parents) in table.snapshot() {
            if self.name_matches(name, &node) {
                out.extend(parents);
            }
        }
        out
    }

    /// Direct children of `name` in one table.
    fn children_of(&self, table: &RoleTable, name: &str) -> Vec<String> {
        table
            .snapshot()
            .into_iter()
            .filter(|(_, parents)| parents.iter().any(|p| self.name_matches(name, p)))
            .map(|(node, _)| node)
            .collect()
    }

    /// Breadth-first closure over `step`, bounded by the hierarchy level.
    fn closure(
        &self,
        start: &str,
        tables: &[Arc<RoleTable>],
        step: impl Fn(&RoleTable, &str) -> Vec<String>,
    ) -> Vec<String> {
        let mut seen: IndexSet<String> = IndexSet::new();
        let mut frontier = vec![start.to_string()];
        for _ in 0..self.max_hierarchy_level {
            let mut next = Vec::new();
            for name in &frontier {
                for table in tables {
                    for found in step(table.as_ref(), name) {
                        if found != start && seen.insert(found.clone()) {
                            next.push(found);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        seen.into_iter().collect()
    }
}

fn cached_match(
    cache: &DashMap<(String, String), bool>,
    matcher: &MatchingFn,
    name: &str,
    pattern: &str,
) -> bool {
    let key = (name.to_string(), pattern.to_string());
    if let Some(hit) = cache.get(&key) {
        return *hit;
    }
    let result = matcher(name, pattern);
    cache.insert(key, result);
    result
}

impl RoleManager for DefaultRoleManager {
    fn clear(&self) {
        self.domains.clear();
        self.match_cache.clear();
        self.domain_match_cache.clear();
    }

    fn add_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<(), AuthzError> {
        let domain = single_domain(domain)?;
        let table = self.table_or_create(domain);
        let mut nodes = table.nodes.write();
        nodes.entry(name2.to_string()).or_default();
        nodes
            .entry(name1.to_string())
            .or_default()
            .insert(name2.to_string());
        Ok(())
    }

    fn delete_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<(), AuthzError> {
        let domain = single_domain(domain)?;
        let table = self.table(domain).ok_or(AuthzError::NameNotFound)?;
        let mut nodes = table.nodes.write();
        if !nodes.contains_key(name2) {
            return Err(AuthzError::NameNotFound);
        }
        let parents = nodes.get_mut(name1).ok_or(AuthzError::NameNotFound)?;
        parents.shift_remove(name2);
        Ok(())
    }

    fn has_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<bool, AuthzError> {
        let domain = single_domain(domain)?;
        if self.name_matches(name1, name2) {
            return Ok(true);
        }

        let tables = self.matched_tables(domain);
        if tables.is_empty() {
            return Ok(false);
        }

        let mut visited: HashSet<String> = HashSet::from([name1.to_string()]);
        let mut frontier = vec![name1.to_string()];
        for _ in 0..self.max_hierarchy_level {
            let mut next = Vec::new();
            for name in &frontier {
                for table in &tables {
                    for parent in self.parents_of(table, name) {
                        if self.name_matches(name2, &parent) {
                            return Ok(true);
                        }
                        if visited.insert(parent.clone()) {
                            next.push(parent);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(false)
    }

    fn get_roles(&self, name: &str, domain: &[&str]) -> Result<Vec<String>, AuthzError> {
        let domain = single_domain(domain)?;
        let mut roles: IndexSet<String> = IndexSet::new();
        for table in self.matched_tables(domain) {
            roles.extend(self.parents_of(&table, name));
        }
        Ok(roles.into_iter().collect())
    }

    fn get_users(&self, name: &str, domain: &[&str]) -> Result<Vec<String>, AuthzError> {
        let domain = single_domain(domain)?;
        let mut users: IndexSet<String> = IndexSet::new();
        for table in self.matched_tables(domain) {
            users.extend(self.children_of(&table, name));
        }
        Ok(users.into_iter().collect())
    }

    fn get_implicit_roles(&self, name: &str, domain: &[&str]) -> Result<Vec<String>, AuthzError> {
        let domain = single_domain(domain)?;
        let tables = self.matched_tables(domain);
        Ok(self.closure(name, &tables, |t, n| self.parents_of(t, n)))
    }

    fn get_implicit_users(&self, name: &str, domain: &[&str]) -> Result<Vec<String>, AuthzError> {
        let domain = single_domain(domain)?;
        let tables = self.matched_tables(domain);
        Ok(self.closure(name, &tables, |t, n| self.children_of(t, n)))
    }

    fn get_domains(&self, name: &str) -> Result<Vec<String>, AuthzError> {
        let mut found = Vec::new();
        for domain in self.get_all_domains() {
            let Some(table) = self.table(&domain) else {
                continue;
            };
            let participates = table.snapshot().iter().any(|(node, parents)| {
                (!parents.is_empty() && self.name_matches(name, node))
                    || parents.iter().any(|p| self.name_matches(name, p))
            });
            if participates {
                found.push(domain);
            }
        }
        Ok(found)
    }

    fn get_all_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.domains.iter().map(|e| e.key().clone()).collect();
        domains.sort();
        domains
    }

    fn delete_domain(&self, domain: &str) -> Result<(), AuthzError> {
        self.domains.remove(domain);
        Ok(())
    }

    fn add_matching_fn(&self, matcher: MatchingFn) {
        *self.matching_fn.write() = Some(matcher);
        self.match_cache.clear();
    }

    fn add_domain_matching_fn(&self, matcher: MatchingFn) {
        *self.domain_matching_fn.write() = Some(matcher);
        self.domain_match_cache.clear();
    }

    fn as_enumerable(&self) -> Option<&dyn Enumerable> {
        Some(self)
    }
}

impl Enumerable for DefaultRoleManager {
    fn links(&self) -> Vec<Link> {
        let mut links = Vec::new();
        for domain in self.get_all_domains() {
            let Some(table) = self.table(&domain) else {
                continue;
            };
            for (user, parents) in table.snapshot() {
                for role in parents {
                    links.push(Link {
                        user: user.clone(),
                        role,
                        domain: domain.clone(),
                    });
                }
            }
        }
        links
    }
}
