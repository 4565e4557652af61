pub mod detector;
pub mod role_manager;

use std::sync::Arc;

use crate::errors::AuthzError;

pub use role_manager::DefaultRoleManager;

/// Default bound on inheritance hops followed by reachability queries.
pub const DEFAULT_MAX_HIERARCHY_LEVEL: usize = 10;

/// Pure predicate `(name, pattern) -> bool` used in place of string equality.
pub type MatchingFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// One inheritance edge: `user` inherits `role` inside `domain` ("" when unscoped).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub user: String,
    pub role: String,
    pub domain: String,
}

/// Directed role-inheritance graph, optionally partitioned by domain.
///
/// `domain` arguments are slices so the extra positional arguments of a
/// `g(...)` call can be passed straight through; more than one entry is a
/// [`AuthzError::DomainArity`] error.
pub trait RoleManager: Send + Sync {
    /// Drop every domain, node, edge and cached match result.
    fn clear(&self);

    fn add_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<(), AuthzError>;

    fn delete_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<(), AuthzError>;

    /// Whether `name1` inherits `name2`, directly or transitively. Reflexive.
    fn has_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<bool, AuthzError>;

    /// Direct parents of `name`.
    fn get_roles(&self, name: &str, domain: &[&str]) -> Result<Vec<String>, AuthzError>;

    /// Direct children of `name`.
    fn get_users(&self, name: &str, domain: &[&str]) -> Result<Vec<String>, AuthzError>;

    /// Every role reachable from `name`, bounded by the hierarchy level.
    fn get_implicit_roles(&self, name: &str, domain: &[&str]) -> Result<Vec<String>, AuthzError>;

    /// Every user that reaches `name`, bounded by the hierarchy level.
    fn get_implicit_users(&self, name: &str, domain: &[&str]) -> Result<Vec<String>, AuthzError>;

    /// Domains in which `name` appears on either side of an edge.
    fn get_domains(&self, name: &str) -> Result<Vec<String>, AuthzError>;

    fn get_all_domains(&self) -> Vec<String>;

    fn delete_domain(&self, domain: &str) -> Result<(), AuthzError>;

    fn add_matching_fn(&self, matcher: MatchingFn);

    fn add_domain_matching_fn(&self, matcher: MatchingFn);

    /// The edge-enumeration capability, when this manager has one.
    fn as_enumerable(&self) -> Option<&dyn Enumerable> {
        None
    }
}

/// Exhaustive edge listing, required by the cycle detectors.
pub trait Enumerable {
    fn links(&self) -> Vec<Link>;
}

/// Resolve the optional single domain argument.
pub(crate) fn single_domain<'a>(domain: &[&'a str]) -> Result<&'a str, AuthzError> {
    match domain {
        [] => Ok(""),
        [d] => Ok(d),
        _ => Err(AuthzError::DomainArity),
    }
}
