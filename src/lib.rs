//! Castellan - policy-based authorization
//!
//! A model file declares the shape of requests, rules, role links, the
//! effect combinator and the matcher. The [`Enforcer`] loads rules through an
//! [`persist::Adapter`], keeps one role graph per grouping type and decides
//! whether a request is allowed.

pub mod cache;
pub mod effect;
pub mod enforcer;
pub mod errors;
pub mod events;
pub mod matcher;
pub mod model;
pub mod persist;
pub mod rbac;
pub mod settings;

pub use cache::{Cache, DefaultCache};
pub use enforcer::{CachedEnforcer, Decision, EnforceContext, Enforcer};
pub use errors::AuthzError;
pub use matcher::value::Value;
pub use model::Model;
pub use persist::{Adapter, KdlFileAdapter, MemoryAdapter, Watcher};
pub use rbac::{DefaultRoleManager, RoleManager};
pub use settings::EnforcerSettings;
