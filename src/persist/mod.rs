//! Boundaries to storage and to other enforcer instances.

mod file_adapter;
mod memory;

pub use file_adapter::KdlFileAdapter;
pub use memory::MemoryAdapter;

use crate::errors::AuthzError;
use crate::model::Model;

/// Loads and stores the rules of a [`Model`].
///
/// Only `load_policy` and `save_policy` are required. The per-rule methods
/// are used for auto-save after each mutation; their default returns
/// [`AuthzError::AdapterNotImplemented`], which the enforcer treats as "this
/// adapter only saves whole policies".
pub trait Adapter: Send + Sync {
    fn load_policy(&self, model: &Model) -> Result<(), AuthzError>;

    fn save_policy(&self, model: &Model) -> Result<(), AuthzError>;

    fn add_policy(&self, _sec: &str, _ptype: &str, _rule: &[String]) -> Result<(), AuthzError> {
        Err(AuthzError::AdapterNotImplemented)
    }

    fn add_policies(
        &self,
        _sec: &str,
        _ptype: &str,
        _rules: &[Vec<String>],
    ) -> Result<(), AuthzError> {
        Err(AuthzError::AdapterNotImplemented)
    }

    fn remove_policy(&self, _sec: &str, _ptype: &str, _rule: &[String]) -> Result<(), AuthzError> {
        Err(AuthzError::AdapterNotImplemented)
    }

    fn remove_policies(
        &self,
        _sec: &str,
        _ptype: &str,
        _rules: &[Vec<String>],
    ) -> Result<(), AuthzError> {
        Err(AuthzError::AdapterNotImplemented)
    }

    fn remove_filtered_policy(
        &self,
        _sec: &str,
        _ptype: &str,
        _field_index: usize,
        _values: &[&str],
    ) -> Result<(), AuthzError> {
        Err(AuthzError::AdapterNotImplemented)
    }

    fn update_policy(
        &self,
        _sec: &str,
        _ptype: &str,
        _old: &[String],
        _new: &[String],
    ) -> Result<(), AuthzError> {
        Err(AuthzError::AdapterNotImplemented)
    }
}

/// Insert one stored line `[ptype, field, field, ...]` into `model`.
///
/// The section is the first letter of the ptype (`p2` -> `p`). Lines for
/// policy types the model does not define are skipped with a warning.
pub fn load_policy_line(line: &[String], model: &Model) -> Result<(), AuthzError> {
    let [ptype, fields @ ..] = line else {
        return Ok(());
    };
    let sec = ptype.get(..1).unwrap_or_default();
    if model.get(sec, ptype).is_none() {
        tracing::warn!("ignoring policy line for undefined policy type `{ptype}`");
        return Ok(());
    }
    model.add_policy(sec, ptype, fields.to_vec())?;
    Ok(())
}

/// Every stored rule of `model` as `[ptype, field, ...]` lines, `p` first.
pub fn policy_lines(model: &Model) -> Vec<Vec<String>> {
    let mut lines = Vec::new();
    for sec in ["p", "g"] {
        for (ptype, ast) in model.assertions(sec) {
            for rule in ast.policy().rules() {
                let mut line = Vec::with_capacity(rule.len() + 1);
                line.push(ptype.to_string());
                line.extend(rule.iter().cloned());
                lines.push(line);
            }
        }
    }
    lines
}

pub type UpdateCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Propagates policy changes to other enforcer instances.
///
/// Every `update_for_*` hook defaults to the coarse [`Watcher::update`].
pub trait Watcher: Send + Sync {
    /// Register what to run when another instance reports a change.
    fn set_update_callback(&self, callback: UpdateCallback) -> Result<(), AuthzError>;

    fn update(&self) -> Result<(), AuthzError>;

    fn close(&self) {}

    fn update_for_add_policy(&self, _sec: &str, _ptype: &str, _rule: &[String]) -> Result<(), AuthzError> {
        self.update()
    }

    fn update_for_remove_policy(
        &self,
        _sec: &str,
        _ptype: &str,
        _rule: &[String],
    ) -> Result<(), AuthzError> {
        self.update()
    }

    fn update_for_remove_filtered_policy(
        &self,
        _sec: &str,
        _ptype: &str,
        _field_index: usize,
        _values: &[&str],
    ) -> Result<(), AuthzError> {
        self.update()
    }

    fn update_for_save_policy(&self, _model: &Model) -> Result<(), AuthzError> {
        self.update()
    }

    fn update_for_add_policies(
        &self,
        _sec: &str,
        _ptype: &str,
        _rules: &[Vec<String>],
    ) -> Result<(), AuthzError> {
        self.update()
    }

    fn update_for_remove_policies(
        &self,
        _sec: &str,
        _ptype: &str,
        _rules: &[Vec<String>],
    ) -> Result<(), AuthzError> {
        self.update()
    }

    fn update_for_update_policy(
        &self,
        _sec: &str,
        _ptype: &str,
        _old: &[String],
        _new: &[String],
    ) -> Result<(), AuthzError> {
        self.update()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Model {
        let mut m = Model::new();
        m.add_def("p", "p", "sub, obj, act").unwrap();
        m.add_def("g", "g", "_, _").unwrap();
        m
    }

    fn line(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_load_policy_line() {
        let m = model();
        load_policy_line(&line(&["p", "alice", "data1", "read"]), &m).unwrap();
        load_policy_line(&line(&["g", "alice", "admin"]), &m).unwrap();
        load_policy_line(&line(&["p3", "ignored"]), &m).unwrap();
        load_policy_line(&[], &m).unwrap();
        assert_eq!(m.get_policy("p", "p").unwrap().len(), 1);
        assert_eq!(
            policy_lines(&m),
            vec![
                line(&["p", "alice", "data1", "read"]),
                line(&["g", "alice", "admin"])
            ]
        );
    }
}
