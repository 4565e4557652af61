use parking_lot::Mutex;

use crate::errors::AuthzError;
use crate::model::Model;
use crate::persist::{load_policy_line, policy_lines, Adapter};

/// Keeps `[ptype, field, ...]` lines in memory. Supports every auto-save hook.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    lines: Mutex<Vec<Vec<String>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the adapter with stored lines such as `["p", "alice", "data1", "read"]`.
    pub fn with_lines<I, L, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: Mutex::new(
                lines
                    .into_iter()
                    .map(|l| l.into_iter().map(Into::into).collect())
                    .collect(),
            ),
        }
    }

    /// Stored lines, in storage order.
    pub fn lines(&self) -> Vec<Vec<String>> {
        self.lines.lock().clone()
    }
}

fn stored(ptype: &str, rule: &[String]) -> Vec<String> {
    std::iter::once(ptype.to_string())
        .chain(rule.iter().cloned())
        .collect()
}

impl Adapter for MemoryAdapter {
    fn load_policy(&self, model: &Model) -> Result<(), AuthzError> {
        for line in self.lines.lock().iter() {
            load_policy_line(line, model)?;
        }
        Ok(())
    }

    fn save_policy(&self, model: &Model) -> Result<(), AuthzError> {
        *self.lines.lock() = policy_lines(model);
        Ok(())
    }

    fn add_policy(&self, _sec: &str, ptype: &str, rule: &[String]) -> Result<(), AuthzError> {
        let line = stored(ptype, rule);
        let mut lines = self.lines.lock();
        if !lines.contains(&line) {
            lines.push(line);
        }
        Ok(())
    }

    fn add_policies(&self, sec: &str, ptype: &str, rules: &[Vec<String>]) -> Result<(), AuthzError> {
        for rule in rules {
            self.add_policy(sec, ptype, rule)?;
        }
        Ok(())
    }

    fn remove_policy(&self, _sec: &str, ptype: &str, rule: &[String]) -> Result<(), AuthzError> {
        let line = stored(ptype, rule);
        self.lines.lock().retain(|l| *l != line);
        Ok(())
    }

    fn remove_policies(&self, sec: &str, ptype: &str, rules: &[Vec<String>]) -> Result<(), AuthzError> {
        for rule in rules {
            self.remove_policy(sec, ptype, rule)?;
        }
        Ok(())
    }

    fn remove_filtered_policy(
        &self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<(), AuthzError> {
        self.lines.lock().retain(|line| {
            let Some((head, fields)) = line.split_first() else {
                return true;
            };
            let hit = head == ptype
                && values.iter().enumerate().all(|(offset, v)| {
                    v.is_empty() || fields.get(field_index + offset).map(String::as_str) == Some(*v)
                });
            !hit
        });
        Ok(())
    }

    fn update_policy(
        &self,
        _sec: &str,
        ptype: &str,
        old: &[String],
        new: &[String],
    ) -> Result<(), AuthzError> {
        let old = stored(ptype, old);
        let mut lines = self.lines.lock();
        if let Some(line) = lines.iter_mut().find(|l| **l == old) {
            *line = stored(ptype, new);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_load_then_save() {
        let adapter = MemoryAdapter::with_lines([
            vec!["p", "alice", "data1", "read"],
            vec!["g", "alice", "admin"],
        ]);
        let mut model = Model::new();
        model.add_def("p", "p", "sub, obj, act").unwrap();
        model.add_def("g", "g", "_, _").unwrap();
        adapter.load_policy(&model).unwrap();
        assert_eq!(model.get_policy("g", "g").unwrap(), vec![rule(&["alice", "admin"])]);

        model.add_policy("p", "p", rule(&["bob", "data2", "write"])).unwrap();
        adapter.save_policy(&model).unwrap();
        assert_eq!(adapter.lines().len(), 3);
    }

    #[test]
    fn test_auto_save_hooks() {
        let adapter = MemoryAdapter::new();
        adapter.add_policy("p", "p", &rule(&["alice", "data1", "read"])).unwrap();
        adapter.add_policy("p", "p", &rule(&["alice", "data1", "read"])).unwrap();
        adapter.add_policy("p", "p", &rule(&["alice", "data2", "read"])).unwrap();
        assert_eq!(adapter.lines().len(), 2);

        adapter.remove_filtered_policy("p", "p", 1, &["data2"]).unwrap();
        assert_eq!(adapter.lines(), vec![rule(&["p", "alice", "data1", "read"])]);

        adapter
            .update_policy("p", "p", &rule(&["alice", "data1", "read"]), &rule(&["alice", "data1", "write"]))
            .unwrap();
        adapter.remove_policy("p", "p", &rule(&["alice", "data1", "write"])).unwrap();
        assert!(adapter.lines().is_empty());
    }
}
