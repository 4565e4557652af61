//! Indexed rule storage for one policy type.

use std::collections::{HashMap, HashSet};

/// Rules of one `(section, ptype)` pair in insertion order, plus a
/// `join(rule, ",") -> position` index for O(1) membership tests.
///
/// The bucket itself is not synchronised; [`super::Assertion`] wraps it in a
/// read-write lock.
#[derive(Debug, Clone, Default)]
pub struct PolicyBucket {
    rules: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

fn key(rule: &[String]) -> String {
    rule.join(",")
}

impl PolicyBucket {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Vec<String>] {
        &self.rules
    }

    pub fn contains(&self, rule: &[String]) -> bool {
        self.index.contains_key(&key(rule))
    }

    /// Append `rule`; `false` when an identical rule is already stored.
    pub fn add(&mut self, rule: Vec<String>) -> bool {
        let k = key(&rule);
        if self.index.contains_key(&k) {
            return false;
        }
        self.index.insert(k, self.rules.len());
        self.rules.push(rule);
        true
    }

    /// Add every rule that is not stored yet and return those.
    pub fn add_many(&mut self, rules: &[Vec<String>]) -> Vec<Vec<String>> {
        rules
            .iter()
            .filter(|rule| self.add(rule.to_vec()))
            .cloned()
            .collect()
    }

    pub fn remove(&mut self, rule: &[String]) -> bool {
        let Some(pos) = self.index.remove(&key(rule)) else {
            return false;
        };
        self.rules.remove(pos);
        self.reindex_from(pos);
        true
    }

    /// Remove every stored rule among `rules` and return those.
    pub fn remove_many(&mut self, rules: &[Vec<String>]) -> Vec<Vec<String>> {
        rules
            .iter()
            .filter(|rule| self.remove(rule))
            .cloned()
            .collect()
    }

    /// Remove every rule matching the filter in a single pass.
    ///
    /// An empty value in `values` is a wildcard for its position.
    pub fn remove_filtered(&mut self, field_index: usize, values: &[&str]) -> Vec<Vec<String>> {
        let mut removed = Vec::new();
        let mut first = None;
        let mut kept = Vec::with_capacity(self.rules.len());
        for (i, rule) in std::mem::take(&mut self.rules).into_iter().enumerate() {
            if matches_filter(&rule, field_index, values) {
                self.index.remove(&key(&rule));
                first.get_or_insert(i);
                removed.push(rule);
            } else {
                kept.push(rule);
            }
        }
        self.rules = kept;
        if let Some(pos) = first {
            self.reindex_from(pos);
        }
        removed
    }

    /// Replace `old` in place with `new`, keeping its position.
    pub fn update(&mut self, old: &[String], new: Vec<String>) -> bool {
        let new_key = key(&new);
        if self.index.contains_key(&new_key) {
            return false;
        }
        let Some(pos) = self.index.remove(&key(old)) else {
            return false;
        };
        self.index.insert(new_key, pos);
        self.rules[pos] = new;
        true
    }

    pub fn filtered(&self, field_index: usize, values: &[&str]) -> Vec<Vec<String>> {
        self.rules
            .iter()
            .filter(|rule| matches_filter(rule, field_index, values))
            .cloned()
            .collect()
    }

    /// Distinct values at `field_index`, in first-seen order.
    pub fn values_for_field(&self, field_index: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .filter_map(|rule| rule.get(field_index))
            .filter(|v| seen.insert(v.as_str()))
            .cloned()
            .collect()
    }

    /// The candidates that are stored.
    pub fn filter_exists(&self, rules: &[Vec<String>]) -> Vec<Vec<String>> {
        rules.iter().filter(|r| self.contains(r)).cloned().collect()
    }

    /// The candidates that are not stored.
    pub fn filter_not_exists(&self, rules: &[Vec<String>]) -> Vec<Vec<String>> {
        rules.iter().filter(|r| !self.contains(r)).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.index.clear();
    }

    /// Stable-sort the rules and rebuild the whole index.
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Vec<String>, &Vec<String>) -> std::cmp::Ordering,
    {
        self.rules.sort_by(compare);
        self.reindex_from(0);
    }

    fn reindex_from(&mut self, pos: usize) {
        for (i, rule) in self.rules.iter().enumerate().skip(pos) {
            self.index.insert(key(rule), i);
        }
    }

    #[cfg(test)]
    fn index_is_consistent(&self) -> bool {
        self.index.len() == self.rules.len()
            && self
                .rules
                .iter()
                .enumerate()
                .all(|(i, rule)| self.index.get(&key(rule)) == Some(&i))
    }
}

fn matches_filter(rule: &[String], field_index: usize, values: &[&str]) -> bool {
    values.iter().enumerate().all(|(offset, value)| {
        value.is_empty() || rule.get(field_index + offset).map(String::as_str) == Some(*value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rule(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_is_unique() {
        let mut bucket = PolicyBucket::default();
        assert!(bucket.add(rule(&["alice", "data1", "read"])));
        assert!(!bucket.add(rule(&["alice", "data1", "read"])));
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn test_add_many_reports_only_new_rules() {
        let mut bucket = PolicyBucket::default();
        bucket.add(rule(&["alice", "data1", "read"]));
        let added = bucket.add_many(&[
            rule(&["alice", "data1", "read"]),
            rule(&["bob", "data2", "write"]),
        ]);
        assert_eq!(added, vec![rule(&["bob", "data2", "write"])]);
    }

    #[test]
    fn test_remove_reindexes_tail() {
        let mut bucket = PolicyBucket::default();
        bucket.add(rule(&["a"]));
        bucket.add(rule(&["b"]));
        bucket.add(rule(&["c"]));
        assert!(bucket.remove(&rule(&["a"])));
        assert!(!bucket.remove(&rule(&["a"])));
        assert!(bucket.index_is_consistent());
        assert_eq!(bucket.rules(), &[rule(&["b"]), rule(&["c"])]);
    }

    #[test]
    fn test_remove_filtered_wildcard() {
        let mut bucket = PolicyBucket::default();
        bucket.add(rule(&["alice", "data1", "read"]));
        bucket.add(rule(&["alice", "data2", "read"]));
        bucket.add(rule(&["bob", "data2", "write"]));

        let removed = bucket.remove_filtered(1, &["data2", "read"]);
        assert_eq!(removed, vec![rule(&["alice", "data2", "read"])]);

        let removed = bucket.remove_filtered(0, &["", "data2"]);
        assert_eq!(removed, vec![rule(&["bob", "data2", "write"])]);
        assert_eq!(bucket.rules(), &[rule(&["alice", "data1", "read"])]);
        assert!(bucket.index_is_consistent());
    }

    #[test]
    fn test_update_keeps_position() {
        let mut bucket = PolicyBucket::default();
        bucket.add(rule(&["a"]));
        bucket.add(rule(&["b"]));
        assert!(bucket.update(&rule(&["a"]), rule(&["z"])));
        assert_eq!(bucket.rules(), &[rule(&["z"]), rule(&["b"])]);
        assert!(!bucket.update(&rule(&["z"]), rule(&["b"])));
        assert!(!bucket.update(&rule(&["missing"]), rule(&["y"])));
        assert!(bucket.index_is_consistent());
    }

    #[test]
    fn test_values_for_field_dedup() {
        let mut bucket = PolicyBucket::default();
        bucket.add(rule(&["alice", "data1"]));
        bucket.add(rule(&["bob", "data1"]));
        bucket.add(rule(&["alice", "data2"]));
        assert_eq!(bucket.values_for_field(0), vec!["alice", "bob"]);
        assert_eq!(bucket.values_for_field(1), vec!["data1", "data2"]);
        assert!(bucket.values_for_field(5).is_empty());
    }

    #[test]
    fn test_filter_exists_partitions() {
        let mut bucket = PolicyBucket::default();
        bucket.add(rule(&["a"]));
        let candidates = vec![rule(&["a"]), rule(&["b"])];
        assert_eq!(bucket.filter_exists(&candidates), vec![rule(&["a"])]);
        assert_eq!(bucket.filter_not_exists(&candidates), vec![rule(&["b"])]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(Vec<String>),
        Remove(Vec<String>),
        RemoveFiltered(usize, String),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let field = prop::sample::select(vec!["a", "b", "c"]).prop_map(String::from);
        let rule = prop::collection::vec(field.clone(), 2);
        prop_oneof![
            rule.clone().prop_map(Op::Add),
            rule.prop_map(Op::Remove),
            (0usize..2, field).prop_map(|(i, v)| Op::RemoveFiltered(i, v)),
        ]
    }

    proptest! {
        #[test]
        fn test_index_stays_consistent(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let mut bucket = PolicyBucket::default();
            for op in ops {
                match op {
                    Op::Add(r) => { bucket.add(r); }
                    Op::Remove(r) => { bucket.remove(&r); }
                    Op::RemoveFiltered(i, v) => { bucket.remove_filtered(i, &[v.as_str()]); }
                }
                prop_assert!(bucket.index_is_consistent());
                let distinct: HashSet<_> = bucket.rules().iter().collect();
                prop_assert_eq!(distinct.len(), bucket.len());
            }
        }
    }
}
