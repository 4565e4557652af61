//! Reading and changing policy and grouping rules.
//!
//! Unprefixed methods work on `p` and `g`; `named_*` variants take the
//! policy type explicitly (`p2`, `g2`, ...). Mutations return `false` when
//! the rules were already in the requested state.

use crate::enforcer::mutation::Mutation;
use crate::enforcer::Enforcer;
use crate::errors::AuthzError;

pub(crate) fn rule_of<S: AsRef<str>>(rule: &[S]) -> Vec<String> {
    rule.iter().map(|f| f.as_ref().to_string()).collect()
}

pub(crate) fn rules_of<S: AsRef<str>>(rules: &[Vec<S>]) -> Vec<Vec<String>> {
    rules.iter().map(|r| rule_of(r)).collect()
}

impl Enforcer {
    // ─── Field values ───────────────────────────────────────────────────

    pub fn get_all_subjects(&self) -> Result<Vec<String>, AuthzError> {
        self.get_all_named_subjects("p")
    }

    pub fn get_all_named_subjects(&self, ptype: &str) -> Result<Vec<String>, AuthzError> {
        self.named_field_values(ptype, "sub", 0)
    }

    pub fn get_all_objects(&self) -> Result<Vec<String>, AuthzError> {
        self.get_all_named_objects("p")
    }

    pub fn get_all_named_objects(&self, ptype: &str) -> Result<Vec<String>, AuthzError> {
        self.named_field_values(ptype, "obj", 1)
    }

    pub fn get_all_actions(&self) -> Result<Vec<String>, AuthzError> {
        self.get_all_named_actions("p")
    }

    pub fn get_all_named_actions(&self, ptype: &str) -> Result<Vec<String>, AuthzError> {
        self.named_field_values(ptype, "act", 2)
    }

    /// Every role that appears on the right-hand side of a `g` rule.
    pub fn get_all_roles(&self) -> Result<Vec<String>, AuthzError> {
        self.get_all_named_roles("g")
    }

    pub fn get_all_named_roles(&self, ptype: &str) -> Result<Vec<String>, AuthzError> {
        self.model.get_values_for_field_in_policy("g", ptype, 1)
    }

    fn named_field_values(
        &self,
        ptype: &str,
        field: &str,
        fallback: usize,
    ) -> Result<Vec<String>, AuthzError> {
        let index = self.model.field_index(ptype, field).unwrap_or(fallback);
        self.model.get_values_for_field_in_policy("p", ptype, index)
    }

    // ─── Policy rules ───────────────────────────────────────────────────

    pub fn get_policy(&self) -> Result<Vec<Vec<String>>, AuthzError> {
        self.get_named_policy("p")
    }

    pub fn get_named_policy(&self, ptype: &str) -> Result<Vec<Vec<String>>, AuthzError> {
        self.model.get_policy("p", ptype)
    }

    /// Rules whose fields from `field_index` on equal `values`; an empty
    /// value matches anything.
    pub fn get_filtered_policy(
        &self,
        field_index: usize,
        values: &[&str],
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        self.get_filtered_named_policy("p", field_index, values)
    }

    pub fn get_filtered_named_policy(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        self.model
            .get_filtered_policy("p", ptype, field_index, values)
    }

    pub fn has_policy<S: AsRef<str>>(&self, rule: &[S]) -> Result<bool, AuthzError> {
        self.has_named_policy("p", rule)
    }

    pub fn has_named_policy<S: AsRef<str>>(
        &self,
        ptype: &str,
        rule: &[S],
    ) -> Result<bool, AuthzError> {
        self.model.has_policy("p", ptype, &rule_of(rule))
    }

    pub fn add_policy<S: AsRef<str>>(&self, rule: &[S]) -> Result<bool, AuthzError> {
        self.add_named_policy("p", rule)
    }

    pub fn add_named_policy<S: AsRef<str>>(
        &self,
        ptype: &str,
        rule: &[S],
    ) -> Result<bool, AuthzError> {
        self.add_rules("p", ptype, &[rule_of(rule)], false)
    }

    /// Add all of `rules`, or none of them if any is already stored.
    pub fn add_policies<S: AsRef<str>>(&self, rules: &[Vec<S>]) -> Result<bool, AuthzError> {
        self.add_named_policies("p", rules)
    }

    pub fn add_named_policies<S: AsRef<str>>(
        &self,
        ptype: &str,
        rules: &[Vec<S>],
    ) -> Result<bool, AuthzError> {
        self.add_rules("p", ptype, &rules_of(rules), false)
    }

    /// Add the rules of `rules` that are not stored yet.
    pub fn add_policies_ex<S: AsRef<str>>(&self, rules: &[Vec<S>]) -> Result<bool, AuthzError> {
        self.add_rules("p", "p", &rules_of(rules), true)
    }

    pub fn remove_policy<S: AsRef<str>>(&self, rule: &[S]) -> Result<bool, AuthzError> {
        self.remove_named_policy("p", rule)
    }

    pub fn remove_named_policy<S: AsRef<str>>(
        &self,
        ptype: &str,
        rule: &[S],
    ) -> Result<bool, AuthzError> {
        self.remove_rules("p", ptype, &[rule_of(rule)])
    }

    /// Remove all of `rules`, or none of them if any is missing.
    pub fn remove_policies<S: AsRef<str>>(&self, rules: &[Vec<S>]) -> Result<bool, AuthzError> {
        self.remove_named_policies("p", rules)
    }

    pub fn remove_named_policies<S: AsRef<str>>(
        &self,
        ptype: &str,
        rules: &[Vec<S>],
    ) -> Result<bool, AuthzError> {
        self.remove_rules("p", ptype, &rules_of(rules))
    }

    pub fn remove_filtered_policy(
        &self,
        field_index: usize,
        values: &[&str],
    ) -> Result<bool, AuthzError> {
        self.remove_filtered_named_policy("p", field_index, values)
    }

    pub fn remove_filtered_named_policy(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<bool, AuthzError> {
        self.remove_filtered_rules("p", ptype, field_index, values)
    }

    /// Replace `old` with `new` in place.
    pub fn update_policy<S: AsRef<str>>(&self, old: &[S], new: &[S]) -> Result<bool, AuthzError> {
        self.update_named_policy("p", old, new)
    }

    pub fn update_named_policy<S: AsRef<str>>(
        &self,
        ptype: &str,
        old: &[S],
        new: &[S],
    ) -> Result<bool, AuthzError> {
        self.update_rules("p", ptype, &[rule_of(old)], &[rule_of(new)])
    }

    /// Replace each `old[i]` with `new[i]`; nothing changes unless every
    /// pair applies.
    pub fn update_policies<S: AsRef<str>>(
        &self,
        old: &[Vec<S>],
        new: &[Vec<S>],
    ) -> Result<bool, AuthzError> {
        self.update_rules("p", "p", &rules_of(old), &rules_of(new))
    }

    // ─── Grouping rules ─────────────────────────────────────────────────

    pub fn get_grouping_policy(&self) -> Result<Vec<Vec<String>>, AuthzError> {
        self.get_named_grouping_policy("g")
    }

    pub fn get_named_grouping_policy(&self, ptype: &str) -> Result<Vec<Vec<String>>, AuthzError> {
        self.model.get_policy("g", ptype)
    }

    pub fn get_filtered_grouping_policy(
        &self,
        field_index: usize,
        values: &[&str],
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        self.get_filtered_named_grouping_policy("g", field_index, values)
    }

    pub fn get_filtered_named_grouping_policy(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        self.model
            .get_filtered_policy("g", ptype, field_index, values)
    }

    pub fn has_grouping_policy<S: AsRef<str>>(&self, rule: &[S]) -> Result<bool, AuthzError> {
        self.has_named_grouping_policy("g", rule)
    }

    pub fn has_named_grouping_policy<S: AsRef<str>>(
        &self,
        ptype: &str,
        rule: &[S],
    ) -> Result<bool, AuthzError> {
        self.model.has_policy("g", ptype, &rule_of(rule))
    }

    pub fn add_grouping_policy<S: AsRef<str>>(&self, rule: &[S]) -> Result<bool, AuthzError> {
        self.add_named_grouping_policy("g", rule)
    }

    pub fn add_named_grouping_policy<S: AsRef<str>>(
        &self,
        ptype: &str,
        rule: &[S],
    ) -> Result<bool, AuthzError> {
        self.add_rules("g", ptype, &[rule_of(rule)], false)
    }

    pub fn add_grouping_policies<S: AsRef<str>>(
        &self,
        rules: &[Vec<S>],
    ) -> Result<bool, AuthzError> {
        self.add_named_grouping_policies("g", rules)
    }

    pub fn add_named_grouping_policies<S: AsRef<str>>(
        &self,
        ptype: &str,
        rules: &[Vec<S>],
    ) -> Result<bool, AuthzError> {
        self.add_rules("g", ptype, &rules_of(rules), false)
    }

    pub fn remove_grouping_policy<S: AsRef<str>>(&self, rule: &[S]) -> Result<bool, AuthzError> {
        self.remove_named_grouping_policy("g", rule)
    }

    pub fn remove_named_grouping_policy<S: AsRef<str>>(
        &self,
        ptype: &str,
        rule: &[S],
    ) -> Result<bool, AuthzError> {
        self.remove_rules("g", ptype, &[rule_of(rule)])
    }

    pub fn remove_grouping_policies<S: AsRef<str>>(
        &self,
        rules: &[Vec<S>],
    ) -> Result<bool, AuthzError> {
        self.remove_named_grouping_policies("g", rules)
    }

    pub fn remove_named_grouping_policies<S: AsRef<str>>(
        &self,
        ptype: &str,
        rules: &[Vec<S>],
    ) -> Result<bool, AuthzError> {
        self.remove_rules("g", ptype, &rules_of(rules))
    }

    pub fn remove_filtered_grouping_policy(
        &self,
        field_index: usize,
        values: &[&str],
    ) -> Result<bool, AuthzError> {
        self.remove_filtered_named_grouping_policy("g", field_index, values)
    }

    pub fn remove_filtered_named_grouping_policy(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<bool, AuthzError> {
        self.remove_filtered_rules("g", ptype, field_index, values)
    }

    pub fn update_grouping_policy<S: AsRef<str>>(
        &self,
        old: &[S],
        new: &[S],
    ) -> Result<bool, AuthzError> {
        self.update_named_grouping_policy("g", old, new)
    }

    pub fn update_named_grouping_policy<S: AsRef<str>>(
        &self,
        ptype: &str,
        old: &[S],
        new: &[S],
    ) -> Result<bool, AuthzError> {
        self.update_rules("g", ptype, &[rule_of(old)], &[rule_of(new)])
    }

    // ─── Shared plumbing ────────────────────────────────────────────────

    fn add_rules(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
        skip_existing: bool,
    ) -> Result<bool, AuthzError> {
        let op = Mutation::Add {
            rules,
            skip_existing,
        };
        Ok(!self.apply_mutation(sec, ptype, op)?.is_empty())
    }

    fn remove_rules(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool, AuthzError> {
        Ok(!self
            .apply_mutation(sec, ptype, Mutation::Remove { rules })?
            .is_empty())
    }

    fn remove_filtered_rules(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<bool, AuthzError> {
        let op = Mutation::RemoveFiltered {
            field_index,
            values,
        };
        Ok(!self.apply_mutation(sec, ptype, op)?.is_empty())
    }

    fn update_rules(
        &self,
        sec: &str,
        ptype: &str,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> Result<bool, AuthzError> {
        Ok(!self
            .apply_mutation(sec, ptype, Mutation::Update { old, new })?
            .is_empty())
    }
}
