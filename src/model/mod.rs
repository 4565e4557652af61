//! The access-control model: request/policy schemas, role definitions, the
//! effect expression, matchers, constraints, and the live rules of every
//! policy type.

mod assertion;
pub mod constraint;
pub mod store;
mod text;

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;

pub use assertion::{Assertion, PolicyOp};
pub use constraint::{Constraint, ConstraintKind};
pub use store::PolicyBucket;
pub use text::section_name;

use crate::effect::EffectExpr;
use crate::errors::AuthzError;
use text::{parse_model_text, SECTIONS};

const REQUIRED_SECTIONS: [&str; 4] = ["r", "p", "e", "m"];

/// Separator between domain and name in subject-hierarchy keys.
const DOMAIN_SEPARATOR: &str = "::";

/// Snapshot of every `p`/`g` bucket, used to undo a failed reload.
pub type PolicySnapshot = Vec<(String, String, PolicyBucket)>;

/// Assertions keyed by section (`r`, `p`, `g`, `e`, `m`, `c`) then by key
/// (`p`, `p2`, ...), both in definition order.
#[derive(Debug, Clone, Default)]
pub struct Model {
    sections: IndexMap<String, IndexMap<String, Assertion>>,
}

impl Model {
    /// An empty model; populate it with [`Model::add_def`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text(text: &str) -> Result<Self, AuthzError> {
        let parsed = parse_model_text(text)?;
        let mut model = Self::new();

        for (header, entries) in &parsed {
            let Some((_, sec)) = SECTIONS.iter().find(|(long, _)| long == header) else {
                tracing::warn!("ignoring unknown model section `[{header}]`");
                continue;
            };
            for (key, value) in entries {
                model.add_def(sec, key, value)?;
            }
        }

        let missing: Vec<String> = REQUIRED_SECTIONS
            .iter()
            .filter(|sec| !model.has_section(sec))
            .map(|sec| section_name(sec).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AuthzError::MissingSections(missing.join(", ")));
        }

        model.print_model();
        Ok(model)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthzError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| AuthzError::ModelLoadError {
            path: path.display().to_string(),
            source: e,
        })?;
        tracing::info!(path = %path.display(), "Loading model");
        Self::from_text(&text)
    }

    /// Add (or replace) the assertion `key` of section `sec`.
    /// Returns `false` and changes nothing when `value` is empty.
    pub fn add_def(&mut self, sec: &str, key: &str, value: &str) -> Result<bool, AuthzError> {
        if value.trim().is_empty() {
            return Ok(false);
        }
        let assertion = Assertion::new(sec, key, value)?;
        self.sections
            .entry(sec.to_string())
            .or_default()
            .insert(key.to_string(), assertion);
        Ok(true)
    }

    pub fn has_section(&self, sec: &str) -> bool {
        self.sections.get(sec).is_some_and(|s| !s.is_empty())
    }

    /// Assertions of one section in definition order.
    pub fn assertions(&self, sec: &str) -> impl Iterator<Item = (&str, &Assertion)> {
        self.sections
            .get(sec)
            .into_iter()
            .flat_map(|s| s.iter().map(|(k, a)| (k.as_str(), a)))
    }

    pub fn get(&self, sec: &str, key: &str) -> Option<&Assertion> {
        self.sections.get(sec)?.get(key)
    }

    pub fn assertion(&self, sec: &str, ptype: &str) -> Result<&Assertion, AuthzError> {
        self.get(sec, ptype)
            .ok_or_else(|| AuthzError::UndefinedPolicyType {
                sec: sec.to_string(),
                ptype: ptype.to_string(),
            })
    }

    /// The parsed `e` expression.
    pub fn effect_expr(&self) -> Result<EffectExpr, AuthzError> {
        self.assertion("e", "e")?.value().parse()
    }

    /// Position of `field` in the rules of policy type `ptype`.
    pub fn field_index(&self, ptype: &str, field: &str) -> Option<usize> {
        let token = format!("{ptype}_{field}");
        self.get("p", ptype)?.tokens().iter().position(|t| *t == token)
    }

    // ─── Rules ──────────────────────────────────────────────────────────

    pub fn get_policy(&self, sec: &str, ptype: &str) -> Result<Vec<Vec<String>>, AuthzError> {
        Ok(self.assertion(sec, ptype)?.policy().rules().to_vec())
    }

    pub fn get_filtered_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        Ok(self
            .assertion(sec, ptype)?
            .policy()
            .filtered(field_index, values))
    }

    pub fn has_policy(&self, sec: &str, ptype: &str, rule: &[String]) -> Result<bool, AuthzError> {
        Ok(self.assertion(sec, ptype)?.policy().contains(rule))
    }

    pub fn has_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool, AuthzError> {
        let ast = self.assertion(sec, ptype)?;
        let bucket = ast.policy();
        Ok(rules.iter().any(|r| bucket.contains(r)))
    }

    pub fn add_policy(&self, sec: &str, ptype: &str, rule: Vec<String>) -> Result<bool, AuthzError> {
        Ok(self.assertion(sec, ptype)?.policy_mut().add(rule))
    }

    pub fn add_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        Ok(self.assertion(sec, ptype)?.policy_mut().add_many(rules))
    }

    pub fn remove_policy(&self, sec: &str, ptype: &str, rule: &[String]) -> Result<bool, AuthzError> {
        Ok(self.assertion(sec, ptype)?.policy_mut().remove(rule))
    }

    pub fn remove_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        Ok(self.assertion(sec, ptype)?.policy_mut().remove_many(rules))
    }

    /// Remove every rule whose fields from `field_index` on match `values`
    /// (an empty value matches anything).
    pub fn remove_filtered_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        let ast = self.assertion(sec, ptype)?;
        let width = ast.width();
        if field_index >= width || field_index + values.len() > width {
            return Err(AuthzError::FieldIndexOutOfRange {
                ptype: ptype.to_string(),
                index: field_index,
                width,
            });
        }
        Ok(ast.policy_mut().remove_filtered(field_index, values))
    }

    pub fn update_policy(
        &self,
        sec: &str,
        ptype: &str,
        old: &[String],
        new: Vec<String>,
    ) -> Result<bool, AuthzError> {
        Ok(self.assertion(sec, ptype)?.policy_mut().update(old, new))
    }

    pub fn get_values_for_field_in_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
    ) -> Result<Vec<String>, AuthzError> {
        Ok(self
            .assertion(sec, ptype)?
            .policy()
            .values_for_field(field_index))
    }

    /// Distinct values at `field_index` across every policy type of `sec`.
    pub fn get_values_for_field_in_policy_all_types(
        &self,
        sec: &str,
        field_index: usize,
    ) -> Vec<String> {
        let mut values: Vec<String> = Vec::new();
        for (_, ast) in self.assertions(sec) {
            for v in ast.policy().values_for_field(field_index) {
                if !values.contains(&v) {
                    values.push(v);
                }
            }
        }
        values
    }

    /// Empty every `p` and `g` bucket.
    pub fn clear_policy(&self) {
        for sec in ["p", "g"] {
            for (_, ast) in self.assertions(sec) {
                ast.policy_mut().clear();
            }
        }
    }

    pub fn policy_snapshot(&self) -> PolicySnapshot {
        ["p", "g"]
            .iter()
            .flat_map(|sec| {
                self.assertions(sec)
                    .map(move |(key, ast)| (sec.to_string(), key.to_string(), ast.policy().clone()))
            })
            .collect()
    }

    pub fn restore_policy(&self, snapshot: PolicySnapshot) {
        for (sec, key, bucket) in snapshot {
            if let Some(ast) = self.get(&sec, &key) {
                *ast.policy_mut() = bucket;
            }
        }
    }

    // ─── Ordering ───────────────────────────────────────────────────────

    /// Whether the effect orders rows by priority, so every change must
    /// leave them sorted.
    pub fn keeps_priority_order(&self) -> bool {
        matches!(
            self.effect_expr(),
            Ok(EffectExpr::Priority | EffectExpr::SubjectPriority)
        )
    }

    /// Order rules for the priority combinators, which scan from the last
    /// row backwards: the row that must win ends up last.
    pub fn sort_policies(&self) -> Result<(), AuthzError> {
        match self.effect_expr()? {
            EffectExpr::Priority => self.sort_policies_by_priority(),
            EffectExpr::SubjectPriority => self.sort_policies_by_subject_hierarchy(),
            _ => Ok(()),
        }
    }

    /// Descending by the numeric `priority` field, so the lowest number is
    /// visited first. Rows with a non-numeric priority go to the front.
    pub fn sort_policies_by_priority(&self) -> Result<(), AuthzError> {
        for (ptype, ast) in self.assertions("p") {
            let Some(idx) = self.field_index(ptype, "priority") else {
                continue;
            };
            let priority = |rule: &Vec<String>| rule.get(idx).and_then(|v| v.parse::<i64>().ok());
            ast.policy_mut().sort_by(|a, b| match (priority(a), priority(b)) {
                (Some(x), Some(y)) => y.cmp(&x),
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
            tracing::debug!(ptype = %ptype, "Sorted policies by priority");
        }
        Ok(())
    }

    /// Ascending by the subject's depth in the `g` hierarchy, so the most
    /// specific subject is visited first.
    pub fn sort_policies_by_subject_hierarchy(&self) -> Result<(), AuthzError> {
        let grouping = self.get_policy("g", "g")?;
        let depth = subject_depths(&grouping)?;

        for (ptype, ast) in self.assertions("p") {
            let dom_idx = self.field_index(ptype, "dom");
            let key = |rule: &Vec<String>| {
                let domain = dom_idx.and_then(|i| rule.get(i)).map(String::as_str).unwrap_or("");
                let sub = rule.first().map(String::as_str).unwrap_or("");
                depth
                    .get(&format!("{domain}{DOMAIN_SEPARATOR}{sub}"))
                    .copied()
                    .unwrap_or(0)
            };
            ast.policy_mut().sort_by(|a, b| key(a).cmp(&key(b)));
            tracing::debug!(ptype = %ptype, "Sorted policies by subject hierarchy");
        }
        Ok(())
    }

    // ─── Roles and constraints ──────────────────────────────────────────

    /// The parsed `[constraint_definition]` entries.
    pub fn constraints(&self) -> Result<Vec<Constraint>, AuthzError> {
        self.assertions("c")
            .map(|(key, ast)| Constraint::parse(key, ast.value()))
            .collect()
    }

    /// Check every constraint against the current `g` rules.
    pub fn validate_constraints(&self) -> Result<(), AuthzError> {
        let constraints = self.constraints()?;
        if constraints.is_empty() {
            return Ok(());
        }
        let grouping = self
            .get("g", "g")
            .ok_or(AuthzError::ConstraintRequiresRbac)?
            .policy()
            .rules()
            .to_vec();
        for constraint in &constraints {
            constraint.validate(&grouping)?;
        }
        Ok(())
    }

    /// Log every assertion at debug level.
    pub fn print_model(&self) {
        for (sec, assertions) in &self.sections {
            for (key, ast) in assertions {
                tracing::debug!(section = %sec, key = %key, value = %ast.value(), "Model assertion");
            }
        }
    }
}

/// Depth of every `domain::name` in the grouping forest; roots are 0.
fn subject_depths(grouping: &[Vec<String>]) -> Result<HashMap<String, usize>, AuthzError> {
    let mut children: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut is_child: IndexMap<String, bool> = IndexMap::new();

    for rule in grouping {
        let [user, role, rest @ ..] = rule.as_slice() else {
            return Err(AuthzError::GroupingRuleArity(format!(
                "`g` expects at least 2 fields, got [{}]",
                rule.join(", ")
            )));
        };
        let domain = rest.first().map(String::as_str).unwrap_or("");
        let child = format!("{domain}{DOMAIN_SEPARATOR}{user}");
        let parent = format!("{domain}{DOMAIN_SEPARATOR}{role}");
        children.entry(parent.clone()).or_default().push(child.clone());
        is_child.entry(parent).or_insert(false);
        is_child.insert(child, true);
    }

    let mut depth = HashMap::new();
    let roots: Vec<&String> = is_child.iter().filter(|(_, c)| !**c).map(|(n, _)| n).collect();
    for root in roots {
        let mut level = vec![root.clone()];
        let mut lv = 0;
        while !level.is_empty() && lv <= is_child.len() {
            let mut next = Vec::new();
            for node in level {
                if let Some(kids) = children.get(&node) {
                    next.extend(kids.iter().cloned());
                }
                depth.insert(node, lv);
            }
            level = next;
            lv += 1;
        }
    }
    Ok(depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RBAC: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

    fn rule(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_text() {
        let model = Model::from_text(RBAC).unwrap();
        assert_eq!(
            model.assertion("r", "r").unwrap().tokens(),
            &["r_sub", "r_obj", "r_act"]
        );
        assert_eq!(model.assertion("g", "g").unwrap().role_arity(), 2);
        assert_eq!(model.effect_expr().unwrap(), EffectExpr::AllowOverride);
        assert_eq!(model.field_index("p", "obj"), Some(1));
        assert_eq!(model.field_index("p", "eft"), None);
    }

    #[test]
    fn test_missing_sections_are_listed() {
        let err = Model::from_text("[request_definition]\nr = sub\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required sections: policy_definition, policy_effect, matchers"
        );
    }

    #[test]
    fn test_add_def_empty_value_is_ignored() {
        let mut model = Model::new();
        assert!(!model.add_def("p", "p", "  ").unwrap());
        assert!(model.add_def("p", "p", "sub, obj").unwrap());
        assert!(model.has_section("p"));
    }

    #[test]
    fn test_policy_roundtrip_through_model() {
        let model = Model::from_text(RBAC).unwrap();
        assert!(model.add_policy("p", "p", rule(&["alice", "data1", "read"])).unwrap());
        assert!(!model.add_policy("p", "p", rule(&["alice", "data1", "read"])).unwrap());
        assert!(model.add_policy("p", "p", rule(&["alice", "data2", "read"])).unwrap());
        assert_eq!(model.get_policy("p", "p").unwrap().len(), 2);

        let removed = model.remove_filtered_policy("p", "p", 1, &["data2"]).unwrap();
        assert_eq!(removed, vec![rule(&["alice", "data2", "read"])]);
        assert!(matches!(
            model.get_policy("p", "p9"),
            Err(AuthzError::UndefinedPolicyType { .. })
        ));
    }

    #[test]
    fn test_remove_filtered_out_of_range() {
        let model = Model::from_text(RBAC).unwrap();
        assert!(matches!(
            model.remove_filtered_policy("p", "p", 3, &["x"]),
            Err(AuthzError::FieldIndexOutOfRange { index: 3, width: 3, .. })
        ));
        assert!(matches!(
            model.remove_filtered_policy("p", "p", 2, &["read", "extra"]),
            Err(AuthzError::FieldIndexOutOfRange { .. })
        ));
        assert!(model.remove_filtered_policy("g", "g", 1, &["admin"]).is_ok());
    }

    #[test]
    fn test_sort_by_priority_puts_lowest_number_last() {
        let model = Model::from_text(
            "[request_definition]\nr = sub, obj, act\n[policy_definition]\np = priority, sub, obj, act, eft\n\
             [policy_effect]\ne = priority(p.eft) || deny\n[matchers]\nm = r.sub == p.sub\n",
        )
        .unwrap();
        model.add_policy("p", "p", rule(&["1", "alice", "d", "r", "deny"])).unwrap();
        model.add_policy("p", "p", rule(&["10", "alice", "d", "r", "allow"])).unwrap();
        model.add_policy("p", "p", rule(&["x", "alice", "d", "r", "allow"])).unwrap();
        model.sort_policies().unwrap();
        let priorities: Vec<String> = model
            .get_policy("p", "p")
            .unwrap()
            .into_iter()
            .map(|r| r[0].clone())
            .collect();
        assert_eq!(priorities, vec!["x", "10", "1"]);
        assert!(model.has_policy("p", "p", &rule(&["1", "alice", "d", "r", "deny"])).unwrap());
    }

    #[test]
    fn test_sort_by_subject_hierarchy() {
        let model = Model::from_text(
            "[request_definition]\nr = sub, obj, act\n[policy_definition]\np = sub, obj, act, eft\n\
             [role_definition]\ng = _, _\n[policy_effect]\ne = subjectPriority(p.eft) || deny\n\
             [matchers]\nm = g(r.sub, p.sub)\n",
        )
        .unwrap();
        model.add_policy("g", "g", rule(&["alice", "editor"])).unwrap();
        model.add_policy("g", "g", rule(&["editor", "root"])).unwrap();
        model.add_policy("p", "p", rule(&["alice", "d", "r", "deny"])).unwrap();
        model.add_policy("p", "p", rule(&["root", "d", "r", "allow"])).unwrap();
        model.add_policy("p", "p", rule(&["editor", "d", "r", "allow"])).unwrap();
        model.sort_policies().unwrap();
        let subjects: Vec<String> = model
            .get_policy("p", "p")
            .unwrap()
            .into_iter()
            .map(|r| r[0].clone())
            .collect();
        assert_eq!(subjects, vec!["root", "editor", "alice"]);
    }

    #[test]
    fn test_constraints_require_rbac() {
        let model = Model::from_text(
            "[request_definition]\nr = sub\n[policy_definition]\np = sub\n[policy_effect]\n\
             e = some(where (p.eft == allow))\n[matchers]\nm = r.sub == p.sub\n\
             [constraint_definition]\nc = sod(\"a\", \"b\")\n",
        )
        .unwrap();
        assert!(matches!(
            model.validate_constraints(),
            Err(AuthzError::ConstraintRequiresRbac)
        ));
    }

    #[test]
    fn test_validate_constraints_against_grouping() {
        let text = format!("{RBAC}\n[constraint_definition]\nc = sod(\"req\", \"appr\")\n");
        let model = Model::from_text(&text).unwrap();
        model.add_policy("g", "g", rule(&["alice", "req"])).unwrap();
        assert!(model.validate_constraints().is_ok());
        model.add_policy("g", "g", rule(&["alice", "appr"])).unwrap();
        assert!(matches!(
            model.validate_constraints(),
            Err(AuthzError::ConstraintViolation { ref key, .. }) if key == "c"
        ));
    }

    #[test]
    fn test_snapshot_restores_rules() {
        let model = Model::from_text(RBAC).unwrap();
        model.add_policy("p", "p", rule(&["alice", "data1", "read"])).unwrap();
        let snapshot = model.policy_snapshot();
        model.clear_policy();
        assert!(model.get_policy("p", "p").unwrap().is_empty());
        model.restore_policy(snapshot);
        assert_eq!(model.get_policy("p", "p").unwrap().len(), 1);
    }
}
