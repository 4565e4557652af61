use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::AuthzError;
use crate::model::store::PolicyBucket;
use crate::model::text::strip_comment;
use crate::rbac::RoleManager;

/// Direction of an incremental role-link update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOp {
    Add,
    Remove,
}

/// One `key = value` line of a model section, plus its live rules for the
/// `p` and `g` sections.
#[derive(Debug)]
pub struct Assertion {
    key: String,
    value: String,
    tokens: Vec<String>,
    policy: RwLock<PolicyBucket>,
}

impl Clone for Assertion {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            tokens: self.tokens.clone(),
            policy: RwLock::new(self.policy.read().clone()),
        }
    }
}

impl Assertion {
    /// Build the assertion for `key` in section `sec`.
    ///
    /// - `r`/`p`: each comma-separated field becomes the token `{key}_{field}`.
    /// - `g`: the placeholder count (number of `_`) must be at least 2.
    /// - `e`: `p.eft` is normalised to `p_eft`.
    /// - `m`/`e`: trailing comments are stripped line by line.
    pub fn new(sec: &str, key: &str, value: &str) -> Result<Self, AuthzError> {
        let mut value = value.trim().to_string();
        let tokens = match sec {
            "r" | "p" => value
                .split(',')
                .map(|field| format!("{key}_{}", field.trim()))
                .collect(),
            "g" => {
                if value.matches('_').count() < 2 {
                    return Err(AuthzError::RoleDefinitionArity(value));
                }
                value.split(',').map(|t| t.trim().to_string()).collect()
            }
            "e" | "m" => {
                value = value
                    .lines()
                    .map(|line| strip_comment(line).trim())
                    .filter(|line| !line.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                if sec == "e" {
                    value = value.replace("p.eft", "p_eft");
                }
                Vec::new()
            }
            _ => Vec::new(),
        };

        Ok(Self {
            key: key.to_string(),
            value,
            tokens,
            policy: RwLock::new(PolicyBucket::default()),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn policy(&self) -> RwLockReadGuard<'_, PolicyBucket> {
        self.policy.read()
    }

    pub(crate) fn policy_mut(&self) -> RwLockWriteGuard<'_, PolicyBucket> {
        self.policy.write()
    }

    /// Number of `_` placeholders in a role definition: user, role, and
    /// an optional domain.
    pub fn role_arity(&self) -> usize {
        self.value.matches('_').count()
    }

    /// Width of a rule of this assertion.
    pub fn width(&self) -> usize {
        if self.tokens.iter().all(|t| t == "_") && !self.tokens.is_empty() {
            self.role_arity()
        } else {
            self.tokens.len()
        }
    }

    /// Trim a grouping rule to the role arity; shorter rules are an error.
    fn grouping_args<'r>(&self, rule: &'r [String]) -> Result<&'r [String], AuthzError> {
        let count = self.role_arity();
        if count < 2 {
            return Err(AuthzError::RoleDefinitionArity(self.value.clone()));
        }
        if rule.len() < count {
            return Err(AuthzError::GroupingRuleArity(format!(
                "`{}` expects {count} fields, got [{}]",
                self.key,
                rule.join(", ")
            )));
        }
        Ok(&rule[..count])
    }

    /// Push every stored grouping rule into `rm`.
    pub fn build_role_links(&self, rm: &dyn RoleManager) -> Result<(), AuthzError> {
        let rules = self.policy().rules().to_vec();
        self.build_incremental_role_links(rm, PolicyOp::Add, &rules)
    }

    /// Apply `rules` to `rm` as added or removed links.
    pub fn build_incremental_role_links(
        &self,
        rm: &dyn RoleManager,
        op: PolicyOp,
        rules: &[Vec<String>],
    ) -> Result<(), AuthzError> {
        for rule in rules {
            let args = self.grouping_args(rule)?;
            let domain: Vec<&str> = args[2..].iter().map(String::as_str).collect();
            match op {
                PolicyOp::Add => rm.add_link(&args[0], &args[1], &domain)?,
                PolicyOp::Remove => rm.delete_link(&args[0], &args[1], &domain)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::DefaultRoleManager;

    fn rule(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_request_tokens() {
        let ast = Assertion::new("r", "r2", "sub, obj , act").unwrap();
        assert_eq!(ast.tokens(), &["r2_sub", "r2_obj", "r2_act"]);
        assert_eq!(ast.width(), 3);
    }

    #[test]
    fn test_effect_normalised() {
        let ast = Assertion::new("e", "e", "some(where (p.eft == allow)) # comment").unwrap();
        assert_eq!(ast.value(), "some(where (p_eft == allow))");
    }

    #[test]
    fn test_role_definition_arity() {
        assert!(matches!(
            Assertion::new("g", "g", "_"),
            Err(AuthzError::RoleDefinitionArity(_))
        ));
        let ast = Assertion::new("g", "g", "_, _, _").unwrap();
        assert_eq!(ast.role_arity(), 3);
        assert_eq!(ast.width(), 3);
    }

    #[test]
    fn test_build_role_links_truncates_and_checks_arity() {
        let ast = Assertion::new("g", "g", "_, _").unwrap();
        let rm = DefaultRoleManager::default();
        ast.build_incremental_role_links(&rm, PolicyOp::Add, &[rule(&["alice", "admin", "extra"])])
            .unwrap();
        assert!(rm.has_link("alice", "admin", &[]).unwrap());

        let err = ast
            .build_incremental_role_links(&rm, PolicyOp::Add, &[rule(&["alice"])])
            .unwrap_err();
        assert!(matches!(err, AuthzError::GroupingRuleArity(_)));
    }

    #[test]
    fn test_build_role_links_with_domain() {
        let ast = Assertion::new("g", "g", "_, _, _").unwrap();
        ast.policy_mut().add(rule(&["alice", "admin", "tenant1"]));
        let rm = DefaultRoleManager::default();
        ast.build_role_links(&rm).unwrap();
        assert!(rm.has_link("alice", "admin", &["tenant1"]).unwrap());
        assert!(!rm.has_link("alice", "admin", &["tenant2"]).unwrap());
    }
}
