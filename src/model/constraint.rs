//! Role constraints declared in `[constraint_definition]`.
//!
//! ```text
//! [constraint_definition]
//! c = sod("finance_requester", "finance_approver")
//! c2 = sodMax(["payroll_view", "payroll_edit", "payroll_approve"], 1)
//! c3 = roleMax("superadmin", 2)
//! c4 = rolePre("db_admin", "security_trained")
//! ```
//!
//! Constraints are checked against a snapshot of the `g` grouping rows on
//! demand; they never gate individual mutations.

use std::sync::LazyLock;

use indexmap::{IndexMap, IndexSet};
use regex::Regex;

use crate::errors::AuthzError;

static SOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^sod\s*\(\s*"([^"]+)"\s*,\s*"([^"]+)"\s*\)$"#).expect("valid sod regex")
});
static SOD_MAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^sodMax\s*\(\s*\[([^\]]+)\]\s*,\s*(\d+)\s*\)$"#).expect("valid sodMax regex")
});
static ROLE_MAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^roleMax\s*\(\s*"([^"]+)"\s*,\s*(\d+)\s*\)$"#).expect("valid roleMax regex")
});
static ROLE_PRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^rolePre\s*\(\s*"([^"]+)"\s*,\s*"([^"]+)"\s*\)$"#).expect("valid rolePre regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintKind {
    /// No user may hold both roles.
    SeparationOfDuty(String, String),
    /// No user may hold more than `max` roles of the set.
    SodMax { roles: Vec<String>, max: usize },
    /// No more than `max` users may hold the role.
    RoleMax { role: String, max: usize },
    /// Holding `role` requires also holding `prerequisite`.
    RolePrerequisite { role: String, prerequisite: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub key: String,
    pub kind: ConstraintKind,
}

impl Constraint {
    pub fn parse(key: &str, value: &str) -> Result<Self, AuthzError> {
        let value = value.trim();
        let parse_max = |s: &str| {
            s.parse::<usize>()
                .map_err(|e| AuthzError::ConstraintParse(format!("invalid max count `{s}`: {e}")))
        };

        let kind = if let Some(caps) = SOD.captures(value) {
            ConstraintKind::SeparationOfDuty(caps[1].to_string(), caps[2].to_string())
        } else if let Some(caps) = SOD_MAX.captures(value) {
            let roles: Vec<String> = caps[1]
                .split(',')
                .map(|r| r.trim().trim_matches('"').to_string())
                .filter(|r| !r.is_empty())
                .collect();
            if roles.is_empty() {
                return Err(AuthzError::ConstraintParse(
                    "sodMax requires at least one role".into(),
                ));
            }
            ConstraintKind::SodMax {
                roles,
                max: parse_max(&caps[2])?,
            }
        } else if let Some(caps) = ROLE_MAX.captures(value) {
            ConstraintKind::RoleMax {
                role: caps[1].to_string(),
                max: parse_max(&caps[2])?,
            }
        } else if let Some(caps) = ROLE_PRE.captures(value) {
            ConstraintKind::RolePrerequisite {
                role: caps[1].to_string(),
                prerequisite: caps[2].to_string(),
            }
        } else {
            return Err(AuthzError::ConstraintParse(format!(
                "unrecognized constraint format: {value}"
            )));
        };

        Ok(Self {
            key: key.to_string(),
            kind,
        })
    }

    /// Check the constraint against grouping rows `(user, role, ..)`.
    pub fn validate(&self, grouping: &[Vec<String>]) -> Result<(), AuthzError> {
        let violation = |message: String| AuthzError::ConstraintViolation {
            key: self.key.clone(),
            message,
        };

        match &self.kind {
            ConstraintKind::SeparationOfDuty(a, b) => {
                for (user, roles) in roles_by_user(grouping) {
                    if roles.contains(a.as_str()) && roles.contains(b.as_str()) {
                        return Err(violation(format!(
                            "user '{user}' cannot have both roles '{a}' and '{b}'"
                        )));
                    }
                }
            }
            ConstraintKind::SodMax { roles: set, max } => {
                for (user, roles) in roles_by_user(grouping) {
                    let count = set.iter().filter(|r| roles.contains(r.as_str())).count();
                    if count > *max {
                        return Err(violation(format!(
                            "user '{user}' has {count} roles from [{}], exceeds maximum of {max}",
                            set.join(", ")
                        )));
                    }
                }
            }
            ConstraintKind::RoleMax { role, max } => {
                let count = grouping
                    .iter()
                    .filter(|rule| rule.get(1) == Some(role))
                    .count();
                if count > *max {
                    return Err(violation(format!(
                        "role '{role}' assigned to {count} users, exceeds maximum of {max}"
                    )));
                }
            }
            ConstraintKind::RolePrerequisite { role, prerequisite } => {
                for (user, roles) in roles_by_user(grouping) {
                    if roles.contains(role.as_str()) && !roles.contains(prerequisite.as_str()) {
                        return Err(violation(format!(
                            "user '{user}' has role '{role}' but lacks prerequisite role '{prerequisite}'"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn roles_by_user(grouping: &[Vec<String>]) -> IndexMap<&str, IndexSet<&str>> {
    let mut map: IndexMap<&str, IndexSet<&str>> = IndexMap::new();
    for rule in grouping {
        if let [user, role, ..] = rule.as_slice() {
            map.entry(user.as_str()).or_default().insert(role.as_str());
        }
    }
    map
}
