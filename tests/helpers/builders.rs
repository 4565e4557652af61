use castellan::persist::MemoryAdapter;
use castellan::{Enforcer, Model};

use super::TestPolicyDir;

/// Builder for model text
///
/// Starts from plain ACL: `sub, obj, act` requests and rules, allow-override,
/// and an exact-match matcher.
pub struct ModelBuilder {
    request: String,
    policy: String,
    roles: Vec<(String, String)>,
    effect: String,
    matcher: String,
    constraints: Vec<(String, String)>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            request: "sub, obj, act".to_string(),
            policy: "sub, obj, act".to_string(),
            roles: Vec::new(),
            effect: "some(where (p.eft == allow))".to_string(),
            matcher: "r.sub == p.sub && r.obj == p.obj && r.act == p.act".to_string(),
            constraints: Vec::new(),
        }
    }

    /// `g = _, _` with a role-aware matcher
    pub fn rbac() -> Self {
        Self::new()
            .with_role("g", "_, _")
            .with_matcher("g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act")
    }

    /// `g = _, _, _` with the domain as the second request field
    pub fn rbac_with_domains() -> Self {
        Self::new()
            .with_request("sub, dom, obj, act")
            .with_policy("sub, dom, obj, act")
            .with_role("g", "_, _, _")
            .with_matcher(
                "g(r.sub, p.sub, r.dom) && r.dom == p.dom && r.obj == p.obj && r.act == p.act",
            )
    }

    pub fn with_request(mut self, tokens: &str) -> Self {
        self.request = tokens.to_string();
        self
    }

    pub fn with_policy(mut self, tokens: &str) -> Self {
        self.policy = tokens.to_string();
        self
    }

    pub fn with_role(mut self, key: &str, placeholders: &str) -> Self {
        self.roles.push((key.to_string(), placeholders.to_string()));
        self
    }

    pub fn with_effect(mut self, effect: &str) -> Self {
        self.effect = effect.to_string();
        self
    }

    pub fn with_matcher(mut self, matcher: &str) -> Self {
        self.matcher = matcher.to_string();
        self
    }

    pub fn with_constraint(mut self, key: &str, definition: &str) -> Self {
        self.constraints.push((key.to_string(), definition.to_string()));
        self
    }

    pub fn to_text(&self) -> String {
        let mut text = format!(
            "[request_definition]\nr = {}\n\n[policy_definition]\np = {}\n\n",
            self.request, self.policy
        );
        if !self.roles.is_empty() {
            text.push_str("[role_definition]\n");
            for (key, value) in &self.roles {
                text.push_str(&format!("{key} = {value}\n"));
            }
            text.push('\n');
        }
        if !self.constraints.is_empty() {
            text.push_str("[constraint_definition]\n");
            for (key, value) in &self.constraints {
                text.push_str(&format!("{key} = {value}\n"));
            }
            text.push('\n');
        }
        text.push_str(&format!(
            "[policy_effect]\ne = {}\n\n[matchers]\nm = {}\n",
            self.effect, self.matcher
        ));
        text
    }

    pub fn build(&self) -> Model {
        Model::from_text(&self.to_text()).expect("Failed to parse test model")
    }

    /// Enforcer over an in-memory adapter holding `lines`
    pub fn enforcer(&self, lines: &[&[&str]]) -> Enforcer {
        let adapter = MemoryAdapter::with_lines(lines.iter().map(|l| l.to_vec()));
        Enforcer::new(self.build(), Some(Box::new(adapter))).expect("Failed to build enforcer")
    }
}

/// Builder for KDL policy files
pub struct PolicyFileBuilder {
    lines: Vec<Vec<String>>,
}

impl PolicyFileBuilder {
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    pub fn with_rule(mut self, ptype: &str, fields: &[&str]) -> Self {
        let mut line = vec![ptype.to_string()];
        line.extend(fields.iter().map(|f| f.to_string()));
        self.lines.push(line);
        self
    }

    pub fn to_kdl(&self) -> String {
        self.lines
            .iter()
            .map(|line| {
                let (ptype, fields) = line.split_first().expect("empty policy line");
                let quoted: Vec<String> = fields.iter().map(|f| format!("{f:?}")).collect();
                format!("{ptype} {}\n", quoted.join(" "))
            })
            .collect()
    }

    /// Write the rules to `name` inside `dir`
    pub fn create(self, dir: &TestPolicyDir, name: &str) -> std::path::PathBuf {
        dir.write(name, &self.to_kdl())
    }
}
