//! Role-based conveniences on top of the management API. They work on the
//! `p` and `g` policy types; `domain` scopes a call to one tenant.

use indexmap::IndexSet;

use crate::enforcer::Enforcer;
use crate::errors::AuthzError;

fn grouping_rule(user: &str, role: &str, domain: Option<&str>) -> Vec<String> {
    let mut rule = vec![user.to_string(), role.to_string()];
    rule.extend(domain.map(str::to_string));
    rule
}

impl Enforcer {
    // ─── Roles ──────────────────────────────────────────────────────────

    /// Roles `name` holds directly.
    pub fn get_roles_for_user(
        &self,
        name: &str,
        domain: Option<&str>,
    ) -> Result<Vec<String>, AuthzError> {
        self.role_manager_for("g")?.get_roles(name, domain.as_slice())
    }

    /// Users (or roles) that hold `name` directly.
    pub fn get_users_for_role(
        &self,
        name: &str,
        domain: Option<&str>,
    ) -> Result<Vec<String>, AuthzError> {
        self.role_manager_for("g")?.get_users(name, domain.as_slice())
    }

    pub fn has_role_for_user(
        &self,
        name: &str,
        role: &str,
        domain: Option<&str>,
    ) -> Result<bool, AuthzError> {
        Ok(self
            .get_roles_for_user(name, domain)?
            .iter()
            .any(|r| r == role))
    }

    pub fn add_role_for_user(
        &self,
        user: &str,
        role: &str,
        domain: Option<&str>,
    ) -> Result<bool, AuthzError> {
        self.add_grouping_policy(&grouping_rule(user, role, domain))
    }

    /// Grant every role in `roles`, or none if `user` already holds one.
    pub fn add_roles_for_user(
        &self,
        user: &str,
        roles: &[&str],
        domain: Option<&str>,
    ) -> Result<bool, AuthzError> {
        let rules: Vec<Vec<String>> = roles
            .iter()
            .map(|role| grouping_rule(user, role, domain))
            .collect();
        self.add_grouping_policies(&rules)
    }

    pub fn delete_role_for_user(
        &self,
        user: &str,
        role: &str,
        domain: Option<&str>,
    ) -> Result<bool, AuthzError> {
        self.remove_grouping_policy(&grouping_rule(user, role, domain))
    }

    pub fn delete_roles_for_user(
        &self,
        user: &str,
        domain: Option<&str>,
    ) -> Result<bool, AuthzError> {
        match domain {
            Some(domain) => self.remove_filtered_grouping_policy(0, &[user, "", domain]),
            None => self.remove_filtered_grouping_policy(0, &[user]),
        }
    }

    /// Remove `user` from every grouping and policy rule.
    pub fn delete_user(&self, user: &str) -> Result<bool, AuthzError> {
        let grouped = self.remove_filtered_grouping_policy(0, &[user])?;
        let permitted = self.remove_filtered_policy(0, &[user])?;
        Ok(grouped || permitted)
    }

    /// Remove `role` from every grouping rule and drop its permissions.
    pub fn delete_role(&self, role: &str) -> Result<bool, AuthzError> {
        let grouped = self.remove_filtered_grouping_policy(1, &[role])?;
        let permitted = self.remove_filtered_policy(0, &[role])?;
        Ok(grouped || permitted)
    }

    // ─── Permissions ────────────────────────────────────────────────────

    /// Remove `permission` (e.g. `["data1", "read"]`) from every subject.
    pub fn delete_permission(&self, permission: &[&str]) -> Result<bool, AuthzError> {
        self.remove_filtered_policy(1, permission)
    }

    pub fn add_permission_for_user(
        &self,
        user: &str,
        permission: &[&str],
    ) -> Result<bool, AuthzError> {
        self.add_policy(&permission_rule(user, permission))
    }

    pub fn add_permissions_for_user(
        &self,
        user: &str,
        permissions: &[Vec<&str>],
    ) -> Result<bool, AuthzError> {
        let rules: Vec<Vec<String>> = permissions
            .iter()
            .map(|p| permission_rule(user, p))
            .collect();
        self.add_policies(&rules)
    }

    pub fn delete_permission_for_user(
        &self,
        user: &str,
        permission: &[&str],
    ) -> Result<bool, AuthzError> {
        self.remove_policy(&permission_rule(user, permission))
    }

    pub fn delete_permissions_for_user(&self, user: &str) -> Result<bool, AuthzError> {
        self.remove_filtered_policy(0, &[user])
    }

    /// Rules whose subject is `user`, limited to `domain` when given.
    pub fn get_permissions_for_user(
        &self,
        user: &str,
        domain: Option<&str>,
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        let sub = self.model.field_index("p", "sub").unwrap_or(0);
        let rules = self.get_filtered_policy(sub, &[user])?;
        let Some(domain) = domain else {
            return Ok(rules);
        };
        let dom = self.model.field_index("p", "dom").unwrap_or(1);
        Ok(rules
            .into_iter()
            .filter(|rule| rule.get(dom).is_some_and(|d| d == domain))
            .collect())
    }

    pub fn has_permission_for_user(
        &self,
        user: &str,
        permission: &[&str],
    ) -> Result<bool, AuthzError> {
        self.has_policy(&permission_rule(user, permission))
    }

    // ─── Implicit (transitive) queries ──────────────────────────────────

    /// Every role `name` reaches through the hierarchy.
    pub fn get_implicit_roles_for_user(
        &self,
        name: &str,
        domain: Option<&str>,
    ) -> Result<Vec<String>, AuthzError> {
        self.role_manager_for("g")?
            .get_implicit_roles(name, domain.as_slice())
    }

    /// Every user that reaches `name` through the hierarchy.
    pub fn get_implicit_users_for_role(
        &self,
        name: &str,
        domain: Option<&str>,
    ) -> Result<Vec<String>, AuthzError> {
        self.role_manager_for("g")?
            .get_implicit_users(name, domain.as_slice())
    }

    /// Rules granted to `user` directly or through any of its roles.
    pub fn get_implicit_permissions_for_user(
        &self,
        user: &str,
        domain: Option<&str>,
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        let mut subjects = vec![user.to_string()];
        subjects.extend(self.get_implicit_roles_for_user(user, domain)?);

        let mut permissions = Vec::new();
        for subject in &subjects {
            permissions.extend(self.get_permissions_for_user(subject, domain)?);
        }
        Ok(permissions)
    }

    /// Users (not roles) for whom `[user, permission...]` is allowed.
    pub fn get_implicit_users_for_permission(
        &self,
        permission: &[&str],
    ) -> Result<Vec<String>, AuthzError> {
        let roles: IndexSet<String> = self
            .model
            .get_values_for_field_in_policy_all_types("g", 1)
            .into_iter()
            .collect();
        let mut candidates: IndexSet<String> = self.get_all_subjects()?.into_iter().collect();
        candidates.extend(self.model.get_values_for_field_in_policy_all_types("g", 0));

        let mut users = Vec::new();
        for candidate in candidates.into_iter().filter(|c| !roles.contains(c)) {
            let mut request = vec![candidate.as_str()];
            request.extend_from_slice(permission);
            if self.enforce(&request)? {
                users.push(candidate);
            }
        }
        Ok(users)
    }

    // ─── Domains ────────────────────────────────────────────────────────

    pub fn get_roles_for_user_in_domain(
        &self,
        name: &str,
        domain: &str,
    ) -> Result<Vec<String>, AuthzError> {
        self.get_roles_for_user(name, Some(domain))
    }

    pub fn get_users_for_role_in_domain(
        &self,
        name: &str,
        domain: &str,
    ) -> Result<Vec<String>, AuthzError> {
        self.get_users_for_role(name, Some(domain))
    }

    pub fn add_role_for_user_in_domain(
        &self,
        user: &str,
        role: &str,
        domain: &str,
    ) -> Result<bool, AuthzError> {
        self.add_role_for_user(user, role, Some(domain))
    }

    pub fn delete_role_for_user_in_domain(
        &self,
        user: &str,
        role: &str,
        domain: &str,
    ) -> Result<bool, AuthzError> {
        self.delete_role_for_user(user, role, Some(domain))
    }

    pub fn get_permissions_for_user_in_domain(
        &self,
        user: &str,
        domain: &str,
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        self.get_permissions_for_user(user, Some(domain))
    }

    /// Domains in which `name` holds or grants a role.
    pub fn get_domains_for_user(&self, name: &str) -> Result<Vec<String>, AuthzError> {
        self.role_manager_for("g")?.get_domains(name)
    }

    pub fn get_all_domains(&self) -> Result<Vec<String>, AuthzError> {
        Ok(self.role_manager_for("g")?.get_all_domains())
    }
}

fn permission_rule(user: &str, permission: &[&str]) -> Vec<String> {
    std::iter::once(user)
        .chain(permission.iter().copied())
        .map(str::to_string)
        .collect()
}
