//! The top-level entry point: a model, its rules, one role graph per grouping
//! type, and the pipeline that turns a request into a decision.

mod cached;
mod management;
mod mutation;
mod rbac_api;

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

pub use cached::CachedEnforcer;

use crate::cache::Cache;
use crate::effect::{DefaultEffector, Effect, EffectExpr, Effector, RateLimitEffector, RequestFields};
use crate::errors::AuthzError;
use crate::events::{EventKind, EventLogger, LogEntry, TracingLogger};
use crate::matcher::builtins::{role_function, FunctionMap, MatcherFn};
use crate::matcher::value::Value;
use crate::matcher::{match_weight, MatcherCache, RowBindings};
use crate::model::Model;
use crate::persist::{Adapter, KdlFileAdapter, Watcher};
use crate::rbac::detector::{Detector, ModelDetector};
use crate::rbac::{DefaultRoleManager, MatchingFn, RoleManager};
use crate::settings::EnforcerSettings;

/// Which `r`/`p`/`e`/`m` assertions an enforcement uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforceContext {
    pub r_type: String,
    pub p_type: String,
    pub e_type: String,
    pub m_type: String,
}

impl EnforceContext {
    /// Context for numbered assertions: `new("2")` selects `r2`, `p2`, `e2`, `m2`.
    pub fn new(suffix: &str) -> Self {
        Self {
            r_type: format!("r{suffix}"),
            p_type: format!("p{suffix}"),
            e_type: format!("e{suffix}"),
            m_type: format!("m{suffix}"),
        }
    }
}

impl Default for EnforceContext {
    fn default() -> Self {
        Self::new("")
    }
}

/// A decision plus the rule that explains it (empty when no rule decided).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub explain: Vec<String>,
}

pub struct Enforcer {
    model: Model,
    adapter: Option<Box<dyn Adapter>>,
    watcher: Option<Box<dyn Watcher>>,
    effector: Box<dyn Effector>,
    functions: FunctionMap,
    role_managers: IndexMap<String, Arc<dyn RoleManager>>,
    detectors: Vec<Box<dyn Detector>>,
    model_detectors: Vec<Box<dyn ModelDetector>>,
    matchers: MatcherCache,
    logger: Box<dyn EventLogger>,
    settings: EnforcerSettings,
    decision_cache: Option<Arc<dyn Cache>>,
    /// Held for writing by policy mutations and reloads, for reading by
    /// enforcement.
    state: RwLock<()>,
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("model", &self.model)
            .field("role_managers", &self.role_managers.keys().collect::<Vec<_>>())
            .field("functions", &self.functions)
            .field("detectors", &self.detectors.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Enforcer {
    /// Build an enforcer with default settings. When an adapter is given its
    /// policy is loaded immediately.
    pub fn new(model: Model, adapter: Option<Box<dyn Adapter>>) -> Result<Self, AuthzError> {
        Self::with_settings(model, adapter, EnforcerSettings::default())
    }

    pub fn with_settings(
        model: Model,
        adapter: Option<Box<dyn Adapter>>,
        settings: EnforcerSettings,
    ) -> Result<Self, AuthzError> {
        let mut enforcer = Self {
            model,
            adapter,
            watcher: None,
            effector: Box::new(DefaultEffector),
            functions: FunctionMap::default(),
            role_managers: IndexMap::new(),
            detectors: Vec::new(),
            model_detectors: Vec::new(),
            matchers: MatcherCache::default(),
            logger: Box::new(TracingLogger::new()),
            settings,
            decision_cache: None,
            state: RwLock::new(()),
        };
        enforcer.initialize()?;
        if enforcer.adapter.is_some() {
            enforcer.load_policy()?;
        }
        Ok(enforcer)
    }

    /// Model text file plus a KDL policy file or directory.
    pub fn from_files(
        model_path: impl AsRef<Path>,
        policy_path: impl AsRef<Path>,
    ) -> Result<Self, AuthzError> {
        let model = Model::from_file(model_path)?;
        Self::new(
            model,
            Some(Box::new(KdlFileAdapter::new(policy_path.as_ref()))),
        )
    }

    /// Build from `model_path` and the optional `policy_path` of `settings`.
    pub fn from_settings(settings: EnforcerSettings) -> Result<Self, AuthzError> {
        let model_path = settings
            .model_path
            .clone()
            .ok_or_else(|| AuthzError::InvalidModel("no model_path configured".into()))?;
        let model = Model::from_file(model_path)?;
        let adapter: Option<Box<dyn Adapter>> = settings
            .policy_path
            .as_ref()
            .map(|p| Box::new(KdlFileAdapter::new(p)) as Box<dyn Adapter>);
        Self::with_settings(model, adapter, settings)
    }

    /// Role graphs and effector for the current model.
    fn initialize(&mut self) -> Result<(), AuthzError> {
        self.role_managers = self
            .model
            .assertions("g")
            .map(|(ptype, _)| {
                let rm: Arc<dyn RoleManager> =
                    Arc::new(DefaultRoleManager::new(self.settings.max_hierarchy_level));
                (ptype.to_string(), rm)
            })
            .collect();

        self.effector = match self.model.get("e", "e") {
            Some(ast) => match ast.value().parse::<EffectExpr>()? {
                EffectExpr::RateLimit(_) => Box::new(RateLimitEffector::new()),
                _ => Box::new(DefaultEffector),
            },
            None => Box::new(DefaultEffector),
        };
        self.matchers.clear();
        Ok(())
    }

    // ─── Accessors and configuration ────────────────────────────────────

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn settings(&self) -> &EnforcerSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn enable_enforce(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
        self.invalidate_cache();
    }

    pub fn enable_auto_save(&mut self, auto_save: bool) {
        self.settings.auto_save = auto_save;
    }

    pub fn enable_auto_build_role_links(&mut self, auto_build: bool) {
        self.settings.auto_build_role_links = auto_build;
    }

    pub fn enable_auto_notify_watcher(&mut self, notify: bool) {
        self.settings.auto_notify_watcher = notify;
    }

    pub fn enable_accept_json_request(&mut self, accept: bool) {
        self.settings.accept_json_request = accept;
        self.invalidate_cache();
    }

    pub fn adapter(&self) -> Option<&dyn Adapter> {
        self.adapter.as_deref()
    }

    pub fn set_adapter(&mut self, adapter: Box<dyn Adapter>) {
        self.adapter = Some(adapter);
    }

    /// Install a watcher. Its callback only logs remote changes; hosts that
    /// want them applied set their own callback afterwards and reload from it.
    pub fn set_watcher(&mut self, watcher: Box<dyn Watcher>) -> Result<(), AuthzError> {
        watcher.set_update_callback(Box::new(|message: &str| {
            tracing::info!(message = %message, "Policy changed on another instance");
        }))?;
        if let Some(old) = self.watcher.replace(watcher) {
            old.close();
        }
        Ok(())
    }

    pub fn watcher(&self) -> Option<&dyn Watcher> {
        self.watcher.as_deref()
    }

    pub fn set_effector(&mut self, effector: Box<dyn Effector>) {
        self.effector = effector;
        self.invalidate_cache();
    }

    pub fn set_logger(&mut self, logger: Box<dyn EventLogger>) {
        self.logger = logger;
    }

    /// Register a function callable from matchers, e.g. `my_func(r.obj, p.obj)`.
    pub fn add_function(&mut self, name: &str, function: MatcherFn) {
        self.functions.add(name, function);
        self.invalidate_cache();
    }

    pub fn get_role_manager(&self) -> Option<Arc<dyn RoleManager>> {
        self.get_named_role_manager("g")
    }

    pub fn get_named_role_manager(&self, ptype: &str) -> Option<Arc<dyn RoleManager>> {
        self.role_managers.get(ptype).cloned()
    }

    pub fn set_role_manager(&mut self, rm: Arc<dyn RoleManager>) -> Result<(), AuthzError> {
        self.set_named_role_manager("g", rm)
    }

    /// Replace the graph of grouping type `ptype` and rebuild its links.
    pub fn set_named_role_manager(
        &mut self,
        ptype: &str,
        rm: Arc<dyn RoleManager>,
    ) -> Result<(), AuthzError> {
        let ast = self.model.assertion("g", ptype)?;
        rm.clear();
        ast.build_role_links(&*rm)?;
        self.role_managers.insert(ptype.to_string(), rm);
        self.invalidate_cache();
        Ok(())
    }

    pub fn add_named_matching_fn(&self, ptype: &str, matcher: MatchingFn) -> Result<(), AuthzError> {
        self.role_manager_for(ptype)?.add_matching_fn(matcher);
        self.invalidate_cache();
        Ok(())
    }

    pub fn add_named_domain_matching_fn(
        &self,
        ptype: &str,
        matcher: MatchingFn,
    ) -> Result<(), AuthzError> {
        self.role_manager_for(ptype)?.add_domain_matching_fn(matcher);
        self.invalidate_cache();
        Ok(())
    }

    pub fn set_detectors(&mut self, detectors: Vec<Box<dyn Detector>>) {
        self.detectors = detectors;
    }

    pub fn set_model_detectors(&mut self, detectors: Vec<Box<dyn ModelDetector>>) {
        self.model_detectors = detectors;
    }

    /// Run every configured detector against every role graph.
    pub fn run_detections(&self) -> Result<(), AuthzError> {
        for (ptype, rm) in &self.role_managers {
            for detector in &self.detectors {
                detector.check(&**rm)?;
            }
            for detector in &self.model_detectors {
                detector.check_model(&self.model, &**rm)?;
            }
            tracing::debug!(ptype = %ptype, "Detections passed");
        }
        Ok(())
    }

    pub(crate) fn role_manager_for(&self, ptype: &str) -> Result<&Arc<dyn RoleManager>, AuthzError> {
        self.role_managers
            .get(ptype)
            .ok_or(AuthzError::RoleManagerMissing)
    }

    pub(crate) fn set_decision_cache(&mut self, cache: Arc<dyn Cache>) {
        self.decision_cache = Some(cache);
    }

    pub(crate) fn invalidate_cache(&self) {
        if let Some(cache) = &self.decision_cache {
            cache.clear();
        }
    }

    // ─── Model and policy lifecycle ─────────────────────────────────────

    /// Swap in a new model. Its rules start empty; call
    /// [`Enforcer::load_policy`] to fill them.
    pub fn load_model(&mut self, model: Model) -> Result<(), AuthzError> {
        let entry = LogEntry::new(EventKind::LoadModel);
        let handle = self.logger.on_before_event(&entry);
        self.model = model;
        let result = self.initialize();
        self.invalidate_cache();
        self.log_after(handle, entry, result.as_ref().err());
        result
    }

    /// Reload every rule from the adapter. A failed load leaves the previous
    /// rules and role graphs in place.
    pub fn load_policy(&self) -> Result<(), AuthzError> {
        let adapter = self
            .adapter
            .as_deref()
            .ok_or_else(|| AuthzError::Adapter("no adapter configured".into()))?;

        let mut entry = LogEntry::new(EventKind::LoadPolicy);
        let handle = self.logger.on_before_event(&entry);

        let result = {
            let _state = self.state.write();
            let snapshot = self.model.policy_snapshot();
            self.model.clear_policy();

            let result = adapter
                .load_policy(&self.model)
                .and_then(|_| self.after_policy_loaded());
            if let Err(e) = &result {
                tracing::warn!(error = %e, "Policy load failed, keeping previous rules");
                self.model.restore_policy(snapshot);
                if let Err(rebuild) = self.rebuild_role_links() {
                    tracing::warn!(error = %rebuild, "Could not rebuild role links after failed load");
                }
            }
            self.invalidate_cache();
            result
        };

        entry.rule_count = self.policy_rule_count();
        self.log_after(handle, entry, result.as_ref().err());
        result
    }

    fn after_policy_loaded(&self) -> Result<(), AuthzError> {
        if self.model.get("e", "e").is_some() {
            self.model.sort_policies()?;
        }
        if self.settings.auto_build_role_links {
            self.rebuild_role_links()?;
        }
        self.model.validate_constraints()
    }

    /// Write every rule through the adapter, then tell the watcher.
    pub fn save_policy(&self) -> Result<(), AuthzError> {
        let adapter = self
            .adapter
            .as_deref()
            .ok_or_else(|| AuthzError::Adapter("no adapter configured".into()))?;

        let mut entry = LogEntry::new(EventKind::SavePolicy);
        let handle = self.logger.on_before_event(&entry);
        entry.rule_count = self.policy_rule_count();

        let result = adapter.save_policy(&self.model).and_then(|_| {
            match &self.watcher {
                Some(watcher) if self.settings.auto_notify_watcher => {
                    watcher.update_for_save_policy(&self.model)
                }
                _ => Ok(()),
            }
        });
        self.log_after(handle, entry, result.as_ref().err());
        result
    }

    /// Drop every rule and role link in memory. Storage is not touched.
    pub fn clear_policy(&self) {
        let _state = self.state.write();
        self.model.clear_policy();
        for rm in self.role_managers.values() {
            rm.clear();
        }
        self.invalidate_cache();
    }

    /// Rebuild every role graph from the stored grouping rules.
    pub fn build_role_links(&self) -> Result<(), AuthzError> {
        let _state = self.state.write();
        self.rebuild_role_links()
    }

    fn rebuild_role_links(&self) -> Result<(), AuthzError> {
        for (ptype, ast) in self.model.assertions("g") {
            let rm = self.role_manager_for(ptype)?;
            rm.clear();
            ast.build_role_links(&**rm)?;
        }
        self.invalidate_cache();
        Ok(())
    }

    fn policy_rule_count(&self) -> usize {
        ["p", "g"]
            .iter()
            .flat_map(|sec| self.model.assertions(sec))
            .map(|(_, ast)| ast.policy().len())
            .sum()
    }

    fn log_after(
        &self,
        handle: crate::events::EventHandle,
        mut entry: LogEntry,
        error: Option<&AuthzError>,
    ) {
        if !self.logger.is_subscribed(entry.kind) {
            return;
        }
        entry.duration = Some(handle.started.elapsed());
        entry.error = error.map(|e| e.to_string());
        self.logger.on_after_event(handle, &entry);
    }

    // ─── Enforcement ────────────────────────────────────────────────────

    /// Decide whether the request `rvals` (e.g. `["alice", "data1", "read"]`)
    /// is allowed.
    pub fn enforce<V>(&self, rvals: &[V]) -> Result<bool, AuthzError>
    where
        V: Clone + Into<Value>,
    {
        Ok(self.enforce_ex(rvals)?.allowed)
    }

    /// Like [`Enforcer::enforce`], also returning the deciding rule.
    pub fn enforce_ex<V>(&self, rvals: &[V]) -> Result<Decision, AuthzError>
    where
        V: Clone + Into<Value>,
    {
        self.enforce_inner(&EnforceContext::default(), None, &to_values(rvals))
    }

    /// Evaluate with `matcher` instead of the model's `m`.
    pub fn enforce_with_matcher<V>(&self, matcher: &str, rvals: &[V]) -> Result<bool, AuthzError>
    where
        V: Clone + Into<Value>,
    {
        let decision =
            self.enforce_inner(&EnforceContext::default(), Some(matcher), &to_values(rvals))?;
        Ok(decision.allowed)
    }

    /// Evaluate against numbered assertions such as `r2`/`p2`/`e2`/`m2`.
    pub fn enforce_with_context<V>(
        &self,
        ctx: &EnforceContext,
        rvals: &[V],
    ) -> Result<Decision, AuthzError>
    where
        V: Clone + Into<Value>,
    {
        self.enforce_inner(ctx, None, &to_values(rvals))
    }

    /// Enforce each request in order; the first failure aborts the batch.
    pub fn batch_enforce<V>(&self, requests: &[Vec<V>]) -> Result<Vec<bool>, AuthzError>
    where
        V: Clone + Into<Value>,
    {
        requests.iter().map(|rvals| self.enforce(rvals)).collect()
    }

    pub(crate) fn enforce_inner(
        &self,
        ctx: &EnforceContext,
        matcher: Option<&str>,
        rvals: &[Value],
    ) -> Result<Decision, AuthzError> {
        let subscribed = self.logger.is_subscribed(EventKind::Enforce);
        let mut entry = LogEntry::new(EventKind::Enforce);
        if subscribed {
            entry.request = rvals.iter().map(ToString::to_string).collect();
        }
        let handle = self.logger.on_before_event(&entry);

        let result = self.evaluate(ctx, matcher, rvals);

        if let Ok(decision) = &result {
            entry.allowed = Some(decision.allowed);
            entry.matched = decision.explain.clone();
        }
        self.log_after(handle, entry, result.as_ref().err());
        result
    }

    fn evaluate(
        &self,
        ctx: &EnforceContext,
        matcher: Option<&str>,
        rvals: &[Value],
    ) -> Result<Decision, AuthzError> {
        let _state = self.state.read();
        if !self.settings.enabled {
            return Ok(Decision {
                allowed: true,
                explain: Vec::new(),
            });
        }

        // 1. Check the request against its definition
        let r_ast = self.model.assertion("r", &ctx.r_type)?;
        let p_ast = self.model.assertion("p", &ctx.p_type)?;
        let r_tokens = r_ast.tokens();
        if rvals.len() != r_tokens.len() {
            return Err(AuthzError::InvalidRequestSize {
                expected: r_tokens.len(),
                got: rvals.len(),
                rvals: rvals
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        let request: Vec<Value> = if self.settings.accept_json_request {
            rvals.iter().map(json_request_value).collect()
        } else {
            rvals.to_vec()
        };

        // 2. Compile the matcher and bind one role function per grouping type
        let source = match matcher {
            Some(m) => m.to_string(),
            None => self.model.assertion("m", &ctx.m_type)?.value().to_string(),
        };
        let expr = self.matchers.get_or_compile(&source)?;
        let roles = self.role_functions();
        let effect_expr: EffectExpr = self.model.assertion("e", &ctx.e_type)?.value().parse()?;

        let p_tokens = p_ast.tokens();
        let eft_index = p_tokens
            .iter()
            .position(|t| *t == format!("{}_eft", ctx.p_type));
        let field = |name: &str| {
            let token = format!("{}_{name}", ctx.r_type);
            r_tokens
                .iter()
                .position(|t| *t == token)
                .and_then(|i| request[i].as_str())
        };
        let fields = RequestFields {
            sub: field("sub"),
            obj: field("obj"),
            act: field("act"),
        };

        // 3. Walk the rules, merging after each one until a decision falls out
        let bucket = p_ast.policy();
        let rules = bucket.rules();
        let policy_len = rules.len();
        let mut effects = vec![Effect::Indeterminate; policy_len.max(1)];
        let mut matches = vec![0.0; policy_len.max(1)];
        let mut outcome = (Effect::Indeterminate, None);

        if policy_len == 0 {
            let bindings = RowBindings {
                request_tokens: r_tokens,
                request: &request,
                policy_tokens: p_tokens,
                policy: &[],
            };
            let weight = match_weight(&expr, &bindings, &self.functions, &roles)?;
            matches[0] = weight;
            if weight != 0.0 {
                effects[0] = Effect::Allow;
            }
            let (effect, _) =
                self.effector
                    .merge_effects(&effect_expr, &effects, &matches, 0, 1, &fields)?;
            outcome = (effect, None);
        } else {
            let order: Box<dyn Iterator<Item = usize>> = if effect_expr.is_reversed() {
                Box::new((0..policy_len).rev())
            } else {
                Box::new(0..policy_len)
            };
            for i in order {
                let rule = &rules[i];
                if rule.len() != p_tokens.len() {
                    return Err(AuthzError::Evaluation(format!(
                        "invalid policy size: expected {}, got {}, pvals: [{}]",
                        p_tokens.len(),
                        rule.len(),
                        rule.join(", ")
                    )));
                }
                let bindings = RowBindings {
                    request_tokens: r_tokens,
                    request: &request,
                    policy_tokens: p_tokens,
                    policy: rule,
                };
                let weight = match_weight(&expr, &bindings, &self.functions, &roles)?;
                matches[i] = weight;
                effects[i] = if weight == 0.0 {
                    Effect::Indeterminate
                } else {
                    eft_index
                        .map(|k| Effect::from_policy_value(&rule[k]))
                        .unwrap_or(Effect::Allow)
                };

                let merged = self.effector.merge_effects(
                    &effect_expr,
                    &effects,
                    &matches,
                    i,
                    policy_len,
                    &fields,
                )?;
                if merged.0 != Effect::Indeterminate {
                    outcome = merged;
                    break;
                }
            }
        }

        // 4. Final decision and its explanation
        let (effect, explain_index) = outcome;
        let explain = explain_index
            .and_then(|i| rules.get(i))
            .cloned()
            .unwrap_or_default();
        tracing::debug!(
            request = ?request.iter().map(ToString::to_string).collect::<Vec<_>>(),
            effect = %effect,
            explain = ?explain,
            "Evaluated request"
        );
        Ok(Decision {
            allowed: effect.is_allowed(),
            explain,
        })
    }

    /// `g`, `g2`, ... bound to their role graphs, fresh for each request so
    /// their memo never outlives a graph change.
    fn role_functions(&self) -> FunctionMap {
        let mut roles = FunctionMap::empty();
        for (ptype, rm) in &self.role_managers {
            roles.add(ptype, role_function(Some(Arc::clone(rm))));
        }
        roles
    }
}

fn to_values<V: Clone + Into<Value>>(rvals: &[V]) -> Vec<Value> {
    rvals.iter().cloned().map(Into::into).collect()
}

/// A string holding a JSON object becomes an attribute map.
fn json_request_value(value: &Value) -> Value {
    match value {
        Value::Str(s) if s.trim_start().starts_with('{') => {
            match serde_json::from_str::<serde_json::Value>(s) {
                Ok(json @ serde_json::Value::Object(_)) => Value::from_json(&json),
                _ => value.clone(),
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryAdapter;

    const BASIC: &str = r#"
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

    fn rbac() -> Enforcer {
        let adapter = MemoryAdapter::with_lines([
            vec!["p", "alice", "data1", "read"],
            vec!["p", "data2_admin", "data2", "write"],
            vec!["g", "bob", "data2_admin"],
        ]);
        Enforcer::new(Model::from_text(BASIC).unwrap(), Some(Box::new(adapter))).unwrap()
    }

    #[test]
    fn test_enforce_basic_rbac() {
        let e = rbac();
        assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
        assert!(!e.enforce(&["alice", "data2", "write"]).unwrap());
        assert!(e.enforce(&["bob", "data2", "write"]).unwrap());
        assert!(!e.enforce(&["bob", "data1", "read"]).unwrap());
    }

    #[test]
    fn test_enforce_ex_explains() {
        let e = rbac();
        let decision = e.enforce_ex(&["bob", "data2", "write"]).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.explain, vec!["data2_admin", "data2", "write"]);

        let denied = e.enforce_ex(&["bob", "data1", "read"]).unwrap();
        assert!(!denied.allowed);
        assert!(denied.explain.is_empty());
    }

    #[test]
    fn test_request_size_mismatch() {
        let e = rbac();
        let err = e.enforce(&["alice", "data1"]).unwrap_err();
        assert!(matches!(
            err,
            AuthzError::InvalidRequestSize {
                expected: 3,
                got: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_disabled_allows_everything() {
        let mut e = rbac();
        e.enable_enforce(false);
        assert!(e.enforce(&["nobody", "nothing", "never"]).unwrap());
    }

    #[test]
    fn test_enforce_with_matcher() {
        let e = rbac();
        assert!(e
            .enforce_with_matcher("r.sub == p.sub && r.obj == p.obj", &["alice", "data1", "write"])
            .unwrap());
        assert!(!e
            .enforce_with_matcher("r.sub == p.sub && r.obj == p.obj", &["bob", "data2", "write"])
            .unwrap());
    }

    #[test]
    fn test_batch_enforce() {
        let e = rbac();
        let results = e
            .batch_enforce(&[
                vec!["alice", "data1", "read"],
                vec!["bob", "data2", "write"],
                vec!["alice", "data2", "read"],
            ])
            .unwrap();
        assert_eq!(results, vec![true, true, false]);
    }

    #[test]
    fn test_enforce_without_rules_uses_empty_row() {
        let model = Model::from_text(
            r#"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act
[policy_effect]
e = some(where (p.eft == allow))
[matchers]
m = r.sub == "root"
"#,
        )
        .unwrap();
        let e = Enforcer::new(model, None).unwrap();
        assert!(e.enforce(&["root", "any", "thing"]).unwrap());
        assert!(!e.enforce(&["alice", "any", "thing"]).unwrap());
    }

    #[test]
    fn test_json_request_attributes() {
        let model = Model::from_text(
            r#"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub_rule, obj, act
[policy_effect]
e = some(where (p.eft == allow))
[matchers]
m = eval(p.sub_rule) && r.obj == p.obj && r.act == p.act
"#,
        )
        .unwrap();
        let adapter = MemoryAdapter::with_lines([vec!["p", "r.sub.Age > 18", "/data1", "read"]]);
        let mut e = Enforcer::new(model, Some(Box::new(adapter))).unwrap();
        e.enable_accept_json_request(true);
        assert!(e.enforce(&[r#"{"Age": 30}"#, "/data1", "read"]).unwrap());
        assert!(!e.enforce(&[r#"{"Age": 10}"#, "/data1", "read"]).unwrap());
    }

    #[test]
    fn test_load_policy_failure_keeps_rules() {
        let mut e = rbac();
        e.set_adapter(Box::new(MemoryAdapter::with_lines([
            vec!["p", "carol", "data3", "read"],
            vec!["g", "lonely"],
        ])));
        let err = e.load_policy().unwrap_err();
        assert!(matches!(err, AuthzError::GroupingRuleArity(_)));

        assert_eq!(e.model().get_policy("p", "p").unwrap().len(), 2);
        assert!(e.enforce(&["bob", "data2", "write"]).unwrap());
        assert!(!e.enforce(&["carol", "data3", "read"]).unwrap());
    }

    #[test]
    fn test_unknown_effect_rejected_at_construction() {
        let model = Model::from_text(&BASIC.replace(
            "some(where (p.eft == allow))",
            "most(where (p.eft == allow))",
        ))
        .unwrap();
        assert!(matches!(
            Enforcer::new(model, None),
            Err(AuthzError::UnsupportedEffect(_))
        ));
    }
}
