use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, DefaultCache};
use crate::enforcer::{EnforceContext, Enforcer};
use crate::errors::AuthzError;
use crate::matcher::value::Value;

/// An [`Enforcer`] that memoises `enforce` results for string requests.
///
/// Every policy mutation, reload and model swap on the wrapped enforcer
/// clears the cache. Requests bypass it while the effector is stateful, as
/// with `rate_limit(...)` models. Everything except `enforce` derefs to the inner
/// enforcer and is not cached.
pub struct CachedEnforcer {
    enforcer: Enforcer,
    cache: Arc<dyn Cache>,
    ttl: Option<Duration>,
    enabled: bool,
}

impl CachedEnforcer {
    pub fn new(enforcer: Enforcer) -> Self {
        Self::with_cache(enforcer, Arc::new(DefaultCache::new()))
    }

    pub fn with_cache(mut enforcer: Enforcer, cache: Arc<dyn Cache>) -> Self {
        let ttl = enforcer.settings().cache_ttl_secs.map(Duration::from_secs);
        enforcer.set_decision_cache(Arc::clone(&cache));
        Self {
            enforcer,
            cache,
            ttl,
            enabled: true,
        }
    }

    /// Lifetime of entries written from now on.
    pub fn set_expire_time(&mut self, ttl: Option<Duration>) {
        self.ttl = ttl;
    }

    pub fn enable_cache(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn cache(&self) -> &dyn Cache {
        &*self.cache
    }

    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    pub fn into_inner(self) -> Enforcer {
        self.enforcer
    }

    pub fn enforce<V>(&self, rvals: &[V]) -> Result<bool, AuthzError>
    where
        V: Clone + Into<Value>,
    {
        let values: Vec<Value> = rvals.iter().cloned().map(Into::into).collect();
        let cacheable = self.enabled && !self.enforcer.effector.is_stateful();
        let key = cacheable.then(|| cache_key(&values)).flatten();

        if let Some(key) = &key {
            if let Some(hit) = self.cache.get(key) {
                return Ok(hit);
            }
        }

        let allowed = self
            .enforcer
            .enforce_inner(&EnforceContext::default(), None, &values)?
            .allowed;
        if let Some(key) = &key {
            self.cache.set(key, allowed, self.ttl);
        }
        Ok(allowed)
    }
}

/// Requests made only of strings are cacheable; the key is their JSON array.
fn cache_key(values: &[Value]) -> Option<String> {
    let parts = values
        .iter()
        .map(Value::as_str)
        .collect::<Option<Vec<&str>>>()?;
    serde_json::to_string(&parts).ok()
}

impl Deref for CachedEnforcer {
    type Target = Enforcer;

    fn deref(&self) -> &Enforcer {
        &self.enforcer
    }
}

impl DerefMut for CachedEnforcer {
    fn deref_mut(&mut self) -> &mut Enforcer {
        &mut self.enforcer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn enforcer() -> CachedEnforcer {
        let mut m = Model::new();
        m.add_def("r", "r", "sub, obj, act").unwrap();
        m.add_def("p", "p", "sub, obj, act").unwrap();
        m.add_def("e", "e", "some(where (p.eft == allow))").unwrap();
        m.add_def("m", "m", "r.sub == p.sub && r.obj == p.obj && r.act == p.act")
            .unwrap();
        CachedEnforcer::new(Enforcer::new(m, None).unwrap())
    }

    #[test]
    fn test_decisions_are_cached() {
        let e = enforcer();
        e.add_policy(&["alice", "data1", "read"]).unwrap();
        assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
        assert_eq!(e.cache().get(r#"["alice","data1","read"]"#), Some(true));

        // a stale entry answers until something invalidates it
        e.cache().set(r#"["alice","data1","read"]"#, false, None);
        assert!(!e.enforce(&["alice", "data1", "read"]).unwrap());
    }

    #[test]
    fn test_mutation_invalidates() {
        let e = enforcer();
        assert!(!e.enforce(&["bob", "data2", "write"]).unwrap());
        assert_eq!(e.cache().get(r#"["bob","data2","write"]"#), Some(false));

        e.add_policy(&["bob", "data2", "write"]).unwrap();
        assert_eq!(e.cache().get(r#"["bob","data2","write"]"#), None);
        assert!(e.enforce(&["bob", "data2", "write"]).unwrap());

        e.remove_policy(&["bob", "data2", "write"]).unwrap();
        assert!(!e.enforce(&["bob", "data2", "write"]).unwrap());
    }

    #[test]
    fn test_non_string_requests_bypass_cache() {
        let e = enforcer();
        let request = [Value::from("alice"), Value::from(3), Value::from("read")];
        assert!(!e.enforce(&request).unwrap());
        assert_eq!(cache_key(&request), None);
    }

    #[test]
    fn test_keys_do_not_collide() {
        let a = cache_key(&[Value::from("a$$b"), Value::from("c")]);
        let b = cache_key(&[Value::from("a"), Value::from("b$$c")]);
        assert!(a.is_some());
        assert_ne!(a, b);
    }

    #[test]
    fn test_rate_limited_requests_bypass_cache() {
        let mut m = Model::new();
        m.add_def("r", "r", "sub, obj, act").unwrap();
        m.add_def("p", "p", "sub, obj, act").unwrap();
        m.add_def("e", "e", "rate_limit(2, minute, allow, sub)").unwrap();
        m.add_def("m", "m", "r.sub == p.sub && r.obj == p.obj && r.act == p.act")
            .unwrap();
        let e = CachedEnforcer::new(Enforcer::new(m, None).unwrap());
        e.add_policy(&["alice", "data1", "read"]).unwrap();

        let decisions: Vec<bool> = (0..4)
            .map(|_| e.enforce(&["alice", "data1", "read"]).unwrap())
            .collect();
        assert_eq!(decisions, vec![true, true, false, false]);
        assert_eq!(e.cache().get(r#"["alice","data1","read"]"#), None);
    }

    #[test]
    fn test_cache_disabled() {
        let mut e = enforcer();
        e.enable_cache(false);
        assert!(!e.enforce(&["alice", "data1", "read"]).unwrap());
        assert_eq!(e.cache().get(r#"["alice","data1","read"]"#), None);
    }
}
