pub mod block;
pub mod builtins;
pub mod condition;
pub mod value;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::AuthzError;
use builtins::FunctionMap;
use condition::{evaluate, Bindings, Context, Expr};
use value::Value;

/// Parse matcher text, either a single expression or a `{ ... }` block.
pub fn compile_matcher(source: &str) -> Result<Expr, AuthzError> {
    if block::is_block(source) {
        block::desugar_block(source)
    } else {
        condition::parse_condition(source)
    }
}

/// Compiled matchers keyed by their source text.
#[derive(Debug, Default)]
pub struct MatcherCache {
    compiled: RwLock<HashMap<String, Arc<Expr>>>,
}

impl MatcherCache {
    pub fn get_or_compile(&self, source: &str) -> Result<Arc<Expr>, AuthzError> {
        if let Some(expr) = self.compiled.read().get(source) {
            return Ok(Arc::clone(expr));
        }
        let expr = Arc::new(compile_matcher(source)?);
        self.compiled
            .write()
            .insert(source.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    pub fn clear(&self) {
        self.compiled.write().clear();
    }
}

/// Token bindings for one (request, policy row) pair.
pub struct RowBindings<'a> {
    pub request_tokens: &'a [String],
    pub request: &'a [Value],
    pub policy_tokens: &'a [String],
    pub policy: &'a [String],
}

impl Bindings for RowBindings<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(i) = self.request_tokens.iter().position(|t| t == name) {
            return self.request.get(i).cloned();
        }
        let i = self.policy_tokens.iter().position(|t| t == name)?;
        // Row-less evaluation binds every policy token to the empty string.
        Some(Value::Str(self.policy.get(i).cloned().unwrap_or_default()))
    }
}

/// Evaluate a matcher for one row and return its weight: `0.0` when the row
/// does not apply, otherwise the boolean/numeric result as a float.
pub fn match_weight(
    expr: &Expr,
    bindings: &dyn Bindings,
    functions: &FunctionMap,
    roles: &FunctionMap,
) -> Result<f64, AuthzError> {
    let ctx = Context::new(bindings, functions).with_overlay(roles);
    match evaluate(expr, &ctx)? {
        Value::Bool(true) => Ok(1.0),
        Value::Bool(false) => Ok(0.0),
        Value::Int(n) => Ok(n as f64),
        Value::Float(f) => Ok(f),
        other => Err(AuthzError::Evaluation(format!(
            "matcher result should be bool, int or float, got {}",
            other.type_name()
        ))),
    }
}
