//! Per-row effects and the combinators that fold them into one decision.

mod default;
mod rate_limit;

use std::fmt;
use std::str::FromStr;

pub use default::DefaultEffector;
pub use rate_limit::{BucketKind, CountType, RateLimitEffector, RateLimitSpec};

use crate::errors::AuthzError;

pub const ALLOW_OVERRIDE: &str = "some(where (p_eft == allow))";
pub const DENY_OVERRIDE: &str = "!some(where (p_eft == deny))";
pub const ALLOW_AND_DENY: &str = "some(where (p_eft == allow)) && !some(where (p_eft == deny))";
pub const PRIORITY: &str = "priority(p_eft) || deny";
pub const SUBJECT_PRIORITY: &str = "subjectPriority(p_eft) || deny";

/// Outcome attached to a single policy row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Effect {
    Allow,
    Deny,
    /// The row did not match, or its effect value is unknown.
    #[default]
    Indeterminate,
    RateLimit,
}

impl Effect {
    /// Map a `p_eft` column value to an effect.
    pub fn from_policy_value(value: &str) -> Self {
        match value {
            "allow" => Self::Allow,
            "deny" => Self::Deny,
            "rate_limit" => Self::RateLimit,
            _ => Self::Indeterminate,
        }
    }

    /// Whether a final decision with this effect grants the request.
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow | Self::RateLimit)
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Indeterminate => "indeterminate",
            Self::RateLimit => "rate_limit",
        })
    }
}

/// A recognised `[policy_effect]` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectExpr {
    AllowOverride,
    DenyOverride,
    AllowAndDeny,
    Priority,
    SubjectPriority,
    RateLimit(RateLimitSpec),
}

impl EffectExpr {
    /// Priority combinators walk the rows from last to first.
    pub fn is_reversed(&self) -> bool {
        matches!(self, Self::Priority | Self::SubjectPriority)
    }
}

impl FromStr for EffectExpr {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().replace("p.eft", "p_eft");
        match normalised.as_str() {
            ALLOW_OVERRIDE => Ok(Self::AllowOverride),
            DENY_OVERRIDE => Ok(Self::DenyOverride),
            ALLOW_AND_DENY => Ok(Self::AllowAndDeny),
            PRIORITY => Ok(Self::Priority),
            SUBJECT_PRIORITY => Ok(Self::SubjectPriority),
            other if other.contains("rate_limit") => Ok(Self::RateLimit(other.parse()?)),
            other => Err(AuthzError::UnsupportedEffect(other.to_string())),
        }
    }
}

/// The request fields a combinator may key state on.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFields<'a> {
    pub sub: Option<&'a str>,
    pub obj: Option<&'a str>,
    pub act: Option<&'a str>,
}

/// Folds per-row effects into a decision.
///
/// The enforcer calls `merge_effects` after evaluating each row, passing the
/// index of that row, and stops as soon as the result is not
/// [`Effect::Indeterminate`]. `effects` and `matches` always span every row;
/// rows not evaluated yet are `Indeterminate` with weight `0.0`.
pub trait Effector: Send + Sync {
    fn merge_effects(
        &self,
        expr: &EffectExpr,
        effects: &[Effect],
        matches: &[f64],
        policy_index: usize,
        policy_len: usize,
        request: &RequestFields<'_>,
    ) -> Result<(Effect, Option<usize>), AuthzError>;

    /// Whether decisions depend on earlier requests. Decision caches must
    /// not answer on behalf of a stateful effector.
    fn is_stateful(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_expressions() {
        assert_eq!(
            "some(where (p.eft == allow))".parse::<EffectExpr>().unwrap(),
            EffectExpr::AllowOverride
        );
        assert_eq!(
            DENY_OVERRIDE.parse::<EffectExpr>().unwrap(),
            EffectExpr::DenyOverride
        );
        assert_eq!(
            ALLOW_AND_DENY.parse::<EffectExpr>().unwrap(),
            EffectExpr::AllowAndDeny
        );
        assert!(PRIORITY.parse::<EffectExpr>().unwrap().is_reversed());
        assert!(SUBJECT_PRIORITY.parse::<EffectExpr>().unwrap().is_reversed());
    }

    #[test]
    fn test_unknown_expression_is_error() {
        let err = "some(where (p_eft == maybe))"
            .parse::<EffectExpr>()
            .unwrap_err();
        assert!(matches!(err, AuthzError::UnsupportedEffect(_)));
    }

    #[test]
    fn test_rate_limit_expression() {
        let expr: EffectExpr = "rate_limit(10, minute, all, obj)".parse().unwrap();
        assert!(matches!(expr, EffectExpr::RateLimit(ref spec) if spec.max == 10));
        assert!("rate_limit(10, fortnight, all, obj)"
            .parse::<EffectExpr>()
            .is_err());
    }

    #[test]
    fn test_effect_from_policy_value() {
        assert_eq!(Effect::from_policy_value("allow"), Effect::Allow);
        assert_eq!(Effect::from_policy_value("deny"), Effect::Deny);
        assert_eq!(Effect::from_policy_value("rate_limit"), Effect::RateLimit);
        assert_eq!(Effect::from_policy_value("other"), Effect::Indeterminate);
        assert!(Effect::RateLimit.is_allowed());
        assert!(!Effect::Indeterminate.is_allowed());
    }
}
