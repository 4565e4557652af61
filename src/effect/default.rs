use crate::effect::{Effect, EffectExpr, Effector, RequestFields};
use crate::errors::AuthzError;

/// The stock combinators: allow-override, deny-override, allow-and-deny,
/// priority and subject priority.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEffector;

fn matched(matches: &[f64], i: usize) -> bool {
    matches.get(i).is_some_and(|w| *w != 0.0)
}

/// First matched row with effect `wanted`.
fn first_matched(effects: &[Effect], matches: &[f64], wanted: Effect) -> Option<usize> {
    effects
        .iter()
        .enumerate()
        .find(|(i, eft)| **eft == wanted && matched(matches, *i))
        .map(|(i, _)| i)
}

impl Effector for DefaultEffector {
    fn merge_effects(
        &self,
        expr: &EffectExpr,
        effects: &[Effect],
        matches: &[f64],
        policy_index: usize,
        policy_len: usize,
        _request: &RequestFields<'_>,
    ) -> Result<(Effect, Option<usize>), AuthzError> {
        let current = effects.get(policy_index).copied().unwrap_or_default();
        let hit = matched(matches, policy_index);
        let last = policy_index + 1 >= policy_len;

        let merged = match expr {
            EffectExpr::AllowOverride => {
                if hit && current == Effect::Allow {
                    (Effect::Allow, Some(policy_index))
                } else if last {
                    (Effect::Deny, None)
                } else {
                    (Effect::Indeterminate, None)
                }
            }
            EffectExpr::DenyOverride => {
                if hit && current == Effect::Deny {
                    (Effect::Deny, Some(policy_index))
                } else if last {
                    // no deny anywhere: open by default
                    if let Some(i) = first_matched(effects, matches, Effect::Allow) {
                        (Effect::Allow, Some(i))
                    } else if let Some(i) = first_matched(effects, matches, Effect::RateLimit) {
                        (Effect::RateLimit, Some(i))
                    } else {
                        (Effect::Allow, None)
                    }
                } else {
                    (Effect::Indeterminate, None)
                }
            }
            EffectExpr::AllowAndDeny => {
                if hit && current == Effect::Deny {
                    (Effect::Deny, Some(policy_index))
                } else if last {
                    if let Some(i) = first_matched(effects, matches, Effect::Allow) {
                        (Effect::Allow, Some(i))
                    } else if let Some(i) = first_matched(effects, matches, Effect::RateLimit) {
                        (Effect::RateLimit, Some(i))
                    } else {
                        (Effect::Deny, None)
                    }
                } else {
                    (Effect::Indeterminate, None)
                }
            }
            EffectExpr::Priority | EffectExpr::SubjectPriority => {
                // rows arrive from last to first, so index 0 ends the scan
                if hit && current != Effect::Indeterminate {
                    (current, Some(policy_index))
                } else if policy_index == 0 {
                    (Effect::Deny, None)
                } else {
                    (Effect::Indeterminate, None)
                }
            }
            EffectExpr::RateLimit(_) => {
                return Err(AuthzError::UnsupportedEffect(
                    "rate_limit(...) needs a RateLimitEffector".into(),
                ))
            }
        };
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Effect::*;

    fn run(expr: EffectExpr, effects: &[Effect], matches: &[f64]) -> (Effect, Option<usize>) {
        let len = effects.len();
        let order: Vec<usize> = if expr.is_reversed() {
            (0..len).rev().collect()
        } else {
            (0..len).collect()
        };
        let mut seen_effects = vec![Indeterminate; len];
        let mut seen_matches = vec![0.0; len];
        for i in order {
            seen_effects[i] = effects[i];
            seen_matches[i] = matches[i];
            let (eft, explain) = DefaultEffector
                .merge_effects(
                    &expr,
                    &seen_effects,
                    &seen_matches,
                    i,
                    len,
                    &RequestFields::default(),
                )
                .unwrap();
            if eft != Indeterminate {
                return (eft, explain);
            }
        }
        unreachable!("the last row always decides")
    }

    #[test]
    fn test_allow_override_picks_matched_allow() {
        assert_eq!(
            run(EffectExpr::AllowOverride, &[Deny, Allow], &[0.0, 1.0]),
            (Allow, Some(1))
        );
        assert_eq!(
            run(EffectExpr::AllowOverride, &[Deny, Allow], &[1.0, 0.0]),
            (Deny, None)
        );
    }

    #[test]
    fn test_deny_override_defaults_open() {
        assert_eq!(
            run(EffectExpr::DenyOverride, &[Deny, Allow], &[0.0, 1.0]),
            (Allow, Some(1))
        );
        assert_eq!(
            run(EffectExpr::DenyOverride, &[Deny, Allow], &[0.0, 0.0]),
            (Allow, None)
        );
        assert_eq!(
            run(EffectExpr::DenyOverride, &[Allow, Deny], &[1.0, 1.0]),
            (Deny, Some(1))
        );
    }

    #[test]
    fn test_allow_and_deny() {
        assert_eq!(
            run(EffectExpr::AllowAndDeny, &[Deny], &[1.0]),
            (Deny, Some(0))
        );
        assert_eq!(
            run(EffectExpr::AllowAndDeny, &[Allow, Deny], &[1.0, 0.0]),
            (Allow, Some(0))
        );
        assert_eq!(
            run(EffectExpr::AllowAndDeny, &[Allow], &[0.0]),
            (Deny, None)
        );
        assert_eq!(
            run(EffectExpr::AllowAndDeny, &[RateLimit, Indeterminate], &[1.0, 0.0]),
            (RateLimit, Some(0))
        );
    }

    #[test]
    fn test_deny_short_circuits_before_last_row() {
        let effects = [Deny, Indeterminate, Indeterminate];
        let matches = [1.0, 0.0, 0.0];
        let merged = DefaultEffector
            .merge_effects(
                &EffectExpr::AllowAndDeny,
                &effects,
                &matches,
                0,
                3,
                &RequestFields::default(),
            )
            .unwrap();
        assert_eq!(merged, (Deny, Some(0)));
    }

    #[test]
    fn test_priority_scans_from_the_end() {
        assert_eq!(
            run(EffectExpr::Priority, &[Allow, Deny], &[1.0, 1.0]),
            (Deny, Some(1))
        );
        assert_eq!(
            run(EffectExpr::Priority, &[Allow, Deny], &[1.0, 0.0]),
            (Allow, Some(0))
        );
        assert_eq!(
            run(EffectExpr::SubjectPriority, &[Allow, Deny], &[0.0, 0.0]),
            (Deny, None)
        );
    }

    #[test]
    fn test_rate_limit_expr_is_rejected() {
        let expr: EffectExpr = "rate_limit(1, second, all, all)".parse().unwrap();
        assert!(DefaultEffector
            .merge_effects(&expr, &[Allow], &[1.0], 0, 1, &RequestFields::default())
            .is_err());
    }
}
