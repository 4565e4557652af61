use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;

use crate::effect::{Effect, EffectExpr, Effector, RequestFields};
use crate::errors::AuthzError;

static RATE_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"rate_limit\((\d+),\s*(\w+),\s*(\w+),\s*(\w+)\)").expect("valid rate_limit regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountType {
    /// Only requests whose base decision is allow use up the budget.
    Allow,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketKind {
    All,
    Sub,
    Obj,
    Act,
}

/// Parsed `rate_limit(max, unit, countType, bucket)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSpec {
    pub max: u64,
    pub window: Duration,
    pub count: CountType,
    pub bucket: BucketKind,
}

impl FromStr for RateLimitSpec {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = RATE_LIMIT
            .captures(s)
            .ok_or_else(|| AuthzError::InvalidRateLimit(s.to_string()))?;

        let max = caps[1]
            .parse()
            .map_err(|_| AuthzError::InvalidRateLimit(format!("invalid max value: {}", &caps[1])))?;
        let window = match &caps[2] {
            "second" => Duration::from_secs(1),
            "minute" => Duration::from_secs(60),
            "hour" => Duration::from_secs(3600),
            "day" => Duration::from_secs(86_400),
            other => {
                return Err(AuthzError::InvalidRateLimit(format!(
                    "invalid unit: {other} (must be second, minute, hour, or day)"
                )))
            }
        };
        let count = match &caps[3] {
            "allow" => CountType::Allow,
            "all" => CountType::All,
            other => {
                return Err(AuthzError::InvalidRateLimit(format!(
                    "invalid count_type: {other} (must be allow or all)"
                )))
            }
        };
        let bucket = match &caps[4] {
            "all" => BucketKind::All,
            "sub" => BucketKind::Sub,
            "obj" => BucketKind::Obj,
            "act" => BucketKind::Act,
            other => {
                return Err(AuthzError::InvalidRateLimit(format!(
                    "invalid bucket: {other} (must be all, sub, obj, or act)"
                )))
            }
        };

        Ok(Self {
            max,
            window,
            count,
            bucket,
        })
    }
}

impl RateLimitSpec {
    fn bucket_key(&self, request: &RequestFields<'_>) -> String {
        let keyed = |kind: &str, value: Option<&str>| {
            format!("bucket:{kind}:{}", value.unwrap_or("unknown"))
        };
        match self.bucket {
            BucketKind::All => "bucket:all".to_string(),
            BucketKind::Sub => keyed("sub", request.sub),
            BucketKind::Obj => keyed("obj", request.obj),
            BucketKind::Act => keyed("act", request.act),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    window_end: Instant,
}

/// Fixed-window rate limiting on top of a first-match allow/deny scan.
///
/// Bucket state is shared by every enforcement that goes through the same
/// effector and is mutated under one mutex.
#[derive(Debug, Default)]
pub struct RateLimitEffector {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimitEffector {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(count, window_end)` of a bucket such as `bucket:sub:alice`.
    pub fn bucket_state(&self, key: &str) -> Option<(u64, Instant)> {
        self.buckets
            .lock()
            .get(key)
            .map(|b| (b.count, b.window_end))
    }

    pub fn reset_buckets(&self) {
        self.buckets.lock().clear();
    }

    /// Count one request; `false` once the budget of the window is spent.
    fn admit(&self, spec: &RateLimitSpec, key: String) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        match buckets.get_mut(&key) {
            Some(bucket) if now <= bucket.window_end => {
                bucket.count += 1;
                bucket.count <= spec.max
            }
            _ => {
                buckets.insert(
                    key,
                    Bucket {
                        count: 1,
                        window_end: now + spec.window,
                    },
                );
                true
            }
        }
    }
}

impl Effector for RateLimitEffector {
    fn is_stateful(&self) -> bool {
        true
    }

    fn merge_effects(
        &self,
        expr: &EffectExpr,
        effects: &[Effect],
        matches: &[f64],
        policy_index: usize,
        policy_len: usize,
        request: &RequestFields<'_>,
    ) -> Result<(Effect, Option<usize>), AuthzError> {
        let EffectExpr::RateLimit(spec) = expr else {
            return Err(AuthzError::InvalidRateLimit(
                "RateLimitEffector requires a rate_limit(...) effect".into(),
            ));
        };

        let decided = effects
            .iter()
            .zip(matches)
            .take(policy_index + 1)
            .enumerate()
            .find(|(_, (eft, weight))| {
                **weight != 0.0 && matches!(eft, Effect::Allow | Effect::Deny)
            })
            .map(|(i, (eft, _))| (*eft, Some(i)));

        let (base, explain) = match decided {
            Some(found) => found,
            // nothing decisive yet; wait for the remaining rows
            None if policy_index + 1 < policy_len => return Ok((Effect::Indeterminate, None)),
            None => (Effect::Indeterminate, None),
        };

        let counted = match spec.count {
            CountType::All => true,
            CountType::Allow => base == Effect::Allow,
        };
        if counted && !self.admit(spec, spec.bucket_key(request)) {
            tracing::debug!(
                bucket = %spec.bucket_key(request),
                max = spec.max,
                "Rate limit exceeded"
            );
            return Ok((Effect::Deny, None));
        }

        match base {
            // nothing matched at all: closed
            Effect::Indeterminate => Ok((Effect::Deny, None)),
            _ => Ok((base, explain)),
        }
    }
}
