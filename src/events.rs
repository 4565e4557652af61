//! Observational hooks around enforcement and policy changes.
//!
//! A hook sees the event twice: `on_before_event` when it starts and
//! `on_after_event` with the outcome filled in. Hooks cannot influence the
//! decision or the mutation they observe.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Enforce,
    AddPolicy,
    RemovePolicy,
    UpdatePolicy,
    AddRole,
    RemoveRole,
    LoadPolicy,
    SavePolicy,
    LoadModel,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Enforce => "enforce",
            Self::AddPolicy => "policy_add",
            Self::RemovePolicy => "policy_remove",
            Self::UpdatePolicy => "policy_update",
            Self::AddRole => "role_add",
            Self::RemoveRole => "role_remove",
            Self::LoadPolicy => "policy_load",
            Self::SavePolicy => "policy_save",
            Self::LoadModel => "model_load",
        })
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub kind: EventKind,
    /// Request values, for enforcement.
    pub request: Vec<String>,
    pub allowed: Option<bool>,
    /// The rule that explains an enforcement decision.
    pub matched: Vec<String>,
    pub ptype: String,
    pub rules: Vec<Vec<String>>,
    pub rule_count: usize,
    pub error: Option<String>,
    pub duration: Option<Duration>,
}

impl LogEntry {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            request: Vec::new(),
            allowed: None,
            matched: Vec::new(),
            ptype: String::new(),
            rules: Vec::new(),
            rule_count: 0,
            error: None,
            duration: None,
        }
    }

    pub fn with_rules(mut self, ptype: &str, rules: &[Vec<String>]) -> Self {
        self.ptype = ptype.to_string();
        self.rules = rules.to_vec();
        self.rule_count = rules.len();
        self
    }
}

/// Opaque token tying an `on_after_event` call to its `on_before_event`.
#[derive(Debug)]
pub struct EventHandle {
    pub started: Instant,
}

pub trait EventLogger: Send + Sync {
    fn on_before_event(&self, entry: &LogEntry) -> EventHandle {
        let _ = entry;
        EventHandle {
            started: Instant::now(),
        }
    }

    fn on_after_event(&self, handle: EventHandle, entry: &LogEntry);

    /// Whether this hook wants events of `kind` at all.
    fn is_subscribed(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }
}

/// Emits every subscribed event as a `tracing` event.
#[derive(Debug, Default)]
pub struct TracingLogger {
    subscriptions: Option<HashSet<EventKind>>,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only report the given kinds.
    pub fn subscribe(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            subscriptions: Some(kinds.into_iter().collect()),
        }
    }
}

impl EventLogger for TracingLogger {
    fn on_after_event(&self, handle: EventHandle, entry: &LogEntry) {
        let elapsed_us = handle.started.elapsed().as_micros() as u64;
        match (entry.kind, &entry.error) {
            (kind, Some(error)) => {
                tracing::warn!(event = %kind, error = %error, elapsed_us, "Authorization event failed");
            }
            (EventKind::Enforce, None) => {
                tracing::debug!(
                    request = ?entry.request,
                    allowed = ?entry.allowed,
                    matched = ?entry.matched,
                    elapsed_us,
                    "Enforced request"
                );
            }
            (kind, None) => {
                tracing::info!(
                    event = %kind,
                    ptype = %entry.ptype,
                    rules = entry.rule_count,
                    elapsed_us,
                    "Authorization event"
                );
            }
        }
    }

    fn is_subscribed(&self, kind: EventKind) -> bool {
        self.subscriptions
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&kind))
    }
}
