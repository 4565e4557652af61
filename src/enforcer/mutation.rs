//! Policy mutations as one unit across the store, the role graph and the
//! adapter.
//!
//! A [`StagedMutation`] applies the store change first, then the graph
//! change, runs the cycle detectors and auto-saves. Any failure undoes the
//! stages already applied in reverse order, so a rejected mutation leaves
//! rules and role links exactly as they were. The whole pipeline runs under
//! the enforcer's state lock held for writing, so enforcement never observes
//! a staged change. Watcher notification follows the commit and cannot undo
//! it.

use crate::enforcer::Enforcer;
use crate::errors::AuthzError;
use crate::events::{EventKind, LogEntry};
use crate::model::{PolicyBucket, PolicyOp, PolicySnapshot};

/// A requested change to one policy type.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Mutation<'a> {
    /// With `skip_existing` false, nothing is added if any rule is stored.
    Add {
        rules: &'a [Vec<String>],
        skip_existing: bool,
    },
    /// Nothing is removed unless every rule is stored.
    Remove { rules: &'a [Vec<String>] },
    RemoveFiltered {
        field_index: usize,
        values: &'a [&'a str],
    },
    /// Pairwise replacement of `old[i]` with `new[i]`, all or nothing.
    Update {
        old: &'a [Vec<String>],
        new: &'a [Vec<String>],
    },
}

impl Mutation<'_> {
    fn event_kind(&self, sec: &str) -> EventKind {
        match (self, sec) {
            (Mutation::Update { .. }, _) => EventKind::UpdatePolicy,
            (Mutation::Add { .. }, "g") => EventKind::AddRole,
            (Mutation::Add { .. }, _) => EventKind::AddPolicy,
            (_, "g") => EventKind::RemoveRole,
            _ => EventKind::RemovePolicy,
        }
    }
}

/// A store change that has been applied but not committed.
pub(crate) struct StagedMutation<'e> {
    enforcer: &'e Enforcer,
    sec: &'e str,
    ptype: &'e str,
    added: Vec<Vec<String>>,
    removed: Vec<Vec<String>>,
    /// Bucket contents before a removal or update, restored verbatim on undo.
    before: Option<PolicyBucket>,
    /// Every bucket before a priority re-sort, which can move rows of other
    /// policy types.
    order_before: Option<PolicySnapshot>,
    graph_touched: bool,
    /// Domains of the role graph before the graph change.
    domains_before: Vec<String>,
}

impl<'e> StagedMutation<'e> {
    /// Apply `op` to the store. `None` when the store would not change.
    fn stage(
        enforcer: &'e Enforcer,
        sec: &'e str,
        ptype: &'e str,
        op: &Mutation<'_>,
    ) -> Result<Option<Self>, AuthzError> {
        let model = &enforcer.model;
        let ast = model.assertion(sec, ptype)?;
        let mut staged = Self {
            enforcer,
            sec,
            ptype,
            added: Vec::new(),
            removed: Vec::new(),
            before: None,
            order_before: None,
            graph_touched: false,
            domains_before: Vec::new(),
        };
        let reorder = model.keeps_priority_order();
        if reorder {
            staged.order_before = Some(model.policy_snapshot());
        }

        match *op {
            Mutation::Add {
                rules,
                skip_existing,
            } => {
                if !skip_existing && model.has_policies(sec, ptype, rules)? {
                    return Ok(None);
                }
                staged.added = model.add_policies(sec, ptype, rules)?;
            }
            Mutation::Remove { rules } => {
                if ast.policy().filter_exists(rules).len() != rules.len() {
                    return Ok(None);
                }
                staged.before = Some(ast.policy().clone());
                staged.removed = model.remove_policies(sec, ptype, rules)?;
            }
            Mutation::RemoveFiltered {
                field_index,
                values,
            } => {
                staged.before = Some(ast.policy().clone());
                staged.removed = model.remove_filtered_policy(sec, ptype, field_index, values)?;
            }
            Mutation::Update { old, new } => {
                if old.len() != new.len() {
                    return Ok(None);
                }
                staged.before = Some(ast.policy().clone());
                for (o, n) in old.iter().zip(new) {
                    if !model.update_policy(sec, ptype, o, n.clone())? {
                        staged.restore_store();
                        return Ok(None);
                    }
                }
                staged.removed = old.to_vec();
                staged.added = new.to_vec();
            }
        }

        if staged.added.is_empty() && staged.removed.is_empty() {
            return Ok(None);
        }
        // rows stay in the order a reload would give them
        if reorder {
            if let Err(e) = model.sort_policies() {
                staged.restore_store();
                return Err(e);
            }
        }
        Ok(Some(staged))
    }

    /// Mirror the store change into the role graph of a grouping type.
    fn apply_graph(&mut self) -> Result<(), AuthzError> {
        if self.sec != "g" || !self.enforcer.settings.auto_build_role_links {
            return Ok(());
        }
        let enforcer = self.enforcer;
        let ast = enforcer.model.assertion(self.sec, self.ptype)?;
        let rm = enforcer.role_manager_for(self.ptype)?;
        self.domains_before = rm.get_all_domains();
        self.graph_touched = true;
        ast.build_incremental_role_links(&**rm, PolicyOp::Remove, &self.removed)?;
        ast.build_incremental_role_links(&**rm, PolicyOp::Add, &self.added)
    }

    /// Run the cycle detectors over the changed graph. Model detectors only
    /// warn here.
    fn check(&self) -> Result<(), AuthzError> {
        if !self.graph_touched {
            return Ok(());
        }
        let rm = self.enforcer.role_manager_for(self.ptype)?;
        for detector in &self.enforcer.detectors {
            detector.check(&**rm)?;
        }
        for detector in &self.enforcer.model_detectors {
            if let Err(e) = detector.check_model(&self.enforcer.model, &**rm) {
                tracing::warn!(ptype = %self.ptype, error = %e, "Policy change raised a detector warning");
            }
        }
        Ok(())
    }

    /// Push the change to the adapter. Hooks it does not implement are skipped.
    fn save(&self, op: &Mutation<'_>) -> Result<(), AuthzError> {
        let (Some(adapter), true) = (
            self.enforcer.adapter.as_deref(),
            self.enforcer.settings.auto_save,
        ) else {
            return Ok(());
        };
        let (sec, ptype) = (self.sec, self.ptype);
        let result = match *op {
            Mutation::Add { .. } => match self.added.as_slice() {
                [rule] => adapter.add_policy(sec, ptype, rule),
                rules => adapter.add_policies(sec, ptype, rules),
            },
            Mutation::Remove { .. } => match self.removed.as_slice() {
                [rule] => adapter.remove_policy(sec, ptype, rule),
                rules => adapter.remove_policies(sec, ptype, rules),
            },
            Mutation::RemoveFiltered {
                field_index,
                values,
            } => adapter.remove_filtered_policy(sec, ptype, field_index, values),
            Mutation::Update { old, new } => old
                .iter()
                .zip(new)
                .try_for_each(|(o, n)| adapter.update_policy(sec, ptype, o, n)),
        };
        match result {
            Err(AuthzError::AdapterNotImplemented) => {
                tracing::debug!(ptype = %ptype, "Adapter does not auto-save this change");
                Ok(())
            }
            other => other,
        }
    }

    fn restore_store(&mut self) {
        let model = &self.enforcer.model;
        if let Some(snapshot) = self.order_before.take() {
            model.restore_policy(snapshot);
        } else if let Some(before) = self.before.take() {
            model.restore_policy(vec![(self.sec.to_string(), self.ptype.to_string(), before)]);
        } else if !self.added.is_empty() {
            // additions were appended, so removing them restores the order
            if let Err(e) = model.remove_policies(self.sec, self.ptype, &self.added) {
                tracing::warn!(ptype = %self.ptype, error = %e, "Could not remove staged rules while undoing a change");
            }
        }
    }

    /// Undo every applied stage: the store is restored, then the graph
    /// change is reverted link by link. Falls back to a full rebuild when
    /// the graph change was only partly applied.
    fn undo(mut self) {
        self.restore_store();
        if !self.graph_touched {
            return;
        }
        if let Err(e) = self.revert_graph() {
            tracing::debug!(ptype = %self.ptype, error = %e, "Reverting role links failed, rebuilding");
            if let Err(e) = self.rebuild_graph() {
                tracing::warn!(ptype = %self.ptype, error = %e, "Could not rebuild role links while undoing a change");
            }
        }
    }

    fn revert_graph(&self) -> Result<(), AuthzError> {
        let enforcer = self.enforcer;
        let ast = enforcer.model.assertion(self.sec, self.ptype)?;
        let rm = enforcer.role_manager_for(self.ptype)?;
        ast.build_incremental_role_links(&**rm, PolicyOp::Remove, &self.added)?;
        ast.build_incremental_role_links(&**rm, PolicyOp::Add, &self.removed)?;
        for domain in rm.get_all_domains() {
            if !self.domains_before.contains(&domain) {
                rm.delete_domain(&domain)?;
            }
        }
        Ok(())
    }

    fn rebuild_graph(&self) -> Result<(), AuthzError> {
        let enforcer = self.enforcer;
        let ast = enforcer.model.assertion(self.sec, self.ptype)?;
        let rm = enforcer.role_manager_for(self.ptype)?;
        rm.clear();
        ast.build_role_links(&**rm)
    }

    /// The rules this mutation added, or removed when it added none.
    fn commit(self) -> Vec<Vec<String>> {
        self.enforcer.invalidate_cache();
        if self.added.is_empty() {
            self.removed
        } else {
            self.added
        }
    }
}

impl Enforcer {
    /// Run `op` against `sec`/`ptype` and return the rules it changed; empty
    /// when nothing changed.
    pub(crate) fn apply_mutation(
        &self,
        sec: &str,
        ptype: &str,
        op: Mutation<'_>,
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        let mut entry = LogEntry::new(op.event_kind(sec));
        entry.ptype = ptype.to_string();
        let handle = self.logger.on_before_event(&entry);

        let result = self
            .mutate(sec, ptype, &op)
            .and_then(|effected| {
                if !effected.is_empty() {
                    self.notify_watcher(sec, ptype, &op, &effected)?;
                }
                Ok(effected)
            });

        if let Ok(effected) = &result {
            entry = entry.with_rules(ptype, effected);
        }
        self.log_after(handle, entry, result.as_ref().err());
        result
    }

    fn mutate(
        &self,
        sec: &str,
        ptype: &str,
        op: &Mutation<'_>,
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        let _state = self.state.write();
        let Some(mut staged) = StagedMutation::stage(self, sec, ptype, op)? else {
            return Ok(Vec::new());
        };
        let applied = staged
            .apply_graph()
            .and_then(|_| staged.check())
            .and_then(|_| staged.save(op));
        match applied {
            Ok(()) => Ok(staged.commit()),
            Err(e) => {
                tracing::warn!(ptype = %ptype, error = %e, "Policy change rejected, rolled back");
                staged.undo();
                Err(e)
            }
        }
    }

    fn notify_watcher(
        &self,
        sec: &str,
        ptype: &str,
        op: &Mutation<'_>,
        effected: &[Vec<String>],
    ) -> Result<(), AuthzError> {
        let Some(watcher) = self.watcher.as_deref() else {
            return Ok(());
        };
        if !self.settings.auto_notify_watcher {
            return Ok(());
        }
        match *op {
            Mutation::Add { .. } => match effected {
                [rule] => watcher.update_for_add_policy(sec, ptype, rule),
                rules => watcher.update_for_add_policies(sec, ptype, rules),
            },
            Mutation::Remove { .. } => match effected {
                [rule] => watcher.update_for_remove_policy(sec, ptype, rule),
                rules => watcher.update_for_remove_policies(sec, ptype, rules),
            },
            Mutation::RemoveFiltered {
                field_index,
                values,
            } => watcher.update_for_remove_filtered_policy(sec, ptype, field_index, values),
            Mutation::Update { old, new } => old
                .iter()
                .zip(new)
                .try_for_each(|(o, n)| watcher.update_for_update_policy(sec, ptype, o, n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::model::Model;
    use crate::persist::{Adapter, MemoryAdapter, UpdateCallback, Watcher};
    use crate::rbac::detector::DfsDetector;

    fn rule(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    fn model() -> Model {
        let mut m = Model::new();
        m.add_def("r", "r", "sub, obj, act").unwrap();
        m.add_def("p", "p", "sub, obj, act").unwrap();
        m.add_def("g", "g", "_, _").unwrap();
        m.add_def("e", "e", "some(where (p.eft == allow))").unwrap();
        m.add_def("m", "m", "g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act")
            .unwrap();
        m
    }

    /// Refuses every auto-save with a hard error.
    struct FailingAdapter;

    impl Adapter for FailingAdapter {
        fn load_policy(&self, _model: &Model) -> Result<(), AuthzError> {
            Ok(())
        }

        fn save_policy(&self, _model: &Model) -> Result<(), AuthzError> {
            Ok(())
        }

        fn add_policy(&self, _sec: &str, _ptype: &str, _rule: &[String]) -> Result<(), AuthzError> {
            Err(AuthzError::Adapter("disk full".into()))
        }
    }

    /// Only implements the required methods.
    struct LoadOnlyAdapter;

    impl Adapter for LoadOnlyAdapter {
        fn load_policy(&self, _model: &Model) -> Result<(), AuthzError> {
            Ok(())
        }

        fn save_policy(&self, _model: &Model) -> Result<(), AuthzError> {
            Ok(())
        }
    }

    struct RecordingWatcher {
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Watcher for RecordingWatcher {
        fn set_update_callback(&self, _callback: UpdateCallback) -> Result<(), AuthzError> {
            Ok(())
        }

        fn update(&self) -> Result<(), AuthzError> {
            self.calls.lock().push("update".into());
            if self.fail {
                return Err(AuthzError::Watcher("broker unreachable".into()));
            }
            Ok(())
        }

        fn update_for_add_policy(&self, _sec: &str, ptype: &str, rule: &[String]) -> Result<(), AuthzError> {
            self.calls.lock().push(format!("add {ptype} {}", rule.join(",")));
            self.update()
        }
    }

    #[test]
    fn test_cycle_rejection_rolls_back_store_and_graph() {
        let mut e = Enforcer::new(model(), None).unwrap();
        e.set_detectors(vec![Box::new(DfsDetector)]);
        e.add_grouping_policy(&["alice", "bob"]).unwrap();

        let err = e.add_grouping_policy(&["bob", "alice"]).unwrap_err();
        assert!(matches!(err, AuthzError::CycleDetected(_)));

        let rm = e.get_role_manager().unwrap();
        assert!(!rm.has_link("bob", "alice", &[]).unwrap());
        assert!(rm.has_link("alice", "bob", &[]).unwrap());
        assert_eq!(e.get_grouping_policy().unwrap(), vec![rule(&["alice", "bob"])]);
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut e = Enforcer::new(model(), None).unwrap();
        e.set_detectors(vec![Box::new(DfsDetector)]);
        assert!(e.add_grouping_policy(&["a", "a"]).is_err());
        assert!(e.get_grouping_policy().unwrap().is_empty());
    }

    #[test]
    fn test_adapter_failure_rolls_back() {
        let mut e = Enforcer::new(model(), None).unwrap();
        e.set_adapter(Box::new(FailingAdapter));
        let err = e.add_policy(&["alice", "data1", "read"]).unwrap_err();
        assert!(matches!(err, AuthzError::Adapter(_)));
        assert!(e.get_policy().unwrap().is_empty());
        assert!(!e.enforce(&["alice", "data1", "read"]).unwrap());
    }

    #[test]
    fn test_adapter_not_implemented_is_soft() {
        let mut e = Enforcer::new(model(), None).unwrap();
        e.set_adapter(Box::new(LoadOnlyAdapter));
        assert!(e.add_policy(&["alice", "data1", "read"]).unwrap());
        assert!(e.remove_policy(&["alice", "data1", "read"]).unwrap());
    }

    #[test]
    fn test_auto_save_reaches_adapter() {
        let adapter = MemoryAdapter::new();
        let mut e = Enforcer::new(model(), Some(Box::new(adapter))).unwrap();
        e.add_policies(&[vec!["alice", "data1", "read"], vec!["bob", "data2", "write"]])
            .unwrap();
        e.remove_filtered_policy(0, &["bob"]).unwrap();
        e.enable_auto_save(false);
        e.add_policy(&["carol", "data3", "read"]).unwrap();

        e.load_policy().unwrap();
        assert_eq!(e.get_policy().unwrap(), vec![rule(&["alice", "data1", "read"])]);
    }

    #[test]
    fn test_watcher_failure_keeps_mutation() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut e = Enforcer::new(model(), None).unwrap();
        e.set_watcher(Box::new(RecordingWatcher {
            calls: Arc::clone(&calls),
            fail: true,
        }))
        .unwrap();

        let err = e.add_policy(&["alice", "data1", "read"]).unwrap_err();
        assert!(matches!(err, AuthzError::Watcher(_)));
        assert!(e.has_policy(&["alice", "data1", "read"]).unwrap());
        assert_eq!(calls.lock()[0], "add p alice,data1,read");
    }

    #[test]
    fn test_watcher_not_notified_without_change() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut e = Enforcer::new(model(), None).unwrap();
        e.set_watcher(Box::new(RecordingWatcher {
            calls: Arc::clone(&calls),
            fail: false,
        }))
        .unwrap();
        assert!(e.add_policy(&["alice", "data1", "read"]).unwrap());
        assert!(!e.add_policy(&["alice", "data1", "read"]).unwrap());
        assert!(!e.remove_policy(&["bob", "data1", "read"]).unwrap());
        assert_eq!(calls.lock().len(), 2);
    }

    #[test]
    fn test_remove_keeps_order_on_rollback() {
        let mut e = Enforcer::new(model(), None).unwrap();
        e.add_grouping_policies(&[vec!["a", "b"], vec!["c", "d"], vec!["e", "f"]])
            .unwrap();
        e.set_adapter(Box::new(FailingRemoveAdapter));
        assert!(e.remove_grouping_policy(&["a", "b"]).is_err());
        assert_eq!(
            e.get_grouping_policy().unwrap(),
            vec![rule(&["a", "b"]), rule(&["c", "d"]), rule(&["e", "f"])]
        );
        assert!(e.has_role_for_user("a", "b", None).unwrap());
    }

    struct FailingRemoveAdapter;

    impl Adapter for FailingRemoveAdapter {
        fn load_policy(&self, _model: &Model) -> Result<(), AuthzError> {
            Ok(())
        }

        fn save_policy(&self, _model: &Model) -> Result<(), AuthzError> {
            Ok(())
        }

        fn remove_policy(&self, _sec: &str, _ptype: &str, _rule: &[String]) -> Result<(), AuthzError> {
            Err(AuthzError::Adapter("read-only store".into()))
        }
    }
}
