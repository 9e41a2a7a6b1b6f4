//! Record views used while evaluating formulas inside the engine

use crate::cache::ValueCache;
use crate::calculation::SchemaState;
use ahash::{AHashMap, AHashSet};
use chrono::NaiveDateTime;
use fieldcalc_core::{FieldId, RecordId, RecordStore, Value};
use fieldcalc_formula::{evaluate, CompiledFormula, EdgeKind, EvaluationContext, RecordView};
use std::cell::RefCell;

/// Where formula values come from when a formula reads another formula
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadMode {
    /// Use cached values, computing (and caching) on a miss
    Cached,
    /// Recompute every formula reached, ignoring the cache
    Fresh,
}

/// Shared state for one read or recompute batch
pub(crate) struct Resolver<'a, S> {
    store: &'a S,
    state: &'a SchemaState,
    cache: &'a ValueCache,
    mode: ReadMode,
    now: NaiveDateTime,
    /// Values already settled in this batch; consulted before anything else
    memo: RefCell<AHashMap<(RecordId, FieldId), Value>>,
}

impl<'a, S: RecordStore> Resolver<'a, S> {
    pub(crate) fn new(
        store: &'a S,
        state: &'a SchemaState,
        cache: &'a ValueCache,
        mode: ReadMode,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            store,
            state,
            cache,
            mode,
            now,
            memo: RefCell::new(AHashMap::new()),
        }
    }

    /// Pin a value for the rest of the batch
    pub(crate) fn settle(&self, record: RecordId, field: FieldId, value: Value) {
        self.memo.borrow_mut().insert((record, field), value);
    }

    /// Current value of a field on a record
    pub(crate) fn value_of(&self, record: RecordId, field: FieldId) -> Value {
        let settled = self.memo.borrow().get(&(record, field)).cloned();
        if let Some(value) = settled {
            return value;
        }

        if self.state.formula(field).is_none() {
            return self.store.field_value(record, field);
        }

        match self.known(record, field) {
            Some(value) => value,
            None => self.resolve(record, field),
        }
    }

    /// Formula value that can be used without computing anything
    fn known(&self, record: RecordId, field: FieldId) -> Option<Value> {
        let settled = self.memo.borrow().get(&(record, field)).cloned();
        if settled.is_some() {
            return settled;
        }
        match self.mode {
            ReadMode::Cached => self.cache.get(record, field).map(|cached| cached.value),
            ReadMode::Fresh => None,
        }
    }

    /// Compute a formula value together with every unknown formula value it
    /// reads, upstream first.
    ///
    /// Uses an explicit stack, so each evaluation finds its formula inputs
    /// already settled and chain length does not grow the call stack.
    fn resolve(&self, record: RecordId, field: FieldId) -> Value {
        let mut stack = vec![(record, field, false)];
        let mut expanded = AHashSet::new();
        let mut result = Value::Null;

        while let Some((rec, fld, ready)) = stack.pop() {
            let Some(formula) = self.state.formula(fld) else {
                continue;
            };

            if ready {
                let value = self.compute(rec, formula);
                self.settle(rec, fld, value.clone());
                self.cache.insert(rec, fld, value.clone());
                if (rec, fld) == (record, field) {
                    result = value;
                }
                continue;
            }

            if (rec, fld) != (record, field) && self.known(rec, fld).is_some() {
                continue;
            }
            if !expanded.insert((rec, fld)) {
                continue;
            }

            stack.push((rec, fld, true));
            for (precedent, kind) in self.state.graph.get_precedents(fld) {
                if self.state.formula(precedent).is_none() {
                    continue;
                }
                match kind {
                    EdgeKind::Direct => stack.push((rec, precedent, false)),
                    EdgeKind::Via(link) => {
                        for target in self.store.linked_records(rec, link) {
                            stack.push((target, precedent, false));
                        }
                    }
                }
            }
        }

        result
    }

    /// Evaluate a formula against a record
    pub(crate) fn compute(&self, record: RecordId, formula: &CompiledFormula) -> Value {
        let view = EngineView {
            record,
            resolver: self,
        };
        evaluate(&formula.root, &EvaluationContext::new(&view, self.now))
    }
}

/// One record as seen by a formula
pub(crate) struct EngineView<'r, 'a, S> {
    record: RecordId,
    resolver: &'r Resolver<'a, S>,
}

impl<S: RecordStore> RecordView for EngineView<'_, '_, S> {
    fn field_value(&self, field: FieldId) -> Value {
        self.resolver.value_of(self.record, field)
    }

    fn linked_values(&self, link: FieldId, field: FieldId) -> Vec<Value> {
        self.resolver
            .store
            .linked_records(self.record, link)
            .into_iter()
            .map(|target| self.resolver.value_of(target, field))
            .collect()
    }
}
