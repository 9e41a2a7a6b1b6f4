//! Formula calculation engine
//!
//! Owns the schema-level formula state (compiled formulas and the dependency
//! graph), the value cache and the record store, and keeps computed values
//! up to date as stored values change.
//!
//! # Example
//!
//! ```rust
//! use fieldcalc::prelude::*;
//!
//! let mut schema = Schema::new();
//! let items = schema.add_table("Items");
//! let a = schema.add_field(items, "A", FieldKind::Plain).unwrap();
//! let b = schema.add_field(items, "B", FieldKind::Plain).unwrap();
//! let c = schema.add_field(items, "C", FieldKind::Formula).unwrap();
//!
//! let mut store = MemoryStore::new();
//! let rec = store.add_record(items);
//! store.set_value(rec, a, Value::from(1));
//! store.set_value(rec, b, Value::from(2));
//!
//! let mut engine = FormulaEngine::new(schema, store);
//! engine.define_formula(c, "{A} + {B}").unwrap();
//! assert_eq!(engine.read_value(rec, c), Value::from(3));
//!
//! engine.store_mut().set_value(rec, a, Value::from(5));
//! let batch = engine.on_field_changed(rec, a, Value::from(5)).unwrap();
//! assert_eq!(batch.for_record(rec), vec![(c, Value::from(7))]);
//! ```

use crate::cache::ValueCache;
use crate::scheduler::{order_items, plan_batch};
use crate::view::{ReadMode, Resolver};
use ahash::AHashMap;
use chrono::{NaiveDateTime, Utc};
use fieldcalc_core::{FieldId, FieldKind, RecordId, RecordStore, Schema, TableId, Value};
use fieldcalc_formula::{
    compile_with_limits, CompileLimits, CompiledFormula, DependencyDiff, DependencyGraph,
    FormulaError, FormulaResult, LimitKind, Reference,
};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, trace, warn};

/// Options for formula calculation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalculationOptions {
    /// Bounds applied when compiling formulas
    pub limits: CompileLimits,
    /// Maximum number of (record, field) pairs in one recompute batch
    /// (default: 100_000)
    pub max_batch_size: usize,
    /// Recompute independent records on worker threads (needs the
    /// `parallel` feature)
    pub parallel: bool,
    /// Fixed time seen by NOW and TODAY; `None` reads the system clock once
    /// per batch
    pub now: Option<NaiveDateTime>,
}

impl Default for CalculationOptions {
    fn default() -> Self {
        Self {
            limits: CompileLimits::default(),
            max_batch_size: 100_000,
            parallel: true,
            now: None,
        }
    }
}

/// One recomputed formula value
#[derive(Debug, Clone, PartialEq)]
pub struct RecomputedValue {
    pub record: RecordId,
    pub field: FieldId,
    pub value: Value,
}

/// Result of a recompute, in evaluation order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecomputeBatch {
    pub entries: Vec<RecomputedValue>,
}

impl RecomputeBatch {
    /// Recomputed (field, value) pairs of one record
    pub fn for_record(&self, record: RecordId) -> Vec<(FieldId, Value)> {
        self.entries
            .iter()
            .filter(|entry| entry.record == record)
            .map(|entry| (entry.field, entry.value.clone()))
            .collect()
    }

    /// Number of recomputed values
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `field` of `record` was recomputed
    pub fn contains(&self, record: RecordId, field: FieldId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.record == record && entry.field == field)
    }
}

/// Schema-level formula state, guarded by a single lock
#[derive(Debug, Default)]
pub(crate) struct SchemaState {
    pub(crate) schema: Schema,
    pub(crate) graph: DependencyGraph,
    pub(crate) formulas: AHashMap<FieldId, CompiledFormula>,
}

impl SchemaState {
    pub(crate) fn formula(&self, field: FieldId) -> Option<&CompiledFormula> {
        self.formulas.get(&field)
    }

    /// Registered formula fields of a table, dependencies first
    fn table_formulas(&self, table: TableId) -> FormulaResult<Vec<FieldId>> {
        let fields: Vec<FieldId> = self
            .schema
            .fields_in(table)
            .map(|def| def.id)
            .filter(|id| self.formulas.contains_key(id))
            .collect();
        self.graph.topological_order(fields)
    }
}

/// The calculation engine
pub struct FormulaEngine<S: RecordStore> {
    state: RwLock<SchemaState>,
    cache: ValueCache,
    options: CalculationOptions,
    store: S,
}

impl<S: RecordStore> FormulaEngine<S> {
    /// Create an engine with default options
    pub fn new(schema: Schema, store: S) -> Self {
        Self::with_options(schema, store, CalculationOptions::default())
    }

    /// Create an engine with custom options
    pub fn with_options(schema: Schema, store: S, options: CalculationOptions) -> Self {
        let mut graph = DependencyGraph::new();
        for id in schema.field_ids() {
            graph.register_field(id);
        }
        Self {
            state: RwLock::new(SchemaState {
                schema,
                graph,
                formulas: AHashMap::new(),
            }),
            cache: ValueCache::new(),
            options,
            store,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SchemaState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SchemaState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> NaiveDateTime {
        self.options.now.unwrap_or_else(|| Utc::now().naive_utc())
    }

    /// Calculation options
    pub fn options(&self) -> &CalculationOptions {
        &self.options
    }

    /// The record store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the record store.
    ///
    /// Report every stored-value change through
    /// [`on_field_changed`](Self::on_field_changed) afterwards.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// The value cache
    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    /// Run `f` with read access to the schema
    pub fn with_schema<R>(&self, f: impl FnOnce(&Schema) -> R) -> R {
        f(&self.read_state().schema)
    }

    /// Add a field to the schema
    pub fn add_field(
        &self,
        table: TableId,
        name: &str,
        kind: FieldKind,
    ) -> fieldcalc_core::Result<FieldId> {
        let mut state = self.write_state();
        let id = state.schema.add_field(table, name, kind)?;
        state.graph.register_field(id);
        info!(%id, name, "added field");
        Ok(id)
    }

    /// Compile formula source against the fields of `table`
    pub fn compile(&self, table: TableId, source: &str) -> FormulaResult<CompiledFormula> {
        let state = self.read_state();
        compile_with_limits(source, &state.schema.resolver(table), &self.options.limits)
    }

    /// Register (or replace) the formula of a formula field.
    ///
    /// A formula that would make the field read itself, directly or through
    /// other formulas, is rejected with [`FormulaError::CircularDependency`]
    /// and nothing changes. On success the cached values of the field and of
    /// everything downstream are dropped.
    pub fn add_or_update_formula_field(
        &self,
        field: FieldId,
        compiled: CompiledFormula,
    ) -> FormulaResult<DependencyDiff> {
        let mut state = self.write_state();
        if !state.schema.is_formula(field) {
            return Err(FormulaError::UnknownFormulaField(field));
        }
        let table = state
            .schema
            .field(field)
            .map(|def| def.table)
            .ok_or(FormulaError::UnknownFormulaField(field))?;
        if let Err(err) = check_references(&state.schema, table, &compiled) {
            warn!(%field, source = %compiled.source, "rejected formula: {err}");
            return Err(err);
        }

        let diff = match state.graph.set_dependencies(field, &compiled.references) {
            Ok(diff) => diff,
            Err(err) => {
                warn!(%field, source = %compiled.source, "rejected formula: {err}");
                return Err(err);
            }
        };

        info!(
            %field,
            source = %compiled.source,
            added = diff.added.len(),
            removed = diff.removed.len(),
            "registered formula"
        );
        state.formulas.insert(field, compiled);

        let mut stale = state.graph.transitive_dependents(&[field]);
        stale.insert(field);
        self.cache.invalidate_fields(stale);

        Ok(diff)
    }

    /// Compile `source` for a formula field and register it
    pub fn define_formula(&self, field: FieldId, source: &str) -> FormulaResult<DependencyDiff> {
        let table = self
            .read_state()
            .schema
            .field(field)
            .map(|def| def.table)
            .ok_or(FormulaError::UnknownFormulaField(field))?;
        let compiled = self.compile(table, source)?;
        self.add_or_update_formula_field(field, compiled)
    }

    /// Unregister a field's formula.
    ///
    /// Returns the formula fields that still read it; they now see the
    /// field's stored value.
    pub fn remove_formula_field(&self, field: FieldId) -> FormulaResult<Vec<FieldId>> {
        let mut state = self.write_state();
        if state.formulas.remove(&field).is_none() {
            return Err(FormulaError::UnknownFormulaField(field));
        }

        let mut stale = state.graph.transitive_dependents(&[field]);
        let readers = state.graph.remove_field(field);
        stale.insert(field);
        self.cache.invalidate_fields(stale);

        info!(%field, readers = readers.len(), "removed formula");
        Ok(readers)
    }

    /// Compiled formula of a field
    pub fn formula(&self, field: FieldId) -> Option<CompiledFormula> {
        self.read_state().formula(field).cloned()
    }

    /// Formula fields in creation order
    pub fn formula_fields(&self) -> Vec<FieldId> {
        self.read_state().graph.formula_fields()
    }

    /// Evaluate a compiled formula against a record, reading other formula
    /// fields from the cache
    pub fn evaluate(&self, compiled: &CompiledFormula, record: RecordId) -> Value {
        let state = self.read_state();
        let resolver = Resolver::new(&self.store, &state, &self.cache, ReadMode::Cached, self.now());
        resolver.compute(record, compiled)
    }

    /// Current value of a field: stored value, or the cached formula value
    /// (computed on a miss)
    pub fn read_value(&self, record: RecordId, field: FieldId) -> Value {
        let state = self.read_state();
        Resolver::new(&self.store, &state, &self.cache, ReadMode::Cached, self.now())
            .value_of(record, field)
    }

    /// Current value of a field, recomputing every formula it depends on
    /// instead of trusting the cache
    pub fn read_fresh_value(&self, record: RecordId, field: FieldId) -> Value {
        let state = self.read_state();
        Resolver::new(&self.store, &state, &self.cache, ReadMode::Fresh, self.now())
            .value_of(record, field)
    }

    /// Drop a cached value so the next read recomputes it
    pub fn invalidate(&self, record: RecordId, field: FieldId) {
        self.cache.invalidate(record, field);
    }

    /// Recompute everything downstream of a stored-value change.
    ///
    /// `new_value` is the value `field` now holds on `record`; formulas in
    /// the batch read it even if the store has not caught up yet. Formula
    /// fields on other records that read `field` through a link are part of
    /// the same batch.
    pub fn on_field_changed(
        &self,
        record: RecordId,
        field: FieldId,
        new_value: Value,
    ) -> FormulaResult<RecomputeBatch> {
        let state = self.read_state();
        if state.formulas.contains_key(&field) {
            return Err(FormulaError::NotASourceField(field));
        }

        let plan = plan_batch(&state, &self.store, record, field, self.options.max_batch_size)?;

        let resolver = Resolver::new(&self.store, &state, &self.cache, ReadMode::Cached, self.now());
        resolver.settle(record, field, new_value);

        let batch = self.run(&state, &resolver, plan);
        debug!(%record, %field, recomputed = batch.len(), "recompute batch finished");
        Ok(batch)
    }

    /// Recompute every formula field of one record
    pub fn recompute_record(&self, table: TableId, record: RecordId) -> FormulaResult<RecomputeBatch> {
        let state = self.read_state();
        let fields = state.table_formulas(table)?;
        self.check_batch_size(fields.len())?;
        Ok(self.recompute_with(&state, &fields, record))
    }

    /// Recompute every formula field of several records of one table.
    ///
    /// Records are independent batches and run in parallel when enabled.
    pub fn recompute_records(
        &self,
        table: TableId,
        records: &[RecordId],
    ) -> FormulaResult<RecomputeBatch>
    where
        S: Sync,
    {
        let state = self.read_state();
        let fields = state.table_formulas(table)?;
        self.check_batch_size(fields.len().saturating_mul(records.len()))?;

        let batches = self.recompute_each(&state, &fields, records);
        let entries = batches.into_iter().flat_map(|b| b.entries).collect();
        let batch = RecomputeBatch { entries };
        debug!(%table, records = records.len(), recomputed = batch.len(), "recomputed records");
        Ok(batch)
    }

    #[cfg(feature = "parallel")]
    fn recompute_each(
        &self,
        state: &SchemaState,
        fields: &[FieldId],
        records: &[RecordId],
    ) -> Vec<RecomputeBatch>
    where
        S: Sync,
    {
        use rayon::prelude::*;

        if self.options.parallel {
            records
                .par_iter()
                .map(|&record| self.recompute_with(state, fields, record))
                .collect()
        } else {
            records
                .iter()
                .map(|&record| self.recompute_with(state, fields, record))
                .collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn recompute_each(
        &self,
        state: &SchemaState,
        fields: &[FieldId],
        records: &[RecordId],
    ) -> Vec<RecomputeBatch> {
        records
            .iter()
            .map(|&record| self.recompute_with(state, fields, record))
            .collect()
    }

    fn check_batch_size(&self, actual: usize) -> FormulaResult<()> {
        if actual > self.options.max_batch_size {
            return Err(FormulaError::LimitExceeded {
                limit: LimitKind::BatchSize,
                max: self.options.max_batch_size,
                actual,
            });
        }
        Ok(())
    }

    fn recompute_with(
        &self,
        state: &SchemaState,
        fields: &[FieldId],
        record: RecordId,
    ) -> RecomputeBatch {
        let resolver = Resolver::new(&self.store, state, &self.cache, ReadMode::Cached, self.now());
        let plan = fields.iter().map(|&field| (record, field)).collect();
        self.run(state, &resolver, plan)
    }

    /// Evaluate planned pairs in order, settling each result for later reads
    fn run(
        &self,
        state: &SchemaState,
        resolver: &Resolver<'_, S>,
        plan: Vec<(RecordId, FieldId)>,
    ) -> RecomputeBatch {
        let mut entries = Vec::with_capacity(plan.len());
        for (record, field) in plan {
            let Some(formula) = state.formula(field) else {
                continue;
            };
            let value = resolver.compute(record, formula);
            trace!(%record, %field, %value, "evaluated");

            resolver.settle(record, field, value.clone());
            self.cache.insert(record, field, value.clone());
            entries.push(RecomputedValue {
                record,
                field,
                value,
            });
        }
        RecomputeBatch { entries }
    }

    /// Re-order arbitrary (record, field) pairs for evaluation
    pub fn evaluation_order(
        &self,
        items: Vec<(RecordId, FieldId)>,
    ) -> FormulaResult<Vec<(RecordId, FieldId)>> {
        order_items(&self.read_state(), items)
    }
}

/// Every field a formula reads must belong to the formula's own table, or be
/// read through one of its link fields from that link's target table.
fn check_references(
    schema: &Schema,
    table: TableId,
    compiled: &CompiledFormula,
) -> FormulaResult<()> {
    let owned_by = |field: FieldId, owner: TableId| {
        if schema.field(field).map(|def| def.table) == Some(owner) {
            Ok(())
        } else {
            Err(FormulaError::ForeignField {
                field,
                table: owner,
            })
        }
    };

    for reference in &compiled.references {
        match *reference {
            Reference::Field(read) => owned_by(read, table)?,
            Reference::Linked { link, field } => {
                owned_by(link, table)?;
                match schema.field(link).map(|def| &def.kind) {
                    Some(FieldKind::Link { target }) => owned_by(field, *target)?,
                    _ => return Err(FormulaError::ForeignField { field: link, table }),
                }
            }
        }
    }
    Ok(())
}
