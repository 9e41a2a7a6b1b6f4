//! Recompute planning
//!
//! A change to one stored field fans out to the formula fields reading it on
//! the same record and, through link fields, to formula fields on the records
//! linking to it. The plan lists every affected (record, field) pair so that
//! each pair comes after everything it reads.

use crate::calculation::SchemaState;
use ahash::{AHashMap, AHashSet};
use fieldcalc_core::{FieldId, RecordId, RecordStore};
use fieldcalc_formula::{EdgeKind, FormulaError, FormulaResult, LimitKind};
use std::collections::VecDeque;

/// Affected (record, field) pairs in evaluation order
pub(crate) fn plan_batch<S: RecordStore>(
    state: &SchemaState,
    store: &S,
    record: RecordId,
    field: FieldId,
    max_batch_size: usize,
) -> FormulaResult<Vec<(RecordId, FieldId)>> {
    let mut items = Vec::new();
    let mut seen = AHashSet::new();
    let mut queue = VecDeque::from([(record, field)]);

    while let Some((source_record, source_field)) = queue.pop_front() {
        for (dependent, kind) in state.graph.get_dependents(source_field) {
            if !state.graph.is_formula(dependent) {
                continue;
            }
            let targets = match kind {
                EdgeKind::Direct => vec![source_record],
                EdgeKind::Via(link) => store.records_linking_to(link, source_record),
            };
            for target in targets {
                if seen.insert((target, dependent)) {
                    items.push((target, dependent));
                    queue.push_back((target, dependent));
                    if items.len() > max_batch_size {
                        return Err(FormulaError::LimitExceeded {
                            limit: LimitKind::BatchSize,
                            max: max_batch_size,
                            actual: items.len(),
                        });
                    }
                }
            }
        }
    }

    order_items(state, items)
}

/// Sort pairs by the topological rank of their field, then by record.
///
/// Two pairs of the same field never depend on each other, so ranking by
/// field is enough.
pub(crate) fn order_items(
    state: &SchemaState,
    mut items: Vec<(RecordId, FieldId)>,
) -> FormulaResult<Vec<(RecordId, FieldId)>> {
    let fields: AHashSet<FieldId> = items.iter().map(|(_, f)| *f).collect();
    let rank: AHashMap<FieldId, usize> = state
        .graph
        .topological_order(fields)?
        .into_iter()
        .enumerate()
        .map(|(idx, field)| (field, idx))
        .collect();

    items.sort_by_key(|(record, field)| (rank.get(field).copied().unwrap_or(usize::MAX), *record));
    Ok(items)
}
