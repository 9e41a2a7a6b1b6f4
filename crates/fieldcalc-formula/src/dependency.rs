//! Dependency extraction and tracking for formula recalculation

use crate::ast::FormulaExpr;
use crate::error::{FormulaError, FormulaResult};
use crate::functions;
use ahash::{AHashMap, AHashSet};
use fieldcalc_core::FieldId;
use std::collections::{BTreeSet, HashSet};

/// A field read by a formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Reference {
    /// Field of the same record
    Field(FieldId),
    /// Field of the records reached through link field `link`
    Linked { link: FieldId, field: FieldId },
}

/// Collect every field reference in the tree
pub fn extract_references(expr: &FormulaExpr) -> BTreeSet<Reference> {
    let mut refs = BTreeSet::new();
    expr.walk(&mut |node| match node {
        FormulaExpr::FieldRef(id) => {
            refs.insert(Reference::Field(*id));
        }
        FormulaExpr::LinkedFieldRef { link, field } => {
            refs.insert(Reference::Linked {
                link: *link,
                field: *field,
            });
        }
        _ => {}
    });
    refs
}

/// Field ids a set of references reads; a link traversal reads both the link
/// field and the remote field
pub fn flatten_references(refs: &BTreeSet<Reference>) -> BTreeSet<FieldId> {
    let mut ids = BTreeSet::new();
    for reference in refs {
        match *reference {
            Reference::Field(id) => {
                ids.insert(id);
            }
            Reference::Linked { link, field } => {
                ids.insert(link);
                ids.insert(field);
            }
        }
    }
    ids
}

/// Every field id the expression depends on
pub fn extract_dependencies(expr: &FormulaExpr) -> BTreeSet<FieldId> {
    flatten_references(&extract_references(expr))
}

/// Whether the expression calls a volatile function (NOW, TODAY)
pub fn contains_volatile_function(expr: &FormulaExpr) -> bool {
    let registry = functions::registry();
    let mut volatile = false;
    expr.walk(&mut |node| {
        if let FormulaExpr::Call { name, .. } = node {
            volatile |= registry.get(name).map_or(false, |def| def.volatile);
        }
    });
    volatile
}

/// How a dependent formula reads one of its precedents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    /// Read on the same record
    Direct,
    /// Read on records reached through the given link field
    Via(FieldId),
}

/// Precedents added and removed by [`DependencyGraph::set_dependencies`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyDiff {
    pub added: Vec<FieldId>,
    pub removed: Vec<FieldId>,
}

type Edge = (FieldId, EdgeKind);

/// Dependency graph over field ids
///
/// An edge precedent → dependent means the dependent's formula reads the
/// precedent. The graph is kept acyclic: edits that would close a cycle are
/// rejected before anything is modified.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Field → fields that read it
    dependents: AHashMap<FieldId, AHashSet<Edge>>,
    /// Formula field → fields it reads
    precedents: AHashMap<FieldId, AHashSet<Edge>>,
    /// Fields with a registered formula
    formulas: AHashSet<FieldId>,
    /// Registration order, the deterministic tie-breaker
    order: AHashMap<FieldId, u64>,
    next_order: u64,
}

fn edges_for(refs: &BTreeSet<Reference>) -> BTreeSet<Edge> {
    let mut edges = BTreeSet::new();
    for reference in refs {
        match *reference {
            Reference::Field(id) => {
                edges.insert((id, EdgeKind::Direct));
            }
            Reference::Linked { link, field } => {
                edges.insert((link, EdgeKind::Direct));
                edges.insert((field, EdgeKind::Via(link)));
            }
        }
    }
    edges
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field so it gets a creation-order slot
    pub fn register_field(&mut self, field: FieldId) {
        if !self.order.contains_key(&field) {
            self.order.insert(field, self.next_order);
            self.next_order += 1;
        }
    }

    fn sort_key(&self, field: FieldId) -> (u64, FieldId) {
        (self.order.get(&field).copied().unwrap_or(u64::MAX), field)
    }

    fn sorted(&self, mut fields: Vec<FieldId>) -> Vec<FieldId> {
        fields.sort_by_key(|&f| self.sort_key(f));
        fields.dedup();
        fields
    }

    /// Replace the formula dependencies of `field`.
    ///
    /// Rejects the edit with [`FormulaError::CircularDependency`] if it would
    /// make `field` (transitively) read itself; the graph is unchanged in that
    /// case. The reported path starts at `field` and follows reads, e.g.
    /// `[C, A, B]` for C reads A, A reads B, B reads C.
    pub fn set_dependencies(
        &mut self,
        field: FieldId,
        refs: &BTreeSet<Reference>,
    ) -> FormulaResult<DependencyDiff> {
        let new_edges = edges_for(refs);
        let new_precedents: Vec<FieldId> =
            self.sorted(new_edges.iter().map(|(id, _)| *id).collect());

        if let Some(path) = self.find_cycle(field, &new_precedents) {
            return Err(FormulaError::CircularDependency { path });
        }

        self.register_field(field);
        for &precedent in &new_precedents {
            self.register_field(precedent);
        }

        let old_edges: AHashSet<Edge> = self.precedents.get(&field).cloned().unwrap_or_default();
        let old_precedents: HashSet<FieldId> = old_edges.iter().map(|(id, _)| *id).collect();

        // Remove stale edges
        for edge in old_edges.iter().filter(|e| !new_edges.contains(e)) {
            if let Some(deps) = self.dependents.get_mut(&edge.0) {
                deps.remove(&(field, edge.1));
                if deps.is_empty() {
                    self.dependents.remove(&edge.0);
                }
            }
        }

        // Add new edges
        for edge in new_edges.iter().filter(|e| !old_edges.contains(e)) {
            self.dependents
                .entry(edge.0)
                .or_default()
                .insert((field, edge.1));
        }

        let diff = DependencyDiff {
            added: new_precedents
                .iter()
                .copied()
                .filter(|p| !old_precedents.contains(p))
                .collect(),
            removed: self.sorted(
                old_precedents
                    .iter()
                    .copied()
                    .filter(|p| !new_precedents.contains(p))
                    .collect(),
            ),
        };

        self.precedents
            .insert(field, new_edges.into_iter().collect());
        self.formulas.insert(field);

        Ok(diff)
    }

    /// Search for a path from any new precedent back to `field` along reads
    fn find_cycle(&self, field: FieldId, new_precedents: &[FieldId]) -> Option<Vec<FieldId>> {
        let mut visited = AHashSet::new();

        for &start in new_precedents {
            if start == field {
                return Some(vec![field]);
            }

            if !visited.insert(start) {
                continue;
            }

            // Iterative DFS keeping the current path on the stack
            let mut path = vec![start];
            let mut pending = vec![self.precedent_fields(start)];

            while let Some(frontier) = pending.last_mut() {
                match frontier.pop() {
                    Some(next) if next == field => {
                        let mut cycle = vec![field];
                        cycle.extend(path);
                        return Some(cycle);
                    }
                    Some(next) => {
                        if visited.insert(next) {
                            path.push(next);
                            pending.push(self.precedent_fields(next));
                        }
                    }
                    None => {
                        pending.pop();
                        path.pop();
                    }
                }
            }
        }

        None
    }

    /// Precedent field ids, reversed so that popping yields creation order
    fn precedent_fields(&self, field: FieldId) -> Vec<FieldId> {
        let ids = self
            .precedents
            .get(&field)
            .map(|edges| edges.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default();
        let mut ids = self.sorted(ids);
        ids.reverse();
        ids
    }

    /// Remove a field's formula (and its outgoing reads).
    ///
    /// Returns the formula fields that still read `field`, in creation order.
    pub fn remove_field(&mut self, field: FieldId) -> Vec<FieldId> {
        if let Some(edges) = self.precedents.remove(&field) {
            for (precedent, kind) in edges {
                if let Some(deps) = self.dependents.get_mut(&precedent) {
                    deps.remove(&(field, kind));
                    if deps.is_empty() {
                        self.dependents.remove(&precedent);
                    }
                }
            }
        }
        self.formulas.remove(&field);

        self.sorted(
            self.dependents
                .get(&field)
                .map(|deps| deps.iter().map(|(id, _)| *id).collect())
                .unwrap_or_default(),
        )
    }

    /// Get fields that read the given field, and how
    pub fn get_dependents(&self, field: FieldId) -> Vec<(FieldId, EdgeKind)> {
        let mut edges: Vec<Edge> = self
            .dependents
            .get(&field)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        edges.sort_by_key(|&(id, kind)| (self.sort_key(id), kind));
        edges
    }

    /// Get fields the given formula field reads, and how
    pub fn get_precedents(&self, field: FieldId) -> Vec<(FieldId, EdgeKind)> {
        let mut edges: Vec<Edge> = self
            .precedents
            .get(&field)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        edges.sort_by_key(|&(id, kind)| (self.sort_key(id), kind));
        edges
    }

    /// Whether the field has a registered formula
    pub fn is_formula(&self, field: FieldId) -> bool {
        self.formulas.contains(&field)
    }

    /// All formula fields, in creation order
    pub fn formula_fields(&self) -> Vec<FieldId> {
        self.sorted(self.formulas.iter().copied().collect())
    }

    /// All formula fields that transitively read any of `changed`
    pub fn transitive_dependents(&self, changed: &[FieldId]) -> AHashSet<FieldId> {
        let mut affected = AHashSet::new();
        let mut stack: Vec<FieldId> = changed.to_vec();
        while let Some(field) = stack.pop() {
            if let Some(deps) = self.dependents.get(&field) {
                for &(dependent, _) in deps {
                    if affected.insert(dependent) {
                        stack.push(dependent);
                    }
                }
            }
        }
        affected
    }

    /// Get all formula fields that need recalculation when the given fields
    /// change, dependencies first
    pub fn get_recalc_order(&self, changed: &[FieldId]) -> FormulaResult<Vec<FieldId>> {
        self.topological_order(self.transitive_dependents(changed))
    }

    /// Order a set of fields so every field comes after the fields it reads
    /// (Kahn's algorithm). Ties are broken by creation order.
    pub fn topological_order(
        &self,
        fields: impl IntoIterator<Item = FieldId>,
    ) -> FormulaResult<Vec<FieldId>> {
        let subset: AHashSet<FieldId> = fields.into_iter().collect();

        let mut in_degree: AHashMap<FieldId, usize> = AHashMap::new();
        for &field in &subset {
            let count = self
                .precedents
                .get(&field)
                .map(|edges| {
                    edges
                        .iter()
                        .map(|(id, _)| *id)
                        .filter(|id| subset.contains(id))
                        .collect::<AHashSet<_>>()
                        .len()
                })
                .unwrap_or(0);
            in_degree.insert(field, count);
        }

        let mut ready: BTreeSet<(u64, FieldId)> = in_degree
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&field, _)| self.sort_key(field))
            .collect();

        let mut order = Vec::with_capacity(subset.len());
        while let Some(key) = ready.pop_first() {
            let field = key.1;
            order.push(field);

            let released: AHashSet<FieldId> = self
                .dependents
                .get(&field)
                .map(|deps| deps.iter().map(|(id, _)| *id).collect())
                .unwrap_or_default();
            for dependent in released {
                if let Some(count) = in_degree.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(self.sort_key(dependent));
                    }
                }
            }
        }

        if order.len() < subset.len() {
            let stuck = self.sorted(
                in_degree
                    .into_iter()
                    .filter(|(_, count)| *count > 0)
                    .map(|(field, _)| field)
                    .collect(),
            );
            return Err(FormulaError::CircularDependency { path: stuck });
        }

        Ok(order)
    }
}
