//! Tables, fields and field-name resolution

use crate::error::{Error, Result};
use crate::id::{FieldId, TableId};
use crate::MAX_FIELD_NAME_LEN;
use ahash::AHashMap;

/// What kind of data a field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldKind {
    /// Stored value (text, number, date, ...)
    Plain,
    /// Relationship to records of another table
    Link { target: TableId },
    /// Computed by a formula
    Formula,
}

/// A field definition
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldDef {
    pub id: FieldId,
    pub table: TableId,
    pub name: String,
    pub kind: FieldKind,
}

/// Resolves field names used in formula source to field ids.
///
/// A resolver is scoped to the table that owns the formula being compiled.
/// It is passed explicitly to the compiler; there is no global field registry.
pub trait FieldResolver {
    /// Resolve a field name in the formula's own table
    fn resolve(&self, name: &str) -> Option<FieldId>;

    /// Whether `field` is a link field
    fn is_link(&self, field: FieldId) -> bool;

    /// Resolve a field name in the table targeted by link field `link`
    fn resolve_linked(&self, link: FieldId, name: &str) -> Option<FieldId>;

    /// Name of any known field, used when printing formulas back to source
    fn field_name(&self, field: FieldId) -> Option<&str>;
}

/// In-memory schema of tables and fields
///
/// Field ids are allocated in creation order.
#[derive(Debug, Default, Clone)]
pub struct Schema {
    tables: Vec<(TableId, String)>,
    fields: Vec<FieldDef>,
    by_id: AHashMap<FieldId, usize>,
    next_field: u64,
}

impl Schema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table
    pub fn add_table(&mut self, name: &str) -> TableId {
        let id = TableId(self.tables.len() as u32);
        self.tables.push((id, name.to_string()));
        id
    }

    /// Name of a table
    pub fn table_name(&self, table: TableId) -> Option<&str> {
        self.tables
            .iter()
            .find(|(id, _)| *id == table)
            .map(|(_, name)| name.as_str())
    }

    /// Add a field to a table
    pub fn add_field(&mut self, table: TableId, name: &str, kind: FieldKind) -> Result<FieldId> {
        if self.table_name(table).is_none() {
            return Err(Error::UnknownTable(table));
        }
        if let FieldKind::Link { target } = kind {
            if self.table_name(target).is_none() {
                return Err(Error::UnknownTable(target));
            }
        }

        let name = name.trim();
        if name.is_empty() || name.len() > MAX_FIELD_NAME_LEN {
            return Err(Error::InvalidFieldName(name.to_string()));
        }
        if self.field_by_name(table, name).is_some() {
            return Err(Error::DuplicateFieldName {
                table,
                name: name.to_string(),
            });
        }

        let id = FieldId(self.next_field);
        self.next_field += 1;
        self.by_id.insert(id, self.fields.len());
        self.fields.push(FieldDef {
            id,
            table,
            name: name.to_string(),
            kind,
        });
        Ok(id)
    }

    /// Look up a field definition
    pub fn field(&self, id: FieldId) -> Option<&FieldDef> {
        self.by_id.get(&id).map(|&idx| &self.fields[idx])
    }

    /// Look up a field by name within a table
    pub fn field_by_name(&self, table: TableId, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.table == table && f.name == name)
    }

    /// All fields of a table, in creation order
    pub fn fields_in(&self, table: TableId) -> impl Iterator<Item = &FieldDef> + '_ {
        self.fields.iter().filter(move |f| f.table == table)
    }

    /// Ids of all fields, in creation order
    pub fn field_ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.fields.iter().map(|f| f.id)
    }

    /// Whether the field is computed by a formula
    pub fn is_formula(&self, id: FieldId) -> bool {
        matches!(self.field(id), Some(f) if f.kind == FieldKind::Formula)
    }

    /// Name resolver scoped to `table`
    pub fn resolver(&self, table: TableId) -> TableResolver<'_> {
        TableResolver {
            schema: self,
            table,
        }
    }
}

/// [`FieldResolver`] over a [`Schema`], scoped to one table
#[derive(Debug, Clone, Copy)]
pub struct TableResolver<'a> {
    schema: &'a Schema,
    table: TableId,
}

impl<'a> TableResolver<'a> {
    /// The table names are resolved in
    pub fn table(&self) -> TableId {
        self.table
    }
}

impl FieldResolver for TableResolver<'_> {
    fn resolve(&self, name: &str) -> Option<FieldId> {
        self.schema.field_by_name(self.table, name).map(|f| f.id)
    }

    fn is_link(&self, field: FieldId) -> bool {
        matches!(
            self.schema.field(field).map(|f| f.kind),
            Some(FieldKind::Link { .. })
        )
    }

    fn resolve_linked(&self, link: FieldId, name: &str) -> Option<FieldId> {
        match self.schema.field(link)?.kind {
            FieldKind::Link { target } => self.schema.field_by_name(target, name).map(|f| f.id),
            _ => None,
        }
    }

    fn field_name(&self, field: FieldId) -> Option<&str> {
        self.schema.field(field).map(|f| f.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_and_resolve() {
        let mut schema = Schema::new();
        let people = schema.add_table("People");
        let first = schema.add_field(people, "First", FieldKind::Plain).unwrap();
        let last = schema.add_field(people, "Last", FieldKind::Plain).unwrap();

        let resolver = schema.resolver(people);
        assert_eq!(resolver.resolve("First"), Some(first));
        assert_eq!(resolver.resolve("Last"), Some(last));
        assert_eq!(resolver.resolve("Middle"), None);
        assert_eq!(resolver.field_name(last), Some("Last"));
        assert!(first < last);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut schema = Schema::new();
        let t = schema.add_table("T");
        schema.add_field(t, "A", FieldKind::Plain).unwrap();
        assert_eq!(
            schema.add_field(t, " A ", FieldKind::Plain),
            Err(Error::DuplicateFieldName {
                table: t,
                name: "A".into()
            })
        );
        assert!(schema.add_field(t, "  ", FieldKind::Plain).is_err());
    }

    #[test]
    fn test_linked_resolution() {
        let mut schema = Schema::new();
        let customers = schema.add_table("Customers");
        let orders = schema.add_table("Orders");
        let amount = schema.add_field(orders, "Amount", FieldKind::Plain).unwrap();
        let link = schema
            .add_field(customers, "Orders", FieldKind::Link { target: orders })
            .unwrap();
        let name = schema.add_field(customers, "Name", FieldKind::Plain).unwrap();

        let resolver = schema.resolver(customers);
        assert!(resolver.is_link(link));
        assert!(!resolver.is_link(name));
        assert_eq!(resolver.resolve_linked(link, "Amount"), Some(amount));
        assert_eq!(resolver.resolve_linked(name, "Amount"), None);
        // Remote fields are not visible unqualified
        assert_eq!(resolver.resolve("Amount"), None);
    }
}
