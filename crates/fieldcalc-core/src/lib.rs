//! # fieldcalc-core
//!
//! Core data structures for the fieldcalc formula engine.
//!
//! This crate provides the fundamental types shared by the formula compiler and
//! the recalculation engine:
//! - [`Value`] and [`ErrorKind`] - the typed values flowing through evaluation
//! - [`FieldId`], [`RecordId`], [`TableId`] - opaque identifiers
//! - [`Schema`] - tables and fields, with name resolution via [`FieldResolver`]
//! - [`RecordStore`] - the capability the engine uses to read records and links
//!
//! ## Example
//!
//! ```rust
//! use fieldcalc_core::{FieldKind, MemoryStore, RecordStore, Schema, Value};
//!
//! let mut schema = Schema::new();
//! let orders = schema.add_table("Orders");
//! let price = schema.add_field(orders, "Price", FieldKind::Plain).unwrap();
//!
//! let mut store = MemoryStore::new();
//! let rec = store.add_record(orders);
//! store.set_value(rec, price, Value::from(12));
//! assert_eq!(store.field_value(rec, price), Value::from(12));
//! ```

pub mod error;
pub mod id;
pub mod schema;
pub mod store;
pub mod value;

pub use error::{Error, Result};
pub use id::{FieldId, RecordId, TableId};
pub use schema::{FieldDef, FieldKind, FieldResolver, Schema, TableResolver};
pub use store::{MemoryStore, RecordStore};
pub use value::{ErrorKind, Value};

/// Maximum length of a field name
pub const MAX_FIELD_NAME_LEN: usize = 255;
