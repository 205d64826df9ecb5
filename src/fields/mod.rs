//! Fields map implementation.
//!
//! One table per indexed field maps each field value to the set of documents
//! holding it. Tables are kept in memory, made durable through a commit journal,
//! and periodically checkpointed to a snapshot file.

mod map;
mod snapshot;

pub use map::{
    fields_map_name, FieldsMap, IndexConfig, IndexEdit, Table, Tables, Transaction,
    FIELDS_MAP_PREFIX,
};
