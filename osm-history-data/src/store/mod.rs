//! SQLite database set-up for imported history.
//!
//! Exposes [`open_store`] to create or reopen the target database and
//! [`initialise_schema`] to apply the history tables. Both are safe to call
//! on an already initialised database.

mod open;
mod schema;

pub use open::{OpenStoreError, open_store};
pub use schema::{SCHEMA_VERSION, SchemaError, initialise_schema};
