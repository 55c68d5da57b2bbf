// crates/db/src/queries/mod.rs
// Coordinator and reconciler operations on the docwright SQLite database.

pub(crate) mod row_types;
pub(crate) mod documents;
mod jobs;
mod metrics;
mod types;

pub use types::*;
