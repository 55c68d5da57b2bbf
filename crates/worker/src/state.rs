// crates/worker/src/state.rs
//! Shared state handed to API handlers.

use std::time::Instant;

use docwright_db::Database;

pub struct AppState {
    pub db: Database,
    pub start_time: Instant,
    /// Default `max_attempts` for jobs created without an explicit value.
    pub default_max_attempts: u32,
}
