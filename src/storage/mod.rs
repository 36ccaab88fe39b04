//! Local persistence backends.
//!
//! - [`sql::SqlStore`]: SQLite file, survives process restarts
//! - [`memory::InMemoryStore`]: DashMap, for tests and throwaway sessions

pub mod traits;
pub mod memory;
pub mod sql;
