//! Adapters that live inside the domain crate: the process-local store, its
//! baseline dataset and the mock repository built on them.
//!
//! The SQLite repository lives in its own crate.

pub mod memory_store;
pub mod mock_repo;
pub mod seed;
