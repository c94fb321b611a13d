//! Phase State Storage
//!
//! Persists the active processing phase and an append-only execution log in
//! SQLite, safe under several processes writing the same file.

mod phase_store;
pub mod schema;

pub use phase_store::PhaseStateStore;
