//! Persisted results: CSV rendering and the per-run results file.

pub mod generator;
pub mod store;

pub use generator::generate_console_summary;
pub use store::{CsvStore, OutcomeStore};
