pub mod backend;
pub mod goals;
pub mod hits;
pub mod lookup;
pub mod query;
pub mod schema;
pub mod sessions;
pub mod store_impl;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `pageflow_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
