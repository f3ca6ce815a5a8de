//! A declarative query execution engine for PostgreSQL.
//!
//! Parameterized SQL statements live in JSON definitions files, keyed by a
//! `(service, method)` identity. The [`engine::QueryStore`] loads them into
//! an immutable [`catalog::Catalog`], validates caller-supplied named
//! parameters against each definition, binds them with type-aware decoding,
//! executes against a bounded connection pool, and returns the result rows
//! as a JSON array of column-name to value objects.

pub mod auth;
pub mod bind;
pub mod catalog;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
