//! Concrete database client implementations.
//!
//! This module contains the PostgreSQL adapter implementing the
//! `DatabaseClient` trait defined in the domain layer.

pub mod postgres;

pub use postgres::{PostgresClient, PostgresConfig};
