//! Infrastructure layer implementations.

pub mod blockchain;
pub mod database;
pub mod observability;

pub use blockchain::{DisabledLedgerClient, EvmClientConfig, EvmLedgerClient, LocalSigner};
pub use database::{PostgresClient, PostgresConfig};
