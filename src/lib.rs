//! Barter Notary
//!
//! Completes peer-to-peer barter trades and accepts ratings between trade
//! parties, notarizing both on an EVM ledger. The relational store is the
//! source of truth; the ledger is an append-only audit record.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   API Layer                  │
//! │     HTTP handlers, routing, rate limiting    │
//! ├─────────────────────────────────────────────┤
//! │               Application Layer              │
//! │  Trade/rating orchestrators, proof worker    │
//! ├─────────────────────────────────────────────┤
//! │                 Domain Layer                 │
//! │         Traits, types, error hierarchy       │
//! ├─────────────────────────────────────────────┤
//! │             Infrastructure Layer             │
//! │   PostgreSQL store, EVM JSON-RPC ledger      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! A completion or rating is committed to the store first. The ledger write
//! follows; its outcome is persisted as a proof status on the row, and rows
//! without a confirmed proof are retried by the reconciliation worker.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use barter_notary::api::create_router;
//! use barter_notary::app::AppState;
//! use barter_notary::infra::{EvmLedgerClient, LocalSigner, PostgresClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db = Arc::new(PostgresClient::with_defaults(&database_url).await?);
//!     let signer = Arc::new(LocalSigner::new(private_key)?);
//!     let ledger = Arc::new(EvmLedgerClient::with_defaults(&rpc_url, &contract, signer)?);
//!
//!     let state = Arc::new(AppState::new(db, ledger));
//!     let router = create_router(state);
//!     axum::serve(listener, router).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod infra;

// Test utilities are available in tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
