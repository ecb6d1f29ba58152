//! Ledger client implementations.

pub mod disabled;
pub mod encoding;
pub mod evm;
pub mod signer;

pub use disabled::DisabledLedgerClient;
pub use evm::{EvmClientConfig, EvmLedgerClient};
pub use signer::LocalSigner;
