//! greendata: confidential energy records on an FHE-enabled ledger
//!
//! Facade over the workspace crates:
//! - [`greendata_core`]: records, drafts, tax policy, queries, configuration
//! - [`greendata_client`]: crypto gateway, ledger adapters, repository, lifecycle

pub use greendata_client;
pub use greendata_core;

pub use greendata_client::{
    ClientError, CryptoGateway, InMemoryLedger, LedgerClient, LifecycleController, LocalFhe,
    LocalKms, RevealOutcome, StatusKind,
};
pub use greendata_core::{ClientConfig, PendingDraft, Record, RecordId, Verification};
