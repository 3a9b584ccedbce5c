//! greendata-client: Confidential record lifecycle client
//!
//! Drives a record from encrypted submission to verified disclosure:
//!
//! ```text
//! create:  validate -> encrypt -> submit -> await confirmation -> refresh
//! reveal:  re-fetch -> (verified? return) -> decrypt + proof -> anchor on ledger -> refresh
//! ```
//!
//! The [`LifecycleController`] is the only component that changes a
//! record's lifecycle state. It talks to the ledger through
//! [`LedgerClient`] and to the FHE capability through [`CryptoGateway`],
//! and keeps the [`RecordRepository`] in step with the ledger. Progress is
//! published as typed events on the [`StatusReporter`].

pub mod crypto;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod repository;
pub mod status;

pub use crypto::{
    CryptoError, CryptoGateway, FheCapability, LocalFhe, LocalKms, RelayerCapability,
};
pub use error::ClientError;
pub use ledger::{
    DisclosureVerifier, EvmLedger, InMemoryLedger, LedgerClient, LedgerError, TxOutcome,
};
pub use lifecycle::{
    CreateReceipt, LifecycleController, OperationKind, OperationPhase, RevealOutcome,
};
pub use repository::{ProvisionalDisclosure, RecordRepository, RefreshSummary, RepositorySnapshot};
pub use status::{StatusBoard, StatusEvent, StatusKind, StatusReporter};
