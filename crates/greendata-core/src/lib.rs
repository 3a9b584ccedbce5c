//! greendata-core: Domain types for confidential energy records
//!
//! A facility submits its energy consumption encrypted client-side. The
//! ledger keeps the ciphertext handle next to a few plaintext fields that
//! anyone can read, and the consumption can later be disclosed through an
//! on-chain proof check.
//!
//! # Trust Model
//!
//! | Field | Source | Trusted as |
//! |-------|--------|------------|
//! | `ciphertext` | set once at creation | opaque reference |
//! | `public_value1` (declared consumption) | submitter | advisory |
//! | `public_value2` (carbon tax) | computed client-side | advisory |
//! | `verification` | ledger, after proof check | authoritative |
//! | provisional plaintext | local decryption + anchored proof | local only |
//!
//! The two public values are never bound to the ciphertext. Only a
//! `Verified` record carries a plaintext the ledger has checked.
//!
//! This crate is pure: no I/O, no async. The query functions in [`query`]
//! are plain functions over a slice of records.

pub mod abi;
mod config;
mod draft;
mod error;
mod policy;
pub mod query;
mod record;

pub use config::{ClientConfig, StatusTimeouts, DEFAULT_PAGE_SIZE, DEFAULT_TAX_RATE};
pub use draft::{PendingDraft, ValidDraft};
pub use error::Error;
pub use policy::{ImpactEstimate, TaxPolicy};
pub use query::{clamp_page, page_count, paginate, search, stats, EnergyStats};
pub use record::{
    derive_record_id, CiphertextHandle, DisclosureProof, DisplayValue, Record, RecordId,
    Verification,
};

pub type Result<T> = std::result::Result<T, Error>;

/// 20-byte account or contract address
pub use alloy_primitives::Address;

/// 32-byte transaction hash
pub use alloy_primitives::TxHash;

/// Constants shared by the client and the ledger adapters
pub mod constants {
    /// Seconds in the trailing window used for "recent uploads"
    pub const RECENT_WINDOW_SECS: u64 = 60 * 60 * 24 * 7;

    /// Largest consumption value the ledger can hold (euint32)
    pub const MAX_CONSUMPTION: u64 = u32::MAX as u64;

    /// Prefix of every record id
    pub const RECORD_ID_PREFIX: &str = "energy";
}
