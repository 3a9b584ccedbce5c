//! Ledger access: enumerate and read records, submit creations and reveals

mod evm;
mod memory;

pub use evm::EvmLedger;
pub use memory::{DisclosureVerifier, InMemoryLedger};

use async_trait::async_trait;
use greendata_core::{Address, CiphertextHandle, Record, RecordId, TxHash};
use thiserror::Error;

/// Revert reason the records contract uses for a second reveal
pub const ALREADY_VERIFIED_REASON: &str = "Data already verified";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("No signing identity connected")]
    Unauthenticated,

    #[error("Transaction rejected by user: {0}")]
    UserRejected(String),

    #[error("Record already verified")]
    AlreadyVerified,

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Rejected by ledger: {0}")]
    Rejected(String),

    #[error("Transaction {tx} reverted: {}", .reason.as_deref().unwrap_or("no reason"))]
    Reverted { tx: TxHash, reason: Option<String> },

    #[error("Timed out waiting for transaction {0}")]
    ConfirmationTimeout(TxHash),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Classify an error message returned by a node or signer
    pub fn from_rpc_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains(&ALREADY_VERIFIED_REASON.to_lowercase()) {
            LedgerError::AlreadyVerified
        } else if lower.contains("user rejected") || lower.contains("user denied") {
            LedgerError::UserRejected(message)
        } else if lower.contains("execution reverted") {
            LedgerError::Rejected(message)
        } else {
            LedgerError::Rpc(message)
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, LedgerError::UserRejected(_))
    }
}

/// Fields carried by a record creation transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSubmission {
    pub id: RecordId,
    pub name: String,
    pub ciphertext: CiphertextHandle,
    pub input_proof: Vec<u8>,
    pub public_value1: u64,
    pub public_value2: u64,
    pub description: String,
}

/// Fields carried by a reveal transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealSubmission {
    pub id: RecordId,
    pub abi_encoded_clear_values: Vec<u8>,
    pub decryption_proof: Vec<u8>,
}

/// A submitted transaction that has not settled yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTx {
    pub hash: TxHash,
}

/// Receipt of a confirmed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub tx: TxHash,
    pub block_number: Option<u64>,
}

/// Settlement result of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed(LedgerReceipt),
    Reverted { tx: TxHash, reason: Option<String> },
}

impl TxOutcome {
    /// Turn a revert into the matching error, keeping "already verified"
    /// distinguishable from other failures
    pub fn into_receipt(self) -> Result<LedgerReceipt, LedgerError> {
        match self {
            TxOutcome::Confirmed(receipt) => Ok(receipt),
            TxOutcome::Reverted { reason: Some(reason), .. }
                if reason.contains(ALREADY_VERIFIED_REASON) =>
            {
                Err(LedgerError::AlreadyVerified)
            }
            TxOutcome::Reverted { tx, reason } => Err(LedgerError::Reverted { tx, reason }),
        }
    }
}

/// Read and authenticated-write access to the record store.
///
/// Reads have no side effects and may run concurrently. Writes need a
/// signing identity and fail with [`LedgerError::Unauthenticated`] without
/// one.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address of the records contract, used as the encryption target
    fn contract_address(&self) -> Address;

    /// Connected signing identity, if any
    fn signer(&self) -> Option<Address>;

    async fn list_record_ids(&self) -> Result<Vec<RecordId>, LedgerError>;

    async fn get_record(&self, id: &RecordId) -> Result<Record, LedgerError>;

    /// Ciphertext handle of a record; adapters with a cheaper read override it
    async fn ciphertext_handle(&self, id: &RecordId) -> Result<CiphertextHandle, LedgerError> {
        Ok(self.get_record(id).await?.ciphertext)
    }

    async fn is_available(&self) -> Result<bool, LedgerError>;

    async fn submit_create(&self, submission: CreateSubmission) -> Result<PendingTx, LedgerError>;

    async fn submit_reveal(&self, submission: RevealSubmission) -> Result<PendingTx, LedgerError>;

    async fn await_confirmation(&self, pending: &PendingTx) -> Result<TxOutcome, LedgerError>;
}
