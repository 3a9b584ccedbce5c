//! Crypto gateway over an opaque FHE capability
//!
//! The capability encrypts integers for a target contract and produces
//! public decryptions with a disclosure proof. The gateway adds the
//! protocol around it: initialization gating, input range checks, and the
//! rule that clear values are only handed out after the proof has been
//! accepted by the ledger.

mod local;
mod relayer;

pub use local::{LocalFhe, LocalKms};
pub use relayer::RelayerCapability;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use greendata_core::abi::encode_clear_values;
use greendata_core::constants::MAX_CONSUMPTION;
use greendata_core::{Address, CiphertextHandle, DisclosureProof};
use thiserror::Error;

use crate::ledger::{LedgerError, LedgerReceipt};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("FHE capability not initialized")]
    NotInitialized,

    #[error("Encryption unavailable: {0}")]
    EncryptionUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Relayer error: {status} - {message}")]
    Relayer { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unknown ciphertext handle: {0}")]
    UnknownHandle(CiphertextHandle),

    #[error("Inconsistent decryption: {0}")]
    InconsistentDecryption(String),

    #[error("Value already disclosed on the ledger")]
    AlreadyDisclosed,

    #[error("Proof anchoring failed: {0}")]
    Anchoring(LedgerError),
}

impl From<reqwest::Error> for CryptoError {
    fn from(e: reqwest::Error) -> Self {
        CryptoError::Http(e.to_string())
    }
}

/// Ciphertext for a single value plus its proof of correct encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInput {
    pub handle: CiphertextHandle,
    pub input_proof: Vec<u8>,
}

/// Plaintext candidates for a set of handles and the proof binding them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicDecryption {
    pub clear_values: BTreeMap<CiphertextHandle, u64>,
    pub abi_encoded_clear_values: Vec<u8>,
    pub decryption_proof: Vec<u8>,
}

/// What `on_proof_ready` receives to anchor a disclosure on the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofSubmission {
    pub abi_encoded_clear_values: Vec<u8>,
    pub decryption_proof: Vec<u8>,
}

/// Clear values whose proof the ledger has accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealedValues {
    pub clear_values: BTreeMap<CiphertextHandle, u64>,
    pub proof: DisclosureProof,
    pub receipt: LedgerReceipt,
}

/// Opaque FHE capability (relayer, local simulation, ...)
#[async_trait]
pub trait FheCapability: Send + Sync {
    /// Explicit asynchronous setup; must succeed before any other call
    async fn initialize(&self) -> Result<(), CryptoError>;

    fn is_initialized(&self) -> bool;

    async fn encrypt_u32(
        &self,
        contract: Address,
        account: Address,
        value: u32,
    ) -> Result<EncryptedInput, CryptoError>;

    async fn public_decrypt(
        &self,
        handles: &[CiphertextHandle],
    ) -> Result<PublicDecryption, CryptoError>;
}

/// Protocol layer around an [`FheCapability`]
#[derive(Clone)]
pub struct CryptoGateway {
    capability: Arc<dyn FheCapability>,
}

impl CryptoGateway {
    pub fn new(capability: Arc<dyn FheCapability>) -> Self {
        Self { capability }
    }

    /// Initialize the capability; a no-op once initialized
    pub async fn initialize(&self) -> Result<(), CryptoError> {
        if self.capability.is_initialized() {
            return Ok(());
        }
        self.capability.initialize().await
    }

    pub fn is_initialized(&self) -> bool {
        self.capability.is_initialized()
    }

    fn ensure_initialized(&self) -> Result<(), CryptoError> {
        if self.capability.is_initialized() {
            Ok(())
        } else {
            Err(CryptoError::NotInitialized)
        }
    }

    /// Encrypt a consumption value for `target`, bound to `account`
    pub async fn encrypt(
        &self,
        target: Address,
        account: Address,
        value: u64,
    ) -> Result<EncryptedInput, CryptoError> {
        self.ensure_initialized()?;
        let value = u32::try_from(value).map_err(|_| {
            CryptoError::InvalidInput(format!(
                "value {} exceeds the 32-bit maximum {}",
                value, MAX_CONSUMPTION
            ))
        })?;

        let encrypted = self.capability.encrypt_u32(target, account, value).await?;
        tracing::debug!(handle = %encrypted.handle, %target, "Encrypted value");
        Ok(encrypted)
    }

    /// Run the disclosure protocol for `handles`.
    ///
    /// 1. request plaintext candidates and a proof from the capability
    /// 2. check the candidates cover every handle and match the encoding
    /// 3. hand the proof to `on_proof_ready`, which anchors it on the ledger
    /// 4. only then return the clear values
    ///
    /// If anchoring reports the record as already verified the result is
    /// [`CryptoError::AlreadyDisclosed`]; the local candidates are dropped.
    pub async fn prove_disclosure<F, Fut>(
        &self,
        handles: &[CiphertextHandle],
        target: Address,
        on_proof_ready: F,
    ) -> Result<RevealedValues, CryptoError>
    where
        F: FnOnce(ProofSubmission) -> Fut + Send,
        Fut: Future<Output = Result<LedgerReceipt, LedgerError>> + Send,
    {
        self.ensure_initialized()?;
        if handles.is_empty() {
            return Err(CryptoError::InvalidInput("no handles to disclose".into()));
        }

        let decryption = self.capability.public_decrypt(handles).await?;
        let ordered = check_decryption(handles, &decryption)?;
        tracing::debug!(handles = handles.len(), %target, "Decryption proof obtained");

        let submission = ProofSubmission {
            abi_encoded_clear_values: decryption.abi_encoded_clear_values,
            decryption_proof: decryption.decryption_proof.clone(),
        };
        let receipt = match on_proof_ready(submission).await {
            Ok(receipt) => receipt,
            Err(LedgerError::AlreadyVerified) => return Err(CryptoError::AlreadyDisclosed),
            Err(e) => return Err(CryptoError::Anchoring(e)),
        };

        let clear_values = handles.iter().copied().zip(ordered).collect();
        Ok(RevealedValues {
            clear_values,
            proof: DisclosureProof::Anchored {
                proof: decryption.decryption_proof,
                tx: receipt.tx,
            },
            receipt,
        })
    }
}

/// Clear values in handle order, checked against the ABI payload
fn check_decryption(
    handles: &[CiphertextHandle],
    decryption: &PublicDecryption,
) -> Result<Vec<u64>, CryptoError> {
    let ordered = handles
        .iter()
        .map(|handle| {
            decryption
                .clear_values
                .get(handle)
                .copied()
                .ok_or(CryptoError::UnknownHandle(*handle))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if encode_clear_values(&ordered) != decryption.abi_encoded_clear_values {
        return Err(CryptoError::InconsistentDecryption(
            "clear values do not match their ABI encoding".into(),
        ));
    }
    if decryption.decryption_proof.is_empty() {
        return Err(CryptoError::InconsistentDecryption(
            "empty decryption proof".into(),
        ));
    }
    Ok(ordered)
}
