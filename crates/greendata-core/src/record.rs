//! Record model: identity, ciphertext handle, public fields, verification

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, TxHash, B256};
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

use crate::constants::RECORD_ID_PREFIX;
use crate::Error;

/// Maximum record id length accepted from callers (fits a Solidity string key)
const MAX_ID_LEN: usize = 64;

/// Globally unique record identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_ID_LEN {
            return Err(Error::InvalidRecordId(id));
        }
        if !id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(Error::InvalidRecordId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Derive a collision-resistant record id from the creator and creation time.
///
/// Format: `energy-<millis>-<suffix>` where suffix is the first 4 bytes of
/// `keccak256(creator || millis_be || nonce_be)`, hex encoded. Two ids from
/// the same creator in the same millisecond differ by nonce.
pub fn derive_record_id(creator: &Address, millis: u64, nonce: u64) -> RecordId {
    let mut hasher = Keccak::v256();
    hasher.update(creator.as_slice());
    hasher.update(&millis.to_be_bytes());
    hasher.update(&nonce.to_be_bytes());
    let mut digest = [0u8; 32];
    hasher.finalize(&mut digest);

    RecordId(format!(
        "{}-{}-{}",
        RECORD_ID_PREFIX,
        millis,
        hex::encode(&digest[..4])
    ))
}

/// Opaque reference to an encrypted value held by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CiphertextHandle(pub B256);

impl CiphertextHandle {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0 .0
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<[u8; 32]> for CiphertextHandle {
    fn from(bytes: [u8; 32]) -> Self {
        Self(B256::from(bytes))
    }
}

/// Evidence that a disclosed plaintext matches its ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisclosureProof {
    /// The ledger checked the proof when the reveal was submitted and only
    /// exposes the outcome
    LedgerAttested,
    /// Proof bytes held locally, anchored on the ledger by `tx`
    Anchored { proof: Vec<u8>, tx: TxHash },
}

/// Verification state of a record. Only moves `Unverified -> Verified`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verification {
    #[default]
    Unverified,
    Verified {
        plaintext: u64,
        proof: DisclosureProof,
    },
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified { .. })
    }

    pub fn plaintext(&self) -> Option<u64> {
        match self {
            Verification::Verified { plaintext, .. } => Some(*plaintext),
            Verification::Unverified => None,
        }
    }

    /// Combine a held state with a newly observed one without moving backward.
    ///
    /// A stale read that reports `Unverified` for a record already seen as
    /// `Verified` keeps the verified state. Once verified, the first
    /// plaintext wins.
    pub fn advance(self, observed: Verification) -> Verification {
        match (self, observed) {
            (held @ Verification::Verified { .. }, _) => held,
            (Verification::Unverified, observed) => observed,
        }
    }
}

/// A confidential energy record as stored on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub name: String,
    pub description: String,
    /// Immutable after creation
    pub ciphertext: CiphertextHandle,
    /// Declared consumption estimate (advisory)
    pub public_value1: u64,
    /// Carbon tax derived client-side at creation (advisory)
    pub public_value2: u64,
    pub creator: Address,
    /// Ledger timestamp, seconds since epoch
    pub created_at: u64,
    pub verification: Verification,
}

impl Record {
    pub fn is_verified(&self) -> bool {
        self.verification.is_verified()
    }

    /// Resolve what to show for the consumption value.
    ///
    /// The ledger-verified plaintext always wins over a provisional value.
    pub fn display_value(&self, provisional: Option<u64>) -> DisplayValue {
        match (self.verification.plaintext(), provisional) {
            (Some(value), _) => DisplayValue::OnChainVerified(value),
            (None, Some(value)) => DisplayValue::LocallyDecrypted(value),
            (None, None) => DisplayValue::Encrypted,
        }
    }
}

/// Consumption value as it may be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisplayValue {
    OnChainVerified(u64),
    LocallyDecrypted(u64),
    Encrypted,
}

impl DisplayValue {
    pub fn value(&self) -> Option<u64> {
        match self {
            DisplayValue::OnChainVerified(v) | DisplayValue::LocallyDecrypted(v) => Some(*v),
            DisplayValue::Encrypted => None,
        }
    }
}

impl fmt::Display for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayValue::OnChainVerified(v) => write!(f, "{} kWh (On-chain Verified)", v),
            DisplayValue::LocallyDecrypted(v) => write!(f, "{} kWh (Locally Decrypted)", v),
            DisplayValue::Encrypted => f.write_str("🔒 Encrypted"),
        }
    }
}
