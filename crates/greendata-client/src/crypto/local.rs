//! Local FHE simulation
//!
//! [`LocalKms`] plays the key management service: it remembers the
//! plaintext behind each handle and signs public decryptions with a secret
//! key. [`LocalFhe`] is the client-side capability on top of it. Handles and
//! proofs are Keccak-256 digests, so nothing here is confidential; it only
//! reproduces the protocol shape for tests and offline demos.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use greendata_core::abi::encode_clear_values;
use greendata_core::{Address, CiphertextHandle};
use tiny_keccak::{Hasher, Keccak};

use super::{CryptoError, EncryptedInput, FheCapability, PublicDecryption};
use crate::ledger::DisclosureVerifier;

fn keccak(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut digest = [0u8; 32];
    hasher.finalize(&mut digest);
    digest
}

/// Simulated key management service
pub struct LocalKms {
    key: [u8; 32],
    plaintexts: Mutex<HashMap<CiphertextHandle, u64>>,
}

impl LocalKms {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key,
            plaintexts: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, handle: CiphertextHandle, value: u64) {
        self.plaintexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, value);
    }

    fn decrypt(&self, handle: &CiphertextHandle) -> Option<u64> {
        self.plaintexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(handle)
            .copied()
    }

    fn sign(&self, handles: &[CiphertextHandle], abi_encoded: &[u8]) -> Vec<u8> {
        let mut hasher = Keccak::v256();
        hasher.update(&self.key);
        hasher.update(b"disclosure");
        for handle in handles {
            hasher.update(handle.as_bytes());
        }
        hasher.update(abi_encoded);
        let mut digest = [0u8; 32];
        hasher.finalize(&mut digest);
        digest.to_vec()
    }
}

impl DisclosureVerifier for LocalKms {
    fn verify(&self, handles: &[CiphertextHandle], abi_encoded: &[u8], proof: &[u8]) -> bool {
        self.sign(handles, abi_encoded) == proof
    }
}

/// In-process FHE capability backed by a [`LocalKms`]
pub struct LocalFhe {
    kms: Arc<LocalKms>,
    initialized: AtomicBool,
    fail_initialization: AtomicBool,
    corrupt_next: AtomicBool,
    forge_next: AtomicBool,
    counter: AtomicU64,
    decrypt_requests: AtomicUsize,
}

impl LocalFhe {
    pub fn new(kms: Arc<LocalKms>) -> Self {
        Self {
            kms,
            initialized: AtomicBool::new(false),
            fail_initialization: AtomicBool::new(false),
            corrupt_next: AtomicBool::new(false),
            forge_next: AtomicBool::new(false),
            counter: AtomicU64::new(0),
            decrypt_requests: AtomicUsize::new(0),
        }
    }

    /// Make `initialize` fail until cleared
    pub fn set_initialization_failure(&self, fail: bool) {
        self.fail_initialization.store(fail, Ordering::SeqCst);
    }

    /// Next decryption returns a clear value that disagrees with its encoding
    pub fn corrupt_next_decryption(&self) {
        self.corrupt_next.store(true, Ordering::SeqCst);
    }

    /// Next decryption returns a self-consistent but wrong value carrying the
    /// proof for the real one
    pub fn forge_next_decryption(&self) {
        self.forge_next.store(true, Ordering::SeqCst);
    }

    /// Public decryptions requested so far
    pub fn decrypt_requests(&self) -> usize {
        self.decrypt_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FheCapability for LocalFhe {
    async fn initialize(&self) -> Result<(), CryptoError> {
        if self.fail_initialization.load(Ordering::SeqCst) {
            return Err(CryptoError::EncryptionUnavailable(
                "key material unavailable".into(),
            ));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn encrypt_u32(
        &self,
        contract: Address,
        account: Address,
        value: u32,
    ) -> Result<EncryptedInput, CryptoError> {
        if !self.is_initialized() {
            return Err(CryptoError::NotInitialized);
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let handle = CiphertextHandle::from(keccak(&[
            b"handle".as_slice(),
            contract.as_slice(),
            account.as_slice(),
            &n.to_be_bytes()[..],
        ]));
        self.kms.register(handle, u64::from(value));

        let input_proof =
            keccak(&[&self.kms.key[..], &handle.as_bytes()[..], account.as_slice()]).to_vec();
        Ok(EncryptedInput {
            handle,
            input_proof,
        })
    }

    async fn public_decrypt(
        &self,
        handles: &[CiphertextHandle],
    ) -> Result<PublicDecryption, CryptoError> {
        if !self.is_initialized() {
            return Err(CryptoError::NotInitialized);
        }
        self.decrypt_requests.fetch_add(1, Ordering::SeqCst);

        let mut values = Vec::with_capacity(handles.len());
        for handle in handles {
            values.push(
                self.kms
                    .decrypt(handle)
                    .ok_or(CryptoError::UnknownHandle(*handle))?,
            );
        }
        let mut abi_encoded_clear_values = encode_clear_values(&values);
        let decryption_proof = self.kms.sign(handles, &abi_encoded_clear_values);

        if self.corrupt_next.swap(false, Ordering::SeqCst) {
            values[0] = values[0].wrapping_add(1);
        } else if self.forge_next.swap(false, Ordering::SeqCst) {
            values[0] = values[0].wrapping_add(1);
            abi_encoded_clear_values = encode_clear_values(&values);
        }

        let clear_values: BTreeMap<_, _> = handles.iter().copied().zip(values).collect();
        Ok(PublicDecryption {
            clear_values,
            abi_encoded_clear_values,
            decryption_proof,
        })
    }
}
