//! In-process ledger with the records contract's rules
//!
//! Submissions are queued and only take effect when their confirmation is
//! awaited, after an optional latency. Used by the end-to-end tests and for
//! offline demos against [`crate::LocalFhe`]. Settled outcomes are cached so
//! a confirmation can be awaited again; the cache keeps the most recent
//! [`MAX_SETTLED`] entries.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use greendata_core::abi::decode_clear_values;
use greendata_core::{
    Address, CiphertextHandle, DisclosureProof, Record, RecordId, TxHash, Verification,
};
use tiny_keccak::{Hasher, Keccak};

use super::{
    CreateSubmission, LedgerClient, LedgerError, LedgerReceipt, PendingTx, RevealSubmission,
    TxOutcome, ALREADY_VERIFIED_REASON,
};

/// Settled outcomes kept for repeated confirmation lookups
pub const MAX_SETTLED: usize = 1024;

/// Checks a disclosure proof the way the contract's signature check does
pub trait DisclosureVerifier: Send + Sync {
    fn verify(&self, handles: &[CiphertextHandle], abi_encoded: &[u8], proof: &[u8]) -> bool;
}

enum Effect {
    Create(Record),
    Reveal {
        id: RecordId,
        plaintext: u64,
        proof: Vec<u8>,
    },
}

#[derive(Default)]
struct State {
    order: Vec<RecordId>,
    records: HashMap<RecordId, Record>,
    pending: HashMap<TxHash, Effect>,
    settled: HashMap<TxHash, TxOutcome>,
    settled_order: VecDeque<TxHash>,
    strip_revert_reasons: bool,
    unavailable: HashSet<RecordId>,
    next_failure: Option<LedgerError>,
    clock: Option<u64>,
    block_number: u64,
}

impl State {
    fn remember_settled(&mut self, tx: TxHash, outcome: TxOutcome) {
        if self.settled.insert(tx, outcome).is_none() {
            self.settled_order.push_back(tx);
        }
        while self.settled_order.len() > MAX_SETTLED {
            if let Some(oldest) = self.settled_order.pop_front() {
                self.settled.remove(&oldest);
            }
        }
    }
}

/// Deterministic in-memory ledger
pub struct InMemoryLedger {
    contract: Address,
    signer: Option<Address>,
    verifier: Arc<dyn DisclosureVerifier>,
    confirmation_delay: Duration,
    state: Mutex<State>,
    tx_counter: AtomicU64,
    create_submissions: AtomicUsize,
    reveal_submissions: AtomicUsize,
}

impl InMemoryLedger {
    pub fn new(
        contract: Address,
        signer: Option<Address>,
        verifier: Arc<dyn DisclosureVerifier>,
    ) -> Self {
        Self {
            contract,
            signer,
            verifier,
            confirmation_delay: Duration::ZERO,
            state: Mutex::new(State::default()),
            tx_counter: AtomicU64::new(0),
            create_submissions: AtomicUsize::new(0),
            reveal_submissions: AtomicUsize::new(0),
        }
    }

    /// Delay applied before each confirmation settles
    pub fn with_confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = delay;
        self
    }

    /// Pin the ledger clock (seconds since epoch)
    pub fn set_time(&self, now: u64) {
        self.lock().clock = Some(now);
    }

    /// Place a record directly, as if created and settled earlier
    pub fn insert_record(&self, record: Record) {
        let mut state = self.lock();
        if !state.records.contains_key(&record.id) {
            state.order.push(record.id.clone());
        }
        state.records.insert(record.id.clone(), record);
    }

    /// Make `get_record` fail for an id while it stays listed
    pub fn make_unavailable(&self, id: &RecordId) {
        self.lock().unavailable.insert(id.clone());
    }

    /// Fail the next submission with the given error
    pub fn fail_next_submission(&self, error: LedgerError) {
        self.lock().next_failure = Some(error);
    }

    /// Report reverts without a reason, as mined EVM receipts do
    pub fn strip_revert_reasons(&self) {
        self.lock().strip_revert_reasons = true;
    }

    /// Create transactions accepted for inclusion
    pub fn create_submissions(&self) -> usize {
        self.create_submissions.load(Ordering::SeqCst)
    }

    /// Reveal transactions accepted for inclusion
    pub fn reveal_submissions(&self) -> usize {
        self.reveal_submissions.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(state: &State) -> u64 {
        state.clock.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default()
        })
    }

    fn next_tx_hash(&self, tag: &[u8]) -> TxHash {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Keccak::v256();
        hasher.update(tag);
        hasher.update(self.contract.as_slice());
        hasher.update(&n.to_be_bytes());
        let mut digest = [0u8; 32];
        hasher.finalize(&mut digest);
        TxHash::from(digest)
    }

    fn check_submission(&self, state: &mut State) -> Result<Address, LedgerError> {
        let signer = self.signer.ok_or(LedgerError::Unauthenticated)?;
        if let Some(error) = state.next_failure.take() {
            return Err(error);
        }
        Ok(signer)
    }

    fn apply(state: &mut State, tx: TxHash, effect: Effect) -> TxOutcome {
        state.block_number += 1;
        let receipt = LedgerReceipt {
            tx,
            block_number: Some(state.block_number),
        };

        match effect {
            Effect::Create(record) => {
                if state.records.contains_key(&record.id) {
                    return TxOutcome::Reverted {
                        tx,
                        reason: Some("Record already exists".into()),
                    };
                }
                state.order.push(record.id.clone());
                state.records.insert(record.id.clone(), record);
                TxOutcome::Confirmed(receipt)
            }
            Effect::Reveal {
                id,
                plaintext,
                proof,
            } => match state.records.get_mut(&id) {
                None => TxOutcome::Reverted {
                    tx,
                    reason: Some("Record does not exist".into()),
                },
                Some(record) if record.is_verified() => TxOutcome::Reverted {
                    tx,
                    reason: Some(ALREADY_VERIFIED_REASON.into()),
                },
                Some(record) => {
                    record.verification = Verification::Verified {
                        plaintext,
                        proof: DisclosureProof::Anchored { proof, tx },
                    };
                    TxOutcome::Confirmed(receipt)
                }
            },
        }
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    fn contract_address(&self) -> Address {
        self.contract
    }

    fn signer(&self) -> Option<Address> {
        self.signer
    }

    async fn list_record_ids(&self) -> Result<Vec<RecordId>, LedgerError> {
        Ok(self.lock().order.clone())
    }

    async fn get_record(&self, id: &RecordId) -> Result<Record, LedgerError> {
        let state = self.lock();
        if state.unavailable.contains(id) {
            return Err(LedgerError::Rpc(format!("record {} unavailable", id)));
        }
        state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.clone()))
    }

    async fn is_available(&self) -> Result<bool, LedgerError> {
        Ok(true)
    }

    async fn submit_create(&self, submission: CreateSubmission) -> Result<PendingTx, LedgerError> {
        let mut state = self.lock();
        let creator = self.check_submission(&mut state)?;

        let duplicate_pending = state.pending.values().any(
            |effect| matches!(effect, Effect::Create(record) if record.id == submission.id),
        );
        if state.records.contains_key(&submission.id) || duplicate_pending {
            return Err(LedgerError::Rejected(format!(
                "execution reverted: Record {} already exists",
                submission.id
            )));
        }
        if submission.input_proof.is_empty() {
            return Err(LedgerError::Rejected(
                "execution reverted: missing input proof".into(),
            ));
        }

        let record = Record {
            id: submission.id,
            name: submission.name,
            description: submission.description,
            ciphertext: submission.ciphertext,
            public_value1: submission.public_value1,
            public_value2: submission.public_value2,
            creator,
            created_at: Self::now(&state),
            verification: Verification::Unverified,
        };

        let hash = self.next_tx_hash(b"create");
        state.pending.insert(hash, Effect::Create(record));
        self.create_submissions.fetch_add(1, Ordering::SeqCst);
        Ok(PendingTx { hash })
    }

    async fn submit_reveal(&self, submission: RevealSubmission) -> Result<PendingTx, LedgerError> {
        let mut state = self.lock();
        self.check_submission(&mut state)?;

        let record = state
            .records
            .get(&submission.id)
            .ok_or_else(|| LedgerError::NotFound(submission.id.clone()))?;
        if record.is_verified() {
            return Err(LedgerError::AlreadyVerified);
        }

        let handles = [record.ciphertext];
        if !self.verifier.verify(
            &handles,
            &submission.abi_encoded_clear_values,
            &submission.decryption_proof,
        ) {
            return Err(LedgerError::Rejected(
                "execution reverted: invalid decryption proof".into(),
            ));
        }
        let plaintext = decode_clear_values(&submission.abi_encoded_clear_values, 1)
            .map_err(|e| LedgerError::Rejected(e.to_string()))?[0];

        let hash = self.next_tx_hash(b"reveal");
        state.pending.insert(
            hash,
            Effect::Reveal {
                id: submission.id,
                plaintext,
                proof: submission.decryption_proof,
            },
        );
        self.reveal_submissions.fetch_add(1, Ordering::SeqCst);
        Ok(PendingTx { hash })
    }

    async fn await_confirmation(&self, pending: &PendingTx) -> Result<TxOutcome, LedgerError> {
        if !self.confirmation_delay.is_zero() {
            tokio::time::sleep(self.confirmation_delay).await;
        }

        let mut state = self.lock();
        if let Some(outcome) = state.settled.get(&pending.hash) {
            return Ok(outcome.clone());
        }
        let effect = state
            .pending
            .remove(&pending.hash)
            .ok_or_else(|| LedgerError::Rpc(format!("unknown transaction {}", pending.hash)))?;

        let mut outcome = Self::apply(&mut state, pending.hash, effect);
        if state.strip_revert_reasons {
            if let TxOutcome::Reverted { reason, .. } = &mut outcome {
                *reason = None;
            }
        }
        state.remember_settled(pending.hash, outcome.clone());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greendata_core::abi::encode_clear_values;

    struct AcceptAll;

    impl DisclosureVerifier for AcceptAll {
        fn verify(&self, _: &[CiphertextHandle], _: &[u8], proof: &[u8]) -> bool {
            !proof.is_empty()
        }
    }

    fn ledger(signer: Option<Address>) -> InMemoryLedger {
        InMemoryLedger::new(Address::repeat_byte(0xcc), signer, Arc::new(AcceptAll))
    }

    fn creation(id: &str) -> CreateSubmission {
        CreateSubmission {
            id: RecordId::new(id).unwrap(),
            name: "Plant".into(),
            ciphertext: CiphertextHandle::from([7u8; 32]),
            input_proof: vec![1],
            public_value1: 100,
            public_value2: 15,
            description: String::new(),
        }
    }

    fn reveal(id: &str, value: u64) -> RevealSubmission {
        RevealSubmission {
            id: RecordId::new(id).unwrap(),
            abi_encoded_clear_values: encode_clear_values(&[value]),
            decryption_proof: vec![9],
        }
    }

    #[tokio::test]
    async fn test_create_settles_on_confirmation() {
        let ledger = ledger(Some(Address::repeat_byte(0x11)));
        ledger.set_time(1_000);

        let pending = ledger.submit_create(creation("energy-1")).await.unwrap();
        assert!(ledger.list_record_ids().await.unwrap().is_empty());

        let outcome = ledger.await_confirmation(&pending).await.unwrap();
        assert!(matches!(outcome, TxOutcome::Confirmed(_)));

        let record = ledger
            .get_record(&RecordId::new("energy-1").unwrap())
            .await
            .unwrap();
        assert_eq!(record.creator, Address::repeat_byte(0x11));
        assert_eq!(record.created_at, 1_000);
        assert_eq!(record.verification, Verification::Unverified);

        // settled outcomes are stable
        assert_eq!(ledger.await_confirmation(&pending).await.unwrap(), outcome);
    }

    #[tokio::test]
    async fn test_writes_need_signer() {
        let ledger = ledger(None);
        assert_eq!(
            ledger.submit_create(creation("energy-1")).await.unwrap_err(),
            LedgerError::Unauthenticated
        );
        assert_eq!(ledger.create_submissions(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let ledger = ledger(Some(Address::repeat_byte(0x11)));
        ledger.submit_create(creation("energy-1")).await.unwrap();
        assert!(matches!(
            ledger.submit_create(creation("energy-1")).await,
            Err(LedgerError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_second_reveal_rejected_or_reverted() {
        let ledger = ledger(Some(Address::repeat_byte(0x11)));
        let pending = ledger.submit_create(creation("energy-1")).await.unwrap();
        ledger.await_confirmation(&pending).await.unwrap();

        // two reveals accepted before either settles: the second reverts
        let first = ledger.submit_reveal(reveal("energy-1", 100)).await.unwrap();
        let second = ledger.submit_reveal(reveal("energy-1", 100)).await.unwrap();
        assert!(matches!(
            ledger.await_confirmation(&first).await.unwrap(),
            TxOutcome::Confirmed(_)
        ));
        assert_eq!(
            ledger.await_confirmation(&second).await.unwrap().into_receipt(),
            Err(LedgerError::AlreadyVerified)
        );

        // after settlement the reveal is refused up front
        assert_eq!(
            ledger.submit_reveal(reveal("energy-1", 100)).await.unwrap_err(),
            LedgerError::AlreadyVerified
        );

        let record = ledger
            .get_record(&RecordId::new("energy-1").unwrap())
            .await
            .unwrap();
        assert_eq!(record.verification.plaintext(), Some(100));
    }

    #[tokio::test]
    async fn test_unavailable_record() {
        let ledger = ledger(Some(Address::repeat_byte(0x11)));
        let pending = ledger.submit_create(creation("energy-1")).await.unwrap();
        ledger.await_confirmation(&pending).await.unwrap();

        let id = RecordId::new("energy-1").unwrap();
        ledger.make_unavailable(&id);
        assert_eq!(ledger.list_record_ids().await.unwrap(), vec![id.clone()]);
        assert!(matches!(
            ledger.get_record(&id).await,
            Err(LedgerError::Rpc(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_user_rejection() {
        let ledger = ledger(Some(Address::repeat_byte(0x11)));
        ledger.fail_next_submission(LedgerError::UserRejected("user rejected".into()));

        let err = ledger.submit_create(creation("energy-1")).await.unwrap_err();
        assert!(err.is_user_rejection());
        assert!(ledger.submit_create(creation("energy-1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_stripped_revert_has_no_reason() {
        let ledger = ledger(Some(Address::repeat_byte(0x11)));
        ledger.strip_revert_reasons();
        let pending = ledger.submit_create(creation("energy-1")).await.unwrap();
        ledger.await_confirmation(&pending).await.unwrap();

        let first = ledger.submit_reveal(reveal("energy-1", 100)).await.unwrap();
        let second = ledger.submit_reveal(reveal("energy-1", 100)).await.unwrap();
        ledger.await_confirmation(&first).await.unwrap();

        let outcome = ledger.await_confirmation(&second).await.unwrap();
        assert_eq!(
            outcome,
            TxOutcome::Reverted {
                tx: second.hash,
                reason: None
            }
        );
        assert!(matches!(
            outcome.into_receipt(),
            Err(LedgerError::Reverted { reason: None, .. })
        ));
    }

    #[test]
    fn test_settled_cache_is_bounded() {
        let mut state = State::default();
        let hashes: Vec<TxHash> = (0..=MAX_SETTLED as u64)
            .map(|n| TxHash::left_padding_from(&n.to_be_bytes()))
            .collect();
        for &tx in &hashes {
            let outcome = TxOutcome::Reverted { tx, reason: None };
            state.remember_settled(tx, outcome);
        }

        assert_eq!(state.settled.len(), MAX_SETTLED);
        assert_eq!(state.settled_order.len(), MAX_SETTLED);
        assert!(!state.settled.contains_key(&hashes[0]));
        assert!(state.settled.contains_key(&hashes[MAX_SETTLED]));
    }
}
