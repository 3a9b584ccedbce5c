//! Lifecycle controller
//!
//! Owns every state transition of a record:
//!
//! | Operation | Phases |
//! |-----------|--------|
//! | create | `Encrypting -> Submitting -> AwaitingConfirmation -> Settled / Failed` |
//! | reveal | `RequestingProofs -> AwaitingOnChainProof -> Verified / AlreadyVerified / Failed` |
//!
//! Each operation body runs in its own task. A caller that stops awaiting
//! does not stop the operation: a submitted transaction is still awaited
//! and the repository is still refreshed when it settles.

mod inflight;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::stream::{self, StreamExt};
use greendata_core::{
    derive_record_id, Address, ClientConfig, DisclosureProof, PendingDraft, RecordId, TaxPolicy,
    TxHash, ValidDraft,
};

use crate::crypto::{CryptoError, CryptoGateway};
use crate::error::ClientError;
use crate::ledger::{
    CreateSubmission, LedgerClient, LedgerError, LedgerReceipt, PendingTx, RevealSubmission,
};
use crate::repository::{ProvisionalDisclosure, RecordRepository, RefreshSummary};
use crate::status::StatusReporter;

use inflight::{OperationGuard, OperationTracker};

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Reveal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationPhase {
    Idle,
    Encrypting,
    Submitting,
    AwaitingConfirmation,
    Settled,
    Failed,
    RequestingProofs,
    AwaitingOnChainProof,
    Verified,
    AlreadyVerified,
}

/// Result of a confirmed creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReceipt {
    pub id: RecordId,
    pub tx: TxHash,
    /// Advisory tax stored as `publicValue2`
    pub carbon_tax: u64,
    pub block_number: Option<u64>,
}

/// Result of a reveal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealOutcome {
    /// The ledger already held a verified value; no proof was requested
    AlreadyVerified { plaintext: u64 },
    /// A proof was anchored by this call. `confirmed` is whether the
    /// follow-up refresh already shows the record as verified.
    Disclosed {
        plaintext: u64,
        proof: DisclosureProof,
        confirmed: bool,
    },
}

impl RevealOutcome {
    pub fn plaintext(&self) -> u64 {
        match self {
            RevealOutcome::AlreadyVerified { plaintext }
            | RevealOutcome::Disclosed { plaintext, .. } => *plaintext,
        }
    }
}

struct Inner {
    ledger: Arc<dyn LedgerClient>,
    crypto: CryptoGateway,
    config: ClientConfig,
    tax: TaxPolicy,
    repository: RecordRepository,
    status: StatusReporter,
    tracker: Arc<OperationTracker>,
    nonce: AtomicU64,
}

/// Drives record creation and disclosure against a ledger and an FHE
/// capability; cheap to clone
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl LifecycleController {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        crypto: CryptoGateway,
        config: ClientConfig,
    ) -> Result<Self> {
        config.validate()?;
        let tax = config.tax_policy()?;
        Ok(Self {
            inner: Arc::new(Inner {
                ledger,
                crypto,
                config,
                tax,
                repository: RecordRepository::new(),
                status: StatusReporter::new(),
                tracker: Arc::new(OperationTracker::default()),
                nonce: AtomicU64::new(0),
            }),
        })
    }

    /// Publish status on an existing reporter instead of a private one
    pub fn with_status(self, status: StatusReporter) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.status = status;
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => {
                tracing::warn!("Controller already shared, keeping its status reporter");
                Self { inner }
            }
        }
    }

    pub fn repository(&self) -> &RecordRepository {
        &self.inner.repository
    }

    pub fn status(&self) -> &StatusReporter {
        &self.inner.status
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn tax_policy(&self) -> TaxPolicy {
        self.inner.tax
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.ledger.signer().is_none()
    }

    /// Phase of the in-flight operation on `(id, kind)`
    pub fn phase(&self, id: &RecordId, kind: OperationKind) -> OperationPhase {
        self.inner.tracker.phase(id, kind)
    }

    /// Initialize the FHE capability; required before create or reveal
    pub async fn initialize_crypto(&self) -> Result<()> {
        match self.inner.crypto.initialize().await {
            Ok(()) => {
                tracing::info!("FHE capability initialized");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "FHE initialization failed");
                self.inner.status.error("FHEVM initialization failed", None);
                Err(e.into())
            }
        }
    }

    /// Re-read every record from the ledger and merge into the repository.
    ///
    /// A record that fails to load is skipped and kept at its previous
    /// state; only a failed listing aborts the refresh.
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let inner = &self.inner;
        let ids = match inner.ledger.list_record_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list records");
                inner.status.error("Failed to load data", None);
                return Err(e.into());
            }
        };

        let concurrency = inner.config.refresh_concurrency.max(1);
        let results: Vec<_> = stream::iter(ids)
            .map(|id| async move {
                let result = inner.ledger.get_record(&id).await;
                (id, result)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut records = Vec::with_capacity(results.len());
        let mut skipped = 0;
        for (id, result) in results {
            match result {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(%id, error = %e, "Skipping record");
                    skipped += 1;
                }
            }
        }

        let summary = inner.repository.apply_refresh(records, skipped);
        metrics::counter!("greendata_refreshes_total").increment(1);
        metrics::counter!("greendata_records_skipped_total").increment(skipped as u64);
        tracing::info!(
            fetched = summary.fetched,
            skipped = summary.skipped,
            total = summary.total,
            generation = summary.generation,
            "Repository refreshed"
        );
        Ok(summary)
    }

    /// Validate, encrypt and submit a new record, then refresh.
    ///
    /// Validation failures are returned before anything is encrypted or
    /// submitted.
    pub async fn create(&self, draft: &PendingDraft) -> Result<CreateReceipt> {
        let inner = &self.inner;
        let draft = match draft.validate() {
            Ok(draft) => draft,
            Err(e) => {
                inner.status.error(e.to_string(), None);
                return Err(e.into());
            }
        };
        let account = self.require_signer()?;

        let nonce = inner.nonce.fetch_add(1, Ordering::Relaxed);
        let id = derive_record_id(&account, now_millis(), nonce);
        let controller = self.clone();
        tokio::spawn(async move { controller.run_create(id, account, draft).await }).await?
    }

    /// Disclose a record's plaintext with an on-chain proof.
    ///
    /// An already verified record returns its stored value without any
    /// proof request. Concurrent reveals of one record are serialized; the
    /// later ones observe the first one's result on the ledger.
    pub async fn reveal(&self, id: &RecordId) -> Result<RevealOutcome> {
        self.require_signer()?;
        let controller = self.clone();
        let id = id.clone();
        tokio::spawn(async move { controller.run_reveal(id).await }).await?
    }

    /// Check that the records contract answers
    pub async fn check_availability(&self) -> Result<bool> {
        let status = &self.inner.status;
        status.pending("Checking contract availability...", None);
        match self.inner.ledger.is_available().await {
            Ok(true) => {
                status.success("Contract is available and ready!", None);
                Ok(true)
            }
            Ok(false) => {
                status.error("Availability check failed", None);
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Availability check failed");
                status.error("Availability check failed", None);
                Err(e.into())
            }
        }
    }

    fn require_signer(&self) -> Result<Address> {
        self.inner.ledger.signer().ok_or_else(|| {
            self.inner.status.error("Please connect wallet first", None);
            ClientError::Unauthenticated
        })
    }

    async fn run_create(
        &self,
        id: RecordId,
        account: Address,
        draft: ValidDraft,
    ) -> Result<CreateReceipt> {
        let inner = &self.inner;
        let guard = inner.tracker.acquire(&id, OperationKind::Create).await;
        let carbon_tax = inner.tax.tax_for(draft.consumption);
        tracing::info!(%id, name = %draft.name, carbon_tax, "Creating record");

        let mut submitted = false;
        let result = self
            .create_steps(&guard, &id, account, draft, carbon_tax, &mut submitted)
            .await;

        // a submitted transaction may have landed even if awaiting it failed
        if result.is_ok() || submitted {
            if let Err(e) = self.refresh().await {
                tracing::warn!(%id, error = %e, "Refresh after create failed");
            }
        }

        match result {
            Ok(receipt) => {
                guard.set_phase(OperationPhase::Settled);
                metrics::counter!("greendata_records_created_total").increment(1);
                tracing::info!(%id, tx = %receipt.tx, "Record created");
                inner.status.success("Energy data uploaded successfully!", Some(&id));
                Ok(receipt)
            }
            Err(e) => {
                guard.set_phase(OperationPhase::Failed);
                tracing::warn!(%id, error = %e, "Create failed");
                inner.status.error(e.user_message("Upload failed"), Some(&id));
                Err(e)
            }
        }
    }

    async fn create_steps(
        &self,
        guard: &OperationGuard,
        id: &RecordId,
        account: Address,
        draft: ValidDraft,
        carbon_tax: u64,
        submitted: &mut bool,
    ) -> Result<CreateReceipt> {
        let inner = &self.inner;
        let contract = inner.ledger.contract_address();

        guard.set_phase(OperationPhase::Encrypting);
        inner.status.pending("Uploading encrypted energy data...", Some(id));
        let encrypted = inner.crypto.encrypt(contract, account, draft.consumption).await?;

        guard.set_phase(OperationPhase::Submitting);
        let pending = inner
            .ledger
            .submit_create(CreateSubmission {
                id: id.clone(),
                name: draft.name,
                ciphertext: encrypted.handle,
                input_proof: encrypted.input_proof,
                public_value1: draft.consumption,
                public_value2: carbon_tax,
                description: draft.description,
            })
            .await?;
        *submitted = true;

        guard.set_phase(OperationPhase::AwaitingConfirmation);
        inner.status.pending("Waiting for transaction confirmation...", Some(id));
        let receipt = self.settle(&pending).await?;

        Ok(CreateReceipt {
            id: id.clone(),
            tx: receipt.tx,
            carbon_tax,
            block_number: receipt.block_number,
        })
    }

    async fn settle(
        &self,
        pending: &PendingTx,
    ) -> std::result::Result<LedgerReceipt, LedgerError> {
        tracing::debug!(tx = %pending.hash, "Awaiting confirmation");
        self.inner.ledger.await_confirmation(pending).await?.into_receipt()
    }

    async fn run_reveal(&self, id: RecordId) -> Result<RevealOutcome> {
        let inner = &self.inner;
        let guard = inner.tracker.acquire(&id, OperationKind::Reveal).await;

        let result = self.reveal_steps(&guard, &id).await;
        match result {
            Ok(outcome) => {
                let phase = match outcome {
                    RevealOutcome::AlreadyVerified { .. } => OperationPhase::AlreadyVerified,
                    RevealOutcome::Disclosed { .. } => OperationPhase::Verified,
                };
                guard.set_phase(phase);
                Ok(outcome)
            }
            Err(e) => {
                guard.set_phase(OperationPhase::Failed);
                tracing::warn!(%id, error = %e, "Reveal failed");
                inner.status.error(e.user_message("Decryption failed"), Some(&id));
                Err(e)
            }
        }
    }

    async fn reveal_steps(&self, guard: &OperationGuard, id: &RecordId) -> Result<RevealOutcome> {
        let inner = &self.inner;

        // authoritative state first; never re-prove a verified record
        let record = inner.ledger.get_record(id).await?;
        inner.repository.apply_record(record.clone());
        if let Some(plaintext) = record.verification.plaintext() {
            metrics::counter!("greendata_reveals_short_circuited_total").increment(1);
            tracing::info!(%id, plaintext, "Record already verified, skipping proof");
            inner.status.success("Data already verified on-chain", Some(id));
            return Ok(RevealOutcome::AlreadyVerified { plaintext });
        }

        guard.set_phase(OperationPhase::RequestingProofs);
        inner.status.pending("Verifying decryption on-chain...", Some(id));

        let handle = record.ciphertext;
        let ledger = &inner.ledger;
        let disclosed = inner
            .crypto
            .prove_disclosure(&[handle], ledger.contract_address(), |submission| async move {
                let pending = ledger
                    .submit_reveal(RevealSubmission {
                        id: id.clone(),
                        abi_encoded_clear_values: submission.abi_encoded_clear_values,
                        decryption_proof: submission.decryption_proof,
                    })
                    .await?;
                metrics::counter!("greendata_reveals_submitted_total").increment(1);
                guard.set_phase(OperationPhase::AwaitingOnChainProof);
                self.settle(&pending).await
            })
            .await;

        match disclosed {
            Ok(revealed) => {
                let plaintext = revealed
                    .clear_values
                    .get(&handle)
                    .copied()
                    .ok_or(CryptoError::UnknownHandle(handle))?;
                inner.repository.record_provisional(
                    id.clone(),
                    ProvisionalDisclosure {
                        plaintext,
                        proof: revealed.proof.clone(),
                    },
                );
                self.refresh_after_reveal(id).await;

                let confirmed = inner
                    .repository
                    .snapshot()
                    .get(id)
                    .is_some_and(|r| r.is_verified());
                tracing::info!(%id, tx = %revealed.receipt.tx, confirmed, "Record disclosed");
                inner.status.success("Consumption data decrypted successfully!", Some(id));
                Ok(RevealOutcome::Disclosed {
                    plaintext,
                    proof: revealed.proof,
                    confirmed,
                })
            }
            Err(CryptoError::AlreadyDisclosed) => self.adopt_ledger_disclosure(id, None).await,
            // mined reverts carry no reason; the ledger state tells a lost race apart
            Err(CryptoError::Anchoring(e @ LedgerError::Reverted { .. })) => {
                self.adopt_ledger_disclosure(id, Some(e)).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Another discloser won the race: refresh and trust only the ledger.
    ///
    /// Without a verified value on the ledger the revert, if any, is
    /// returned; otherwise [`ClientError::NotVerified`].
    async fn adopt_ledger_disclosure(
        &self,
        id: &RecordId,
        revert: Option<LedgerError>,
    ) -> Result<RevealOutcome> {
        let inner = &self.inner;
        self.refresh_after_reveal(id).await;
        let verified = inner
            .repository
            .snapshot()
            .get(id)
            .and_then(|r| r.verification.plaintext());

        let plaintext = match (verified, revert) {
            (Some(plaintext), _) => plaintext,
            (None, Some(e)) => return Err(CryptoError::Anchoring(e).into()),
            (None, None) => return Err(ClientError::NotVerified(id.clone())),
        };
        metrics::counter!("greendata_reveals_short_circuited_total").increment(1);
        tracing::info!(%id, plaintext, "Record verified concurrently");
        inner.status.success("Data is already verified on-chain", Some(id));
        Ok(RevealOutcome::AlreadyVerified { plaintext })
    }

    async fn refresh_after_reveal(&self, id: &RecordId) {
        if let Err(e) = self.refresh().await {
            tracing::warn!(%id, error = %e, "Refresh after reveal failed");
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{LocalFhe, LocalKms};
    use crate::ledger::InMemoryLedger;
    use crate::status::StatusKind;
    use greendata_core::Verification;

    struct Harness {
        ledger: Arc<InMemoryLedger>,
        fhe: Arc<LocalFhe>,
        controller: LifecycleController,
    }

    async fn harness(signer: Option<Address>) -> Harness {
        let kms = Arc::new(LocalKms::new([7u8; 32]));
        let fhe = Arc::new(LocalFhe::new(kms.clone()));
        let ledger = Arc::new(InMemoryLedger::new(
            Address::repeat_byte(0xc0),
            signer,
            kms,
        ));
        let controller = LifecycleController::new(
            ledger.clone(),
            CryptoGateway::new(fhe.clone()),
            ClientConfig::default(),
        )
        .unwrap();
        controller.initialize_crypto().await.unwrap();
        Harness {
            ledger,
            fhe,
            controller,
        }
    }

    fn draft(consumption: &str) -> PendingDraft {
        PendingDraft::new("Plant A", consumption, "north site")
    }

    #[tokio::test]
    async fn test_create_computes_tax_and_refreshes() {
        let h = harness(Some(Address::repeat_byte(0x11))).await;
        let receipt = h.controller.create(&draft("100")).await.unwrap();

        assert_eq!(receipt.carbon_tax, 15);
        assert!(receipt.id.as_str().starts_with("energy-"));
        let snapshot = h.controller.repository().snapshot();
        assert_eq!(snapshot.len(), 1);
        let record = snapshot.get(&receipt.id).unwrap();
        assert_eq!(record.public_value1, 100);
        assert_eq!(record.public_value2, 15);
        assert_eq!(record.verification, Verification::Unverified);
        assert_eq!(
            h.controller.phase(&receipt.id, OperationKind::Create),
            OperationPhase::Idle
        );
    }

    #[tokio::test]
    async fn test_create_requires_initialized_crypto() {
        let kms = Arc::new(LocalKms::new([7u8; 32]));
        let ledger = Arc::new(InMemoryLedger::new(
            Address::ZERO,
            Some(Address::repeat_byte(1)),
            kms.clone(),
        ));
        let controller = LifecycleController::new(
            ledger.clone(),
            CryptoGateway::new(Arc::new(LocalFhe::new(kms))),
            ClientConfig::default(),
        )
        .unwrap();

        let err = controller.create(&draft("5")).await.unwrap_err();
        assert_eq!(err, ClientError::Crypto(CryptoError::NotInitialized));
        assert_eq!(ledger.create_submissions(), 0);
    }

    #[tokio::test]
    async fn test_reveal_then_short_circuit() {
        let h = harness(Some(Address::repeat_byte(0x11))).await;
        let receipt = h.controller.create(&draft("240")).await.unwrap();

        let first = h.controller.reveal(&receipt.id).await.unwrap();
        assert!(matches!(
            first,
            RevealOutcome::Disclosed {
                plaintext: 240,
                confirmed: true,
                ..
            }
        ));
        assert_eq!(h.fhe.decrypt_requests(), 1);

        let second = h.controller.reveal(&receipt.id).await.unwrap();
        assert_eq!(second, RevealOutcome::AlreadyVerified { plaintext: 240 });
        assert_eq!(h.fhe.decrypt_requests(), 1);
        assert_eq!(h.ledger.reveal_submissions(), 1);
    }

    #[tokio::test]
    async fn test_inconsistent_decryption_fails_reveal() {
        let h = harness(Some(Address::repeat_byte(0x11))).await;
        let receipt = h.controller.create(&draft("9")).await.unwrap();
        let mut rx = h.controller.status().subscribe();

        h.fhe.corrupt_next_decryption();
        let err = h.controller.reveal(&receipt.id).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Crypto(CryptoError::InconsistentDecryption(_))
        ));
        assert_eq!(h.ledger.reveal_submissions(), 0);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.kind, StatusKind::Error);
        assert!(last.message.starts_with("Decryption failed: "));
    }

    #[tokio::test]
    async fn test_availability() {
        let h = harness(None).await;
        assert!(h.controller.is_read_only());
        assert!(h.controller.check_availability().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_tax_rate_rejected() {
        let kms = Arc::new(LocalKms::new([7u8; 32]));
        let ledger = Arc::new(InMemoryLedger::new(Address::ZERO, None, kms.clone()));
        let config = ClientConfig {
            tax_rate: -1.0,
            ..ClientConfig::default()
        };
        let result = LifecycleController::new(
            ledger,
            CryptoGateway::new(Arc::new(LocalFhe::new(kms))),
            config,
        );
        assert!(matches!(result, Err(ClientError::InvalidInput(_))));
    }
}
