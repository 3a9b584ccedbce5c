//! EVM ledger adapter over JSON-RPC
//!
//! Reads go through `eth_call`; writes are signed locally and sent with
//! `eth_sendTransaction` through the wallet filler; confirmations are polled
//! with `eth_getTransactionReceipt`.

use std::time::{Duration, Instant};

use alloy_network::{EthereumWallet, ReceiptResponse};
use alloy_primitives::{Bytes, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::{TransactionInput, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use greendata_core::{Address, CiphertextHandle, DisclosureProof, Record, RecordId, Verification};

use super::{
    CreateSubmission, LedgerClient, LedgerError, LedgerReceipt, PendingTx, RevealSubmission,
    TxOutcome,
};

sol! {
    struct BusinessData {
        string name;
        bytes32 encryptedValue;
        uint256 publicValue1;
        uint256 publicValue2;
        string description;
        address creator;
        uint256 timestamp;
        bool isVerified;
        uint32 decryptedValue;
    }

    function getAllBusinessIds() external view returns (string[] memory);
    function getBusinessData(string calldata businessId) external view returns (BusinessData memory);
    function getEncryptedValue(string calldata businessId) external view returns (bytes32);
    function isAvailable() external view returns (bool);
    function createBusinessData(
        string calldata businessId,
        string calldata name,
        bytes32 encryptedValue,
        bytes calldata inputProof,
        uint256 publicValue1,
        uint256 publicValue2,
        string calldata description
    ) external;
    function verifyDecryption(
        string calldata businessId,
        bytes calldata abiEncodedClearValues,
        bytes calldata decryptionProof
    ) external;
}

/// Records contract reached through an HTTP JSON-RPC provider
pub struct EvmLedger {
    provider: DynProvider,
    contract: Address,
    signer: Option<Address>,
    poll_interval: Duration,
    confirmation_timeout: Duration,
}

impl EvmLedger {
    /// Read-only ledger: listing and viewing work, writes fail
    pub fn read_only(rpc_url: &str, contract: Address) -> Result<Self, LedgerError> {
        let url = parse_url(rpc_url)?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self::from_parts(provider, contract, None))
    }

    /// Ledger with a local signing key
    pub fn with_signer(
        rpc_url: &str,
        contract: Address,
        signer: PrivateKeySigner,
    ) -> Result<Self, LedgerError> {
        let url = parse_url(rpc_url)?;
        let account = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();
        Ok(Self::from_parts(provider, contract, Some(account)))
    }

    fn from_parts(provider: DynProvider, contract: Address, signer: Option<Address>) -> Self {
        Self {
            provider,
            contract,
            signer,
            poll_interval: Duration::from_secs(1),
            confirmation_timeout: Duration::from_secs(120),
        }
    }

    /// Set how often receipts are polled and when to give up
    pub fn with_confirmation_policy(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.confirmation_timeout = timeout;
        self
    }

    async fn call<C: SolCall>(&self, call: C) -> Result<C::Return, LedgerError> {
        let tx = TransactionRequest::default()
            .to(self.contract)
            .input(TransactionInput::new(Bytes::from(call.abi_encode())));

        let output = self
            .provider
            .call(tx)
            .await
            .map_err(|e| LedgerError::from_rpc_message(e.to_string()))?;

        C::abi_decode_returns(&output).map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn send<C: SolCall>(&self, call: C) -> Result<PendingTx, LedgerError> {
        let from = self.signer.ok_or(LedgerError::Unauthenticated)?;
        let tx = TransactionRequest::default()
            .from(from)
            .to(self.contract)
            .input(TransactionInput::new(Bytes::from(call.abi_encode())));

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| LedgerError::from_rpc_message(e.to_string()))?;

        let hash = *pending.tx_hash();
        tracing::debug!(tx = %hash, "Transaction submitted");
        Ok(PendingTx { hash })
    }
}

fn parse_url(rpc_url: &str) -> Result<reqwest::Url, LedgerError> {
    rpc_url
        .parse()
        .map_err(|e| LedgerError::Rpc(format!("invalid RPC url {}: {}", rpc_url, e)))
}

fn saturating_u64(value: U256) -> u64 {
    value.saturating_to::<u64>()
}

/// Keep the ids this client can address; the contract accepts any string
fn parse_record_ids(raw: Vec<String>) -> Vec<RecordId> {
    raw.into_iter()
        .filter_map(|raw_id| match RecordId::new(raw_id.as_str()) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(id = %raw_id, error = %e, "Skipping record with unsupported id");
                metrics::counter!("greendata_records_skipped_total").increment(1);
                None
            }
        })
        .collect()
}

fn into_record(id: RecordId, data: BusinessData) -> Record {
    let verification = if data.isVerified {
        Verification::Verified {
            plaintext: u64::from(data.decryptedValue),
            proof: DisclosureProof::LedgerAttested,
        }
    } else {
        Verification::Unverified
    };

    Record {
        id,
        name: data.name,
        description: data.description,
        ciphertext: CiphertextHandle(data.encryptedValue),
        public_value1: saturating_u64(data.publicValue1),
        public_value2: saturating_u64(data.publicValue2),
        creator: data.creator,
        created_at: saturating_u64(data.timestamp),
        verification,
    }
}

#[async_trait]
impl LedgerClient for EvmLedger {
    fn contract_address(&self) -> Address {
        self.contract
    }

    fn signer(&self) -> Option<Address> {
        self.signer
    }

    async fn list_record_ids(&self) -> Result<Vec<RecordId>, LedgerError> {
        let raw = self.call(getAllBusinessIdsCall {}).await?;
        Ok(parse_record_ids(raw))
    }

    async fn get_record(&self, id: &RecordId) -> Result<Record, LedgerError> {
        let data = self
            .call(getBusinessDataCall {
                businessId: id.to_string(),
            })
            .await?;

        // Unknown ids come back zeroed
        if data.creator == Address::ZERO {
            return Err(LedgerError::NotFound(id.clone()));
        }
        Ok(into_record(id.clone(), data))
    }

    async fn ciphertext_handle(&self, id: &RecordId) -> Result<CiphertextHandle, LedgerError> {
        let handle = self
            .call(getEncryptedValueCall {
                businessId: id.to_string(),
            })
            .await?;
        Ok(CiphertextHandle(handle))
    }

    async fn is_available(&self) -> Result<bool, LedgerError> {
        self.call(isAvailableCall {}).await
    }

    async fn submit_create(&self, submission: CreateSubmission) -> Result<PendingTx, LedgerError> {
        self.send(createBusinessDataCall {
            businessId: submission.id.to_string(),
            name: submission.name,
            encryptedValue: submission.ciphertext.0,
            inputProof: Bytes::from(submission.input_proof),
            publicValue1: U256::from(submission.public_value1),
            publicValue2: U256::from(submission.public_value2),
            description: submission.description,
        })
        .await
    }

    async fn submit_reveal(&self, submission: RevealSubmission) -> Result<PendingTx, LedgerError> {
        self.send(verifyDecryptionCall {
            businessId: submission.id.to_string(),
            abiEncodedClearValues: Bytes::from(submission.abi_encoded_clear_values),
            decryptionProof: Bytes::from(submission.decryption_proof),
        })
        .await
    }

    async fn await_confirmation(&self, pending: &PendingTx) -> Result<TxOutcome, LedgerError> {
        let started = Instant::now();
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(pending.hash)
                .await
                .map_err(|e| LedgerError::from_rpc_message(e.to_string()))?;

            if let Some(receipt) = receipt {
                let block_number = receipt.block_number();
                return Ok(if receipt.status() {
                    tracing::debug!(tx = %pending.hash, ?block_number, "Transaction confirmed");
                    TxOutcome::Confirmed(LedgerReceipt {
                        tx: pending.hash,
                        block_number,
                    })
                } else {
                    tracing::warn!(tx = %pending.hash, ?block_number, "Transaction reverted");
                    TxOutcome::Reverted {
                        tx: pending.hash,
                        reason: None,
                    }
                });
            }

            if started.elapsed() >= self.confirmation_timeout {
                return Err(LedgerError::ConfirmationTimeout(pending.hash));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn business_data(verified: bool) -> BusinessData {
        BusinessData {
            name: "Plant".into(),
            encryptedValue: B256::repeat_byte(0x42),
            publicValue1: U256::from(100u64),
            publicValue2: U256::from(15u64),
            description: "north".into(),
            creator: Address::repeat_byte(0x11),
            timestamp: U256::from(1_700_000_000u64),
            isVerified: verified,
            decryptedValue: if verified { 98 } else { 0 },
        }
    }

    #[test]
    fn test_unsupported_ids_are_skipped() {
        let raw = vec![
            "energy-1".to_string(),
            "Plant 7 (legacy)".to_string(),
            "energy-2".to_string(),
        ];
        let ids = parse_record_ids(raw);

        assert_eq!(
            ids,
            vec![RecordId::new("energy-1").unwrap(), RecordId::new("energy-2").unwrap()]
        );
    }

    #[test]
    fn test_into_record_unverified() {
        let id = RecordId::new("energy-1").unwrap();
        let record = into_record(id.clone(), business_data(false));

        assert_eq!(record.id, id);
        assert_eq!(record.ciphertext, CiphertextHandle(B256::repeat_byte(0x42)));
        assert_eq!(record.public_value1, 100);
        assert_eq!(record.public_value2, 15);
        assert_eq!(record.created_at, 1_700_000_000);
        assert_eq!(record.verification, Verification::Unverified);
    }

    #[test]
    fn test_into_record_verified_is_ledger_attested() {
        let record = into_record(RecordId::new("energy-1").unwrap(), business_data(true));
        assert_eq!(
            record.verification,
            Verification::Verified {
                plaintext: 98,
                proof: DisclosureProof::LedgerAttested,
            }
        );
    }

    #[test]
    fn test_oversized_public_values_saturate() {
        let mut data = business_data(false);
        data.publicValue1 = U256::MAX;
        let record = into_record(RecordId::new("energy-1").unwrap(), data);
        assert_eq!(record.public_value1, u64::MAX);
    }

    #[test]
    fn test_reveal_calldata_selector() {
        let call = verifyDecryptionCall {
            businessId: "energy-1".into(),
            abiEncodedClearValues: Bytes::from(vec![0u8; 32]),
            decryptionProof: Bytes::from(vec![1u8; 65]),
        };
        let data = call.abi_encode();
        assert_eq!(&data[..4], &verifyDecryptionCall::SELECTOR);
    }

    #[test]
    fn test_read_only_rejects_bad_url() {
        assert!(EvmLedger::read_only("not a url", Address::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_read_only_cannot_write() {
        let ledger = EvmLedger::read_only("http://localhost:8545", Address::ZERO).unwrap();
        assert_eq!(ledger.signer(), None);

        let err = ledger
            .submit_reveal(RevealSubmission {
                id: RecordId::new("energy-1").unwrap(),
                abi_encoded_clear_values: vec![],
                decryption_proof: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Unauthenticated);
    }
}
