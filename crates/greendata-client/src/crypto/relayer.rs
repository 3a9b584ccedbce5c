//! HTTP FHE relayer capability
//!
//! `initialize` fetches the relayer's public key material; encryption and
//! public decryption are then served by the relayer:
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `GET /keys` | public key id and parameter version |
//! | `POST /v1/input-proof` | encrypt values, return handles + input proof |
//! | `POST /v1/public-decrypt` | clear values + decryption proof for handles |

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::B256;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use greendata_core::{Address, CiphertextHandle};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{CryptoError, EncryptedInput, FheCapability, PublicDecryption};

/// Key material returned by `GET /keys`
#[derive(Debug, Clone, Deserialize)]
pub struct RelayerKeys {
    pub key_id: String,
    pub params_version: u16,
}

#[derive(Serialize)]
struct InputProofRequest<'a> {
    contract_address: Address,
    user_address: Address,
    key_id: &'a str,
    values: Vec<u32>,
}

#[derive(Deserialize)]
struct InputProofResponse {
    handles: Vec<B256>,
    input_proof: String,
}

#[derive(Serialize)]
struct PublicDecryptRequest {
    handles: Vec<B256>,
}

#[derive(Deserialize)]
struct PublicDecryptResponse {
    clear_values: BTreeMap<String, String>,
    abi_encoded_clear_values: String,
    decryption_proof: String,
}

/// FHE capability served by a remote relayer
pub struct RelayerCapability {
    http: Client,
    relayer_url: String,
    keys: ArcSwapOption<RelayerKeys>,
}

impl RelayerCapability {
    pub fn new(relayer_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            relayer_url: relayer_url.into().trim_end_matches('/').to_string(),
            keys: ArcSwapOption::empty(),
        }
    }

    fn keys(&self) -> Result<Arc<RelayerKeys>, CryptoError> {
        self.keys.load_full().ok_or(CryptoError::NotInitialized)
    }

    async fn check<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, CryptoError> {
        if !resp.status().is_success() {
            return Err(CryptoError::Relayer {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CryptoError> {
        let url = format!("{}{}", self.relayer_url, path);
        let resp = self.http.post(&url).json(body).send().await?;
        Self::check(resp).await
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(value.trim_start_matches("0x")).map_err(|e| {
        CryptoError::InconsistentDecryption(format!("{} is not valid hex: {}", field, e))
    })
}

#[async_trait]
impl FheCapability for RelayerCapability {
    async fn initialize(&self) -> Result<(), CryptoError> {
        let url = format!("{}/keys", self.relayer_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CryptoError::EncryptionUnavailable(e.to_string()))?;
        let keys: RelayerKeys = Self::check(resp).await?;

        tracing::info!(
            key_id = %keys.key_id,
            params_version = keys.params_version,
            "Relayer keys loaded"
        );
        self.keys.store(Some(Arc::new(keys)));
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.keys.load().is_some()
    }

    async fn encrypt_u32(
        &self,
        contract: Address,
        account: Address,
        value: u32,
    ) -> Result<EncryptedInput, CryptoError> {
        let keys = self.keys()?;
        let resp: InputProofResponse = self
            .post(
                "/v1/input-proof",
                &InputProofRequest {
                    contract_address: contract,
                    user_address: account,
                    key_id: &keys.key_id,
                    values: vec![value],
                },
            )
            .await?;

        let handle = match resp.handles.as_slice() {
            [handle] => CiphertextHandle(*handle),
            other => {
                return Err(CryptoError::InconsistentDecryption(format!(
                    "expected 1 handle, relayer returned {}",
                    other.len()
                )))
            }
        };

        Ok(EncryptedInput {
            handle,
            input_proof: decode_hex("input_proof", &resp.input_proof)?,
        })
    }

    async fn public_decrypt(
        &self,
        handles: &[CiphertextHandle],
    ) -> Result<PublicDecryption, CryptoError> {
        self.keys()?;
        let resp: PublicDecryptResponse = self
            .post(
                "/v1/public-decrypt",
                &PublicDecryptRequest {
                    handles: handles.iter().map(|h| h.0).collect(),
                },
            )
            .await?;

        let mut clear_values = BTreeMap::new();
        for (handle, value) in resp.clear_values {
            let handle: B256 = handle.parse().map_err(|_| {
                CryptoError::InconsistentDecryption(format!("invalid handle {:?}", handle))
            })?;
            let value: u64 = value.parse().map_err(|_| {
                CryptoError::InconsistentDecryption(format!(
                    "clear value for {} is not an integer: {:?}",
                    handle, value
                ))
            })?;
            clear_values.insert(CiphertextHandle(handle), value);
        }

        Ok(PublicDecryption {
            clear_values,
            abi_encoded_clear_values: decode_hex(
                "abi_encoded_clear_values",
                &resp.abi_encoded_clear_values,
            )?,
            decryption_proof: decode_hex("decryption_proof", &resp.decryption_proof)?,
        })
    }
}
