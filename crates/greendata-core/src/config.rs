//! Client configuration

use std::path::Path;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::constants::RECENT_WINDOW_SECS;
use crate::{Error, TaxPolicy};

/// Carbon tax rate applied to declared consumption
pub const DEFAULT_TAX_RATE: f64 = 0.15;

/// Records per page in listings
pub const DEFAULT_PAGE_SIZE: usize = 5;

/// How long a status event stays visible, per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusTimeouts {
    pub success_ms: u64,
    pub error_ms: u64,
    pub pending_ms: u64,
}

impl Default for StatusTimeouts {
    fn default() -> Self {
        Self {
            success_ms: 2_000,
            error_ms: 3_000,
            pending_ms: 60_000,
        }
    }
}

/// Configuration shared by the ledger, crypto and lifecycle layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// JSON-RPC endpoint of the ledger
    pub rpc_url: String,
    /// FHE relayer endpoint
    pub relayer_url: String,
    /// Address of the energy records contract
    pub contract_address: Option<Address>,
    pub tax_rate: f64,
    pub page_size: usize,
    pub recent_window_secs: u64,
    /// Concurrent `getRecord` calls during a refresh
    pub refresh_concurrency: usize,
    pub confirmation_poll_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub status: StatusTimeouts,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            relayer_url: "http://localhost:3001".to_string(),
            contract_address: None,
            tax_rate: DEFAULT_TAX_RATE,
            page_size: DEFAULT_PAGE_SIZE,
            recent_window_secs: RECENT_WINDOW_SECS,
            refresh_concurrency: 8,
            confirmation_poll_ms: 1_000,
            confirmation_timeout_secs: 120,
            status: StatusTimeouts::default(),
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> crate::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        TaxPolicy::new(self.tax_rate)?;
        if self.page_size == 0 {
            return Err(Error::InvalidConfig("page_size must be at least 1".into()));
        }
        if self.refresh_concurrency == 0 {
            return Err(Error::InvalidConfig(
                "refresh_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn tax_policy(&self) -> crate::Result<TaxPolicy> {
        TaxPolicy::new(self.tax_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_size, 5);
        assert_eq!(config.tax_policy().unwrap().tax_for(100), 15);
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tax_rate": 0.2, "contract_address": "0x1111111111111111111111111111111111111111"}}"#
        )
        .unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.tax_rate, 0.2);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(
            config.contract_address,
            Some(Address::repeat_byte(0x11))
        );
        assert_eq!(config.status, StatusTimeouts::default());
    }

    #[test]
    fn test_load_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"page_size": 0}}"#).unwrap();
        assert!(matches!(
            ClientConfig::load(file.path()),
            Err(Error::InvalidConfig(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tax_rate": -1.0}}"#).unwrap();
        assert!(ClientConfig::load(file.path()).is_err());
    }
}
