//! In-progress record creation input

use serde::{Deserialize, Serialize};

use crate::constants::MAX_CONSUMPTION;
use crate::Error;

/// Fields of a record being created, as typed by the user.
///
/// Never persisted. Discarded by the caller on success or cancel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDraft {
    pub name: String,
    /// Consumption as entered; digits only once validated
    pub consumption: String,
    pub description: String,
}

/// A draft that passed validation and may be encrypted and submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidDraft {
    pub name: String,
    pub consumption: u64,
    pub description: String,
}

impl PendingDraft {
    pub fn new(
        name: impl Into<String>,
        consumption: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            consumption: consumption.into(),
            description: description.into(),
        }
    }

    /// Keep only the digits of a consumption input, as an input field would
    pub fn sanitize_consumption(input: &str) -> String {
        input.chars().filter(|c| c.is_ascii_digit()).collect()
    }

    /// Validate the draft before anything is encrypted or submitted.
    ///
    /// The name must be non-empty after trimming. The consumption must be a
    /// plain non-negative integer that fits the ledger's 32-bit ciphertext.
    pub fn validate(&self) -> crate::Result<ValidDraft> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }

        let raw = self.consumption.trim();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidConsumption(self.consumption.clone()));
        }
        let consumption: u64 = raw
            .parse()
            .map_err(|_| Error::InvalidConsumption(self.consumption.clone()))?;
        if consumption > MAX_CONSUMPTION {
            return Err(Error::ConsumptionOutOfRange {
                value: consumption,
                max: MAX_CONSUMPTION,
            });
        }

        Ok(ValidDraft {
            name: name.to_string(),
            consumption,
            description: self.description.trim().to_string(),
        })
    }
}
