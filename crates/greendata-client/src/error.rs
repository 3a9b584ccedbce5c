//! Error type for lifecycle operations

use greendata_core::RecordId;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::ledger::LedgerError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Please connect wallet first")]
    Unauthenticated,

    #[error("{0}")]
    InvalidInput(#[from] greendata_core::Error),

    #[error(transparent)]
    Crypto(CryptoError),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error("Record {0} is not verified on the ledger")]
    NotVerified(RecordId),

    #[error("Operation task failed: {0}")]
    TaskAborted(String),
}

impl From<LedgerError> for ClientError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unauthenticated => ClientError::Unauthenticated,
            other => ClientError::Ledger(other),
        }
    }
}

impl From<CryptoError> for ClientError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Anchoring(LedgerError::Unauthenticated) => ClientError::Unauthenticated,
            other => ClientError::Crypto(other),
        }
    }
}

impl From<tokio::task::JoinError> for ClientError {
    fn from(e: tokio::task::JoinError) -> Self {
        ClientError::TaskAborted(e.to_string())
    }
}

impl ClientError {
    /// Short machine-readable category, used as a metrics label
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Unauthenticated => "unauthenticated",
            ClientError::InvalidInput(_) => "invalid_input",
            ClientError::Crypto(_) => "crypto",
            ClientError::Ledger(e) if e.is_user_rejection() => "user_rejected",
            ClientError::Ledger(_) => "ledger",
            ClientError::NotVerified(_) => "not_verified",
            ClientError::TaskAborted(_) => "aborted",
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        match self {
            ClientError::Ledger(e) => e.is_user_rejection(),
            ClientError::Crypto(CryptoError::Anchoring(e)) => e.is_user_rejection(),
            _ => false,
        }
    }

    /// Message for the status channel, e.g. "Upload failed: ..."
    pub fn user_message(&self, context: &str) -> String {
        match self {
            _ if self.is_user_rejection() => "Transaction rejected by user".to_string(),
            ClientError::Unauthenticated => self.to_string(),
            other => format!("{}: {}", context, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_is_lifted() {
        assert_eq!(
            ClientError::from(LedgerError::Unauthenticated),
            ClientError::Unauthenticated
        );
        assert_eq!(
            ClientError::from(CryptoError::Anchoring(LedgerError::Unauthenticated)),
            ClientError::Unauthenticated
        );
    }

    #[test]
    fn test_user_messages() {
        let rejected = ClientError::from(LedgerError::UserRejected("denied".into()));
        assert!(rejected.is_user_rejection());
        assert_eq!(rejected.code(), "user_rejected");
        assert_eq!(rejected.user_message("Upload failed"), "Transaction rejected by user");

        let anchored = ClientError::from(CryptoError::Anchoring(LedgerError::UserRejected(
            "denied".into(),
        )));
        assert!(anchored.is_user_rejection());

        let failed = ClientError::from(LedgerError::Rpc("connection refused".into()));
        assert_eq!(
            failed.user_message("Upload failed"),
            "Upload failed: RPC error: connection refused"
        );
        assert_eq!(
            ClientError::Unauthenticated.user_message("Upload failed"),
            "Please connect wallet first"
        );
    }
}
