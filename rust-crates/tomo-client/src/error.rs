use solana_sdk::signature::Signature;
use std::fmt;

/// Where a transaction stopped on its way to confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Never left the client.
    Signing,
    /// The send call errored. The endpoint may still have accepted it.
    Submission,
    /// The ledger executed it and reported an error.
    Rejected,
    /// The blockhash ran out before a confirmation was seen.
    Expired,
    /// Submitted, but its status could not be read.
    Confirmation,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            FailureStage::Signing => "signing",
            FailureStage::Submission => "submission",
            FailureStage::Rejected => "rejected",
            FailureStage::Expired => "expired",
            FailureStage::Confirmation => "confirmation",
        };
        f.write_str(stage)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid identifier: {reason}")]
    InvalidIdentifier { reason: String },

    #[error("ledger at {endpoint} unavailable: {reason}")]
    LedgerUnavailable { endpoint: String, reason: String },

    #[error("malformed account data: {0}")]
    MalformedAccount(String),

    #[error("no signer available: {0}")]
    SignerUnavailable(String),

    #[error("user cancelled the signing request")]
    UserCancelled,

    #[error("transaction failed at {stage}{}: {reason}", signature_suffix(.signature))]
    TransactionFailed {
        /// Present once the transaction was signed and handed to the endpoint.
        signature: Option<Signature>,
        stage: FailureStage,
        reason: String,
    },

    #[error("not enough reward balance{}", signature_suffix(.signature))]
    InsufficientBalance { signature: Option<Signature> },

    #[error("no entity registered for identifier '{0}'")]
    EntityNotFound(String),

    #[error("{action} not permitted: {reason}")]
    ActionNotPermitted {
        action: &'static str,
        reason: String,
    },

    #[error("secure store error: {0}")]
    SecureStore(String),
}

fn signature_suffix(signature: &Option<Signature>) -> String {
    match signature {
        Some(sig) => format!(" (signature {sig})"),
        None => String::new(),
    }
}

impl Error {
    pub fn invalid_identifier(reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            reason: reason.into(),
        }
    }

    pub fn ledger(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::LedgerUnavailable {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn not_permitted(action: &'static str, reason: impl Into<String>) -> Self {
        Self::ActionNotPermitted {
            action,
            reason: reason.into(),
        }
    }

    /// Errors a caller may reasonably retry after a short wait.
    ///
    /// A failed send is not one of them: the transaction may have landed, so
    /// its signature has to be checked first.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::LedgerUnavailable { .. } => true,
            Error::TransactionFailed { stage, .. } => {
                matches!(stage, FailureStage::Signing | FailureStage::Expired)
            }
            _ => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(
            self,
            Error::TransactionFailed {
                stage: FailureStage::Expired,
                ..
            }
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::UserCancelled)
    }

    /// Signature of a transaction that was handed to the ledger, if any.
    pub fn submitted_signature(&self) -> Option<&Signature> {
        match self {
            Error::TransactionFailed { signature, .. }
            | Error::InsufficientBalance { signature } => signature.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn is_transient__ledger_unavailable__true() {
        let err = Error::ledger("http://localhost:8899", "connection refused");
        assert!(err.is_transient());
    }

    #[test]
    fn is_transient__submitted_rejection__false() {
        // given
        let err = Error::TransactionFailed {
            signature: Some(Signature::default()),
            stage: FailureStage::Rejected,
            reason: "custom program error: 0x1".to_string(),
        };

        // then
        assert!(!err.is_transient());
        assert_eq!(err.submitted_signature(), Some(&Signature::default()));
    }

    #[test]
    fn is_transient__send_errored__false_and_signature_kept() {
        // given
        let err = Error::TransactionFailed {
            signature: Some(Signature::default()),
            stage: FailureStage::Submission,
            reason: "request timed out".to_string(),
        };

        // then
        assert!(!err.is_transient());
        assert!(err.submitted_signature().is_some());
    }

    #[test]
    fn is_expired__wallet_session_expired__false() {
        // given
        let err = Error::TransactionFailed {
            signature: None,
            stage: FailureStage::Signing,
            reason: "wallet refused to sign: session expired".to_string(),
        };

        // then
        assert!(!err.is_expired());
        assert!(err.is_transient());
    }

    #[test]
    fn display__transaction_failed_without_signature__omits_suffix() {
        let err = Error::TransactionFailed {
            signature: None,
            stage: FailureStage::Signing,
            reason: "wallet locked".to_string(),
        };
        assert_eq!(err.to_string(), "transaction failed at signing: wallet locked");
    }
}
