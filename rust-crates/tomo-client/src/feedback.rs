//! Turns client errors into what the player should see.

use crate::{
    Error,
    FailureStage,
};

const MAX_MESSAGE_LEN: usize = 100;

/// `None` means show nothing: the user backed out on purpose.
pub fn user_message(err: &Error) -> Option<String> {
    let message = match err {
        Error::UserCancelled => return None,
        Error::SignerUnavailable(_) => "Please connect your wallet first".to_string(),
        Error::InsufficientBalance { .. } => {
            "Not enough coins to feed. Collect more coins first".to_string()
        }
        Error::LedgerUnavailable { .. } => {
            "Network is unreachable right now. Please try again".to_string()
        }
        Error::TransactionFailed {
            stage: FailureStage::Expired,
            ..
        } => "Transaction expired. Please try again".to_string(),
        Error::TransactionFailed {
            signature: Some(signature),
            stage: FailureStage::Submission,
            ..
        } => format!("Transaction may have been sent. Check {signature} before retrying"),
        Error::TransactionFailed {
            signature: None, ..
        } => "Transaction could not be sent. Please try again".to_string(),
        Error::TransactionFailed {
            signature: Some(signature),
            ..
        } => format!("Transaction failed. Check {signature} before retrying"),
        Error::EntityNotFound(_) => "No tomo found for this tag. Hatch one first".to_string(),
        other => other.to_string(),
    };
    Some(truncate(message))
}

fn truncate(message: String) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        return message;
    }
    let cut: String = message.chars().take(MAX_MESSAGE_LEN).collect();
    format!("{cut}...")
}
