use crate::{
    Error,
    Result,
};
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_config::RpcSendTransactionConfig,
};
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{
        Transaction,
        TransactionError,
    },
};
use std::{
    fmt,
    sync::Arc,
};

/// `None` while the ledger has not seen the signature yet.
pub type TransactionStatus = Option<std::result::Result<(), TransactionError>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LedgerKind {
    Base,
    Rollup,
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedgerKind::Base => "base",
            LedgerKind::Rollup => "rollup",
        };
        write!(f, "{name}")
    }
}

/// Recent blockhash plus the last block height at which it is still accepted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FreshnessToken {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Account-fetch and transaction-submit protocol shared by both ledgers.
pub trait LedgerClient {
    fn endpoint(&self) -> &str;

    fn get_account(
        &self,
        address: &Pubkey,
    ) -> impl Future<Output = Result<Option<Account>>>;

    fn latest_blockhash(&self) -> impl Future<Output = Result<FreshnessToken>>;

    /// Submits without preflight simulation.
    fn send_transaction(
        &self,
        transaction: &Transaction,
    ) -> impl Future<Output = Result<Signature>>;

    fn signature_status(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<TransactionStatus>>;

    fn block_height(&self) -> impl Future<Output = Result<u64>>;
}

#[derive(Clone)]
pub struct RpcLedger {
    endpoint: String,
    rpc: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl RpcLedger {
    pub fn new(endpoint: impl Into<String>, commitment: CommitmentConfig) -> Self {
        let endpoint = endpoint.into();
        let rpc = RpcClient::new_with_commitment(endpoint.clone(), commitment);
        Self {
            endpoint,
            rpc: Arc::new(rpc),
            commitment,
        }
    }

    fn unavailable(&self, err: impl fmt::Display) -> Error {
        Error::ledger(self.endpoint.clone(), err)
    }
}

impl LedgerClient for RpcLedger {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        let response = self
            .rpc
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(response.value)
    }

    async fn latest_blockhash(&self) -> Result<FreshnessToken> {
        let (blockhash, last_valid_block_height) = self
            .rpc
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(FreshnessToken {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            preflight_commitment: Some(self.commitment.commitment),
            ..RpcSendTransactionConfig::default()
        };
        self.rpc
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| self.unavailable(e))
    }

    async fn signature_status(&self, signature: &Signature) -> Result<TransactionStatus> {
        self.rpc
            .get_signature_status_with_commitment(signature, self.commitment)
            .await
            .map_err(|e| self.unavailable(e))
    }

    async fn block_height(&self) -> Result<u64> {
        self.rpc
            .get_block_height_with_commitment(self.commitment)
            .await
            .map_err(|e| self.unavailable(e))
    }
}

impl<L: LedgerClient> LedgerClient for Arc<L> {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    fn get_account(
        &self,
        address: &Pubkey,
    ) -> impl Future<Output = Result<Option<Account>>> {
        (**self).get_account(address)
    }

    fn latest_blockhash(&self) -> impl Future<Output = Result<FreshnessToken>> {
        (**self).latest_blockhash()
    }

    fn send_transaction(
        &self,
        transaction: &Transaction,
    ) -> impl Future<Output = Result<Signature>> {
        (**self).send_transaction(transaction)
    }

    fn signature_status(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<TransactionStatus>> {
        (**self).signature_status(signature)
    }

    fn block_height(&self) -> impl Future<Output = Result<u64>> {
        (**self).block_height()
    }
}
