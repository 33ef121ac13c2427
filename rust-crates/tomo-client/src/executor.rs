use crate::{
    Error,
    FailureStage,
    Result,
    ledger::{
        FreshnessToken,
        LedgerClient,
        LedgerKind,
    },
    local_identity::LocalSigningIdentity,
    program::NOT_ENOUGH_COINS_ERROR,
    secure_store::SecureStore,
    wallet::{
        ChainDescriptor,
        ExternalWallet,
        SignOutcome,
    },
};
use solana_sdk::{
    instruction::{
        Instruction,
        InstructionError,
    },
    pubkey::Pubkey,
    signature::Signature,
    signer::Signer,
    transaction::{
        Transaction,
        TransactionError,
    },
};
use std::{
    sync::Arc,
    time::Duration,
};
use tracing::{
    debug,
    info,
    warn,
};

/// A signing identity able to pay for and sign a transaction.
pub trait TransactionSigner {
    /// Must fail with [`Error::SignerUnavailable`] without touching the network.
    fn fee_payer(&self) -> impl Future<Output = Result<Pubkey>>;

    fn sign(&self, transaction: Transaction) -> impl Future<Output = Result<Transaction>>;
}

/// Signs through the user's primary wallet.
pub struct WalletSigner<W> {
    wallet: Arc<W>,
    chain: ChainDescriptor,
}

impl<W> WalletSigner<W> {
    pub fn new(wallet: Arc<W>, chain: ChainDescriptor) -> Self {
        Self { wallet, chain }
    }
}

impl<W: ExternalWallet> TransactionSigner for WalletSigner<W> {
    async fn fee_payer(&self) -> Result<Pubkey> {
        self.wallet
            .public_key()
            .ok_or_else(|| Error::SignerUnavailable("no wallet connected".to_string()))
    }

    async fn sign(&self, transaction: Transaction) -> Result<Transaction> {
        match self.wallet.sign_transaction(transaction, &self.chain).await {
            SignOutcome::Signed(signed) => Ok(signed),
            SignOutcome::Cancelled => Err(Error::UserCancelled),
            SignOutcome::Failed(reason) => Err(Error::TransactionFailed {
                signature: None,
                stage: FailureStage::Signing,
                reason: format!("wallet refused to sign: {reason}"),
            }),
        }
    }
}

/// Signs locally with the client-held identity. Never creates it.
pub struct LocalSigner<S> {
    identity: Arc<LocalSigningIdentity<S>>,
}

impl<S> LocalSigner<S> {
    pub fn new(identity: Arc<LocalSigningIdentity<S>>) -> Self {
        Self { identity }
    }
}

impl<S: SecureStore> LocalSigner<S> {
    async fn keypair(&self) -> Result<Arc<solana_sdk::signature::Keypair>> {
        self.identity.get().await?.ok_or_else(|| {
            Error::SignerUnavailable("local signing identity not created yet".to_string())
        })
    }
}

impl<S: SecureStore> TransactionSigner for LocalSigner<S> {
    async fn fee_payer(&self) -> Result<Pubkey> {
        Ok(self.keypair().await?.pubkey())
    }

    async fn sign(&self, mut transaction: Transaction) -> Result<Transaction> {
        let keypair = self.keypair().await?;
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_sign(&[keypair.as_ref()], blockhash)
            .map_err(|e| Error::TransactionFailed {
                signature: None,
                stage: FailureStage::Signing,
                reason: format!("local signing failed: {e}"),
            })?;
        Ok(transaction)
    }
}

/// Builds, signs, submits and confirms transactions against one ledger.
///
/// There is no retry in here. A state-changing transaction submitted twice
/// may apply twice, so retry policy belongs to the caller.
pub struct TransactionExecutor<L, S> {
    ledger: Arc<L>,
    signer: S,
    kind: LedgerKind,
    poll_interval: Duration,
}

impl<L, S> TransactionExecutor<L, S>
where
    L: LedgerClient,
    S: TransactionSigner,
{
    pub fn new(ledger: Arc<L>, signer: S, kind: LedgerKind, poll_interval: Duration) -> Self {
        Self {
            ledger,
            signer,
            kind,
            poll_interval,
        }
    }

    pub fn kind(&self) -> LedgerKind {
        self.kind
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub async fn fee_payer(&self) -> Result<Pubkey> {
        self.signer.fee_payer().await
    }

    /// `build` receives the fee payer and returns the instructions to send.
    pub async fn execute<F>(&self, action: &str, build: F) -> Result<Signature>
    where
        F: FnOnce(&Pubkey) -> Result<Vec<Instruction>>,
    {
        let payer = self.signer.fee_payer().await?;
        let instructions = build(&payer)?;

        let token = self.ledger.latest_blockhash().await?;
        let mut transaction = Transaction::new_with_payer(&instructions, Some(&payer));
        transaction.message.recent_blockhash = token.blockhash;

        let transaction = self.signer.sign(transaction).await?;
        let signed = transaction.signatures.first().copied();

        let signature = match self.ledger.send_transaction(&transaction).await {
            Ok(signature) => signature,
            Err(e) => {
                warn!(
                    action,
                    ledger = %self.kind,
                    signature = ?signed,
                    error = %e,
                    "submission errored, outcome unknown"
                );
                return Err(Error::TransactionFailed {
                    signature: signed,
                    stage: FailureStage::Submission,
                    reason: format!("submission failed: {e}"),
                });
            }
        };
        debug!(
            action,
            ledger = %self.kind,
            endpoint = self.ledger.endpoint(),
            %signature,
            "transaction submitted"
        );

        self.confirm(action, signature, token).await?;
        info!(action, ledger = %self.kind, %signature, "transaction confirmed");
        Ok(signature)
    }

    async fn confirm(
        &self,
        action: &str,
        signature: Signature,
        token: FreshnessToken,
    ) -> Result<()> {
        let unconfirmed = |stage: FailureStage, reason: String| Error::TransactionFailed {
            signature: Some(signature),
            stage,
            reason,
        };

        loop {
            let status = self
                .ledger
                .signature_status(&signature)
                .await
                .map_err(|e| {
                    unconfirmed(
                        FailureStage::Confirmation,
                        format!("confirmation lookup failed: {e}"),
                    )
                })?;
            match status {
                Some(Ok(())) => return Ok(()),
                Some(Err(err)) => {
                    warn!(action, ledger = %self.kind, %signature, error = %err, "transaction rejected");
                    return Err(rejection(signature, err));
                }
                None => {}
            }

            let height = self
                .ledger
                .block_height()
                .await
                .map_err(|e| {
                    unconfirmed(
                        FailureStage::Confirmation,
                        format!("confirmation lookup failed: {e}"),
                    )
                })?;
            if height > token.last_valid_block_height {
                warn!(action, ledger = %self.kind, %signature, "blockhash expired before confirmation");
                return Err(unconfirmed(
                    FailureStage::Expired,
                    format!(
                        "blockhash expired at block height {height} (valid until {})",
                        token.last_valid_block_height
                    ),
                ));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn rejection(signature: Signature, err: TransactionError) -> Error {
    match err {
        TransactionError::InstructionError(_, InstructionError::Custom(code))
            if code == NOT_ENOUGH_COINS_ERROR =>
        {
            Error::InsufficientBalance {
                signature: Some(signature),
            }
        }
        other => Error::TransactionFailed {
            signature: Some(signature),
            stage: FailureStage::Rejected,
            reason: other.to_string(),
        },
    }
}
