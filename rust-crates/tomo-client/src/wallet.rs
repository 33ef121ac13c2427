use solana_sdk::{
    pubkey::Pubkey,
    transaction::Transaction,
};

/// Identifies the chain and the requesting app to the wallet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChainDescriptor {
    pub chain_id: String,
    pub app_name: String,
    pub app_uri: String,
}

/// Result of asking the primary wallet to sign.
#[derive(Debug)]
pub enum SignOutcome {
    Signed(Transaction),
    /// The user backed out. Not a fault.
    Cancelled,
    Failed(String),
}

/// The user's primary wallet, possibly living outside this process.
pub trait ExternalWallet {
    /// `None` while no wallet is connected.
    fn public_key(&self) -> Option<Pubkey>;

    /// May suspend for as long as the user takes to approve.
    fn sign_transaction(
        &self,
        transaction: Transaction,
        chain: &ChainDescriptor,
    ) -> impl Future<Output = SignOutcome>;
}
