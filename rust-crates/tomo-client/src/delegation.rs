use crate::program::DELEGATION_PROGRAM_ID;
use solana_sdk::pubkey::Pubkey;

/// Classifies an account by the program that currently owns it on the base ledger.
#[derive(Clone, Copy, Debug)]
pub struct DelegationOracle {
    delegation_program_id: Pubkey,
}

impl DelegationOracle {
    pub fn new(delegation_program_id: Pubkey) -> Self {
        Self {
            delegation_program_id,
        }
    }

    /// The owner field is the only signal; the record itself carries no status.
    pub fn is_delegated(&self, controlling_authority: &Pubkey) -> bool {
        *controlling_authority == self.delegation_program_id
    }
}

impl Default for DelegationOracle {
    fn default() -> Self {
        Self::new(DELEGATION_PROGRAM_ID)
    }
}
