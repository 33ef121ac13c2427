use crate::{
    Error,
    Result,
    program::{
        BUFFER_SEED,
        CRANK_PAYER_SEED,
        DELEGATION_METADATA_SEED,
        DELEGATION_PROGRAM_ID,
        DELEGATION_RECORD_SEED,
        ENTITY_SEED,
        MAX_IDENTIFIER_LEN,
        PROGRAM_IDENTITY_SEED,
        TOMO_PROGRAM_ID,
    },
};
use solana_sdk::pubkey::Pubkey;

/// Derives every program-owned address this client needs from an entity identifier.
#[derive(Clone, Copy, Debug)]
pub struct AddressDeriver {
    program_id: Pubkey,
    delegation_program_id: Pubkey,
}

/// Bookkeeping accounts the delegation program touches for one delegated account.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DelegationAccounts {
    pub buffer: Pubkey,
    pub record: Pubkey,
    pub metadata: Pubkey,
}

impl AddressDeriver {
    pub fn new(program_id: Pubkey, delegation_program_id: Pubkey) -> Self {
        Self {
            program_id,
            delegation_program_id,
        }
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    pub fn delegation_program_id(&self) -> Pubkey {
        self.delegation_program_id
    }

    /// Fails instead of truncating: the program derives from the raw bytes.
    pub fn entity_address(&self, identifier: &str) -> Result<Pubkey> {
        validate_identifier(identifier)?;
        let (address, _bump) = Pubkey::find_program_address(
            &[ENTITY_SEED, identifier.as_bytes()],
            &self.program_id,
        );
        Ok(address)
    }

    /// The relay payer that funds crank transactions for an entity.
    pub fn relay_payer_address(&self, entity: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[CRANK_PAYER_SEED, entity.as_ref()], &self.program_id)
            .0
    }

    pub fn delegation_accounts(&self, delegated: &Pubkey) -> DelegationAccounts {
        let buffer =
            Pubkey::find_program_address(&[BUFFER_SEED, delegated.as_ref()], &self.program_id)
                .0;
        let record = Pubkey::find_program_address(
            &[DELEGATION_RECORD_SEED, delegated.as_ref()],
            &self.delegation_program_id,
        )
        .0;
        let metadata = Pubkey::find_program_address(
            &[DELEGATION_METADATA_SEED, delegated.as_ref()],
            &self.delegation_program_id,
        )
        .0;
        DelegationAccounts {
            buffer,
            record,
            metadata,
        }
    }

    /// Signer identity the program uses when requesting randomness.
    pub fn program_identity(&self) -> Pubkey {
        Pubkey::find_program_address(&[PROGRAM_IDENTITY_SEED], &self.program_id).0
    }
}

impl Default for AddressDeriver {
    fn default() -> Self {
        Self::new(TOMO_PROGRAM_ID, DELEGATION_PROGRAM_ID)
    }
}

/// Entity address under the default program deployment.
pub fn derive_entity_address(identifier: &str) -> Result<Pubkey> {
    AddressDeriver::default().entity_address(identifier)
}

pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(Error::invalid_identifier("identifier is empty"));
    }
    let len = identifier.len();
    if len > MAX_IDENTIFIER_LEN {
        return Err(Error::invalid_identifier(format!(
            "identifier is {len} bytes, maximum is {MAX_IDENTIFIER_LEN}"
        )));
    }
    Ok(())
}
