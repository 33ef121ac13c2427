//! Builders for the program's instructions.
//!
//! Every instruction is `discriminator ‖ args`, with strings encoded as a
//! u32 LE length followed by UTF-8 bytes and integers little-endian.

use crate::{
    Result,
    address::AddressDeriver,
    program::{
        MAGIC_CONTEXT_ID,
        MAGIC_PROGRAM_ID,
        VRF_ORACLE_QUEUE,
        VRF_PROGRAM_ID,
        discriminators,
    },
};
use solana_sdk::{
    instruction::{
        AccountMeta,
        Instruction,
    },
    pubkey::Pubkey,
    system_program,
    sysvar,
};

/// Schedule for the rollup crank that fires random events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CrankSchedule {
    pub task_id: u64,
    pub interval_millis: u64,
    pub iterations: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InstructionBuilder {
    deriver: AddressDeriver,
}

impl InstructionBuilder {
    pub fn new(deriver: AddressDeriver) -> Self {
        Self { deriver }
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    pub fn init(&self, identifier: &str, payer: &Pubkey) -> Result<Instruction> {
        let tomo = self.deriver.entity_address(identifier)?;
        let crank_payer = self.deriver.relay_payer_address(&tomo);
        Ok(self.instruction(
            ArgWriter::new(discriminators::INIT).string(identifier),
            vec![
                AccountMeta::new(tomo, false),
                AccountMeta::new(crank_payer, false),
                AccountMeta::new(*payer, true),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
        ))
    }

    pub fn get_coin(&self, identifier: &str) -> Result<Instruction> {
        self.entity_only(identifier, ArgWriter::new(discriminators::GET_COIN))
    }

    pub fn feed(&self, identifier: &str) -> Result<Instruction> {
        self.entity_only(identifier, ArgWriter::new(discriminators::FEED))
    }

    pub fn trigger_item_drop(&self, identifier: &str) -> Result<Instruction> {
        self.entity_only(identifier, ArgWriter::new(discriminators::TRIGGER_ITEM_DROP))
    }

    pub fn use_item(&self, identifier: &str, slot: u8) -> Result<Instruction> {
        self.entity_only(identifier, ArgWriter::new(discriminators::USE_ITEM).u8(slot))
    }

    /// Delegates both the entity and its crank payer to the rollup.
    pub fn delegate(&self, identifier: &str, payer: &Pubkey) -> Result<Instruction> {
        let tomo = self.deriver.entity_address(identifier)?;
        let crank_payer = self.deriver.relay_payer_address(&tomo);
        let tomo_accounts = self.deriver.delegation_accounts(&tomo);
        let crank_accounts = self.deriver.delegation_accounts(&crank_payer);
        Ok(self.instruction(
            ArgWriter::new(discriminators::DELEGATE).string(identifier),
            vec![
                AccountMeta::new(*payer, true),
                AccountMeta::new(tomo_accounts.buffer, false),
                AccountMeta::new(tomo_accounts.record, false),
                AccountMeta::new(tomo_accounts.metadata, false),
                AccountMeta::new(tomo, false),
                AccountMeta::new(crank_accounts.buffer, false),
                AccountMeta::new(crank_accounts.record, false),
                AccountMeta::new(crank_accounts.metadata, false),
                AccountMeta::new(crank_payer, false),
                AccountMeta::new_readonly(self.deriver.program_id(), false),
                AccountMeta::new_readonly(self.deriver.delegation_program_id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
        ))
    }

    /// Submitted to the rollup, which commits the state back to base.
    pub fn undelegate(&self, identifier: &str, payer: &Pubkey) -> Result<Instruction> {
        let tomo = self.deriver.entity_address(identifier)?;
        Ok(self.instruction(
            ArgWriter::new(discriminators::UNDELEGATE),
            vec![
                AccountMeta::new(*payer, true),
                AccountMeta::new(tomo, false),
                AccountMeta::new_readonly(MAGIC_PROGRAM_ID, false),
                AccountMeta::new(MAGIC_CONTEXT_ID, false),
            ],
        ))
    }

    pub fn delete(&self, identifier: &str, owner: &Pubkey) -> Result<Instruction> {
        let tomo = self.deriver.entity_address(identifier)?;
        let crank_payer = self.deriver.relay_payer_address(&tomo);
        Ok(self.instruction(
            ArgWriter::new(discriminators::DELETE),
            vec![
                AccountMeta::new(tomo, false),
                AccountMeta::new(crank_payer, false),
                AccountMeta::new(*owner, true),
            ],
        ))
    }

    pub fn open_item_drop(
        &self,
        identifier: &str,
        payer: &Pubkey,
        client_seed: u8,
    ) -> Result<Instruction> {
        self.randomness_request(
            identifier,
            payer,
            ArgWriter::new(discriminators::OPEN_ITEM_DROP).u8(client_seed),
        )
    }

    pub fn random_event(
        &self,
        identifier: &str,
        payer: &Pubkey,
        client_seed: u8,
    ) -> Result<Instruction> {
        self.randomness_request(
            identifier,
            payer,
            ArgWriter::new(discriminators::RANDOM_EVENT).u8(client_seed),
        )
    }

    pub fn start_random_events(
        &self,
        identifier: &str,
        payer: &Pubkey,
        schedule: CrankSchedule,
    ) -> Result<Instruction> {
        let tomo = self.deriver.entity_address(identifier)?;
        let crank_payer = self.deriver.relay_payer_address(&tomo);
        Ok(self.instruction(
            ArgWriter::new(discriminators::START_RANDOM_EVENTS)
                .u64(schedule.task_id)
                .u64(schedule.interval_millis)
                .u64(schedule.iterations),
            vec![
                AccountMeta::new_readonly(MAGIC_PROGRAM_ID, false),
                AccountMeta::new(*payer, true),
                AccountMeta::new(tomo, false),
                AccountMeta::new(VRF_ORACLE_QUEUE, false),
                AccountMeta::new(crank_payer, false),
                AccountMeta::new_readonly(self.deriver.program_identity(), false),
                AccountMeta::new_readonly(VRF_PROGRAM_ID, false),
                AccountMeta::new_readonly(sysvar::slot_hashes::id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
        ))
    }

    fn entity_only(&self, identifier: &str, args: ArgWriter) -> Result<Instruction> {
        let tomo = self.deriver.entity_address(identifier)?;
        Ok(self.instruction(args, vec![AccountMeta::new(tomo, false)]))
    }

    fn randomness_request(
        &self,
        identifier: &str,
        payer: &Pubkey,
        args: ArgWriter,
    ) -> Result<Instruction> {
        let tomo = self.deriver.entity_address(identifier)?;
        Ok(self.instruction(
            args,
            vec![
                AccountMeta::new(*payer, true),
                AccountMeta::new(tomo, false),
                AccountMeta::new(VRF_ORACLE_QUEUE, false),
                AccountMeta::new_readonly(self.deriver.program_identity(), false),
                AccountMeta::new_readonly(VRF_PROGRAM_ID, false),
                AccountMeta::new_readonly(sysvar::slot_hashes::id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
        ))
    }

    fn instruction(&self, args: ArgWriter, accounts: Vec<AccountMeta>) -> Instruction {
        Instruction {
            program_id: self.deriver.program_id(),
            accounts,
            data: args.finish(),
        }
    }
}

struct ArgWriter {
    data: Vec<u8>,
}

impl ArgWriter {
    fn new(discriminator: [u8; 8]) -> Self {
        Self {
            data: discriminator.to_vec(),
        }
    }

    fn u8(mut self, value: u8) -> Self {
        self.data.push(value);
        self
    }

    fn u64(mut self, value: u64) -> Self {
        self.data.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn string(mut self, value: &str) -> Self {
        self.data
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.data.extend_from_slice(value.as_bytes());
        self
    }

    fn finish(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        Error,
        program::TOMO_PROGRAM_ID,
    };

    const UID: &str = "04:A3:2B";

    fn builder() -> InstructionBuilder {
        InstructionBuilder::default()
    }

    #[test]
    fn init__encodes_length_prefixed_identifier_after_discriminator() {
        // given
        let payer = Pubkey::new_unique();

        // when
        let ix = builder().init(UID, &payer).unwrap();

        // then
        assert_eq!(ix.program_id, TOMO_PROGRAM_ID);
        assert_eq!(&ix.data[..8], &discriminators::INIT);
        assert_eq!(&ix.data[8..12], &(UID.len() as u32).to_le_bytes());
        assert_eq!(&ix.data[12..], UID.as_bytes());
        assert_eq!(ix.accounts[2], AccountMeta::new(payer, true));
    }

    #[test]
    fn feed__only_entity_account_no_signer() {
        let ix = builder().feed(UID).unwrap();
        let tomo = builder().deriver().entity_address(UID).unwrap();
        assert_eq!(ix.data, discriminators::FEED.to_vec());
        assert_eq!(ix.accounts, vec![AccountMeta::new(tomo, false)]);
    }

    #[test]
    fn use_item__appends_slot_byte() {
        let ix = builder().use_item(UID, 5).unwrap();
        assert_eq!(ix.data.len(), 9);
        assert_eq!(ix.data[8], 5);
    }

    #[test]
    fn undelegate__payer_signs_and_magic_context_is_writable() {
        // given
        let payer = Pubkey::new_unique();

        // when
        let ix = builder().undelegate(UID, &payer).unwrap();

        // then
        assert!(ix.accounts[0].is_signer);
        assert_eq!(ix.accounts[0].pubkey, payer);
        assert_eq!(ix.accounts[3], AccountMeta::new(MAGIC_CONTEXT_ID, false));
    }

    #[test]
    fn delete__owner_is_last_and_signs() {
        let owner = Pubkey::new_unique();
        let ix = builder().delete(UID, &owner).unwrap();
        assert_eq!(ix.accounts.last(), Some(&AccountMeta::new(owner, true)));
    }

    #[test]
    fn start_random_events__three_little_endian_u64_args() {
        // given
        let schedule = CrankSchedule {
            task_id: 7,
            interval_millis: 5_000,
            iterations: u64::MAX,
        };

        // when
        let ix = builder()
            .start_random_events(UID, &Pubkey::new_unique(), schedule)
            .unwrap();

        // then
        assert_eq!(ix.data.len(), 8 + 24);
        assert_eq!(&ix.data[8..16], &7u64.to_le_bytes());
        assert_eq!(&ix.data[16..24], &5_000u64.to_le_bytes());
        assert_eq!(&ix.data[24..32], &u64::MAX.to_le_bytes());
    }

    #[test]
    fn delegate__covers_entity_and_crank_payer_bookkeeping() {
        let ix = builder().delegate(UID, &Pubkey::new_unique()).unwrap();
        assert_eq!(ix.accounts.len(), 12);
        assert_eq!(&ix.data[..8], &discriminators::DELEGATE);
    }

    #[test]
    fn builders__oversized_identifier__rejected_before_building() {
        let uid = "x".repeat(40);
        assert!(matches!(
            builder().get_coin(&uid),
            Err(Error::InvalidIdentifier { .. })
        ));
    }
}
