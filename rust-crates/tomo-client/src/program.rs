//! Fixed constants of the on-chain tomo program and the delegation stack around it.

use solana_sdk::{
    pubkey,
    pubkey::Pubkey,
};

pub const TOMO_PROGRAM_ID: Pubkey = pubkey!("GFAFC6FBpbcCVDrZfY2QyCWS3ckkgJuLMtr9KWtubhiM");

/// Owner of any account whose authority has moved to the rollup.
pub const DELEGATION_PROGRAM_ID: Pubkey =
    pubkey!("DELeGGvXpWV2fqJUhqcF5ZSYMS4JTLjteaAMARRSaeSh");

pub const MAGIC_PROGRAM_ID: Pubkey = pubkey!("Magic11111111111111111111111111111111111111");
pub const MAGIC_CONTEXT_ID: Pubkey = pubkey!("MagicContext1111111111111111111111111111111");

pub const VRF_PROGRAM_ID: Pubkey = pubkey!("Vrf1RNUjXmQGjmQrQLvJHs9SNkvDJEsRVFPkfSQUwGz");
pub const VRF_ORACLE_QUEUE: Pubkey = pubkey!("5hBR571xnXppuCPveTrctfTU7tJLSN94nq7kv7FRK5Tc");
pub const VRF_PROGRAM_IDENTITY: Pubkey =
    pubkey!("9irBy75QS2BN81FUgXuHcjqceJJRuc9oDkAe8TKVvvAw");

pub const ENTITY_SEED: &[u8] = b"tomo1";
pub const CRANK_PAYER_SEED: &[u8] = b"crank_payer";
pub const BUFFER_SEED: &[u8] = b"buffer";
pub const DELEGATION_RECORD_SEED: &[u8] = b"delegation";
pub const DELEGATION_METADATA_SEED: &[u8] = b"delegation-metadata";
pub const PROGRAM_IDENTITY_SEED: &[u8] = b"identity";

pub const MAX_IDENTIFIER_LEN: usize = 32;
pub const INVENTORY_SLOTS: usize = 8;

pub const INITIAL_SATIETY: u8 = 100;
pub const MAX_SATIETY: u8 = 100;
pub const FEED_COST: u64 = 10;
pub const FEED_SATIETY_GAIN: u8 = 30;

/// Custom program error raised when feeding without enough coins.
pub const NOT_ENOUGH_COINS_ERROR: u32 = 6000;

pub const TOMO_ACCOUNT_DISCRIMINATOR: [u8; 8] = [104, 46, 161, 148, 136, 8, 66, 191];

pub mod discriminators {
    pub const INIT: [u8; 8] = [220, 59, 207, 236, 108, 250, 47, 100];
    pub const GET_COIN: [u8; 8] = [199, 17, 222, 208, 64, 249, 76, 135];
    pub const FEED: [u8; 8] = [46, 213, 237, 176, 190, 113, 182, 94];
    pub const DELEGATE: [u8; 8] = [90, 147, 75, 178, 85, 88, 4, 137];
    pub const UNDELEGATE: [u8; 8] = [131, 148, 180, 198, 91, 104, 42, 238];
    pub const DELETE: [u8; 8] = [165, 204, 60, 98, 134, 15, 83, 134];
    pub const USE_ITEM: [u8; 8] = [38, 85, 191, 23, 255, 151, 204, 199];
    pub const OPEN_ITEM_DROP: [u8; 8] = [219, 160, 62, 193, 70, 43, 189, 4];
    pub const RANDOM_EVENT: [u8; 8] = [173, 117, 20, 106, 71, 75, 112, 76];
    pub const TRIGGER_ITEM_DROP: [u8; 8] = [179, 100, 20, 236, 108, 141, 110, 8];
    pub const START_RANDOM_EVENTS: [u8; 8] = [198, 253, 210, 132, 250, 194, 138, 18];
}
