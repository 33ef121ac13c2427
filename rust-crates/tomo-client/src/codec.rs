//! Binary layout of the on-chain entity record.
//!
//! ```text
//! discriminator  8   skipped, not validated
//! owner         32
//! uid            4 + n  (u32 LE length, UTF-8 bytes)
//! hunger         1
//! last_fed       8   i64 LE
//! coins          8   u64 LE
//! item_drop      1   nonzero = true
//! inventory      8   one byte per slot
//! ```

use crate::{
    Error,
    Result,
    program::{
        INITIAL_SATIETY,
        INVENTORY_SLOTS,
    },
};
use solana_sdk::pubkey::Pubkey;

pub const DISCRIMINATOR_LEN: usize = 8;

/// Bytes the record needs besides the identifier itself.
pub const FIXED_LAYOUT_LEN: usize = DISCRIMINATOR_LEN + 32 + 4 + 1 + 8 + 8 + 1 + INVENTORY_SLOTS;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntityRecord {
    pub owning_identity: Pubkey,
    pub identifier: String,
    pub satiety: u8,
    /// Seconds since epoch, 0 when never fed.
    pub last_feed_timestamp: i64,
    pub reward_balance: u64,
    pub pending_drop: bool,
    pub inventory_slots: [u8; INVENTORY_SLOTS],
}

impl EntityRecord {
    /// State of a freshly created entity.
    pub fn new(owning_identity: Pubkey, identifier: impl Into<String>) -> Self {
        Self {
            owning_identity,
            identifier: identifier.into(),
            satiety: INITIAL_SATIETY,
            last_feed_timestamp: 0,
            reward_balance: 0,
            pending_drop: false,
            inventory_slots: [0; INVENTORY_SLOTS],
        }
    }

    pub fn first_empty_slot(&self) -> Option<usize> {
        self.inventory_slots.iter().position(|slot| *slot == 0)
    }

    pub fn inventory_full(&self) -> bool {
        self.first_empty_slot().is_none()
    }
}

pub fn decode(raw: &[u8]) -> Result<EntityRecord> {
    let mut reader = ByteReader::new(raw);
    reader.skip(DISCRIMINATOR_LEN, "discriminator")?;
    let owner: [u8; 32] = reader.take_array("owner")?;
    let identifier = reader.read_string("uid")?;
    let satiety = reader.read_u8("hunger")?;
    let last_feed_timestamp = reader.read_i64("last_fed")?;
    let reward_balance = reader.read_u64("coins")?;
    let pending_drop = reader.read_u8("item_drop")? != 0;
    let inventory_slots: [u8; INVENTORY_SLOTS] = reader.take_array("inventory")?;

    Ok(EntityRecord {
        owning_identity: Pubkey::new_from_array(owner),
        identifier,
        satiety,
        last_feed_timestamp,
        reward_balance,
        pending_drop,
        inventory_slots,
    })
}

/// Mirror of the program's serializer. The client never writes on-chain bytes.
#[cfg(any(test, feature = "test-helpers"))]
pub fn encode(record: &EntityRecord) -> Vec<u8> {
    let uid = record.identifier.as_bytes();
    let mut out = Vec::with_capacity(FIXED_LAYOUT_LEN + uid.len());
    out.extend_from_slice(&crate::program::TOMO_ACCOUNT_DISCRIMINATOR);
    out.extend_from_slice(record.owning_identity.as_ref());
    out.extend_from_slice(&(uid.len() as u32).to_le_bytes());
    out.extend_from_slice(uid);
    out.push(record.satiety);
    out.extend_from_slice(&record.last_feed_timestamp.to_le_bytes());
    out.extend_from_slice(&record.reward_balance.to_le_bytes());
    out.push(u8::from(record.pending_drop));
    out.extend_from_slice(&record.inventory_slots);
    out
}

/// Little-endian accumulation, most significant byte first.
///
/// Kept as an explicit fold so the byte order and the signed/unsigned
/// split stay visible next to the layout they decode.
fn accumulate_le(bytes: &[u8; 8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::MalformedAccount(format!(
                "buffer ends inside `{field}` at offset {} (needs {len} bytes, {} left)",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn skip(&mut self, len: usize, field: &str) -> Result<()> {
        self.take(len, field).map(|_| ())
    }

    fn take_array<const N: usize>(&mut self, field: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn read_u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn read_u32(&mut self, field: &str) -> Result<u32> {
        let bytes: [u8; 4] = self.take_array(field)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_u64(&mut self, field: &str) -> Result<u64> {
        let bytes: [u8; 8] = self.take_array(field)?;
        Ok(accumulate_le(&bytes))
    }

    fn read_i64(&mut self, field: &str) -> Result<i64> {
        let bytes: [u8; 8] = self.take_array(field)?;
        // two's complement reinterpretation of the same bits
        Ok(accumulate_le(&bytes) as i64)
    }

    fn read_string(&mut self, field: &str) -> Result<String> {
        let len = self.read_u32(field)? as usize;
        if len > self.remaining() {
            return Err(Error::MalformedAccount(format!(
                "`{field}` length prefix {len} exceeds the {} bytes left",
                self.remaining()
            )));
        }
        let bytes = self.take(len, field)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            Error::MalformedAccount(format!("`{field}` is not valid UTF-8: {e}"))
        })
    }
}
