use solana_sdk::pubkey::Pubkey;
use std::fmt::Write;
use tomo_client::{
    program::FEED_COST,
    reader::ResolvedEntity,
};

const SECONDS_PER_MINUTE: i64 = 60;
const MINUTES_PER_HOUR: i64 = 60;
const MINUTES_PER_DAY: i64 = 24 * MINUTES_PER_HOUR;

/// Short relative form of a last-fed timestamp (unix seconds). `0` means never fed.
pub fn format_last_fed(timestamp: i64, now: i64) -> String {
    if timestamp == 0 {
        return "Never".to_string();
    }
    let minutes = (now - timestamp).max(0) / SECONDS_PER_MINUTE;
    if minutes < 1 {
        "Now".to_string()
    } else if minutes < MINUTES_PER_HOUR {
        format!("{minutes}m")
    } else if minutes < MINUTES_PER_DAY {
        format!("{}h", minutes / MINUTES_PER_HOUR)
    } else {
        format!("{}d", minutes / MINUTES_PER_DAY)
    }
}

pub fn render_entity(address: &Pubkey, resolved: &ResolvedEntity, now: i64) -> String {
    let record = &resolved.record;
    let inventory = record
        .inventory_slots
        .iter()
        .enumerate()
        .map(|(slot, item)| match item {
            0 => format!("{slot}:-"),
            item => format!("{slot}:{item}"),
        })
        .collect::<Vec<_>>()
        .join(" ");

    let mut out = String::new();
    let _ = writeln!(out, "uid:          {}", record.identifier);
    let _ = writeln!(out, "address:      {address}");
    let _ = writeln!(out, "owner:        {}", record.owning_identity);
    let _ = writeln!(out, "isDelegated:  {}", resolved.is_delegated);
    let _ = writeln!(out, "source:       {}", resolved.source);
    let _ = writeln!(out, "satiety:      {}", record.satiety);
    let _ = writeln!(
        out,
        "lastFed:      {}",
        format_last_fed(record.last_feed_timestamp, now)
    );
    let _ = writeln!(
        out,
        "coins:        {}{}",
        record.reward_balance,
        if record.reward_balance < FEED_COST {
            " (not enough to feed)"
        } else {
            ""
        }
    );
    let _ = writeln!(out, "itemDrop:     {}", record.pending_drop);
    let _ = write!(out, "inventory:    {inventory}");
    if resolved.is_stale() {
        let _ = write!(out, "\n(rollup unreachable, showing last base state)");
    }
    out
}
