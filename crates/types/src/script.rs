//! Minimal script inspection.
//!
//! The store treats scripts as opaque bytes; evaluation and policy live
//! upstream. The secondary indexes only need three extractions: the payment
//! short-hash of a standard pay-to-hash output, and the ephemeral key and
//! prefix of a stealth ephemeral-key script (an `OP_RETURN` carrying a
//! 32-byte key). Anything that doesn't match these exact patterns is simply
//! not indexed.

use crate::chain::Script;
use crate::hash::{bitcoin_hash, Hash256, ShortHash};

pub const OP_DUP: u8 = 0x76;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_RETURN: u8 = 0x6a;

/// Push opcode for a 20-byte datum.
const PUSH_20: u8 = 0x14;
/// Push opcode for a 32-byte datum.
const PUSH_32: u8 = 0x20;

/// Build a standard pay-to-short-hash output script.
pub fn pay_to_short_hash(hash: ShortHash) -> Script {
    let mut bytes = Vec::with_capacity(25);
    bytes.push(OP_DUP);
    bytes.push(OP_HASH160);
    bytes.push(PUSH_20);
    bytes.extend_from_slice(&hash);
    bytes.push(OP_EQUALVERIFY);
    bytes.push(OP_CHECKSIG);
    Script::new(bytes)
}

/// Build a stealth ephemeral-key script: `OP_RETURN <key:32>`.
pub fn stealth_ephemeral(key: Hash256) -> Script {
    let mut bytes = Vec::with_capacity(34);
    bytes.push(OP_RETURN);
    bytes.push(PUSH_32);
    bytes.extend_from_slice(&key);
    Script::new(bytes)
}

/// Extract the payment short-hash from a standard pay-to-short-hash script.
pub fn payment_hash(script: &Script) -> Option<ShortHash> {
    let bytes = script.as_bytes();
    if bytes.len() != 25
        || bytes[0] != OP_DUP
        || bytes[1] != OP_HASH160
        || bytes[2] != PUSH_20
        || bytes[23] != OP_EQUALVERIFY
        || bytes[24] != OP_CHECKSIG
    {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&bytes[3..23]);
    Some(hash)
}

/// Extract the unsigned ephemeral key from a stealth ephemeral-key script.
pub fn ephemeral_key(script: &Script) -> Option<Hash256> {
    let bytes = script.as_bytes();
    if bytes.len() < 34 || bytes[0] != OP_RETURN || bytes[1] != PUSH_32 {
        return None;
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[2..34]);
    Some(key)
}

/// Derive the 32-bit stealth prefix of an ephemeral-key script.
///
/// The prefix is the leading little-endian word of the script's hash, which
/// gives scanning clients a uniform filter independent of key material.
pub fn stealth_prefix(script: &Script) -> Option<u32> {
    ephemeral_key(script)?;
    let digest = bitcoin_hash(script.as_bytes());
    Some(u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]))
}
