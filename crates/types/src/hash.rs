//! Hash primitives.
//!
//! All identity hashing is double SHA-256 over a canonical encoding. The
//! 20-byte short hash is the address form embedded in payment scripts; it is
//! extracted from scripts, never computed here.

use sha2::{Digest, Sha256};

/// Double-SHA-256 output (32 bytes). Identifies blocks and transactions.
pub type Hash256 = [u8; 32];

/// Address-sized hash (20 bytes). Keys the payment history index.
pub type ShortHash = [u8; 20];

/// The null hash: previous-block reference of the genesis header and the
/// hash component of a null (coinbase) point.
pub const NULL_HASH: Hash256 = [0u8; 32];

/// Compute SHA-256(SHA-256(data)).
pub fn bitcoin_hash(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Compute the merkle root of a list of hashes.
///
/// Pairwise double-SHA-256 with the odd tail element paired with itself.
/// An empty list yields the null hash.
pub fn merkle_root(hashes: &[Hash256]) -> Hash256 {
    if hashes.is_empty() {
        return NULL_HASH;
    }

    let mut layer: Vec<Hash256> = hashes.to_vec();

    while layer.len() > 1 {
        let mut parent = Vec::with_capacity(layer.len().div_ceil(2));

        for pair in layer.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut concat = [0u8; 64];
            concat[..32].copy_from_slice(&left);
            concat[32..].copy_from_slice(&right);
            parent.push(bitcoin_hash(&concat));
        }

        layer = parent;
    }

    layer[0]
}
