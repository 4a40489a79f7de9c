// Hash primitives
// SHA-256, SHA3-256, Keccak-256, SHAKE-256 wrappers and the transaction merkle fold

use sha2::{Digest, Sha256};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::{Keccak256, Sha3_256, Shake256};

/// SHA-256 digest
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    Digest::update(&mut hasher, data);
    hasher.finalize().into()
}

/// SHA3-256 digest
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    Digest::update(&mut hasher, data);
    hasher.finalize().into()
}

/// Keccak-256 digest (address checksums)
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    Digest::update(&mut hasher, data);
    hasher.finalize().into()
}

/// SHAKE-256 with 32 bytes of output (identifiers, tx hashes)
pub fn shake256_32(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    shake256_into(data, &mut out);
    out
}

/// SHAKE-256 with 20 bytes of output (address digests)
pub fn shake256_20(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    shake256_into(data, &mut out);
    out
}

/// SHAKE-256 filling an arbitrary-length output buffer
pub fn shake256_into(data: &[u8], out: &mut [u8]) {
    let mut hasher = Shake256::default();
    hasher.update(data);
    let mut reader = hasher.finalize_xof();
    reader.read(out);
}

/// Merkle root over 32-byte leaf hashes.
///
/// Empty input yields the all-zero root. Levels with an odd count duplicate
/// their last element before pairing; pairs combine by concatenation then
/// SHA-256.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut combined = [0u8; 64];
            combined[..32].copy_from_slice(&pair[0]);
            combined[32..].copy_from_slice(&pair[1]);
            next.push(sha256(&combined));
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_shake256_lengths_are_prefix_consistent() {
        let long = shake256_32(b"umbra");
        let short = shake256_20(b"umbra");
        assert_eq!(&long[..20], &short[..]);
    }

    #[test]
    fn test_merkle_empty_is_zero() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn test_merkle_single_leaf_is_itself() {
        let leaf = sha256(b"only");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn test_merkle_odd_count_duplicates_last() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        let c = sha256(b"c");

        let root_three = merkle_root(&[a, b, c]);
        let root_padded = merkle_root(&[a, b, c, c]);
        assert_eq!(root_three, root_padded);
    }

    #[test]
    fn test_merkle_is_deterministic_and_order_sensitive() {
        let a = sha256(b"a");
        let b = sha256(b"b");

        assert_eq!(merkle_root(&[a, b]), merkle_root(&[a, b]));
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }
}
