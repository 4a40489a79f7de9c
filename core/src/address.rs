// Addresses and key identifiers
// Versioned, checksummed 25-byte addresses with an S-prefixed hex encoding

use crate::error::CoreError;
use crate::hashing::{keccak256, shake256_20, shake256_32};
use std::fmt;

/// Address length in bytes: version + digest + checksum
pub const ADDRESS_SIZE: usize = 25;

/// Version byte of every umbra address
pub const ADDRESS_VERSION: u8 = 0x42;

const DIGEST_SIZE: usize = 20;
const CHECKSUM_SIZE: usize = 4;

/// 25-byte versioned address: `0x42 || shake256_20(pubkey) || checksum`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    /// Derive the address of a public key
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self::from_digest(shake256_20(public_key))
    }

    /// Assemble an address from a 20-byte digest, computing the checksum
    pub fn from_digest(digest: [u8; DIGEST_SIZE]) -> Self {
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes[0] = ADDRESS_VERSION;
        bytes[1..1 + DIGEST_SIZE].copy_from_slice(&digest);
        let checksum = checksum(ADDRESS_VERSION, &digest);
        bytes[1 + DIGEST_SIZE..].copy_from_slice(&checksum);
        Address(bytes)
    }

    /// Parse and validate an `S`-prefixed hex encoding
    pub fn decode(encoded: &str) -> Result<Self, CoreError> {
        let hex_part = encoded
            .strip_prefix('S')
            .ok_or_else(|| CoreError::InvalidAddress("missing S prefix".into()))?;
        let bytes = hex::decode(hex_part)
            .map_err(|e| CoreError::InvalidAddress(format!("bad hex: {e}")))?;
        if bytes.len() != ADDRESS_SIZE {
            return Err(CoreError::InvalidAddress(format!(
                "expected {ADDRESS_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0] != ADDRESS_VERSION {
            return Err(CoreError::InvalidAddress(format!(
                "unknown version byte 0x{:02x}",
                bytes[0]
            )));
        }
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&bytes[1..1 + DIGEST_SIZE]);
        if checksum(bytes[0], &digest)[..] != bytes[1 + DIGEST_SIZE..] {
            return Err(CoreError::InvalidAddress("checksum mismatch".into()));
        }

        let mut raw = [0u8; ADDRESS_SIZE];
        raw.copy_from_slice(&bytes);
        Ok(Address(raw))
    }

    /// `"S" || lowercase hex` string form
    pub fn encode(&self) -> String {
        format!("S{}", hex::encode(self.0))
    }

    /// Whether a string is a well-formed, checksummed address
    pub fn is_valid_encoding(encoded: &str) -> bool {
        Self::decode(encoded).is_ok()
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }
}

fn checksum(version: u8, digest: &[u8; DIGEST_SIZE]) -> [u8; CHECKSUM_SIZE] {
    let mut preimage = Vec::with_capacity(1 + DIGEST_SIZE);
    preimage.push(version);
    preimage.extend_from_slice(digest);
    let inner = keccak256(&preimage);
    let outer = keccak256(&inner);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&outer[..CHECKSUM_SIZE]);
    out
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

// Addresses travel as their string encoding in JSON
impl serde::Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded: String = serde::Deserialize::deserialize(deserializer)?;
        Address::decode(&encoded).map_err(serde::de::Error::custom)
    }
}

/// 32-byte SHAKE-256 digest of a public key; the plot index key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier([u8; 32]);

impl Identifier {
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Identifier(shake256_32(public_key))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Identifier(bytes)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, CoreError> {
        let bytes =
            hex::decode(encoded).map_err(|e| CoreError::InvalidHash(format!("bad hex: {e}")))?;
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidHash("identifier must be 32 bytes".into()))?;
        Ok(Identifier(raw))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl serde::Serialize for Identifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> serde::Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded: String = serde::Deserialize::deserialize(deserializer)?;
        Identifier::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}
