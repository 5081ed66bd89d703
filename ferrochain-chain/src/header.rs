//! The fixed 100-byte block header and its wire serialization.
//!
//! Layout: version i32 LE (0),
//! prev-block hash 32B raw (4), miner address 20B raw (36), time u32 LE (56),
//! bits u32 LE (60), nonce u32 LE (64), pow hash 32B raw (68) — 100 bytes total.
//! The three hash/address blobs are copied byte-for-byte; only the scalar
//! fields go through little-endian conversion.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{Cursor, Read, Write};

use crate::error::HeaderError;

pub const HEADER_SIZE: usize = 100;

const OFF_VERSION: usize = 0;
const OFF_PREV: usize = OFF_VERSION + 4;
const OFF_MINER: usize = OFF_PREV + 32;
const OFF_TIME: usize = OFF_MINER + 20;
const OFF_BITS: usize = OFF_TIME + 4;
const OFF_NONCE: usize = OFF_BITS + 4;
const OFF_POW: usize = OFF_NONCE + 4;

const _: () = assert!(OFF_POW + 32 == HEADER_SIZE);

/// A double-SHA-256 header hash. Displayed and serialized big-endian-reversed
/// the way Bitcoin-family chains conventionally print hashes (most
/// significant byte first), even though the bytes are stored internally in
/// the order `GetHash()` produces them.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const fn null() -> Self {
        Hash([0u8; 32])
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A 20-byte miner address, carried opaquely (no endian swap, no validation
/// beyond length — its meaning is outside this crate's scope).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MinerAddress(pub [u8; 20]);

impl fmt::Debug for MinerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MinerAddress({})", hex::encode(self.0))
    }
}

/// Fixed 100-byte headers-only block record.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: Hash,
    pub miner_address: MinerAddress,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub pow_hash: Hash,
}

impl BlockHeader {
    /// Double-SHA-256 of the 100-byte wire serialization. This is the
    /// header's identity; it is not related to `pow_hash`, which is the
    /// RandomX commitment checked by the externally-injected PoW verifier.
    pub fn hash(&self) -> Hash {
        let bytes = self.serialize();
        let once = Sha256::digest(bytes);
        let twice = Sha256::digest(once);
        let mut out = [0u8; 32];
        out.copy_from_slice(&twice);
        Hash(out)
    }

    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            cursor.write_i32::<LittleEndian>(self.version).unwrap();
            cursor.write_all(&self.prev_hash.0).unwrap();
            cursor.write_all(&self.miner_address.0).unwrap();
            cursor.write_u32::<LittleEndian>(self.time).unwrap();
            cursor.write_u32::<LittleEndian>(self.bits).unwrap();
            cursor.write_u32::<LittleEndian>(self.nonce).unwrap();
            cursor.write_all(&self.pow_hash.0).unwrap();
        }
        debug_assert_eq!(OFF_POW, 68);
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() != HEADER_SIZE {
            return Err(HeaderError::WrongLength {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_i32::<LittleEndian>().unwrap();
        let mut prev_hash = [0u8; 32];
        cursor.read_exact(&mut prev_hash).unwrap();
        let mut miner_address = [0u8; 20];
        cursor.read_exact(&mut miner_address).unwrap();
        let time = cursor.read_u32::<LittleEndian>().unwrap();
        let bits = cursor.read_u32::<LittleEndian>().unwrap();
        let nonce = cursor.read_u32::<LittleEndian>().unwrap();
        let mut pow_hash = [0u8; 32];
        cursor.read_exact(&mut pow_hash).unwrap();
        Ok(BlockHeader {
            version,
            prev_hash: Hash(prev_hash),
            miner_address: MinerAddress(miner_address),
            time,
            bits,
            nonce,
            pow_hash: Hash(pow_hash),
        })
    }

    pub fn is_genesis_claim(&self) -> bool {
        self.prev_hash.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regtest_genesis() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: Hash::null(),
            miner_address: MinerAddress([0u8; 20]),
            time: 1_296_688_602,
            bits: 0x207f_ffff,
            nonce: 2,
            pow_hash: Hash::null(),
        }
    }

    #[test]
    fn round_trips() {
        let h = regtest_genesis();
        let bytes = h.serialize();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let back = BlockHeader::deserialize(&bytes).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(BlockHeader::deserialize(&[0u8; 99]).is_err());
        assert!(BlockHeader::deserialize(&[0u8; 101]).is_err());
    }

    #[test]
    fn genesis_hash_matches_fixture() {
        let h = regtest_genesis();
        assert_eq!(
            h.hash().to_hex(),
            "0233b37bb6942bfb471cfd7fb95caab0e0f7b19cc8767da65fbef59eb49e45bd"
        );
    }
}
