//! Chain parameter selection (mainnet/testnet/regtest), injected at startup.
//!
//! Parameter *values* live here; the RandomX verifier itself is out of scope
//! and consumed only through [`crate::pow::PowVerifier`].

use crate::header::BlockHeader;
use crate::header::Hash;
use crate::work::ChainWork;

/// A compiled-in bootstrap address, resolved by the network crate into
/// whatever endpoint type it uses internally. Kept as a plain hostname/port
/// pair here so this crate stays free of networking types.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FixedSeed {
    pub host: &'static str,
    pub port: u16,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub network_magic: u32,
    pub default_port: u16,
    pub genesis: BlockHeader,
    /// Maximum permitted PoW target (minimum difficulty) for this network.
    pub pow_limit_bits: u32,
    /// A tip below this cumulative work is not trusted as "caught up" (IBD gate).
    pub minimum_chain_work: ChainWork,
    /// Reorgs that would disconnect at least this many blocks from the active
    /// tip are refused outright.
    pub suspicious_reorg_depth: u64,
    pub fixed_seeds: Vec<FixedSeed>,
}

impl ChainParams {
    pub fn mainnet() -> Self {
        ChainParams {
            network: Network::Mainnet,
            network_magic: 0x554e_4943,
            default_port: 9590,
            genesis: mainnet_genesis(),
            pow_limit_bits: 0x1e0f_ffff,
            minimum_chain_work: ChainWork::from_u64(0),
            suspicious_reorg_depth: 100,
            fixed_seeds: vec![
                FixedSeed { host: "seed1.ferrochain.example", port: 9590 },
                FixedSeed { host: "seed2.ferrochain.example", port: 9590 },
            ],
        }
    }

    pub fn testnet() -> Self {
        ChainParams {
            network: Network::Testnet,
            network_magic: 0xa3f8_d412,
            default_port: 19590,
            genesis: testnet_genesis(),
            pow_limit_bits: 0x1e0f_ffff,
            minimum_chain_work: ChainWork::from_u64(0),
            suspicious_reorg_depth: 100,
            fixed_seeds: vec![FixedSeed {
                host: "testnet-seed.ferrochain.example",
                port: 19590,
            }],
        }
    }

    pub fn regtest() -> Self {
        ChainParams {
            network: Network::Regtest,
            network_magic: 0x4b7c_2e91,
            default_port: 29590,
            genesis: regtest_genesis(),
            pow_limit_bits: 0x207f_ffff,
            minimum_chain_work: ChainWork::ZERO,
            suspicious_reorg_depth: 2,
            fixed_seeds: Vec::new(),
        }
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis.hash()
    }
}

fn regtest_genesis() -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_hash: Hash::null(),
        miner_address: crate::header::MinerAddress([0u8; 20]),
        time: 1_296_688_602,
        bits: 0x207f_ffff,
        nonce: 2,
        pow_hash: Hash::null(),
    }
}

fn testnet_genesis() -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_hash: Hash::null(),
        miner_address: crate::header::MinerAddress([0u8; 20]),
        time: 1_600_000_000,
        bits: 0x1e0f_ffff,
        nonce: 0,
        pow_hash: Hash::null(),
    }
}

fn mainnet_genesis() -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_hash: Hash::null(),
        miner_address: crate::header::MinerAddress([0u8; 20]),
        time: 1_600_000_000,
        bits: 0x1e0f_ffff,
        nonce: 0,
        pow_hash: Hash::null(),
    }
}
