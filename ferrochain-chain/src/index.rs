//! `BlockIndex`: one node of the in-memory header DAG.

use crate::header::{BlockHeader, Hash};
use crate::work::ChainWork;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Validity {
    Unknown,
    Header,
    Tree,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Failure {
    None,
    SelfFailed,
    AncestorFailed,
}

impl Failure {
    pub fn is_failed(&self) -> bool {
        !matches!(self, Failure::None)
    }
}

#[derive(Clone, Debug)]
pub struct BlockIndex {
    pub hash: Hash,
    pub header: BlockHeader,
    pub parent: Option<Hash>,
    pub height: u64,
    pub chain_work: ChainWork,
    pub validity: Validity,
    pub failure: Failure,
}

impl BlockIndex {
    pub fn genesis(header: BlockHeader) -> Self {
        let hash = header.hash();
        let chain_work = ChainWork::from_compact_bits(header.bits);
        BlockIndex {
            hash,
            header,
            parent: None,
            height: 0,
            chain_work,
            validity: Validity::Tree,
            failure: Failure::None,
        }
    }

    pub fn child_of(header: BlockHeader, parent: &BlockIndex) -> Self {
        let hash = header.hash();
        let work = ChainWork::from_compact_bits(header.bits);
        BlockIndex {
            hash,
            header,
            parent: Some(parent.hash),
            height: parent.height + 1,
            chain_work: parent.chain_work.add(&work),
            validity: Validity::Tree,
            failure: Failure::None,
        }
    }

    pub fn is_valid_tip_candidate(&self) -> bool {
        self.validity == Validity::Tree && self.failure == Failure::None
    }
}
