//! Anti-dependency edges reported by the transaction index

use crate::types::TxIdentifier;
use serde::{Deserialize, Serialize};

/// Kind of dependency between two transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepType {
    /// `t1` read a key that `t2` writes concurrently
    ReadWrite,
}

/// A directed dependency edge `t1 -> t2` discovered on `key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dep {
    /// Key the edge was discovered on
    pub key: Vec<u8>,
    /// Edge kind
    pub dep_type: DepType,
    /// Reader side
    pub t1: TxIdentifier,
    /// Writer side
    pub t2: TxIdentifier,
}

impl Dep {
    /// A read-write anti-dependency from reader `t1` to writer `t2`
    pub fn read_write(key: impl Into<Vec<u8>>, t1: TxIdentifier, t2: TxIdentifier) -> Self {
        Self {
            key: key.into(),
            dep_type: DepType::ReadWrite,
            t1,
            t2,
        }
    }

    /// Whether both endpoints are the same transaction
    pub fn is_self_edge(&self) -> bool {
        self.t1.start_ts == self.t2.start_ts
    }
}
