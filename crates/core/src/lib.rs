//! Core types and traits for txkv
//!
//! This crate defines the foundational types used throughout the system:
//! - Timestamp, TxStatus, TxIdentifier: transaction identity
//! - Value: stored value or deletion marker
//! - TxOpStatus, ReadOutcome: per-operation protocol outcomes
//! - Dep, DepType: anti-dependency edges
//! - Range, PartitionConfig, Partition: key-space partitioning
//! - Error: Error type hierarchy
//! - Traits: collaborator interfaces (Coordinator, BatchStore)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dep;
pub mod error;
pub mod partition;
pub mod status;
pub mod traits;
pub mod types;

pub use dep::{Dep, DepType};
pub use error::{Error, Result};
pub use partition::{Partition, PartitionConfig, Range};
pub use status::{ReadOutcome, TxOpStatus};
pub use traits::{BatchStore, Coordinator, RegionReport, StoreData};
pub use types::{Timestamp, TxIdentifier, TxStatus, Value, MAX_TIMESTAMP, MIN_TIMESTAMP};
