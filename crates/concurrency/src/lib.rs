//! Serializable snapshot isolation coordinator for txkv
//!
//! This crate provides:
//! - TxTable: dependency graph of in-flight and recently finished transactions
//! - TxNode: per-transaction status and anti-dependency edges
//! - TxPlanner: timestamp oracle that drives the table and implements
//!   [`txkv_core::Coordinator`]
//! - TableGc: background collection of finished transactions
//! - EarlyValidation: handle resolving when a transaction aborts or commits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod gc;
pub mod node;
pub mod planner;
pub mod table;
pub mod validation;

pub use config::{RetentionPolicy, TxTableConfig};
pub use gc::TableGc;
pub use node::TxNode;
pub use planner::TxPlanner;
pub use table::TxTable;
pub use validation::EarlyValidation;
