//! End-to-end tests
//!
//! Full-stack scenarios across the planner, two transaction indexes and the
//! storage tier:
//! - Serializability: write skew and the dangerous-structure abort
//! - Partitions: multi-index transactions and routing
//! - Persistence: background checkpointing and reads after it
//! - Pessimism: contended keys reported to the planner and locked up front
//! - Bank: randomized transfers preserving the total

#[path = "../common/mod.rs"]
mod common;

mod bank;
mod partitions;
mod persistence;
mod pessimism;
mod serializability;
