//! Integration and end-to-end tests for Umbra.
//!
//! This crate provides:
//! - A multi-node test harness over the in-memory transport
//! - Integration tests for lookups, query answering and packet delivery

pub mod harness;
pub mod node;

pub use harness::TestNetwork;
pub use node::{PacketRecorder, RecordedPacket, TestNode};
