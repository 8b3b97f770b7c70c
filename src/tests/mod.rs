//! Crate-level tests
//!
//! - `lifecycle`: session state machine, packet writing and interleaving
//!   against a recording sink
//! - `e2e`: real muxing through FFmpeg into temp directories and memory

pub mod lifecycle;
