//! Wire types for the Lydia client bridge protocol.
//!
//! The messaging client runs out of process behind a small bridge program.
//! This crate contains the serde-serializable types exchanged with that
//! bridge: newline-delimited JSON objects, one per line, tagged by `type`.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * 1:1 with the bridge: Match what the bridge prints and reads
//! * Stable: Changes only when the bridge protocol changes
//!
//! Session semantics are layered on top of these types in `lydia-core`.

pub mod bridge;

pub use bridge::*;
