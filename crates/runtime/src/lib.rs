//! Client bridge process lifecycle for Lydia.
//!
//! The messaging client itself lives in an external bridge program. This
//! crate owns the OS-level side of that relationship: launching the bridge
//! with its environment, turning its stdout into a stream of
//! [`lydia_protocol::BridgeEvent`]s and shutting it down with a grace period.

pub mod error;
pub mod process;

pub use error::{BridgeError, Result};
pub use process::{BridgeOutput, BridgeProcess, BridgeSpec, ShutdownOutcome};
