//! Lydia: per-tenant messaging client session orchestration.
//!
//! One external client runs per `(companyId, peopleId)` tenant. This crate
//! owns the lifecycle around those clients:
//!
//! - [`paths`]: isolated, sanitized storage directories and legacy migration
//! - [`entry`]: the per-tenant record, its state machine and event mutator
//! - [`adapter`]: the client boundary and the bridge-process implementation
//! - [`registry`]: at most one live entry per tenant
//! - [`controller`]: serialized start, restart, stop, destroy and wipe
//! - [`qr`]: QR rendering and the bounded wait for the next challenge
//! - [`service`]: validated operations returning serializable views
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lydia::{BridgeAdapterFactory, OrchestratorConfig, SessionController, SessionService};
//!
//! let factory = BridgeAdapterFactory::new("node", vec!["bridge/index.js".into()]);
//! let controller = Arc::new(SessionController::new(OrchestratorConfig::default(), Arc::new(factory)));
//! let service = SessionService::new(controller);
//!
//! let view = service.start("acme", "alice", false).await?;
//! println!("{} qr={:?}", view.status, view.qr.map(|qr| qr.raw));
//! ```

pub mod adapter;
pub mod config;
pub mod controller;
pub mod entry;
pub mod error;
pub mod paths;
pub mod qr;
pub mod registry;
pub mod service;
pub mod state;
pub mod tenant;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use adapter::{AdapterError, AdapterEvent, AdapterEventSink, AdapterFactory, AdapterSpec, BridgeAdapter, BridgeAdapterFactory, ClientAdapter};
pub use config::OrchestratorConfig;
pub use controller::{EnsureOptions, SessionController};
pub use entry::{QrChallenge, ReadyInfo, SessionEntry, SessionSnapshot};
pub use error::{Result, SessionError};
pub use paths::{PathResolver, StoragePaths};
pub use qr::{QrCodeRenderer, QrRenderer, QrWaitOptions, QrWaitOutcome, WaitReason, wait_for_qr};
pub use registry::SessionRegistry;
pub use service::{DestroyView, InstanceView, QrView, SessionService, StatusView, StopView};
pub use state::SessionStatus;
pub use tenant::TenantKey;
