//! Boundary between the orchestrator and the external messaging client.
//!
//! An adapter is built by an [`AdapterFactory`] for one tenant and owned by
//! that tenant's session entry. It reports lifecycle progress by pushing
//! [`AdapterEvent`]s into the [`AdapterEventSink`] it was created with; the
//! entry's mutator task is the only consumer of that channel and the only
//! writer of entry state.

mod bridge;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lydia_runtime::BridgeError;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::tenant::TenantKey;

pub use bridge::{BridgeAdapter, BridgeAdapterFactory, DEFAULT_DESTROY_GRACE};

/// Lifecycle event reported by a client adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
	Qr { challenge: String },
	Authenticated,
	Ready { wid: Option<String>, pushname: Option<String> },
	AuthFailure { reason: String },
	Disconnected { reason: String },
	/// Raw connection state string; informational only.
	StateChanged { state: String },
}

impl AdapterEvent {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Qr { .. } => "qr",
			Self::Authenticated => "authenticated",
			Self::Ready { .. } => "ready",
			Self::AuthFailure { .. } => "auth_failure",
			Self::Disconnected { .. } => "disconnected",
			Self::StateChanged { .. } => "state_changed",
		}
	}
}

#[derive(Debug, Error)]
pub enum AdapterError {
	#[error("{0}")]
	Init(String),

	#[error("teardown failed: {0}")]
	Teardown(String),

	#[error(transparent)]
	Bridge(#[from] BridgeError),
}

/// Message consumed by an entry's mutator.
#[derive(Debug)]
pub(crate) enum EntryMessage {
	Adapter(AdapterEvent),
	InitializeFailed(String),
}

/// Sending half of an entry's event channel, handed to its adapter.
#[derive(Debug, Clone)]
pub struct AdapterEventSink {
	tx: mpsc::UnboundedSender<EntryMessage>,
}

impl AdapterEventSink {
	pub(crate) fn new(tx: mpsc::UnboundedSender<EntryMessage>) -> Self {
		Self { tx }
	}

	/// Queues an event for the owning entry. Returns `false` once the entry
	/// no longer listens.
	pub fn emit(&self, event: AdapterEvent) -> bool {
		self.tx.send(EntryMessage::Adapter(event)).is_ok()
	}

	pub(crate) fn initialize_failed(&self, error: String) -> bool {
		self.tx.send(EntryMessage::InitializeFailed(error)).is_ok()
	}

	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

/// Everything an adapter needs to bind itself to one tenant's storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSpec {
	pub tenant: TenantKey,
	pub client_id: String,
	pub session_dir: PathBuf,
	pub cache_dir: PathBuf,
	pub headless: bool,
	pub launch_args: Vec<String>,
	pub web_version: Option<String>,
	pub takeover_on_conflict: bool,
	pub takeover_timeout: Duration,
}

/// One tenant's external client.
#[async_trait]
pub trait ClientAdapter: Send + Sync + 'static {
	/// Starts the client. Resolves once it is up and emitting events; fails
	/// only on unrecoverable startup errors.
	async fn initialize(&self) -> Result<(), AdapterError>;

	/// Tears the client down. Callers treat errors as best-effort noise.
	async fn destroy(&self) -> Result<(), AdapterError>;
}

/// Builds adapters; nothing is started until [`ClientAdapter::initialize`].
pub trait AdapterFactory: Send + Sync + 'static {
	fn create(&self, spec: AdapterSpec, events: AdapterEventSink) -> Result<Arc<dyn ClientAdapter>, AdapterError>;
}
