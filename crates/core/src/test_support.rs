//! In-memory client adapter for exercising the orchestrator without a bridge.
//!
//! ```ignore
//! let factory = FakeAdapterFactory::new();
//! let controller = SessionController::new(config, Arc::new(factory.clone()));
//!
//! controller.ensure(&tenant, EnsureOptions::default()).await?;
//! factory.latest("acme:alice").unwrap().qr("XYZ");
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::adapter::{AdapterError, AdapterEvent, AdapterEventSink, AdapterFactory, AdapterSpec, ClientAdapter};
use crate::tenant::TenantKey;

#[derive(Debug, Default)]
struct FactoryShared {
	adapters: Mutex<Vec<FakeAdapterHandle>>,
	fail_create: Mutex<Option<String>>,
	fail_initialize: Mutex<Option<String>>,
	fail_destroy: Mutex<Option<String>>,
	initialize_delay: Mutex<Option<Duration>>,
	destroy_delay: Mutex<Option<Duration>>,
}

/// Factory that records every adapter it builds.
#[derive(Debug, Clone, Default)]
pub struct FakeAdapterFactory {
	shared: Arc<FactoryShared>,
}

impl FakeAdapterFactory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every later `create` fail with `message`.
	pub fn fail_create(&self, message: impl Into<String>) {
		*self.shared.fail_create.lock() = Some(message.into());
	}

	/// Makes `initialize` of every later adapter fail with `message`.
	pub fn fail_initialize(&self, message: impl Into<String>) {
		*self.shared.fail_initialize.lock() = Some(message.into());
	}

	/// Makes `destroy` of every later adapter fail with `message`.
	pub fn fail_destroy(&self, message: impl Into<String>) {
		*self.shared.fail_destroy.lock() = Some(message.into());
	}

	pub fn delay_initialize(&self, delay: Duration) {
		*self.shared.initialize_delay.lock() = Some(delay);
	}

	/// Makes `destroy` of every later adapter take `delay` before returning.
	pub fn delay_destroy(&self, delay: Duration) {
		*self.shared.destroy_delay.lock() = Some(delay);
	}

	/// Every adapter built so far, oldest first.
	pub fn created(&self) -> Vec<FakeAdapterHandle> {
		self.shared.adapters.lock().clone()
	}

	pub fn adapters_for(&self, key: &str) -> Vec<FakeAdapterHandle> {
		self.created().into_iter().filter(|a| a.key() == key).collect()
	}

	pub fn latest(&self, key: &str) -> Option<FakeAdapterHandle> {
		self.adapters_for(key).pop()
	}

	/// Adapters built but never destroyed.
	pub fn live(&self) -> Vec<FakeAdapterHandle> {
		self.created().into_iter().filter(|a| !a.is_destroyed()).collect()
	}

	/// An adapter bound to nothing, for tests that only need an entry.
	pub fn detached_adapter(&self, tenant: &TenantKey) -> Arc<dyn ClientAdapter> {
		let (tx, _rx) = mpsc::unbounded_channel();
		let spec = AdapterSpec {
			tenant: tenant.clone(),
			client_id: tenant.storage_key(),
			session_dir: Default::default(),
			cache_dir: Default::default(),
			headless: true,
			launch_args: Vec::new(),
			web_version: None,
			takeover_on_conflict: false,
			takeover_timeout: Duration::ZERO,
		};
		Arc::new(FakeAdapter {
			handle: self.build_handle(spec, AdapterEventSink::new(tx)),
		})
	}

	fn build_handle(&self, spec: AdapterSpec, events: AdapterEventSink) -> FakeAdapterHandle {
		FakeAdapterHandle {
			inner: Arc::new(FakeAdapterState {
				spec,
				events,
				initialize_calls: AtomicUsize::new(0),
				destroy_calls: AtomicUsize::new(0),
				initialize_error: self.shared.fail_initialize.lock().clone(),
				destroy_error: self.shared.fail_destroy.lock().clone(),
				initialize_delay: *self.shared.initialize_delay.lock(),
				destroy_delay: *self.shared.destroy_delay.lock(),
			}),
		}
	}
}

impl AdapterFactory for FakeAdapterFactory {
	fn create(&self, spec: AdapterSpec, events: AdapterEventSink) -> Result<Arc<dyn ClientAdapter>, AdapterError> {
		if let Some(message) = self.shared.fail_create.lock().clone() {
			return Err(AdapterError::Init(message));
		}

		let handle = self.build_handle(spec, events);
		self.shared.adapters.lock().push(handle.clone());
		Ok(Arc::new(FakeAdapter { handle }))
	}
}

#[derive(Debug)]
struct FakeAdapterState {
	spec: AdapterSpec,
	events: AdapterEventSink,
	initialize_calls: AtomicUsize,
	destroy_calls: AtomicUsize,
	initialize_error: Option<String>,
	destroy_error: Option<String>,
	initialize_delay: Option<Duration>,
	destroy_delay: Option<Duration>,
}

/// Test-side view of one fake adapter: inspect calls, inject events.
#[derive(Debug, Clone)]
pub struct FakeAdapterHandle {
	inner: Arc<FakeAdapterState>,
}

impl FakeAdapterHandle {
	pub fn spec(&self) -> &AdapterSpec {
		&self.inner.spec
	}

	pub fn key(&self) -> String {
		self.inner.spec.tenant.composite()
	}

	pub fn initialize_calls(&self) -> usize {
		self.inner.initialize_calls.load(Ordering::SeqCst)
	}

	pub fn destroy_calls(&self) -> usize {
		self.inner.destroy_calls.load(Ordering::SeqCst)
	}

	pub fn is_destroyed(&self) -> bool {
		self.destroy_calls() > 0
	}

	/// Pushes an event as the real client would. `false` once nobody listens.
	pub fn emit(&self, event: AdapterEvent) -> bool {
		self.inner.events.emit(event)
	}

	pub fn qr(&self, challenge: &str) -> bool {
		self.emit(AdapterEvent::Qr {
			challenge: challenge.to_string(),
		})
	}

	pub fn authenticated(&self) -> bool {
		self.emit(AdapterEvent::Authenticated)
	}

	pub fn ready(&self, wid: &str) -> bool {
		self.emit(AdapterEvent::Ready {
			wid: Some(wid.to_string()),
			pushname: None,
		})
	}

	pub fn disconnected(&self, reason: &str) -> bool {
		self.emit(AdapterEvent::Disconnected { reason: reason.to_string() })
	}
}

#[derive(Debug)]
struct FakeAdapter {
	handle: FakeAdapterHandle,
}

#[async_trait]
impl ClientAdapter for FakeAdapter {
	async fn initialize(&self) -> Result<(), AdapterError> {
		let state = &self.handle.inner;
		state.initialize_calls.fetch_add(1, Ordering::SeqCst);
		if let Some(delay) = state.initialize_delay {
			tokio::time::sleep(delay).await;
		}
		match &state.initialize_error {
			Some(message) => Err(AdapterError::Init(message.clone())),
			None => Ok(()),
		}
	}

	async fn destroy(&self) -> Result<(), AdapterError> {
		let state = &self.handle.inner;
		state.destroy_calls.fetch_add(1, Ordering::SeqCst);
		if let Some(delay) = state.destroy_delay {
			tokio::time::sleep(delay).await;
		}
		match &state.destroy_error {
			Some(message) => Err(AdapterError::Teardown(message.clone())),
			None => Ok(()),
		}
	}
}

/// Polls `check` every few milliseconds for up to two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
	for _ in 0..400 {
		if check() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	check()
}
