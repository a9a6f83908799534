//! Lifecycle controller: start, restart, stop, destroy and wipe.
//!
//! Every operation on a tenant runs under that tenant's async lock, so two
//! requests for the same key never interleave their teardown and creation
//! steps. In single-instance mode all tenants share one lock and at most one
//! entry may be live.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterEventSink, AdapterFactory, AdapterSpec};
use crate::config::OrchestratorConfig;
use crate::entry::{SessionEntry, spawn_mutator};
use crate::error::{Result, SessionError};
use crate::paths::{PathResolver, StoragePaths, WipeReport};
use crate::qr::{QrCodeRenderer, QrRenderer};
use crate::registry::{RegistryError, SessionRegistry};
use crate::tenant::TenantKey;

/// Lock key shared by every tenant in single-instance mode.
const GLOBAL_LOCK: &str = "*";

/// Options for [`SessionController::ensure`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnsureOptions {
	/// Tear down an existing entry and build a fresh one.
	pub force_restart: bool,
	/// With `force_restart`, delete stored credentials and cache first.
	pub wipe: bool,
	/// Per-call override of the configured headless flag.
	pub headless: Option<bool>,
	/// Fail with `Conflict` instead of reusing a live entry.
	pub exclusive: bool,
}

/// Serialized lifecycle operations over one data root.
///
/// Each locked operation runs on its own task, so a caller that stops
/// polling (a dropped HTTP request, an outer timeout) never leaves an entry
/// half torn down.
#[derive(Clone)]
pub struct SessionController {
	inner: Arc<ControllerInner>,
}

struct ControllerInner {
	config: OrchestratorConfig,
	paths: PathResolver,
	registry: SessionRegistry,
	factory: Arc<dyn AdapterFactory>,
	renderer: Arc<dyn QrRenderer>,
	locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl std::fmt::Debug for SessionController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionController")
			.field("data_root", &self.inner.paths.data_root())
			.field("live", &self.inner.registry.len())
			.finish_non_exhaustive()
	}
}

/// Held for the duration of one tenant operation.
struct KeyLock<'a> {
	locks: &'a DashMap<String, Arc<AsyncMutex<()>>>,
	key: String,
	guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLock<'_> {
	fn drop(&mut self) {
		self.guard.take();
		self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
	}
}

impl SessionController {
	pub fn new(config: OrchestratorConfig, factory: Arc<dyn AdapterFactory>) -> Self {
		Self::with_renderer(config, factory, Arc::new(QrCodeRenderer))
	}

	pub fn with_renderer(config: OrchestratorConfig, factory: Arc<dyn AdapterFactory>, renderer: Arc<dyn QrRenderer>) -> Self {
		Self {
			inner: Arc::new(ControllerInner {
				paths: PathResolver::new(config.data_root.clone()),
				config,
				registry: SessionRegistry::new(),
				factory,
				renderer,
				locks: DashMap::new(),
			}),
		}
	}

	pub fn config(&self) -> &OrchestratorConfig {
		&self.inner.config
	}

	pub fn paths(&self) -> &PathResolver {
		&self.inner.paths
	}

	pub fn get(&self, tenant: &TenantKey) -> Option<Arc<SessionEntry>> {
		self.inner.registry.get(&tenant.composite())
	}

	pub fn list(&self) -> Vec<Arc<SessionEntry>> {
		self.inner.registry.list()
	}

	/// Returns the live entry for `tenant`, creating one when needed.
	///
	/// Creation returns as soon as the entry is registered; the adapter's
	/// `initialize` runs in the background and a failure there lands on the
	/// entry as `failed` with `last_error`.
	pub async fn ensure(&self, tenant: &TenantKey, options: EnsureOptions) -> Result<Arc<SessionEntry>> {
		let inner = Arc::clone(&self.inner);
		let tenant = tenant.clone();
		detached(async move { inner.ensure(&tenant, options).await }).await
	}

	/// Forces a fresh entry, optionally wiping stored data first.
	pub async fn restart(&self, tenant: &TenantKey, wipe: bool) -> Result<Arc<SessionEntry>> {
		let options = EnsureOptions {
			force_restart: true,
			wipe,
			..Default::default()
		};
		self.ensure(tenant, options).await
	}

	/// Tears down the live entry but keeps stored credentials.
	pub async fn stop(&self, tenant: &TenantKey) -> Result<bool> {
		self.destroy(tenant, false).await
	}

	/// Tears down the live entry, if any, then optionally wipes its storage.
	///
	/// Returns whether an entry existed. Absence is not an error.
	pub async fn destroy(&self, tenant: &TenantKey, wipe: bool) -> Result<bool> {
		let inner = Arc::clone(&self.inner);
		let tenant = tenant.clone();
		detached(async move { inner.destroy(&tenant, wipe).await }).await
	}

	/// Best-effort teardown of every live entry; stored data stays.
	pub async fn shutdown_all(&self) -> usize {
		let inner = Arc::clone(&self.inner);
		detached(async move { Ok(inner.shutdown_all().await) }).await.unwrap_or_else(|err| {
			warn!(target = "lydia.session", error = %err, "shutdown task failed");
			0
		})
	}
}

/// Runs `operation` to completion on its own task, whether or not the
/// caller keeps waiting for it.
async fn detached<T, F>(operation: F) -> Result<T>
where
	T: Send + 'static,
	F: Future<Output = Result<T>> + Send + 'static,
{
	match tokio::spawn(operation).await {
		Ok(result) => result,
		Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
		Err(err) => Err(SessionError::Interrupted(err.to_string())),
	}
}

impl ControllerInner {
	async fn ensure(&self, tenant: &TenantKey, options: EnsureOptions) -> Result<Arc<SessionEntry>> {
		let key = tenant.composite();
		let _lock = self.lock(&key).await;

		if let Some(existing) = self.registry.get(&key) {
			if options.exclusive {
				return Err(SessionError::Conflict { key });
			}
			if !options.force_restart {
				debug!(target = "lydia.session", key = %key, status = %existing.status(), "reusing live session");
				return Ok(existing);
			}
		}

		if self.config.single_instance_enforced() {
			if let Some(active) = self.registry.keys().into_iter().find(|k| *k != key) {
				return Err(SessionError::CapacityExceeded { active, requested: key });
			}
		}

		if options.force_restart {
			if let Some(existing) = self.registry.get(&key) {
				info!(target = "lydia.session", key = %key, wipe = options.wipe, "restarting session");
				existing.mark_restarting();
				self.retire(existing).await;
			}
			if options.wipe {
				self.wipe_storage(tenant).await;
			}
		}

		self.create(tenant, options.headless).await
	}

	async fn destroy(&self, tenant: &TenantKey, wipe: bool) -> Result<bool> {
		let key = tenant.composite();
		let _lock = self.lock(&key).await;

		let existed = match self.registry.get(&key) {
			Some(entry) => {
				self.retire(entry).await;
				true
			}
			None => false,
		};
		if wipe {
			self.wipe_storage(tenant).await;
		}

		info!(target = "lydia.session", key = %key, existed, wipe, "session destroyed");
		Ok(existed)
	}

	async fn shutdown_all(&self) -> usize {
		let entries = self.registry.drain();
		let count = entries.len();
		let timeout = self.config.adapter_destroy_timeout;

		let mut tasks = JoinSet::new();
		for entry in entries {
			tasks.spawn(async move {
				destroy_adapter(&entry, timeout).await;
				entry.mark_destroyed();
			});
		}
		while tasks.join_next().await.is_some() {}

		info!(target = "lydia.session", count, "all sessions shut down");
		count
	}

	async fn lock(&self, key: &str) -> KeyLock<'_> {
		let key = if self.config.single_instance_enforced() { GLOBAL_LOCK } else { key };
		let mutex = Arc::clone(self.locks.entry(key.to_string()).or_default().value());
		let guard = mutex.lock_owned().await;
		KeyLock {
			locks: &self.locks,
			key: key.to_string(),
			guard: Some(guard),
		}
	}

	/// Destroys the adapter, then removes and marks the entry, whatever the
	/// adapter did.
	async fn retire(&self, entry: Arc<SessionEntry>) {
		destroy_adapter(&entry, self.config.adapter_destroy_timeout).await;
		self.registry.remove(entry.key());
		entry.mark_destroyed();
	}

	async fn create(&self, tenant: &TenantKey, headless: Option<bool>) -> Result<Arc<SessionEntry>> {
		let key = tenant.composite();
		let storage = self.prepare_storage(tenant).await?;

		let (tx, rx) = mpsc::unbounded_channel();
		let events = AdapterEventSink::new(tx);
		let spec = AdapterSpec {
			tenant: tenant.clone(),
			client_id: storage.client_id.clone(),
			session_dir: storage.session_dir.clone(),
			cache_dir: storage.cache_dir.clone(),
			headless: headless.unwrap_or(self.config.headless),
			launch_args: self.config.effective_launch_args(),
			web_version: self.config.web_version.clone(),
			takeover_on_conflict: self.config.takeover_on_conflict,
			takeover_timeout: self.config.takeover_timeout,
		};
		let adapter = self
			.factory
			.create(spec, events.clone())
			.map_err(|err| SessionError::AdapterInit(err.to_string()))?;

		let entry = Arc::new(SessionEntry::new(tenant.clone(), storage, Arc::clone(&adapter)));
		entry.attach_mutator(spawn_mutator(Arc::downgrade(&entry), rx, Arc::clone(&self.renderer)));

		if let Err(RegistryError::AlreadyExists { key }) = self.registry.put(Arc::clone(&entry)) {
			warn!(target = "lydia.session", key = %key, "lost creation race; discarding new adapter");
			destroy_adapter(&entry, self.config.adapter_destroy_timeout).await;
			entry.mark_destroyed();
			return Err(SessionError::Conflict { key });
		}

		info!(
			target = "lydia.session",
			key = %key,
			client_id = %entry.paths().client_id,
			session_dir = %entry.paths().session_dir.display(),
			"session created; initializing client"
		);

		tokio::spawn(async move {
			match adapter.initialize().await {
				Ok(()) => debug!(target = "lydia.session", key = %key, "client initialized"),
				Err(err) => {
					events.initialize_failed(err.to_string());
				}
			}
		});

		Ok(entry)
	}

	/// Creates the storage roots and migrates legacy directories.
	async fn prepare_storage(&self, tenant: &TenantKey) -> Result<StoragePaths> {
		let paths = self.paths.clone();
		let tenant = tenant.clone();
		let data_root = self.paths.data_root().to_path_buf();

		tokio::task::spawn_blocking(move || -> Result<StoragePaths> {
			paths.ensure_roots()?;
			paths.migrate_legacy_if_needed(&tenant);
			Ok(paths.resolve(&tenant))
		})
		.await
		.map_err(|err| SessionError::storage(data_root, std::io::Error::other(err)))?
	}

	async fn wipe_storage(&self, tenant: &TenantKey) -> WipeReport {
		let paths = self.paths.clone();
		let target = tenant.clone();

		let report = tokio::task::spawn_blocking(move || paths.wipe(&target)).await.unwrap_or_else(|err| {
			warn!(target = "lydia.paths", error = %err, "wipe task failed");
			WipeReport::default()
		});
		info!(
			target = "lydia.paths",
			tenant = %tenant,
			removed = report.removed.len(),
			failed = report.failed.len(),
			"tenant storage wiped"
		);
		report
	}
}

async fn destroy_adapter(entry: &SessionEntry, timeout: Duration) {
	match tokio::time::timeout(timeout, entry.adapter().destroy()).await {
		Ok(Ok(())) => {}
		Ok(Err(err)) => {
			warn!(target = "lydia.session", key = entry.key(), error = %err, "adapter teardown failed");
		}
		Err(_) => {
			warn!(
				target = "lydia.session",
				key = entry.key(),
				timeout_ms = timeout.as_millis() as u64,
				"adapter teardown timed out"
			);
		}
	}
}
