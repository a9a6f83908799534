//! Adapter backed by an out-of-process client bridge.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lydia_protocol::{BridgeEvent, BridgeLogLevel};
use lydia_runtime::{BridgeOutput, BridgeProcess, BridgeSpec, ShutdownOutcome};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{AdapterError, AdapterEvent, AdapterEventSink, AdapterFactory, AdapterSpec, ClientAdapter};

/// Default time a bridge gets to exit after the shutdown command.
pub const DEFAULT_DESTROY_GRACE: Duration = Duration::from_secs(5);

/// Creates [`BridgeAdapter`]s that launch `program args...` per tenant.
#[derive(Debug, Clone)]
pub struct BridgeAdapterFactory {
	program: String,
	args: Vec<String>,
	destroy_grace: Duration,
}

impl BridgeAdapterFactory {
	pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
		Self {
			program: program.into(),
			args,
			destroy_grace: DEFAULT_DESTROY_GRACE,
		}
	}

	pub fn with_destroy_grace(mut self, grace: Duration) -> Self {
		self.destroy_grace = grace;
		self
	}

	fn bridge_spec(&self, spec: &AdapterSpec) -> BridgeSpec {
		let mut bridge = BridgeSpec::new(&self.program);
		for arg in &self.args {
			bridge = bridge.arg(arg);
		}
		bridge
			.env("LYDIA_CLIENT_ID", &spec.client_id)
			.env("LYDIA_SESSION_DIR", spec.session_dir.display().to_string())
			.env("LYDIA_CACHE_DIR", spec.cache_dir.display().to_string())
			.env("LYDIA_HEADLESS", spec.headless.to_string())
			.env("LYDIA_LAUNCH_ARGS", spec.launch_args.join(","))
			.env("LYDIA_WEB_VERSION", spec.web_version.clone().unwrap_or_default())
			.env("LYDIA_TAKEOVER_ON_CONFLICT", spec.takeover_on_conflict.to_string())
			.env("LYDIA_TAKEOVER_TIMEOUT_MS", spec.takeover_timeout.as_millis().to_string())
	}
}

impl AdapterFactory for BridgeAdapterFactory {
	fn create(&self, spec: AdapterSpec, events: AdapterEventSink) -> Result<Arc<dyn ClientAdapter>, AdapterError> {
		Ok(Arc::new(BridgeAdapter {
			tenant: spec.tenant.to_string(),
			spec: self.bridge_spec(&spec),
			destroy_grace: self.destroy_grace,
			events,
			process: Mutex::new(None),
			shutting_down: Arc::new(AtomicBool::new(false)),
		}))
	}
}

/// A client running inside a bridge process.
///
/// The process is spawned by [`ClientAdapter::initialize`], which resolves
/// when the bridge prints `initialized`. Events printed afterwards are
/// forwarded to the entry; an exit nobody asked for becomes `disconnected`.
#[derive(Debug)]
pub struct BridgeAdapter {
	tenant: String,
	spec: BridgeSpec,
	destroy_grace: Duration,
	events: AdapterEventSink,
	process: Mutex<Option<BridgeProcess>>,
	shutting_down: Arc<AtomicBool>,
}

#[async_trait]
impl ClientAdapter for BridgeAdapter {
	async fn initialize(&self) -> Result<(), AdapterError> {
		let ready = {
			let mut slot = self.process.lock().await;
			if self.shutting_down.load(Ordering::Acquire) {
				return Err(AdapterError::Init("adapter destroyed before initialization".into()));
			}
			if slot.is_some() {
				return Err(AdapterError::Init("bridge already started".into()));
			}

			let (process, output) = BridgeProcess::spawn(&self.spec)?;
			info!(target = "lydia.bridge", tenant = %self.tenant, pid = process.pid(), "bridge started");
			*slot = Some(process);

			let (ready_tx, ready_rx) = oneshot::channel();
			tokio::spawn(pump(
				self.tenant.clone(),
				output,
				self.events.clone(),
				Arc::clone(&self.shutting_down),
				ready_tx,
			));
			ready_rx
		};

		match ready.await {
			Ok(Ok(())) => Ok(()),
			Ok(Err(reason)) => Err(AdapterError::Init(reason)),
			Err(_) => Err(AdapterError::Init("bridge event pump stopped".into())),
		}
	}

	async fn destroy(&self) -> Result<(), AdapterError> {
		self.shutting_down.store(true, Ordering::Release);
		let Some(process) = self.process.lock().await.take() else {
			return Ok(());
		};

		match process.shutdown(self.destroy_grace).await? {
			ShutdownOutcome::Killed => {
				warn!(target = "lydia.bridge", tenant = %self.tenant, "bridge killed after grace period");
			}
			outcome => {
				debug!(target = "lydia.bridge", tenant = %self.tenant, ?outcome, "bridge stopped");
			}
		}
		Ok(())
	}
}

async fn pump(
	tenant: String,
	mut output: mpsc::UnboundedReceiver<BridgeOutput>,
	events: AdapterEventSink,
	shutting_down: Arc<AtomicBool>,
	ready_tx: oneshot::Sender<Result<(), String>>,
) {
	let mut ready_tx = Some(ready_tx);

	while let Some(item) = output.recv().await {
		let event = match item {
			BridgeOutput::Event(event) => event,
			BridgeOutput::Closed => break,
		};

		match event {
			BridgeEvent::Initialized => {
				if let Some(tx) = ready_tx.take() {
					let _ = tx.send(Ok(()));
				}
			}
			BridgeEvent::Log { level, message } => log_bridge_line(&tenant, level, &message),
			other => {
				if let Some(event) = translate(other) {
					events.emit(event);
				}
			}
		}
	}

	let destroyed = shutting_down.load(Ordering::Acquire);
	match ready_tx.take() {
		Some(tx) => {
			let reason = if destroyed {
				"adapter destroyed during initialization"
			} else {
				"bridge exited before initializing"
			};
			let _ = tx.send(Err(reason.to_string()));
		}
		None if !destroyed => {
			warn!(target = "lydia.bridge", tenant = %tenant, "bridge exited unexpectedly");
			events.emit(AdapterEvent::Disconnected {
				reason: "bridge exited: event stream closed".into(),
			});
		}
		None => {}
	}
}

fn translate(event: BridgeEvent) -> Option<AdapterEvent> {
	Some(match event {
		BridgeEvent::Qr { challenge } => AdapterEvent::Qr { challenge },
		BridgeEvent::Authenticated => AdapterEvent::Authenticated,
		BridgeEvent::Ready { wid, pushname } => AdapterEvent::Ready { wid, pushname },
		BridgeEvent::AuthFailure { reason } => AdapterEvent::AuthFailure { reason },
		BridgeEvent::Disconnected { reason } => AdapterEvent::Disconnected { reason },
		BridgeEvent::StateChanged { state } => AdapterEvent::StateChanged { state },
		BridgeEvent::Initialized | BridgeEvent::Log { .. } => return None,
	})
}

fn log_bridge_line(tenant: &str, level: BridgeLogLevel, message: &str) {
	match level {
		BridgeLogLevel::Debug => debug!(target = "lydia.bridge", tenant, message),
		BridgeLogLevel::Info => info!(target = "lydia.bridge", tenant, message),
		BridgeLogLevel::Warn => warn!(target = "lydia.bridge", tenant, message),
		BridgeLogLevel::Error => error!(target = "lydia.bridge", tenant, message),
	}
}

#[cfg(all(test, unix))]
mod tests {
	use std::path::PathBuf;

	use super::*;
	use crate::adapter::EntryMessage;
	use crate::tenant::TenantKey;

	fn spec() -> AdapterSpec {
		AdapterSpec {
			tenant: TenantKey::new("acme", "alice").unwrap(),
			client_id: "acme_alice".into(),
			session_dir: PathBuf::from("/tmp/lydia/auth/acme_alice"),
			cache_dir: PathBuf::from("/tmp/lydia/cache/acme_alice"),
			headless: true,
			launch_args: vec!["--no-sandbox".into()],
			web_version: None,
			takeover_on_conflict: true,
			takeover_timeout: Duration::from_secs(60),
		}
	}

	fn adapter(script: &str) -> (Arc<dyn ClientAdapter>, mpsc::UnboundedReceiver<EntryMessage>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let factory = BridgeAdapterFactory::new("sh", vec!["-c".into(), script.into()]).with_destroy_grace(Duration::from_millis(500));
		(factory.create(spec(), AdapterEventSink::new(tx)).unwrap(), rx)
	}

	async fn next_event(rx: &mut mpsc::UnboundedReceiver<EntryMessage>) -> AdapterEvent {
		match rx.recv().await {
			Some(EntryMessage::Adapter(event)) => event,
			other => panic!("expected adapter event, got {other:?}"),
		}
	}

	#[test]
	fn bridge_environment_carries_tenant_binding() {
		let factory = BridgeAdapterFactory::new("node", vec!["bridge/index.js".into()]);
		let bridge = factory.bridge_spec(&spec());

		assert_eq!(bridge.program, "node");
		assert_eq!(bridge.args, vec!["bridge/index.js".to_string()]);
		let env = |key: &str| bridge.env.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
		assert_eq!(env("LYDIA_CLIENT_ID").as_deref(), Some("acme_alice"));
		assert_eq!(env("LYDIA_SESSION_DIR").as_deref(), Some("/tmp/lydia/auth/acme_alice"));
		assert_eq!(env("LYDIA_HEADLESS").as_deref(), Some("true"));
		assert_eq!(env("LYDIA_LAUNCH_ARGS").as_deref(), Some("--no-sandbox"));
		assert_eq!(env("LYDIA_TAKEOVER_TIMEOUT_MS").as_deref(), Some("60000"));
	}

	#[tokio::test]
	async fn initialize_waits_for_initialized_and_forwards_events() {
		let (adapter, mut rx) = adapter(
			r#"echo '{"type":"log","message":"booting"}'
echo '{"type":"initialized"}'
echo '{"type":"qr","challenge":"XYZ"}'
read line"#,
		);

		adapter.initialize().await.unwrap();
		assert_eq!(next_event(&mut rx).await, AdapterEvent::Qr { challenge: "XYZ".into() });
		adapter.destroy().await.unwrap();
	}

	#[tokio::test]
	async fn initialize_fails_when_bridge_exits_first() {
		let (adapter, _rx) = adapter("exit 3");
		let err = adapter.initialize().await.unwrap_err();
		assert!(err.to_string().contains("exited before initializing"), "{err}");
	}

	#[tokio::test]
	async fn initialize_fails_when_program_is_missing() {
		let (tx, _rx) = mpsc::unbounded_channel();
		let factory = BridgeAdapterFactory::new("/nonexistent/lydia-bridge", Vec::new());
		let adapter = factory.create(spec(), AdapterEventSink::new(tx)).unwrap();

		assert!(matches!(adapter.initialize().await, Err(AdapterError::Bridge(_))));
	}

	#[tokio::test]
	async fn unexpected_exit_is_reported_as_disconnect() {
		let (adapter, mut rx) = adapter(r#"echo '{"type":"initialized"}'"#);
		adapter.initialize().await.unwrap();

		match next_event(&mut rx).await {
			AdapterEvent::Disconnected { reason } => assert!(reason.starts_with("bridge exited"), "{reason}"),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn destroy_is_silent_and_idempotent() {
		let (adapter, mut rx) = adapter(
			r#"echo '{"type":"initialized"}'
read line"#,
		);
		adapter.initialize().await.unwrap();

		adapter.destroy().await.unwrap();
		adapter.destroy().await.unwrap();

		// The pump ends without reporting a disconnect for a requested shutdown.
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn destroy_before_initialize_blocks_startup() {
		let (adapter, _rx) = adapter(r#"echo '{"type":"initialized"}'"#);
		adapter.destroy().await.unwrap();
		assert!(matches!(adapter.initialize().await, Err(AdapterError::Init(_))));
	}
}
