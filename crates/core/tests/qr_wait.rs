use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lydia::qr::RawOnlyRenderer;
use lydia::test_support::{FakeAdapterFactory, eventually};
use lydia::{EnsureOptions, OrchestratorConfig, QrWaitOptions, SessionController, SessionEntry, SessionService, TenantKey, WaitReason, wait_for_qr};
use tempfile::TempDir;
use tokio::time::Instant;
use tracing_subscriber::fmt::MakeWriter;

const POLL: Duration = Duration::from_millis(250);

/// Collects formatted log lines for inspection.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
	fn text(&self) -> String {
		String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned()
	}
}

impl io::Write for CapturedLogs {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.lock().expect("log buffer").extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl<'a> MakeWriter<'a> for CapturedLogs {
	type Writer = CapturedLogs;

	fn make_writer(&'a self) -> Self::Writer {
		self.clone()
	}
}

fn options(timeout: Duration) -> QrWaitOptions {
	QrWaitOptions {
		timeout,
		poll_interval: POLL,
		heartbeat_interval: None,
	}
}

struct Harness {
	_tmp: TempDir,
	controller: Arc<SessionController>,
	factory: FakeAdapterFactory,
}

impl Harness {
	fn new(qr_timeout: Duration) -> Self {
		let tmp = TempDir::new().expect("temp dir should be created");
		let factory = FakeAdapterFactory::new();
		let config = OrchestratorConfig {
			data_root: tmp.path().to_path_buf(),
			qr_wait: options(qr_timeout),
			..Default::default()
		};
		let controller = Arc::new(SessionController::with_renderer(config, Arc::new(factory.clone()), Arc::new(RawOnlyRenderer)));
		Self { _tmp: tmp, controller, factory }
	}

	async fn alice(&self) -> Arc<SessionEntry> {
		let tenant = TenantKey::new("acme", "alice").expect("tenant should be valid");
		self.controller.ensure(&tenant, EnsureOptions::default()).await.expect("ensure should succeed")
	}
}

#[tokio::test(start_paused = true)]
async fn cached_qr_returns_without_waiting() {
	let harness = Harness::new(Duration::from_secs(45));
	let entry = harness.alice().await;
	harness.factory.latest("acme:alice").expect("adapter").qr("XYZ");
	assert!(eventually(|| entry.last_qr().is_some()).await);

	let started = Instant::now();
	let outcome = wait_for_qr(Some(&entry), &options(Duration::from_secs(45))).await;

	assert_eq!(started.elapsed(), Duration::ZERO);
	assert_eq!(outcome.reason, WaitReason::Cached);
	assert_eq!(outcome.qr.expect("cached qr").raw, "XYZ");
	assert!(!outcome.timed_out);
	assert!(outcome.log_context.is_some_and(|ctx| ctx.starts_with("acme:alice:")));
}

#[tokio::test(start_paused = true)]
async fn disconnect_before_any_qr_ends_the_wait_as_terminal() {
	let harness = Harness::new(Duration::from_secs(45));
	let entry = harness.alice().await;
	let adapter = harness.factory.latest("acme:alice").expect("adapter");

	let wait = tokio::spawn({
		let entry = Arc::clone(&entry);
		async move { wait_for_qr(Some(&entry), &options(Duration::from_secs(45))).await }
	});
	tokio::time::sleep(Duration::from_secs(2)).await;
	adapter.disconnected("NAVIGATION");

	let outcome = wait.await.expect("wait task should finish");
	assert_eq!(outcome.reason, WaitReason::Terminal);
	assert_eq!(outcome.status, "disconnected");
	assert!(outcome.qr.is_none());
	assert!(!outcome.timed_out);
	assert!(outcome.elapsed < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn silent_entry_times_out_within_one_poll_of_the_deadline() {
	let harness = Harness::new(Duration::from_secs(45));
	let entry = harness.alice().await;
	let timeout = Duration::from_secs(3);

	let started = Instant::now();
	let outcome = wait_for_qr(Some(&entry), &options(timeout)).await;
	let waited = started.elapsed();

	assert!(outcome.timed_out);
	assert_eq!(outcome.reason, WaitReason::Timeout);
	assert_eq!(outcome.status, "starting");
	assert!(waited >= timeout, "returned early after {waited:?}");
	assert!(waited <= timeout + POLL, "returned late after {waited:?}");
	assert!(outcome.log_context.expect("timed out waits carry a context").starts_with("acme:alice:"));
}

#[tokio::test(start_paused = true)]
async fn qr_arriving_mid_wait_is_returned() {
	let harness = Harness::new(Duration::from_secs(45));
	let entry = harness.alice().await;
	let adapter = harness.factory.latest("acme:alice").expect("adapter");

	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_secs(7)).await;
		adapter.qr("2@fresh");
	});

	let started = Instant::now();
	let outcome = wait_for_qr(Some(&entry), &options(Duration::from_secs(45))).await;
	let waited = started.elapsed();

	assert_eq!(outcome.reason, WaitReason::Qr);
	assert_eq!(outcome.status, "qr");
	assert_eq!(outcome.qr.expect("fresh qr").raw, "2@fresh");
	assert!(waited >= Duration::from_secs(7) && waited <= Duration::from_secs(7) + POLL, "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn start_reports_timeout_with_log_context() {
	let harness = Harness::new(Duration::from_secs(2));
	let service = SessionService::new(Arc::clone(&harness.controller));

	let view = service.start("acme", "alice", false).await.expect("start should succeed");
	assert!(view.qr_timed_out);
	assert!(view.qr.is_none());
	assert_eq!(view.status, "starting");
	assert!(view.qr_wait_log_context.as_ref().is_some_and(|ctx| ctx.starts_with("acme:alice:")));

	let json = serde_json::to_value(&view).expect("view should serialize");
	assert_eq!(json["companyId"], "acme");
	assert_eq!(json["qrTimedOut"], true);
	assert!(json["qr"].is_null());
}

#[tokio::test(start_paused = true)]
async fn second_start_gets_the_cached_qr() {
	let harness = Harness::new(Duration::from_secs(45));
	let service = SessionService::new(Arc::clone(&harness.controller));
	let entry = harness.alice().await;
	harness.factory.latest("acme:alice").expect("adapter").qr("XYZ");
	assert!(eventually(|| entry.last_qr().is_some()).await);

	let view = service.start("acme", "alice", false).await.expect("start should succeed");
	assert!(!view.qr_timed_out);
	assert_eq!(view.status, "qr");
	assert_eq!(view.qr.and_then(|qr| qr.raw).as_deref(), Some("XYZ"));
	assert!(view.qr_wait_log_context.is_none());
	assert_eq!(harness.factory.created().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn long_waits_log_a_heartbeat_per_interval() {
	let harness = Harness::new(Duration::from_secs(45));
	let entry = harness.alice().await;

	let logs = CapturedLogs::default();
	let subscriber = tracing_subscriber::fmt()
		.with_writer(logs.clone())
		.with_ansi(false)
		.with_max_level(tracing::Level::INFO)
		.finish();
	let _guard = tracing::subscriber::set_default(subscriber);

	let options = QrWaitOptions {
		timeout: Duration::from_secs(7),
		poll_interval: POLL,
		heartbeat_interval: Some(Duration::from_secs(2)),
	};
	let outcome = wait_for_qr(Some(&entry), &options).await;
	assert!(outcome.timed_out);

	let text = logs.text();
	let context = outcome.log_context.expect("timed out waits carry a context");
	let beats: Vec<&str> = text.lines().filter(|line| line.contains("still waiting for QR")).collect();
	assert_eq!(beats.len(), 3, "{text}");
	assert!(beats.iter().all(|line| line.contains(&context)), "{text}");
	assert!(beats[0].contains("waited_ms=2000"), "{text}");
	assert!(text.contains("QR wait timed out"), "{text}");
}
