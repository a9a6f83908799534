//! Bridge process lifecycle: spawn, stdout event stream, stdin commands, shutdown.

use std::process::Stdio;
use std::time::Duration;

use lydia_protocol::{BridgeCommand, BridgeEvent};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// Everything needed to launch one bridge process.
#[derive(Debug, Clone, Default)]
pub struct BridgeSpec {
	pub program: String,
	pub args: Vec<String>,
	pub env: Vec<(String, String)>,
}

impl BridgeSpec {
	pub fn new(program: impl Into<String>) -> Self {
		Self {
			program: program.into(),
			..Default::default()
		}
	}

	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.push((key.into(), value.into()));
		self
	}
}

/// Output observed on the bridge's stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutput {
	Event(BridgeEvent),
	/// stdout reached EOF; the process exited or closed its end.
	Closed,
}

/// How a bridge process ended after [`BridgeProcess::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
	/// Exited on its own within the grace period.
	Exited(Option<i32>),
	/// Still running after the grace period and was killed.
	Killed,
	/// Had already exited before shutdown was requested.
	AlreadyExited(Option<i32>),
}

/// A running bridge child process.
///
/// Dropping the handle kills the child.
#[derive(Debug)]
pub struct BridgeProcess {
	pid: Option<u32>,
	child: Mutex<Child>,
	stdin: Mutex<Option<ChildStdin>>,
}

impl BridgeProcess {
	/// Spawns the bridge and starts forwarding its stdout lines.
	///
	/// Lines that are not valid [`BridgeEvent`]s are logged and skipped.
	pub fn spawn(spec: &BridgeSpec) -> Result<(Self, mpsc::UnboundedReceiver<BridgeOutput>)> {
		let mut cmd = Command::new(&spec.program);
		cmd.args(&spec.args)
			.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let mut child = cmd.spawn().map_err(|source| BridgeError::Spawn {
			program: spec.program.clone(),
			source,
		})?;
		let pid = child.id();

		let stdout = child.stdout.take().ok_or(BridgeError::MissingPipe("stdout"))?;
		let stderr = child.stderr.take().ok_or(BridgeError::MissingPipe("stderr"))?;
		let stdin = child.stdin.take();

		let (tx, rx) = mpsc::unbounded_channel();
		tokio::spawn(forward_stdout(pid, stdout, tx));
		tokio::spawn(forward_stderr(pid, stderr));

		debug!(target = "lydia.bridge", pid, program = %spec.program, "bridge spawned");

		Ok((
			Self {
				pid,
				child: Mutex::new(child),
				stdin: Mutex::new(stdin),
			},
			rx,
		))
	}

	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	/// Writes one command line to the bridge's stdin.
	pub async fn send(&self, command: &BridgeCommand) -> Result<()> {
		let line = command.to_line()?;
		let mut guard = self.stdin.lock().await;
		let stdin = guard.as_mut().ok_or(BridgeError::NotRunning)?;
		stdin.write_all(line.as_bytes()).await?;
		stdin.flush().await?;
		Ok(())
	}

	/// Asks the bridge to exit, then kills it if it is still alive after `grace`.
	pub async fn shutdown(&self, grace: Duration) -> Result<ShutdownOutcome> {
		let mut child = self.child.lock().await;
		if let Some(status) = child.try_wait()? {
			return Ok(ShutdownOutcome::AlreadyExited(status.code()));
		}

		if let Err(err) = self.send(&BridgeCommand::Shutdown).await {
			debug!(target = "lydia.bridge", pid = self.pid, error = %err, "shutdown command not delivered");
		}
		// Closing stdin lets bridges that read until EOF exit on their own.
		self.stdin.lock().await.take();

		match tokio::time::timeout(grace, child.wait()).await {
			Ok(status) => Ok(ShutdownOutcome::Exited(status?.code())),
			Err(_) => {
				warn!(
					target = "lydia.bridge",
					pid = self.pid,
					grace_ms = grace.as_millis() as u64,
					"bridge ignored shutdown; killing"
				);
				child.kill().await?;
				Ok(ShutdownOutcome::Killed)
			}
		}
	}
}

async fn forward_stdout(pid: Option<u32>, stdout: tokio::process::ChildStdout, tx: mpsc::UnboundedSender<BridgeOutput>) {
	let mut lines = BufReader::new(stdout).lines();
	loop {
		match lines.next_line().await {
			Ok(Some(line)) => {
				if line.trim().is_empty() {
					continue;
				}
				match BridgeEvent::from_line(&line) {
					Ok(event) => {
						if tx.send(BridgeOutput::Event(event)).is_err() {
							return;
						}
					}
					Err(err) => {
						warn!(target = "lydia.bridge", pid, error = %err, line = %line, "ignoring malformed bridge line");
					}
				}
			}
			Ok(None) => break,
			Err(err) => {
				warn!(target = "lydia.bridge", pid, error = %err, "bridge stdout read failed");
				break;
			}
		}
	}
	let _ = tx.send(BridgeOutput::Closed);
}

async fn forward_stderr(pid: Option<u32>, stderr: tokio::process::ChildStderr) {
	let mut lines = BufReader::new(stderr).lines();
	while let Ok(Some(line)) = lines.next_line().await {
		debug!(target = "lydia.bridge", pid, stderr = %line);
	}
}

#[cfg(all(test, unix))]
mod tests {
	use super::*;

	fn sh(script: &str) -> BridgeSpec {
		BridgeSpec::new("sh").arg("-c").arg(script)
	}

	#[tokio::test]
	async fn forwards_events_and_reports_close() {
		let spec = sh(r#"echo '{"type":"initialized"}'; echo 'not json'; echo '{"type":"qr","challenge":"XYZ"}'"#);
		let (_process, mut rx) = BridgeProcess::spawn(&spec).unwrap();

		assert_eq!(rx.recv().await, Some(BridgeOutput::Event(BridgeEvent::Initialized)));
		assert_eq!(
			rx.recv().await,
			Some(BridgeOutput::Event(BridgeEvent::Qr { challenge: "XYZ".into() }))
		);
		assert_eq!(rx.recv().await, Some(BridgeOutput::Closed));
	}

	#[tokio::test]
	async fn environment_reaches_the_bridge() {
		let spec = sh(r#"printf '{"type":"state_changed","state":"%s"}\n' "$LYDIA_TEST_STATE""#).env("LYDIA_TEST_STATE", "CONNECTED");
		let (_process, mut rx) = BridgeProcess::spawn(&spec).unwrap();

		assert_eq!(
			rx.recv().await,
			Some(BridgeOutput::Event(BridgeEvent::StateChanged { state: "CONNECTED".into() }))
		);
	}

	#[tokio::test]
	async fn shutdown_lets_a_cooperative_bridge_exit() {
		let spec = sh("read line; exit 0");
		let (process, _rx) = BridgeProcess::spawn(&spec).unwrap();

		let outcome = process.shutdown(Duration::from_secs(5)).await.unwrap();
		assert_eq!(outcome, ShutdownOutcome::Exited(Some(0)));
		assert_eq!(process.shutdown(Duration::from_secs(1)).await.unwrap(), ShutdownOutcome::AlreadyExited(Some(0)));
	}

	#[tokio::test]
	async fn shutdown_kills_a_stubborn_bridge() {
		let spec = sh("trap '' TERM; while true; do sleep 1; done");
		let (process, _rx) = BridgeProcess::spawn(&spec).unwrap();

		let outcome = process.shutdown(Duration::from_millis(200)).await.unwrap();
		assert_eq!(outcome, ShutdownOutcome::Killed);
	}

	#[tokio::test]
	async fn spawn_failure_names_the_program() {
		let err = BridgeProcess::spawn(&BridgeSpec::new("/nonexistent/lydia-bridge")).unwrap_err();
		assert!(err.to_string().contains("/nonexistent/lydia-bridge"), "{err}");
	}
}
