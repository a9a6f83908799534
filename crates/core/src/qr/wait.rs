//! Bounded wait for the next QR challenge of a session entry.
//!
//! The wait is a read-only poll over entry state. It returns as soon as a
//! challenge is available, the entry reaches a state that will never produce
//! one, or the timeout elapses. A timeout is a normal outcome, not an error.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::entry::{QrChallenge, SessionEntry};
use crate::state::NOT_CREATED;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(45_000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const MIN_HEARTBEAT: Duration = Duration::from_millis(5_000);
const HEARTBEAT_POLLS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrWaitOptions {
	pub timeout: Duration,
	pub poll_interval: Duration,
	/// Defaults to `max(5s, 20 × poll_interval)`.
	pub heartbeat_interval: Option<Duration>,
}

impl Default for QrWaitOptions {
	fn default() -> Self {
		Self {
			timeout: DEFAULT_TIMEOUT,
			poll_interval: DEFAULT_POLL_INTERVAL,
			heartbeat_interval: None,
		}
	}
}

impl QrWaitOptions {
	pub fn heartbeat(&self) -> Duration {
		self.heartbeat_interval
			.filter(|d| !d.is_zero())
			.unwrap_or_else(|| MIN_HEARTBEAT.max(self.poll_interval * HEARTBEAT_POLLS))
	}
}

/// Why a wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitReason {
	/// A challenge was already available; no waiting happened.
	Cached,
	/// A challenge arrived while waiting.
	Qr,
	/// The entry reached a state that never yields a challenge.
	Terminal,
	Timeout,
	/// There was no entry to wait on.
	NotCreated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrWaitOutcome {
	pub qr: Option<QrChallenge>,
	pub timed_out: bool,
	/// Entry status when the wait returned.
	pub status: &'static str,
	pub reason: WaitReason,
	/// `<key>:<startMillis>`; `None` only when there was no entry.
	pub log_context: Option<String>,
	pub elapsed: Duration,
}

impl QrWaitOutcome {
	fn immediate(qr: Option<QrChallenge>, status: &'static str, reason: WaitReason) -> Self {
		Self {
			qr,
			timed_out: false,
			status,
			reason,
			log_context: None,
			elapsed: Duration::ZERO,
		}
	}

	fn with_context(mut self, context: String) -> Self {
		self.log_context = Some(context);
		self
	}
}

/// Waits for `entry` to expose a QR challenge.
///
/// Returns after at most `timeout`, sleeping `poll_interval` between reads
/// and logging a heartbeat every [`QrWaitOptions::heartbeat`].
pub async fn wait_for_qr(entry: Option<&SessionEntry>, options: &QrWaitOptions) -> QrWaitOutcome {
	let Some(entry) = entry else {
		return QrWaitOutcome::immediate(None, NOT_CREATED, WaitReason::NotCreated);
	};

	let context = format!("{}:{}", entry.key(), Utc::now().timestamp_millis());
	let (status, qr) = entry.qr_progress();
	if let Some(qr) = qr {
		info!(target = "lydia.qr_wait", context = %context, status = status.as_str(), "returning cached QR without waiting");
		return QrWaitOutcome::immediate(Some(qr), status.as_str(), WaitReason::Cached).with_context(context);
	}
	if status.is_qr_terminal() {
		info!(target = "lydia.qr_wait", context = %context, status = status.as_str(), "no QR wait: status is terminal");
		return QrWaitOutcome::immediate(None, status.as_str(), WaitReason::Terminal).with_context(context);
	}

	let started = Instant::now();
	let deadline = started + options.timeout;
	let heartbeat = options.heartbeat();
	let poll = options.poll_interval.max(Duration::from_millis(1));
	let mut next_heartbeat = started + heartbeat;

	debug!(
		target = "lydia.qr_wait",
		context = %context,
		timeout_ms = options.timeout.as_millis() as u64,
		poll_ms = poll.as_millis() as u64,
		"waiting for QR"
	);

	loop {
		let now = Instant::now();
		if now >= deadline {
			let status = entry.status();
			info!(
				target = "lydia.qr_wait",
				context = %context,
				status = status.as_str(),
				waited_ms = now.duration_since(started).as_millis() as u64,
				"QR wait timed out"
			);
			return QrWaitOutcome {
				qr: None,
				timed_out: true,
				status: status.as_str(),
				reason: WaitReason::Timeout,
				log_context: Some(context),
				elapsed: now.duration_since(started),
			};
		}

		tokio::time::sleep(poll.min(deadline - now)).await;

		let (status, qr) = entry.qr_progress();
		let reason = match (&qr, status.is_qr_terminal()) {
			(Some(_), _) => Some(WaitReason::Qr),
			(None, true) => Some(WaitReason::Terminal),
			(None, false) => None,
		};
		if let Some(reason) = reason {
			let elapsed = started.elapsed();
			debug!(target = "lydia.qr_wait", context = %context, status = status.as_str(), ?reason, elapsed_ms = elapsed.as_millis() as u64, "QR wait finished");
			return QrWaitOutcome {
				qr,
				timed_out: false,
				status: status.as_str(),
				reason,
				log_context: Some(context),
				elapsed,
			};
		}

		let now = Instant::now();
		if now >= next_heartbeat {
			info!(
				target = "lydia.qr_wait",
				context = %context,
				status = status.as_str(),
				waited_ms = now.duration_since(started).as_millis() as u64,
				"still waiting for QR"
			);
			next_heartbeat = now + heartbeat;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn heartbeat_defaults_scale_with_poll_interval() {
		let mut options = QrWaitOptions::default();
		assert_eq!(options.heartbeat(), Duration::from_secs(5));

		options.poll_interval = Duration::from_millis(500);
		assert_eq!(options.heartbeat(), Duration::from_secs(10));

		options.heartbeat_interval = Some(Duration::from_secs(2));
		assert_eq!(options.heartbeat(), Duration::from_secs(2));
	}

	#[tokio::test(start_paused = true)]
	async fn missing_entry_returns_not_created_immediately() {
		let outcome = wait_for_qr(None, &QrWaitOptions::default()).await;
		assert_eq!(outcome.status, "not_created");
		assert_eq!(outcome.reason, WaitReason::NotCreated);
		assert!(!outcome.timed_out);
		assert!(outcome.qr.is_none());
	}
}
