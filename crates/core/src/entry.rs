//! The lifecycle record for one tenant's client and its event mutator.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapter::{AdapterEvent, ClientAdapter, EntryMessage};
use crate::paths::StoragePaths;
use crate::qr::{QrRenderer, RenderedQr};
use crate::state::SessionStatus;
use crate::tenant::TenantKey;

/// Latest QR challenge, raw and rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrChallenge {
	pub raw: String,
	pub png_data_url: Option<String>,
	pub svg: Option<String>,
	pub at: DateTime<Utc>,
}

impl QrChallenge {
	pub fn new(raw: String, rendered: RenderedQr, at: DateTime<Utc>) -> Self {
		Self {
			raw,
			png_data_url: rendered.png_data_url,
			svg: rendered.svg,
			at,
		}
	}
}

/// Identity reported by the client once it is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyInfo {
	pub wid: Option<String>,
	pub pushname: Option<String>,
	pub at: DateTime<Utc>,
}

/// Point-in-time copy of an entry's mutable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
	pub status: SessionStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub ready_at: Option<DateTime<Utc>>,
	pub authenticated_at: Option<DateTime<Utc>>,
	pub disconnected_at: Option<DateTime<Utc>>,
	pub last_qr: Option<QrChallenge>,
	pub ready_info: Option<ReadyInfo>,
	pub last_error: Option<String>,
	pub disconnect_reason: Option<String>,
	pub connection_state: Option<String>,
}

/// A state change after any QR rendering has happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EntryUpdate {
	Qr(QrChallenge),
	Authenticated,
	Ready { wid: Option<String>, pushname: Option<String> },
	AuthFailure { reason: String },
	Disconnected { reason: String },
	StateChanged { state: String },
	InitializeFailed { error: String },
}

/// What [`SessionSnapshot::apply`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
	Moved { from: SessionStatus, to: SessionStatus },
	/// Data recorded without a status change.
	Recorded,
	Rejected { from: SessionStatus, to: SessionStatus },
}

impl SessionSnapshot {
	pub fn new(now: DateTime<Utc>) -> Self {
		Self {
			status: SessionStatus::Starting,
			created_at: now,
			updated_at: now,
			ready_at: None,
			authenticated_at: None,
			disconnected_at: None,
			last_qr: None,
			ready_info: None,
			last_error: None,
			disconnect_reason: None,
			connection_state: None,
		}
	}

	pub(crate) fn apply(&mut self, update: EntryUpdate, now: DateTime<Utc>) -> Applied {
		let target = match &update {
			EntryUpdate::Qr(_) => SessionStatus::Qr,
			EntryUpdate::Authenticated => SessionStatus::Authenticated,
			EntryUpdate::Ready { .. } => SessionStatus::Ready,
			EntryUpdate::AuthFailure { .. } | EntryUpdate::InitializeFailed { .. } => SessionStatus::Failed,
			EntryUpdate::Disconnected { .. } => SessionStatus::Disconnected,
			EntryUpdate::StateChanged { state } => {
				self.connection_state = Some(state.clone());
				self.updated_at = now;
				return Applied::Recorded;
			}
		};

		let from = self.status;
		if !from.can_transition_to(target) {
			// Initialization errors are always kept for diagnostics.
			if let EntryUpdate::InitializeFailed { error } = update {
				self.last_error = Some(error);
				self.updated_at = now;
				return Applied::Recorded;
			}
			return Applied::Rejected { from, to: target };
		}

		match update {
			EntryUpdate::Qr(qr) => self.last_qr = Some(qr),
			EntryUpdate::Authenticated => {
				self.authenticated_at.get_or_insert(now);
				self.last_qr = None;
			}
			EntryUpdate::Ready { wid, pushname } => {
				self.ready_at.get_or_insert(now);
				self.ready_info = Some(ReadyInfo { wid, pushname, at: now });
				self.last_qr = None;
			}
			EntryUpdate::AuthFailure { reason } => {
				self.last_error = Some(format!("authentication failure: {reason}"));
			}
			EntryUpdate::InitializeFailed { error } => self.last_error = Some(error),
			EntryUpdate::Disconnected { reason } => {
				self.disconnected_at.get_or_insert(now);
				self.disconnect_reason = Some(reason);
				self.last_qr = None;
			}
			EntryUpdate::StateChanged { state } => self.connection_state = Some(state),
		}

		self.status = target;
		self.updated_at = now;
		Applied::Moved { from, to: target }
	}
}

/// One tenant's live client instance.
///
/// Status, QR and identity fields change only through the entry's mutator
/// task (adapter events) and the controller's `restarting`/`destroyed` marks.
pub struct SessionEntry {
	tenant: TenantKey,
	key: String,
	paths: StoragePaths,
	state: RwLock<SessionSnapshot>,
	adapter: Arc<dyn ClientAdapter>,
	mutator: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SessionEntry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionEntry")
			.field("key", &self.key)
			.field("status", &self.status())
			.field("client_id", &self.paths.client_id)
			.finish_non_exhaustive()
	}
}

impl SessionEntry {
	pub(crate) fn new(tenant: TenantKey, paths: StoragePaths, adapter: Arc<dyn ClientAdapter>) -> Self {
		Self {
			key: tenant.composite(),
			tenant,
			paths,
			state: RwLock::new(SessionSnapshot::new(Utc::now())),
			adapter,
			mutator: Mutex::new(None),
		}
	}

	pub fn tenant(&self) -> &TenantKey {
		&self.tenant
	}

	/// Registry key (`companyId:peopleId`).
	pub fn key(&self) -> &str {
		&self.key
	}

	pub fn paths(&self) -> &StoragePaths {
		&self.paths
	}

	pub fn snapshot(&self) -> SessionSnapshot {
		self.state.read().clone()
	}

	pub fn status(&self) -> SessionStatus {
		self.state.read().status
	}

	pub fn last_qr(&self) -> Option<QrChallenge> {
		self.state.read().last_qr.clone()
	}

	/// Status and QR read under one lock.
	pub fn qr_progress(&self) -> (SessionStatus, Option<QrChallenge>) {
		let state = self.state.read();
		(state.status, state.last_qr.clone())
	}

	pub(crate) fn adapter(&self) -> Arc<dyn ClientAdapter> {
		Arc::clone(&self.adapter)
	}

	pub(crate) fn apply(&self, update: EntryUpdate) -> Applied {
		self.state.write().apply(update, Utc::now())
	}

	pub(crate) fn attach_mutator(&self, handle: JoinHandle<()>) {
		if let Some(previous) = self.mutator.lock().replace(handle) {
			previous.abort();
		}
	}

	pub(crate) fn mark_restarting(&self) {
		let mut state = self.state.write();
		state.status = SessionStatus::Restarting;
		state.updated_at = Utc::now();
	}

	/// Records removal and stops applying adapter events.
	pub(crate) fn mark_destroyed(&self) {
		{
			let mut state = self.state.write();
			state.status = SessionStatus::Destroyed;
			state.disconnect_reason.get_or_insert_with(|| "destroyed".to_string());
			state.last_qr = None;
			state.updated_at = Utc::now();
		}
		if let Some(handle) = self.mutator.lock().take() {
			handle.abort();
		}
	}
}

/// Spawns the single writer that turns adapter messages into entry updates.
///
/// The task holds only a weak reference, so it ends once the entry is gone,
/// destroyed, or every sender has been dropped.
pub(crate) fn spawn_mutator(
	entry: Weak<SessionEntry>,
	mut rx: mpsc::UnboundedReceiver<EntryMessage>,
	renderer: Arc<dyn QrRenderer>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		while let Some(message) = rx.recv().await {
			let Some(entry) = entry.upgrade() else { break };
			if entry.status() == SessionStatus::Destroyed {
				break;
			}

			let (name, update) = match message {
				EntryMessage::Adapter(event) => (event.name(), into_update(event, renderer.as_ref())),
				EntryMessage::InitializeFailed(error) => {
					error!(target = "lydia.session", key = entry.key(), error = %error, "client initialization failed");
					("initialize_failed", EntryUpdate::InitializeFailed { error })
				}
			};

			match entry.apply(update) {
				Applied::Moved { from, to } => {
					info!(target = "lydia.session", key = entry.key(), event = name, %from, %to, "session transition");
				}
				Applied::Recorded => {}
				Applied::Rejected { from, to } => {
					warn!(target = "lydia.session", key = entry.key(), event = name, %from, %to, "ignoring invalid transition");
				}
			}
		}
	})
}

fn into_update(event: AdapterEvent, renderer: &dyn QrRenderer) -> EntryUpdate {
	match event {
		AdapterEvent::Qr { challenge } => {
			let rendered = renderer.render(&challenge);
			EntryUpdate::Qr(QrChallenge::new(challenge, rendered, Utc::now()))
		}
		AdapterEvent::Authenticated => EntryUpdate::Authenticated,
		AdapterEvent::Ready { wid, pushname } => EntryUpdate::Ready { wid, pushname },
		AdapterEvent::AuthFailure { reason } => EntryUpdate::AuthFailure { reason },
		AdapterEvent::Disconnected { reason } => EntryUpdate::Disconnected { reason },
		AdapterEvent::StateChanged { state } => EntryUpdate::StateChanged { state },
	}
}

#[cfg(test)]
mod tests {
	use chrono::Duration;

	use super::*;

	fn t0() -> DateTime<Utc> {
		DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z").unwrap().with_timezone(&Utc)
	}

	fn qr(raw: &str, at: DateTime<Utc>) -> EntryUpdate {
		EntryUpdate::Qr(QrChallenge::new(raw.into(), RenderedQr::default(), at))
	}

	#[test]
	fn qr_then_authenticated_clears_challenge() {
		let mut state = SessionSnapshot::new(t0());

		assert_eq!(
			state.apply(qr("XYZ", t0()), t0()),
			Applied::Moved {
				from: SessionStatus::Starting,
				to: SessionStatus::Qr
			}
		);
		assert_eq!(state.last_qr.as_ref().map(|q| q.raw.as_str()), Some("XYZ"));

		let later = t0() + Duration::seconds(5);
		state.apply(EntryUpdate::Authenticated, later);
		assert_eq!(state.status, SessionStatus::Authenticated);
		assert_eq!(state.authenticated_at, Some(later));
		assert!(state.last_qr.is_none());
	}

	#[test]
	fn refreshed_qr_replaces_previous() {
		let mut state = SessionSnapshot::new(t0());
		state.apply(qr("first", t0()), t0());
		state.apply(qr("second", t0()), t0() + Duration::seconds(20));
		assert_eq!(state.last_qr.unwrap().raw, "second");
	}

	#[test]
	fn ready_records_identity_and_timestamp_once() {
		let mut state = SessionSnapshot::new(t0());
		state.apply(EntryUpdate::Authenticated, t0());
		let ready_at = t0() + Duration::seconds(1);
		state.apply(
			EntryUpdate::Ready {
				wid: Some("5511999990000".into()),
				pushname: Some("Acme".into()),
			},
			ready_at,
		);

		assert_eq!(state.status, SessionStatus::Ready);
		assert_eq!(state.ready_at, Some(ready_at));
		assert_eq!(state.ready_info.as_ref().and_then(|i| i.wid.as_deref()), Some("5511999990000"));

		let disconnect_at = t0() + Duration::seconds(60);
		state.apply(EntryUpdate::Disconnected { reason: "LOGOUT".into() }, disconnect_at);
		assert_eq!(state.disconnected_at, Some(disconnect_at));
		assert_eq!(state.ready_at, Some(ready_at));
		assert_eq!(state.disconnect_reason.as_deref(), Some("LOGOUT"));
	}

	#[test]
	fn out_of_order_events_are_rejected_without_touching_state() {
		let mut state = SessionSnapshot::new(t0());
		state.apply(EntryUpdate::Disconnected { reason: "NAVIGATION".into() }, t0());
		let before = state.clone();

		let later = t0() + Duration::seconds(3);
		assert!(matches!(state.apply(qr("late", later), later), Applied::Rejected { .. }));
		assert!(matches!(state.apply(EntryUpdate::Authenticated, later), Applied::Rejected { .. }));
		assert_eq!(state, before);
	}

	#[test]
	fn auth_failure_fails_with_reason() {
		let mut state = SessionSnapshot::new(t0());
		state.apply(qr("XYZ", t0()), t0());
		state.apply(EntryUpdate::AuthFailure { reason: "bad creds".into() }, t0());
		assert_eq!(state.status, SessionStatus::Failed);
		assert_eq!(state.last_error.as_deref(), Some("authentication failure: bad creds"));
		assert!(state.last_qr.is_some(), "auth failure keeps the last challenge for inspection");
	}

	#[test]
	fn initialize_failure_is_kept_even_when_status_cannot_move() {
		let mut state = SessionSnapshot::new(t0());
		state.apply(EntryUpdate::Disconnected { reason: "x".into() }, t0());
		let applied = state.apply(EntryUpdate::InitializeFailed { error: "chrome crashed".into() }, t0());

		assert_eq!(applied, Applied::Recorded);
		assert_eq!(state.status, SessionStatus::Disconnected);
		assert_eq!(state.last_error.as_deref(), Some("chrome crashed"));
	}

	#[test]
	fn state_changed_only_records_connection_state() {
		let mut state = SessionSnapshot::new(t0());
		let applied = state.apply(EntryUpdate::StateChanged { state: "OPENING".into() }, t0());
		assert_eq!(applied, Applied::Recorded);
		assert_eq!(state.status, SessionStatus::Starting);
		assert_eq!(state.connection_state.as_deref(), Some("OPENING"));
	}
}
