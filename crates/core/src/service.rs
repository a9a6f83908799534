//! Caller-facing operations: start, restart, status, qr, stop and friends.
//!
//! Each operation validates the tenant identifiers, drives the controller and
//! turns the result into a serializable view. Field names follow the JSON
//! the HTTP layer returns.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::controller::{EnsureOptions, SessionController};
use crate::entry::{QrChallenge, ReadyInfo, SessionEntry};
use crate::error::{Result, SessionError};
use crate::qr::{QrWaitOptions, wait_for_qr};
use crate::state::NOT_CREATED;
use crate::tenant::TenantKey;

/// QR payload as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrView {
	pub at: DateTime<Utc>,
	pub png_data_url: Option<String>,
	pub svg_string: Option<String>,
	pub raw: Option<String>,
}

impl From<QrChallenge> for QrView {
	fn from(qr: QrChallenge) -> Self {
		Self {
			at: qr.at,
			png_data_url: qr.png_data_url,
			svg_string: qr.svg,
			raw: Some(qr.raw),
		}
	}
}

/// Result of `start` and `restart`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
	pub company_id: String,
	pub people_id: String,
	pub status: &'static str,
	pub ready_info: Option<ReadyInfo>,
	pub qr: Option<QrView>,
	pub qr_timed_out: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub qr_wait_log_context: Option<String>,
}

/// Non-blocking snapshot of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
	pub company_id: String,
	pub people_id: String,
	pub exists: bool,
	pub status: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ready_info: Option<ReadyInfo>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub has_qr: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_qr_at: Option<DateTime<Utc>>,
	#[serde(flatten)]
	pub detail: Option<SessionDetail>,
}

/// Diagnostic fields of a live entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub authenticated_at: Option<DateTime<Utc>>,
	pub ready_at: Option<DateTime<Utc>>,
	pub disconnected_at: Option<DateTime<Utc>>,
	pub last_error: Option<String>,
	pub disconnect_reason: Option<String>,
	pub state: Option<String>,
}

impl StatusView {
	fn absent(tenant: &TenantKey) -> Self {
		Self {
			company_id: tenant.company_id().to_string(),
			people_id: tenant.people_id().to_string(),
			exists: false,
			status: NOT_CREATED,
			ready_info: None,
			has_qr: None,
			last_qr_at: None,
			detail: None,
		}
	}

	fn of(entry: &SessionEntry) -> Self {
		let snapshot = entry.snapshot();
		Self {
			company_id: entry.tenant().company_id().to_string(),
			people_id: entry.tenant().people_id().to_string(),
			exists: true,
			status: snapshot.status.as_str(),
			ready_info: snapshot.ready_info,
			has_qr: Some(snapshot.last_qr.is_some()),
			last_qr_at: snapshot.last_qr.map(|qr| qr.at),
			detail: Some(SessionDetail {
				created_at: snapshot.created_at,
				updated_at: snapshot.updated_at,
				authenticated_at: snapshot.authenticated_at,
				ready_at: snapshot.ready_at,
				disconnected_at: snapshot.disconnected_at,
				last_error: snapshot.last_error,
				disconnect_reason: snapshot.disconnect_reason,
				state: snapshot.connection_state,
			}),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopView {
	pub stopped: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyView {
	pub destroyed: bool,
	pub wiped: bool,
}

/// Session operations over one [`SessionController`].
#[derive(Debug, Clone)]
pub struct SessionService {
	controller: Arc<SessionController>,
	qr_wait: QrWaitOptions,
}

impl SessionService {
	pub fn new(controller: Arc<SessionController>) -> Self {
		let qr_wait = controller.config().qr_wait;
		Self { controller, qr_wait }
	}

	pub fn controller(&self) -> &Arc<SessionController> {
		&self.controller
	}

	/// Ensures an instance, then waits for its next QR challenge.
	pub async fn start(&self, company_id: &str, people_id: &str, force_restart: bool) -> Result<InstanceView> {
		let tenant = TenantKey::new(company_id, people_id)?;
		let options = EnsureOptions {
			force_restart,
			wipe: force_restart,
			..Default::default()
		};
		let entry = self.controller.ensure(&tenant, options).await?;
		Ok(self.await_qr(&tenant, &entry).await)
	}

	/// Recreates the instance, then waits for its next QR challenge.
	pub async fn restart(&self, company_id: &str, people_id: &str, wipe: bool) -> Result<InstanceView> {
		let tenant = TenantKey::new(company_id, people_id)?;
		let entry = self.controller.restart(&tenant, wipe).await?;
		Ok(self.await_qr(&tenant, &entry).await)
	}

	pub fn status(&self, company_id: &str, people_id: &str) -> Result<StatusView> {
		let tenant = TenantKey::new(company_id, people_id)?;
		Ok(match self.controller.get(&tenant) {
			Some(entry) => StatusView::of(&entry),
			None => StatusView::absent(&tenant),
		})
	}

	/// Latest QR of the live instance; `NotFound` without an instance or QR.
	pub fn qr(&self, company_id: &str, people_id: &str) -> Result<QrView> {
		let tenant = TenantKey::new(company_id, people_id)?;
		let key = tenant.composite();
		let entry = self.controller.get(&tenant).ok_or_else(|| SessionError::NotFound { key: key.clone() })?;
		entry.last_qr().map(QrView::from).ok_or(SessionError::QrNotAvailable { key })
	}

	pub async fn stop(&self, company_id: &str, people_id: &str) -> Result<StopView> {
		let tenant = TenantKey::new(company_id, people_id)?;
		let stopped = self.controller.stop(&tenant).await?;
		Ok(StopView {
			stopped,
			reason: (!stopped).then_some("not_found"),
		})
	}

	pub async fn destroy(&self, company_id: &str, people_id: &str, wipe: bool) -> Result<DestroyView> {
		let tenant = TenantKey::new(company_id, people_id)?;
		let destroyed = self.controller.destroy(&tenant, wipe).await?;
		Ok(DestroyView { destroyed, wiped: wipe })
	}

	/// Starts an instance that must not exist yet.
	pub async fn create(&self, company_id: &str, people_id: &str) -> Result<StatusView> {
		let tenant = TenantKey::new(company_id, people_id)?;
		let options = EnsureOptions {
			exclusive: true,
			..Default::default()
		};
		let entry = self.controller.ensure(&tenant, options).await?;
		Ok(StatusView::of(&entry))
	}

	pub fn list(&self) -> Vec<StatusView> {
		self.controller.list().iter().map(|entry| StatusView::of(entry)).collect()
	}

	pub async fn shutdown(&self) -> usize {
		self.controller.shutdown_all().await
	}

	async fn await_qr(&self, tenant: &TenantKey, entry: &SessionEntry) -> InstanceView {
		let outcome = wait_for_qr(Some(entry), &self.qr_wait).await;
		let timed_out = outcome.timed_out;
		InstanceView {
			company_id: tenant.company_id().to_string(),
			people_id: tenant.people_id().to_string(),
			status: outcome.status,
			ready_info: entry.snapshot().ready_info,
			qr: outcome.qr.map(QrView::from),
			qr_timed_out: timed_out,
			qr_wait_log_context: outcome.log_context.filter(|_| timed_out),
		}
	}
}
