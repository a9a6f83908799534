//! Tenant identity and storage-key derivation.

use std::fmt;

use serde::Serialize;

use crate::error::{Result, SessionError};

/// A `(companyId, peopleId)` pair naming one messaging session.
///
/// Both parts are trimmed and must be non-empty. `companyId` may not contain
/// `:` so the composite `companyId:peopleId` stays unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantKey {
	company_id: String,
	people_id: String,
}

impl TenantKey {
	pub fn new(company_id: &str, people_id: &str) -> Result<Self> {
		let company_id = company_id.trim();
		let people_id = people_id.trim();

		if company_id.is_empty() || people_id.is_empty() {
			return Err(SessionError::Validation("companyId and peopleId are required".into()));
		}
		if company_id.contains(':') {
			return Err(SessionError::Validation(format!("companyId may not contain ':' (got {company_id:?})")));
		}

		Ok(Self {
			company_id: company_id.to_string(),
			people_id: people_id.to_string(),
		})
	}

	pub fn company_id(&self) -> &str {
		&self.company_id
	}

	pub fn people_id(&self) -> &str {
		&self.people_id
	}

	/// Registry key, `companyId:peopleId`.
	pub fn composite(&self) -> String {
		format!("{}:{}", self.company_id, self.people_id)
	}

	/// Filesystem-safe form of [`Self::composite`]; also used as the client id.
	pub fn storage_key(&self) -> String {
		sanitize_segment(&self.composite())
	}
}

impl fmt::Display for TenantKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.company_id, self.people_id)
	}
}

/// Maps an arbitrary string onto `[A-Za-z0-9._-]`, replacing every other
/// character with `_`.
///
/// Empty input falls back to the hex encoding of its bytes. The function is
/// deterministic and idempotent.
pub fn sanitize_segment(raw: &str) -> String {
	let sanitized: String = raw
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
		.collect();

	if sanitized.is_empty() { hex_encode(raw.as_bytes()) } else { sanitized }
}

fn hex_encode(bytes: &[u8]) -> String {
	use std::fmt::Write;

	bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
		let _ = write!(out, "{b:02x}");
		out
	})
}
