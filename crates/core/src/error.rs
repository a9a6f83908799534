use std::path::PathBuf;

use thiserror::Error;

use crate::adapter::AdapterError;

/// Errors surfaced by session orchestration.
///
/// Validation, conflict and capacity errors are returned synchronously from the
/// call that caused them. Adapter failures that happen after an instance was
/// created never come back through here; they land on the entry as
/// `failed` + `last_error`.
#[derive(Debug, Error)]
pub enum SessionError {
	#[error("invalid tenant identifiers: {0}")]
	Validation(String),

	#[error("a session already exists for {key}")]
	Conflict { key: String },

	#[error("no session for {key}")]
	NotFound { key: String },

	#[error("no QR code generated yet for {key}")]
	QrNotAvailable { key: String },

	#[error("single-instance mode: {active} is already running, refusing to start {requested}")]
	CapacityExceeded { active: String, requested: String },

	#[error("client adapter failed to start: {0}")]
	AdapterInit(String),

	#[error("storage error at {}: {source}", path.display())]
	Storage {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	Adapter(#[from] AdapterError),

	/// The runtime cancelled the task running the operation.
	#[error("session operation interrupted: {0}")]
	Interrupted(String),
}

impl SessionError {
	pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Self::Storage { path: path.into(), source }
	}

	/// Stable machine-readable code for the error class.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Validation(_) => "validation_error",
			Self::Conflict { .. } => "conflict",
			Self::NotFound { .. } | Self::QrNotAvailable { .. } => "not_found",
			Self::CapacityExceeded { .. } => "capacity_exceeded",
			Self::AdapterInit(_) | Self::Adapter(_) => "adapter_init_error",
			Self::Storage { .. } => "storage_error",
			Self::Interrupted(_) => "internal_error",
		}
	}
}

pub type Result<T> = std::result::Result<T, SessionError>;
