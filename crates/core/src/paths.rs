//! Storage layout for tenant session data.
//!
//! Layout under the data root:
//!
//! ```text
//! <data_root>/auth/<storage_key>/session-<storage_key>/   credential store
//! <data_root>/cache/<storage_key>/                       client version cache
//! ```
//!
//! Older deployments used the raw `companyId:peopleId` key for both
//! directory names. [`PathResolver::migrate_legacy_if_needed`] moves those
//! to the sanitized layout once; [`PathResolver::wipe`] removes both.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::tenant::TenantKey;

/// Directory under the data root holding per-tenant credential stores.
pub const AUTH_DIR: &str = "auth";
/// Directory under the data root holding per-tenant client caches.
pub const CACHE_DIR: &str = "cache";

/// Resolved on-disk locations for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
	/// Sanitized key; doubles as the client id inside the credential store.
	pub client_id: String,
	pub session_dir: PathBuf,
	pub cache_dir: PathBuf,
	/// Pre-sanitization locations, present only when they differ from the
	/// sanitized ones and are safe to touch.
	pub legacy_session_dir: Option<PathBuf>,
	pub legacy_cache_dir: Option<PathBuf>,
}

/// What a migration pass actually moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
	pub session_dir_moved: bool,
	pub cache_dir_moved: bool,
	pub credentials_renamed: bool,
}

impl MigrationReport {
	pub fn is_noop(&self) -> bool {
		!(self.session_dir_moved || self.cache_dir_moved || self.credentials_renamed)
	}
}

/// Outcome of a best-effort wipe.
#[derive(Debug, Default)]
pub struct WipeReport {
	pub removed: Vec<PathBuf>,
	pub failed: Vec<(PathBuf, io::Error)>,
}

/// Derives tenant directories under a fixed data root.
#[derive(Debug, Clone)]
pub struct PathResolver {
	data_root: PathBuf,
}

impl PathResolver {
	pub fn new(data_root: impl Into<PathBuf>) -> Self {
		Self { data_root: data_root.into() }
	}

	pub fn data_root(&self) -> &Path {
		&self.data_root
	}

	pub fn auth_root(&self) -> PathBuf {
		self.data_root.join(AUTH_DIR)
	}

	pub fn cache_root(&self) -> PathBuf {
		self.data_root.join(CACHE_DIR)
	}

	/// Pure path derivation; touches nothing on disk.
	pub fn resolve(&self, key: &TenantKey) -> StoragePaths {
		let raw = key.composite();
		let client_id = key.storage_key();
		let legacy = (raw != client_id && is_plain_component(&raw)).then_some(raw);

		StoragePaths {
			session_dir: self.auth_root().join(&client_id),
			cache_dir: self.cache_root().join(&client_id),
			legacy_session_dir: legacy.as_ref().map(|raw| self.auth_root().join(raw)),
			legacy_cache_dir: legacy.as_ref().map(|raw| self.cache_root().join(raw)),
			client_id,
		}
	}

	/// Creates the shared `auth/` and `cache/` roots.
	pub fn ensure_roots(&self) -> Result<()> {
		for dir in [self.auth_root(), self.cache_root()] {
			std::fs::create_dir_all(&dir).map_err(|source| SessionError::storage(&dir, source))?;
		}
		Ok(())
	}

	/// Moves pre-sanitization directories to the sanitized layout.
	///
	/// Each move happens only when the source exists and the target does not,
	/// so calling this on every start is safe. Failures are logged and skipped.
	pub fn migrate_legacy_if_needed(&self, key: &TenantKey) -> MigrationReport {
		let paths = self.resolve(key);
		let mut report = MigrationReport::default();

		if let Some(legacy) = &paths.legacy_session_dir {
			report.session_dir_moved = migrate_dir(legacy, &paths.session_dir);
		}
		if let Some(legacy) = &paths.legacy_cache_dir {
			report.cache_dir_moved = migrate_dir(legacy, &paths.cache_dir);
		}

		let raw = key.composite();
		if raw != paths.client_id && is_plain_component(&raw) {
			let legacy_store = paths.session_dir.join(format!("session-{raw}"));
			let store = paths.session_dir.join(format!("session-{}", paths.client_id));
			report.credentials_renamed = migrate_dir(&legacy_store, &store);
		}

		if !report.is_noop() {
			info!(
				target = "lydia.paths",
				tenant = %key,
				session_dir_moved = report.session_dir_moved,
				cache_dir_moved = report.cache_dir_moved,
				credentials_renamed = report.credentials_renamed,
				"migrated legacy storage layout"
			);
		}
		report
	}

	/// Recursively removes the sanitized and legacy directories for `key`.
	///
	/// Every target is attempted independently; a failure on one never stops
	/// the others. Missing directories are not failures.
	pub fn wipe(&self, key: &TenantKey) -> WipeReport {
		let paths = self.resolve(key);
		let targets = [
			Some(paths.session_dir),
			Some(paths.cache_dir),
			paths.legacy_session_dir,
			paths.legacy_cache_dir,
		];

		let mut report = WipeReport::default();
		for target in targets.into_iter().flatten() {
			match std::fs::remove_dir_all(&target) {
				Ok(()) => report.removed.push(target),
				Err(err) if err.kind() == io::ErrorKind::NotFound => {}
				Err(err) => {
					warn!(target = "lydia.paths", path = %target.display(), error = %err, "failed to wipe tenant directory");
					report.failed.push((target, err));
				}
			}
		}

		debug!(target = "lydia.paths", tenant = %key, removed = report.removed.len(), failed = report.failed.len(), "wipe finished");
		report
	}
}

/// Renames `from` to `to` when `from` exists and `to` does not.
fn migrate_dir(from: &Path, to: &Path) -> bool {
	if from == to || !from.exists() || to.exists() {
		return false;
	}

	let moved = to
		.parent()
		.map_or(Ok(()), std::fs::create_dir_all)
		.and_then(|()| std::fs::rename(from, to));

	match moved {
		Ok(()) => true,
		Err(err) => {
			warn!(
				target = "lydia.paths",
				from = %from.display(),
				to = %to.display(),
				error = %err,
				"legacy directory migration failed"
			);
			false
		}
	}
}

/// `true` when `raw` names exactly one ordinary path component.
fn is_plain_component(raw: &str) -> bool {
	let mut components = Path::new(raw).components();
	matches!((components.next(), components.next()), (Some(Component::Normal(c)), None) if c == raw)
}
