//! Keyed store of live session entries.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::entry::SessionEntry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
	#[error("a live entry already exists for {key}")]
	AlreadyExists { key: String },
}

/// Holds at most one live [`SessionEntry`] per `companyId:peopleId` key.
///
/// Each call is atomic on its own. Sequences of calls for the same key are
/// serialized by the controller.
#[derive(Debug, Default)]
pub struct SessionRegistry {
	entries: DashMap<String, Arc<SessionEntry>>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, key: &str) -> Option<Arc<SessionEntry>> {
		self.entries.get(key).map(|entry| Arc::clone(entry.value()))
	}

	/// Inserts `entry` under its own key; never replaces a live entry.
	pub fn put(&self, entry: Arc<SessionEntry>) -> Result<(), RegistryError> {
		match self.entries.entry(entry.key().to_string()) {
			Entry::Occupied(slot) => Err(RegistryError::AlreadyExists { key: slot.key().clone() }),
			Entry::Vacant(slot) => {
				slot.insert(entry);
				Ok(())
			}
		}
	}

	pub fn remove(&self, key: &str) -> Option<Arc<SessionEntry>> {
		self.entries.remove(key).map(|(_, entry)| entry)
	}

	/// Live entries ordered by key.
	pub fn list(&self) -> Vec<Arc<SessionEntry>> {
		let mut entries: Vec<_> = self.entries.iter().map(|entry| Arc::clone(entry.value())).collect();
		entries.sort_by(|a, b| a.key().cmp(b.key()));
		entries
	}

	pub fn keys(&self) -> Vec<String> {
		self.list().iter().map(|entry| entry.key().to_string()).collect()
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}

	/// Removes and returns every entry.
	pub fn drain(&self) -> Vec<Arc<SessionEntry>> {
		let keys: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
		keys.iter().filter_map(|key| self.remove(key)).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::paths::PathResolver;
	use crate::test_support::FakeAdapterFactory;
	use crate::tenant::TenantKey;

	fn entry(company: &str, people: &str) -> Arc<SessionEntry> {
		let tenant = TenantKey::new(company, people).unwrap();
		let paths = PathResolver::new("/srv/lydia").resolve(&tenant);
		let adapter = FakeAdapterFactory::new().detached_adapter(&tenant);
		Arc::new(SessionEntry::new(tenant, paths, adapter))
	}

	#[test]
	fn put_refuses_to_replace_a_live_entry() {
		let registry = SessionRegistry::new();
		registry.put(entry("acme", "alice")).unwrap();

		let err = registry.put(entry("acme", "alice")).unwrap_err();
		assert_eq!(err, RegistryError::AlreadyExists { key: "acme:alice".into() });
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn remove_then_put_succeeds() {
		let registry = SessionRegistry::new();
		let first = entry("acme", "alice");
		registry.put(Arc::clone(&first)).unwrap();

		let removed = registry.remove("acme:alice").unwrap();
		assert!(Arc::ptr_eq(&removed, &first));
		assert!(registry.remove("acme:alice").is_none());

		registry.put(entry("acme", "alice")).unwrap();
		assert!(registry.get("acme:alice").is_some());
	}

	#[test]
	fn list_is_sorted_and_drain_empties() {
		let registry = SessionRegistry::new();
		for (company, people) in [("globex", "hank"), ("acme", "bob"), ("acme", "alice")] {
			registry.put(entry(company, people)).unwrap();
		}

		assert_eq!(registry.keys(), vec!["acme:alice", "acme:bob", "globex:hank"]);
		assert_eq!(registry.drain().len(), 3);
		assert_eq!(registry.len(), 0);
	}

	#[test]
	fn concurrent_puts_for_one_key_admit_exactly_one() {
		let registry = Arc::new(SessionRegistry::new());
		let handles: Vec<_> = (0..8)
			.map(|_| {
				let registry = Arc::clone(&registry);
				std::thread::spawn(move || registry.put(entry("acme", "alice")).is_ok())
			})
			.collect();

		let admitted = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
		assert_eq!(admitted, 1);
		assert_eq!(registry.len(), 1);
	}
}
