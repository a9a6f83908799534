//! Session lifecycle states and the transitions adapter events may cause.

use std::fmt;

use serde::Serialize;

/// Reported status for a tenant with no live entry.
pub const NOT_CREATED: &str = "not_created";

/// Lifecycle status of one session entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
	Starting,
	Qr,
	Authenticated,
	Ready,
	Failed,
	Disconnected,
	/// Set by the controller right before an entry is torn down for a restart.
	Restarting,
	/// Recorded on the entry object once it has left the registry.
	Destroyed,
}

impl SessionStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Starting => "starting",
			Self::Qr => "qr",
			Self::Authenticated => "authenticated",
			Self::Ready => "ready",
			Self::Failed => "failed",
			Self::Disconnected => "disconnected",
			Self::Restarting => "restarting",
			Self::Destroyed => "destroyed",
		}
	}

	/// `true` once no further QR challenge can be produced by this entry.
	pub fn is_qr_terminal(self) -> bool {
		matches!(
			self,
			Self::Failed | Self::Disconnected | Self::Ready | Self::Authenticated | Self::Destroyed
		)
	}

	/// Whether an adapter event may move an entry from `self` to `next`.
	///
	/// `Restarting` and `Destroyed` are controller-only and never reachable
	/// here. `Starting -> Authenticated` covers clients that restore stored
	/// credentials without a new challenge. `Qr -> Qr` is a refreshed challenge.
	pub fn can_transition_to(self, next: Self) -> bool {
		use SessionStatus::*;

		matches!(
			(self, next),
			(Starting, Qr | Authenticated | Failed | Disconnected)
				| (Qr, Qr | Authenticated | Failed | Disconnected)
				| (Authenticated, Ready | Disconnected | Failed)
				| (Ready, Disconnected | Failed)
		)
	}
}

impl fmt::Display for SessionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::SessionStatus::*;
	use super::*;

	const ALL: [SessionStatus; 8] = [Starting, Qr, Authenticated, Ready, Failed, Disconnected, Restarting, Destroyed];

	#[test]
	fn happy_path_is_allowed() {
		assert!(Starting.can_transition_to(Qr));
		assert!(Qr.can_transition_to(Authenticated));
		assert!(Authenticated.can_transition_to(Ready));
		assert!(Ready.can_transition_to(Disconnected));
	}

	#[test]
	fn controller_states_are_unreachable_by_events() {
		for from in ALL {
			assert!(!from.can_transition_to(Restarting), "{from} -> restarting");
			assert!(!from.can_transition_to(Destroyed), "{from} -> destroyed");
			assert!(!from.can_transition_to(Starting), "{from} -> starting");
		}
	}

	#[test]
	fn end_states_accept_no_events() {
		for from in [Failed, Disconnected, Restarting, Destroyed] {
			for to in ALL {
				assert!(!from.can_transition_to(to), "{from} -> {to}");
			}
		}
	}

	#[test]
	fn ready_cannot_go_back_to_qr() {
		assert!(!Ready.can_transition_to(Qr));
		assert!(!Authenticated.can_transition_to(Qr));
	}

	#[test]
	fn qr_terminal_states() {
		let terminal: Vec<_> = ALL.into_iter().filter(|s| s.is_qr_terminal()).collect();
		assert_eq!(terminal, vec![Authenticated, Ready, Failed, Disconnected, Destroyed]);
	}

	#[test]
	fn serializes_as_snake_case() {
		assert_eq!(serde_json::to_string(&Qr).unwrap(), "\"qr\"");
		assert_eq!(Restarting.to_string(), "restarting");
	}
}
