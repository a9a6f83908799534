//! Messages exchanged with a client bridge process.
//!
//! Bridge → orchestrator (stdout):
//! ```json
//! {"type":"initialized"}
//! {"type":"qr","challenge":"2@AbC..."}
//! {"type":"ready","wid":"5511999990000","pushname":"Acme Support"}
//! ```
//!
//! Orchestrator → bridge (stdin):
//! ```json
//! {"type":"shutdown"}
//! ```

use serde::{Deserialize, Serialize};

/// Event line printed by the bridge on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
	/// The client finished its startup sequence.
	Initialized,
	/// A new authentication challenge is available.
	Qr { challenge: String },
	Authenticated,
	/// The client is connected and usable.
	Ready {
		#[serde(default)]
		wid: Option<String>,
		#[serde(default)]
		pushname: Option<String>,
	},
	AuthFailure {
		#[serde(default)]
		reason: String,
	},
	Disconnected {
		#[serde(default)]
		reason: String,
	},
	/// Raw connection state reported by the client (no lifecycle meaning).
	StateChanged { state: String },
	/// Diagnostic output forwarded into the orchestrator's log.
	Log {
		#[serde(default)]
		level: BridgeLogLevel,
		message: String,
	},
}

impl BridgeEvent {
	/// Parses a single stdout line.
	pub fn from_line(line: &str) -> serde_json::Result<Self> {
		serde_json::from_str(line.trim())
	}
}

/// Command line written by the orchestrator on the bridge's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
	/// Ask the bridge to tear the client down and exit.
	Shutdown,
}

impl BridgeCommand {
	/// Serializes the command as a single newline-terminated line.
	pub fn to_line(&self) -> serde_json::Result<String> {
		let mut line = serde_json::to_string(self)?;
		line.push('\n');
		Ok(line)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeLogLevel {
	Debug,
	#[default]
	Info,
	Warn,
	Error,
}
