use thiserror::Error;

/// Errors raised while driving a bridge process.
#[derive(Debug, Error)]
pub enum BridgeError {
	#[error("failed to spawn bridge `{program}`: {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("bridge {0} pipe was not captured")]
	MissingPipe(&'static str),

	#[error("bridge is not running")]
	NotRunning,

	#[error("bridge I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("bridge protocol encoding error: {0}")]
	Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
