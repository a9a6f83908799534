//! Orchestrator settings and the lenient parsers used to build them.

use std::path::PathBuf;
use std::time::Duration;

use crate::qr::QrWaitOptions;

pub const DEFAULT_DATA_ROOT: &str = "./cache";
pub const DEFAULT_LAUNCH_ARGS: [&str; 2] = ["--no-sandbox", "--disable-setuid-sandbox"];
/// Extra launch flags for containers without a usable sandbox or zygote.
pub const DOCKER_LAUNCH_ARGS: [&str; 2] = ["--single-process", "--no-zygote"];
pub const DEFAULT_TAKEOVER_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_ADAPTER_DESTROY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
	pub data_root: PathBuf,
	pub headless: bool,
	pub launch_args: Vec<String>,
	pub qr_wait: QrWaitOptions,
	pub single_instance: bool,
	pub docker_mode: bool,
	pub web_version: Option<String>,
	pub takeover_on_conflict: bool,
	pub takeover_timeout: Duration,
	/// Upper bound on one adapter `destroy` during stop/restart.
	pub adapter_destroy_timeout: Duration,
}

impl Default for OrchestratorConfig {
	fn default() -> Self {
		Self {
			data_root: PathBuf::from(DEFAULT_DATA_ROOT),
			headless: true,
			launch_args: DEFAULT_LAUNCH_ARGS.iter().map(|s| s.to_string()).collect(),
			qr_wait: QrWaitOptions::default(),
			single_instance: false,
			docker_mode: false,
			web_version: None,
			takeover_on_conflict: true,
			takeover_timeout: DEFAULT_TAKEOVER_TIMEOUT,
			adapter_destroy_timeout: DEFAULT_ADAPTER_DESTROY_TIMEOUT,
		}
	}
}

impl OrchestratorConfig {
	/// Docker mode always implies one live tenant per process.
	pub fn single_instance_enforced(&self) -> bool {
		self.single_instance || self.docker_mode
	}

	/// Configured launch args plus the docker flags, without duplicates.
	pub fn effective_launch_args(&self) -> Vec<String> {
		let mut args = self.launch_args.clone();
		if self.docker_mode {
			for flag in DOCKER_LAUNCH_ARGS {
				if !args.iter().any(|a| a == flag) {
					args.push(flag.to_string());
				}
			}
		}
		args
	}
}

/// Accepts `true/1/yes/on` and `false/0/no/off`, case-insensitively.
pub fn parse_flag(raw: &str) -> Option<bool> {
	match raw.trim().to_ascii_lowercase().as_str() {
		"true" | "1" | "yes" | "on" => Some(true),
		"false" | "0" | "no" | "off" | "" => Some(false),
		_ => None,
	}
}

/// Milliseconds to a duration; missing or zero values use `default`.
pub fn millis_or(raw: Option<u64>, default: Duration) -> Duration {
	match raw {
		Some(ms) if ms > 0 => Duration::from_millis(ms),
		_ => default,
	}
}

/// Splits a comma separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
	raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// `false` in development environments, `true` otherwise.
pub fn default_headless(environment: Option<&str>) -> bool {
	!matches!(environment.map(str::trim), Some(env) if env.eq_ignore_ascii_case("development"))
}
