use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use lydia::BridgeAdapterFactory;
use lydia::adapter::DEFAULT_DESTROY_GRACE;
use lydia::config::{self, DEFAULT_LAUNCH_ARGS, DEFAULT_TAKEOVER_TIMEOUT, OrchestratorConfig};
use lydia::qr::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT, QrWaitOptions};

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_BRIDGE_COMMAND: &str = "node";
pub const DEFAULT_BRIDGE_ARGS: &str = "bridge/index.js";
pub const DEFAULT_LOG_FILE_MAX_SIZE: u64 = 10 * 1024 * 1024;

/// Flag and numeric values arrive as raw strings so that malformed
/// environment values fall back to defaults instead of aborting startup.
#[derive(Parser, Debug, Clone)]
#[command(name = "lydiad")]
#[command(about = "HTTP service running one messaging client per tenant")]
#[command(version)]
pub struct Cli {
	/// Increase log verbosity (-v info, -vv debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[arg(long, env = "HOST", default_value = "0.0.0.0")]
	pub host: String,

	#[arg(long, env = "PORT")]
	pub port: Option<String>,

	/// Root of all per-tenant credential and cache directories
	#[arg(long, env = "DATA_ROOT", default_value = config::DEFAULT_DATA_ROOT)]
	pub data_root: PathBuf,

	#[arg(long, env = "HEADLESS")]
	pub headless: Option<String>,

	#[arg(long, env = "NODE_ENV", hide = true)]
	pub node_env: Option<String>,

	#[arg(long, env = "APP_ENV", hide = true)]
	pub app_env: Option<String>,

	/// Comma separated launch arguments for the client browser
	#[arg(long, env = "PUPPETEER_ARGS", allow_hyphen_values = true)]
	pub launch_args: Option<String>,

	#[arg(long, env = "WAIT_FOR_QR_TIMEOUT_MS")]
	pub qr_timeout_ms: Option<String>,

	#[arg(long, env = "WAIT_FOR_QR_POLL_MS")]
	pub qr_poll_ms: Option<String>,

	#[arg(long, env = "WAIT_FOR_QR_HEARTBEAT_MS")]
	pub qr_heartbeat_ms: Option<String>,

	#[arg(long, env = "SINGLE_INSTANCE")]
	pub single_instance: Option<String>,

	#[arg(long, env = "IS_DOCKER_MODE")]
	pub docker: Option<String>,

	/// Pin the client web version instead of using the local cache
	#[arg(long, env = "WWEB_VERSION")]
	pub web_version: Option<String>,

	#[arg(long, env = "TAKEOVER_ON_CONFLICT")]
	pub takeover_on_conflict: Option<String>,

	#[arg(long, env = "TAKEOVER_TIMEOUT_MS")]
	pub takeover_timeout_ms: Option<String>,

	#[arg(long, env = "BRIDGE_COMMAND", default_value = DEFAULT_BRIDGE_COMMAND)]
	pub bridge_command: String,

	/// Comma separated arguments passed to the bridge command
	#[arg(long, env = "BRIDGE_ARGS", default_value = DEFAULT_BRIDGE_ARGS)]
	pub bridge_args: String,

	#[arg(long, env = "BRIDGE_DESTROY_GRACE_MS")]
	pub bridge_destroy_grace_ms: Option<String>,

	/// Defaults to `<DATA_ROOT>/logs/instance.log`
	#[arg(long, env = "LOG_FILE")]
	pub log_file: Option<PathBuf>,

	#[arg(long, env = "LOG_FILE_MAX_SIZE")]
	pub log_file_max_size: Option<String>,

	/// Log to stderr only
	#[arg(long)]
	pub no_log_file: bool,
}

impl Cli {
	pub fn port(&self) -> u16 {
		self.port.as_deref().and_then(|raw| raw.trim().parse().ok()).unwrap_or(DEFAULT_PORT)
	}

	pub fn orchestrator_config(&self) -> OrchestratorConfig {
		let environment = self.node_env.as_deref().or(self.app_env.as_deref());
		let launch_args = match self.launch_args.as_deref().map(config::split_list) {
			Some(args) if !args.is_empty() => args,
			_ => DEFAULT_LAUNCH_ARGS.iter().map(|s| s.to_string()).collect(),
		};
		let poll_interval = config::millis_or(number(&self.qr_poll_ms), DEFAULT_POLL_INTERVAL);

		OrchestratorConfig {
			data_root: self.data_root.clone(),
			headless: flag(&self.headless, config::default_headless(environment)),
			launch_args,
			qr_wait: QrWaitOptions {
				timeout: config::millis_or(number(&self.qr_timeout_ms), DEFAULT_TIMEOUT),
				poll_interval,
				heartbeat_interval: number(&self.qr_heartbeat_ms).filter(|ms| *ms > 0).map(Duration::from_millis),
			},
			single_instance: flag(&self.single_instance, false),
			docker_mode: flag(&self.docker, false),
			web_version: self.web_version.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string),
			takeover_on_conflict: flag(&self.takeover_on_conflict, true),
			takeover_timeout: config::millis_or(number(&self.takeover_timeout_ms), DEFAULT_TAKEOVER_TIMEOUT),
			..OrchestratorConfig::default()
		}
	}

	pub fn bridge_factory(&self) -> BridgeAdapterFactory {
		let grace = config::millis_or(number(&self.bridge_destroy_grace_ms), DEFAULT_DESTROY_GRACE);
		BridgeAdapterFactory::new(self.bridge_command.clone(), config::split_list(&self.bridge_args)).with_destroy_grace(grace)
	}

	/// Log file target, or `None` when file logging is off.
	pub fn log_file(&self) -> Option<(PathBuf, u64)> {
		if self.no_log_file {
			return None;
		}
		let path = self.log_file.clone().unwrap_or_else(|| self.data_root.join("logs").join("instance.log"));
		let max_size = number(&self.log_file_max_size).filter(|size| *size > 0).unwrap_or(DEFAULT_LOG_FILE_MAX_SIZE);
		Some((path, max_size))
	}
}

fn flag(raw: &Option<String>, default: bool) -> bool {
	raw.as_deref().and_then(config::parse_flag).unwrap_or(default)
}

fn number(raw: &Option<String>) -> Option<u64> {
	raw.as_deref().and_then(|s| s.trim().parse().ok())
}
