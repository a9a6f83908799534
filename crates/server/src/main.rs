use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lydia::{SessionController, SessionService};
use lydia_server::{AppState, Cli, logging, router};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose, cli.log_file());

	if let Err(err) = run(cli).await {
		error!(target = "lydia.server", error = %format!("{err:#}"), "server failed");
		std::process::exit(1);
	}
}

async fn run(cli: Cli) -> anyhow::Result<()> {
	let config = cli.orchestrator_config();
	let port = cli.port();
	info!(
		target = "lydia.server",
		data_root = %config.data_root.display(),
		headless = config.headless,
		single_instance = config.single_instance_enforced(),
		bridge = %cli.bridge_command,
		"starting"
	);

	let controller = Arc::new(SessionController::new(config, Arc::new(cli.bridge_factory())));
	let service = SessionService::new(controller);
	let app = router(AppState::new(service.clone(), port));

	let listener = TcpListener::bind((cli.host.as_str(), port))
		.await
		.with_context(|| format!("failed to bind {}:{port}", cli.host))?;
	info!(target = "lydia.server", addr = %listener.local_addr()?, "listening");

	axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("http server error")?;

	let stopped = service.shutdown().await;
	info!(target = "lydia.server", stopped, "shutdown complete");
	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(err) = tokio::signal::ctrl_c().await {
			error!(target = "lydia.server", error = %err, "failed to listen for ctrl-c");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			}
			Err(err) => {
				error!(target = "lydia.server", error = %err, "failed to listen for SIGTERM");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
	info!(target = "lydia.server", "shutdown signal received; stopping sessions");
}
