//! `lydiad`: the HTTP front of the Lydia session orchestrator.

pub mod cli;
pub mod logging;
pub mod routes;

pub use cli::Cli;
pub use routes::{AppState, router};
