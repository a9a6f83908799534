//! HTTP surface over [`SessionService`].
//!
//! Handlers only decode the request, call one service operation and wrap the
//! view in an `{ "ok": true, ... }` envelope. Failures become
//! `{ "ok": false, "error", "code" }` with a status derived from the error
//! class.

use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use lydia::qr::decode_png_data_url;
use lydia::{SessionError, SessionService};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct AppState {
	pub service: SessionService,
	pub port: u16,
	pub started: Instant,
}

impl AppState {
	pub fn new(service: SessionService, port: u16) -> Self {
		Self {
			service,
			port,
			started: Instant::now(),
		}
	}
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/", get(index))
		.route("/health", get(health))
		.route("/instance/start", post(start))
		.route("/instance/restart", post(restart))
		.route("/instance/stop", post(stop))
		.route("/instance/destroy", post(destroy))
		.route("/instance/{company_id}/{people_id}/status", get(status))
		.route("/instance/{company_id}/{people_id}/qr", get(qr))
		.route("/instance/{company_id}/{people_id}/qr.png", get(qr_png))
		.route("/instances", get(list))
		.route("/instances/{company_id}/{people_id}", post(create))
		.with_state(state)
}

/// Body shared by the POST endpoints; unused fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRequest {
	#[serde(default, deserialize_with = "lenient_id")]
	pub company_id: String,
	#[serde(default, deserialize_with = "lenient_id")]
	pub people_id: String,
	#[serde(default, deserialize_with = "lenient_bool")]
	pub force_restart: bool,
	#[serde(default, deserialize_with = "lenient_bool")]
	pub wipe: bool,
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
	ok: bool,
	#[serde(flatten)]
	body: T,
}

fn ok<T: Serialize>(body: T) -> Json<Envelope<T>> {
	Json(Envelope { ok: true, body })
}

#[derive(Debug)]
pub enum ApiError {
	Session(SessionError),
	BadRequest(String),
}

impl From<SessionError> for ApiError {
	fn from(err: SessionError) -> Self {
		Self::Session(err)
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		Self::BadRequest(rejection.body_text())
	}
}

impl ApiError {
	fn status(&self) -> StatusCode {
		match self {
			Self::BadRequest(_) => StatusCode::BAD_REQUEST,
			Self::Session(err) => match err {
				SessionError::Validation(_) => StatusCode::BAD_REQUEST,
				SessionError::Conflict { .. } => StatusCode::CONFLICT,
				SessionError::NotFound { .. } | SessionError::QrNotAvailable { .. } => StatusCode::NOT_FOUND,
				SessionError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
				SessionError::AdapterInit(_) | SessionError::Adapter(_) => StatusCode::BAD_GATEWAY,
				SessionError::Storage { .. } | SessionError::Interrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
			},
		}
	}

	fn code(&self) -> &'static str {
		match self {
			Self::BadRequest(_) => "validation_error",
			Self::Session(err) => err.kind(),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		let code = self.code();
		let message = match &self {
			Self::BadRequest(message) => message.clone(),
			Self::Session(err) => err.to_string(),
		};

		if status.is_server_error() {
			error!(target = "lydia.http", status = status.as_u16(), code, error = %message, "request failed");
		} else {
			debug!(target = "lydia.http", status = status.as_u16(), code, error = %message, "request rejected");
		}

		(status, Json(json!({ "ok": false, "error": message, "code": code }))).into_response()
	}
}

type ApiResult<T> = Result<T, ApiError>;

async fn index(State(state): State<AppState>) -> impl IntoResponse {
	ok(json!({
		"service": "lydia",
		"uptimeSeconds": state.started.elapsed().as_secs(),
	}))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
	ok(json!({ "up": true, "port": state.port }))
}

async fn start(State(state): State<AppState>, body: Result<Json<InstanceRequest>, JsonRejection>) -> ApiResult<impl IntoResponse> {
	let Json(req) = body?;
	let view = state.service.start(&req.company_id, &req.people_id, req.force_restart).await?;
	if view.qr_timed_out {
		warn!(
			target = "lydia.http",
			company_id = %view.company_id,
			people_id = %view.people_id,
			status = view.status,
			context = view.qr_wait_log_context.as_deref().unwrap_or_default(),
			"start returned without a QR"
		);
	}
	Ok(ok(view))
}

async fn restart(State(state): State<AppState>, body: Result<Json<InstanceRequest>, JsonRejection>) -> ApiResult<impl IntoResponse> {
	let Json(req) = body?;
	let view = state.service.restart(&req.company_id, &req.people_id, req.wipe).await?;
	Ok(ok(view))
}

async fn stop(State(state): State<AppState>, body: Result<Json<InstanceRequest>, JsonRejection>) -> ApiResult<impl IntoResponse> {
	let Json(req) = body?;
	let view = state.service.stop(&req.company_id, &req.people_id).await?;
	Ok(ok(view))
}

async fn destroy(State(state): State<AppState>, body: Result<Json<InstanceRequest>, JsonRejection>) -> ApiResult<impl IntoResponse> {
	let Json(req) = body?;
	let view = state.service.destroy(&req.company_id, &req.people_id, req.wipe).await?;
	Ok(ok(view))
}

async fn status(State(state): State<AppState>, Path((company_id, people_id)): Path<(String, String)>) -> ApiResult<impl IntoResponse> {
	Ok(ok(state.service.status(&company_id, &people_id)?))
}

async fn qr(State(state): State<AppState>, Path((company_id, people_id)): Path<(String, String)>) -> ApiResult<impl IntoResponse> {
	Ok(ok(state.service.qr(&company_id, &people_id)?))
}

async fn qr_png(State(state): State<AppState>, Path((company_id, people_id)): Path<(String, String)>) -> ApiResult<Response> {
	let view = state.service.qr(&company_id, &people_id)?;
	let Some(png) = view.png_data_url.as_deref().and_then(decode_png_data_url) else {
		let key = format!("{}:{}", company_id.trim(), people_id.trim());
		return Err(SessionError::QrNotAvailable { key }.into());
	};
	Ok((
		[
			(header::CONTENT_TYPE, "image/png"),
			(header::CACHE_CONTROL, "no-store, no-cache, must-revalidate, proxy-revalidate"),
			(header::PRAGMA, "no-cache"),
			(header::EXPIRES, "0"),
		],
		png,
	)
		.into_response())
}

async fn create(State(state): State<AppState>, Path((company_id, people_id)): Path<(String, String)>) -> ApiResult<impl IntoResponse> {
	let session = state.service.create(&company_id, &people_id).await?;
	Ok((StatusCode::CREATED, ok(json!({ "message": "session starting", "session": session }))))
}

async fn list(State(state): State<AppState>) -> impl IntoResponse {
	ok(json!({ "sessions": state.service.list() }))
}

/// Accepts a string or a number; `null` reads as empty.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
	match Value::deserialize(deserializer)? {
		Value::Null => Ok(String::new()),
		Value::String(s) => Ok(s),
		Value::Number(n) => Ok(n.to_string()),
		other => Err(de::Error::custom(format!("expected a string identifier, got {other}"))),
	}
}

/// Accepts JSON booleans, `1`/`0` and the usual truthy strings.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
	Ok(match Value::deserialize(deserializer)? {
		Value::Bool(b) => b,
		Value::Number(n) => n.as_i64() == Some(1),
		Value::String(s) => lydia::config::parse_flag(&s).unwrap_or(false),
		_ => false,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(body: Value) -> InstanceRequest {
		serde_json::from_value(body).expect("body should decode")
	}

	#[test]
	fn booleans_are_lenient() {
		assert!(request(json!({ "forceRestart": true })).force_restart);
		assert!(request(json!({ "forceRestart": "yes" })).force_restart);
		assert!(request(json!({ "wipe": "1" })).wipe);
		assert!(request(json!({ "wipe": 1 })).wipe);
		assert!(!request(json!({ "wipe": "nope" })).wipe);
		assert!(!request(json!({ "wipe": null })).wipe);
		assert!(!request(json!({})).force_restart);
	}

	#[test]
	fn numeric_identifiers_become_strings() {
		let req = request(json!({ "companyId": 42, "peopleId": "7" }));
		assert_eq!(req.company_id, "42");
		assert_eq!(req.people_id, "7");
		assert!(request(json!({ "companyId": null })).company_id.is_empty());
	}

	#[test]
	fn error_classes_map_to_statuses() {
		let cases = [
			(SessionError::Validation("x".into()), StatusCode::BAD_REQUEST),
			(SessionError::Conflict { key: "a:b".into() }, StatusCode::CONFLICT),
			(SessionError::QrNotAvailable { key: "a:b".into() }, StatusCode::NOT_FOUND),
			(
				SessionError::CapacityExceeded {
					active: "a:b".into(),
					requested: "c:d".into(),
				},
				StatusCode::SERVICE_UNAVAILABLE,
			),
			(SessionError::AdapterInit("boom".into()), StatusCode::BAD_GATEWAY),
		];
		for (err, expected) in cases {
			assert_eq!(ApiError::from(err).status(), expected);
		}
	}
}
