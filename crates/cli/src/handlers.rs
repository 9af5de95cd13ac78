//! Route handlers. Each one validates its input, delegates to the engine and
//! maps engine errors onto [`ApiError`].

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, header};
use axum::response::{Html, IntoResponse, Response};
use bridge::{Error, Session};
use cascade_protocol::{
	Cascade, ClickRequest, ErrorCode, LoginRequest, PopupOpenRequest, PopupResponse, PopupSelectRequest,
	PushSubscription, ScrollRequest, SendRequest, ServerEvent, Snapshot, StylesResponse, SuccessResponse,
	UnsubscribeRequest, VapidKeyResponse,
};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::auth::token_from_headers;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Header identifying the mirror client that issued a scroll.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

const LOGIN_HTML: &str = include_str!("login.html");

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
	payload
		.map(|Json(value)| value)
		.map_err(|rejection| ApiError::new(ErrorCode::InvalidInput, rejection.body_text()))
}

fn session(state: &AppState, id: &str) -> ApiResult<Arc<Session>> {
	state
		.registry
		.get(id)
		.ok_or_else(|| Error::SessionNotFound(id.to_string()).into())
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
	Json(json!({ "status": "ok", "cascades": state.registry.len() }))
}

pub async fn login_page(State(state): State<AppState>) -> Response {
	if let Some(dir) = &state.static_dir {
		if let Ok(page) = tokio::fs::read_to_string(dir.join("login.html")).await {
			return Html(page).into_response();
		}
	}
	Html(LOGIN_HTML).into_response()
}

pub async fn login(
	State(state): State<AppState>,
	payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Response> {
	let request = body(payload)?;
	if !state.auth.check_password(&request.password) {
		warn!(target = "cascade.server", "rejected login");
		return Err(ApiError::new(ErrorCode::Unauthorized, "Wrong password"));
	}
	let token = state.auth.issue();
	info!(target = "cascade.server", "client logged in");
	Ok((
		[(header::SET_COOKIE, state.auth.cookie(&token))],
		Json(SuccessResponse::ok()),
	)
		.into_response())
}

pub async fn cascades(State(state): State<AppState>) -> Json<Vec<Cascade>> {
	Json(state.registry.cascades())
}

pub async fn snapshot(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Snapshot>> {
	let session = session(&state, &id)?;
	let snapshot = session.snapshot().ok_or(Error::NoSnapshot(id))?;
	Ok(Json(Snapshot::clone(&snapshot)))
}

/// Snapshot of the focused window, else the first one.
pub async fn preferred_snapshot(State(state): State<AppState>) -> ApiResult<Json<Snapshot>> {
	let session = state
		.registry
		.preferred()
		.ok_or_else(|| ApiError::new(ErrorCode::NotFound, "No cascades connected"))?;
	let snapshot = session
		.snapshot()
		.ok_or_else(|| Error::NoSnapshot(session.id().to_string()))?;
	Ok(Json(Snapshot::clone(&snapshot)))
}

pub async fn styles(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<StylesResponse>> {
	let session = session(&state, &id)?;
	let css = session.css().map(|css| css.to_string()).unwrap_or_default();
	Ok(Json(StylesResponse { css }))
}

pub async fn click(
	State(state): State<AppState>,
	Path(id): Path<String>,
	payload: Result<Json<ClickRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
	let request = body(payload)?;
	state.coordinator.click(&id, request.index).await?;
	Ok(Json(SuccessResponse::ok()))
}

pub async fn scroll(
	State(state): State<AppState>,
	Path(id): Path<String>,
	headers: HeaderMap,
	payload: Result<Json<ScrollRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
	let request = body(payload)?;
	let client = headers
		.get(CLIENT_ID_HEADER)
		.and_then(|value| value.to_str().ok())
		.map(str::to_string)
		.or_else(|| token_from_headers(&headers))
		.unwrap_or_default();
	state.coordinator.scroll(&client, &id, request)?;
	Ok(Json(SuccessResponse::ok()))
}

pub async fn open_popup(
	State(state): State<AppState>,
	Path(id): Path<String>,
	payload: Result<Json<PopupOpenRequest>, JsonRejection>,
) -> ApiResult<Json<PopupResponse>> {
	let request = body(payload)?;
	let items = state.coordinator.open_popup(&id, request.index).await?;
	Ok(Json(PopupResponse { items }))
}

pub async fn select_popup_item(
	State(state): State<AppState>,
	Path(id): Path<String>,
	payload: Result<Json<PopupSelectRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
	let request = body(payload)?;
	state.coordinator.select_popup_item(&id, request.title).await?;
	Ok(Json(SuccessResponse::ok()))
}

pub async fn dismiss(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<SuccessResponse>> {
	state.coordinator.dismiss(&id).await?;
	Ok(Json(SuccessResponse::ok()))
}

pub async fn send(
	State(state): State<AppState>,
	Path(id): Path<String>,
	payload: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
	let request = body(payload)?;
	state.coordinator.send_message(&id, request.message).await?;
	Ok(Json(SuccessResponse::ok()))
}

pub async fn new_conversation(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
	state.coordinator.new_conversation(&id).await?;
	Ok(Json(SuccessResponse::ok()))
}

pub async fn close_cascade(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<SuccessResponse>> {
	state.coordinator.close_session(&id).await?;
	Ok(Json(SuccessResponse::ok()))
}

pub async fn kill_all(State(state): State<AppState>) -> Json<Value> {
	let closed = state.coordinator.kill_all().await;
	Json(json!({ "success": true, "closed": closed }))
}

pub async fn push_subscribe(
	State(state): State<AppState>,
	payload: Result<Json<PushSubscription>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
	let subscription = body(payload)?;
	if subscription.endpoint.trim().is_empty() {
		return Err(Error::MissingParameter("endpoint").into());
	}
	state.notifier.subscribe(subscription).await?;
	Ok(Json(SuccessResponse::ok()))
}

pub async fn push_unsubscribe(
	State(state): State<AppState>,
	payload: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
	let request = body(payload)?;
	state.notifier.unsubscribe(&request.endpoint).await?;
	Ok(Json(SuccessResponse::ok()))
}

pub async fn push_public_key(State(state): State<AppState>) -> Json<VapidKeyResponse> {
	Json(VapidKeyResponse {
		public_key: state.push_public_key.to_string(),
	})
}

pub async fn ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
	ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Streams hub events to one client until either side goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
	let (client, rx) = state.hub.subscribe();
	state.hub.send_to(client, &ServerEvent::CascadeList {
		cascades: state.registry.cascades(),
	});
	debug!(target = "cascade.server", client, "mirror client connected");

	let mut events = UnboundedReceiverStream::new(rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(frame) = events.next().await {
			if ws_tx.send(Message::Text(frame.as_ref().into())).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				debug!(target = "cascade.server", client, error = %err, "mirror socket error");
				break;
			}
		}
	}

	state.hub.unsubscribe(client);
	send_task.abort();
	debug!(target = "cascade.server", client, "mirror client disconnected");
}
