//! WebSocket endpoint at `/_ws`: frame protocol, per-connection loop,
//! heartbeats and rate limiting.
//!
//! Frames are JSON text: `{"type": ..., "channel"?, "data"?}` with types
//! subscribe, unsubscribe, message, ping, pong, auth, presence, members.
//! Binary frames are reserved and ignored.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::app::App;
use crate::core::extract::{OptionalAuth, TenantCtx};
use crate::meta_adapter::AppRecord;
use crate::prelude::*;
use crate::realtime::hub::{AppHub, MemberInfo, CLIENT_QUEUE};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PONG_GRACE: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A frame sent by the server.
#[derive(Debug, Clone)]
pub struct ServerFrame {
	pub typ: Box<str>,
	pub channel: Option<Box<str>>,
	pub data: Option<Value>,
}

impl ServerFrame {
	pub fn message(channel: &str, data: Value) -> ServerFrame {
		ServerFrame { typ: "message".into(), channel: Some(channel.into()), data: Some(data) }
	}

	pub fn presence(channel: &str, event: &str, member: &MemberInfo) -> ServerFrame {
		ServerFrame {
			typ: "presence".into(),
			channel: Some(channel.into()),
			data: Some(json!({
				"event": event,
				"clientId": member.client_id,
				"userId": member.user_id,
				"name": member.name,
			})),
		}
	}

	pub fn members(channel: &str, members: &[MemberInfo]) -> ServerFrame {
		ServerFrame {
			typ: "members".into(),
			channel: Some(channel.into()),
			data: Some(Value::Array(
				members
					.iter()
					.map(|m| {
						json!({
							"clientId": m.client_id,
							"userId": m.user_id,
							"name": m.name,
						})
					})
					.collect(),
			)),
		}
	}

	pub fn broadcast_all(data: Value) -> ServerFrame {
		ServerFrame { typ: "message".into(), channel: None, data: Some(data) }
	}

	pub fn error(message: &str) -> ServerFrame {
		ServerFrame {
			typ: "error".into(),
			channel: None,
			data: Some(json!({ "message": message })),
		}
	}

	pub fn pong() -> ServerFrame {
		ServerFrame { typ: "pong".into(), channel: None, data: None }
	}

	pub fn kicked() -> ServerFrame {
		ServerFrame { typ: "kicked".into(), channel: None, data: None }
	}

	pub fn server_restart() -> ServerFrame {
		ServerFrame { typ: "server_restart".into(), channel: None, data: None }
	}

	pub fn to_json(&self) -> String {
		let mut obj = serde_json::Map::new();
		obj.insert("type".to_string(), Value::String(self.typ.to_string()));
		if let Some(channel) = &self.channel {
			obj.insert("channel".to_string(), Value::String(channel.to_string()));
		}
		if let Some(data) = &self.data {
			obj.insert("data".to_string(), data.clone());
		}
		Value::Object(obj).to_string()
	}
}

/// A frame received from a client.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
	#[serde(rename = "type")]
	pub typ: String,
	pub channel: Option<String>,
	pub data: Option<Value>,
	pub token: Option<String>,
}

impl ClientFrame {
	pub fn parse(text: &str) -> Option<ClientFrame> {
		serde_json::from_str(text).ok()
	}
}

pub fn valid_channel_name(name: &str) -> bool {
	!name.is_empty()
		&& name.len() <= 128
		&& name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
	pub token: Option<String>,
}

/// Upgrade handler for `/_ws`. Limit checks run before the upgrade so an
/// over-capacity connect is refused with 503 instead of a dead socket.
pub async fn get_ws(
	State(app): State<App>,
	TenantCtx(tenant): TenantCtx,
	OptionalAuth(auth): OptionalAuth,
	Query(query): Query<WsQuery>,
	ws: WebSocketUpgrade,
) -> FzResult<Response> {
	let mut user = auth.map(|a| a.user);
	if user.is_none() {
		if let Some(token) = &query.token {
			if let Ok((_session, session_user)) = app.auth_adapter.read_session(token).await {
				user = Some(session_user);
			}
		}
	}

	let client_id: Box<str> = Uuid::new_v4().to_string().into();
	let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
	let hub = app.hub.register(&tenant.id, client_id.clone(), tx)?;

	let state = app.clone();
	let tenant = tenant.clone();
	Ok(ws.on_upgrade(move |socket| async move {
		handle_connection(state.clone(), tenant, hub, client_id.clone(), rx, socket, user).await;
	}))
}

struct ConnState {
	client_id: Box<str>,
	user: Option<crate::auth_adapter::UserRecord>,
	subscriptions: HashSet<Box<str>>,
	// Message-rate window
	window_start: Instant,
	window_count: u32,
	rate_warned: bool,
}

async fn handle_connection(
	app: App,
	tenant: Arc<AppRecord>,
	hub: Arc<AppHub>,
	client_id: Box<str>,
	mut out_rx: mpsc::Receiver<ServerFrame>,
	socket: WebSocket,
	user: Option<crate::auth_adapter::UserRecord>,
) {
	info!("ws connect: app={} client={}", tenant.id, &client_id[..8]);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let mut conn = ConnState {
		client_id: client_id.clone(),
		user,
		subscriptions: HashSet::new(),
		window_start: Instant::now(),
		window_count: 0,
		rate_warned: false,
	};

	let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
	heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	heartbeat.tick().await; // first tick is immediate
	let mut awaiting_pong: Option<Instant> = None;
	let mut last_activity = Instant::now();
	let idle_timeout = Duration::from_secs(app.hub.limits.idle_timeout_secs);

	loop {
		tokio::select! {
			incoming = ws_rx.next() => {
				match incoming {
					Some(Ok(Message::Text(text))) => {
						last_activity = Instant::now();
						if text.len() > app.hub.limits.max_message_bytes {
							let _ = ws_tx
								.send(Message::Text(ServerFrame::error("message too large").to_json().into()))
								.await;
							continue;
						}
						if !check_rate(&app, &tenant, &mut conn) {
							// Rate exceeded: the frame is dropped silently
							continue;
						}
						let Some(frame) = ClientFrame::parse(&text) else {
							let _ = ws_tx
								.send(Message::Text(ServerFrame::error("malformed frame").to_json().into()))
								.await;
							continue;
						};
						if frame.typ == "pong" {
							awaiting_pong = None;
							continue;
						}
						if let Some(reply) = handle_frame(&app, &tenant, &hub, &mut conn, frame).await {
							if ws_tx.send(Message::Text(reply.to_json().into())).await.is_err() {
								break;
							}
						}
					}
					Some(Ok(Message::Pong(_))) => {
						awaiting_pong = None;
						last_activity = Instant::now();
					}
					Some(Ok(Message::Ping(payload))) => {
						let _ = ws_tx.send(Message::Pong(payload)).await;
					}
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(Message::Binary(_))) => {
						// Reserved for a future protocol
					}
					Some(Err(err)) => {
						debug!("ws error: {}", err);
						break;
					}
				}
			}
			outgoing = out_rx.recv() => {
				match outgoing {
					Some(frame) => {
						let is_restart = &*frame.typ == "server_restart";
						let is_kick = &*frame.typ == "kicked";
						if ws_tx.send(Message::Text(frame.to_json().into())).await.is_err() {
							break;
						}
						if is_restart {
							tokio::time::sleep(SHUTDOWN_GRACE).await;
							break;
						}
						if is_kick {
							break;
						}
					}
					None => break,
				}
			}
			_ = heartbeat.tick() => {
				if let Some(sent) = awaiting_pong {
					if sent.elapsed() > PONG_GRACE {
						debug!("ws heartbeat timeout: {}", &client_id[..8]);
						break;
					}
				}
				if last_activity.elapsed() > idle_timeout {
					debug!("ws idle timeout: {}", &client_id[..8]);
					break;
				}
				if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
					break;
				}
				awaiting_pong = Some(Instant::now());
			}
			_ = app.shutdown.cancelled() => {
				let _ = ws_tx
					.send(Message::Text(ServerFrame::server_restart().to_json().into()))
					.await;
				tokio::time::sleep(SHUTDOWN_GRACE).await;
				break;
			}
		}
	}

	let _ = ws_tx.close().await;
	app.hub.unregister(&tenant.id, &client_id);
	info!("ws close: app={} client={}", tenant.id, &client_id[..8]);
}

/// Per-second message-rate window; 80% fires one activity warning, 100%
/// drops the frame.
fn check_rate(app: &App, tenant: &AppRecord, conn: &mut ConnState) -> bool {
	let max = app.hub.limits.max_messages_per_sec;
	if conn.window_start.elapsed() >= Duration::from_secs(1) {
		conn.window_start = Instant::now();
		conn.window_count = 0;
		conn.rate_warned = false;
	}
	conn.window_count += 1;
	if conn.window_count * 10 >= max * 8 && !conn.rate_warned {
		conn.rate_warned = true;
		app.activity.record(crate::meta_adapter::ActivityEntry {
			weight: 4,
			actor: crate::meta_adapter::Actor::Anonymous,
			actor_id: Some(conn.client_id.clone()),
			resource: format!("app:{}", tenant.id).into(),
			action: "realtime.rate_pressure".into(),
			result: "warning".into(),
			details: Some(json!({ "count": conn.window_count, "max": max })),
			created_at: Timestamp::now(),
		});
	}
	conn.window_count <= max
}

/// Channel access rules: `private-*` needs an authenticated session;
/// manifest patterns may add auth/role requirements to any channel.
fn check_channel_access(tenant: &AppRecord, conn: &ConnState, channel: &str) -> Result<(), &'static str> {
	if channel.starts_with("private-") && conn.user.is_none() {
		return Err("authentication required");
	}
	if let Some(rule) = tenant.manifest.channel_rule(channel) {
		if rule.auth && conn.user.is_none() {
			return Err("authentication required");
		}
		if let Some(role) = &rule.role {
			let ok = conn
				.user
				.as_ref()
				.map(|u| u.role.as_str() == role.as_ref())
				.unwrap_or(false);
			if !ok {
				return Err("role required");
			}
		}
	}
	Ok(())
}

async fn handle_frame(
	app: &App,
	tenant: &AppRecord,
	hub: &Arc<AppHub>,
	conn: &mut ConnState,
	frame: ClientFrame,
) -> Option<ServerFrame> {
	match frame.typ.as_str() {
		"ping" => Some(ServerFrame::pong()),
		"auth" => {
			let Some(token) = frame.token.or_else(|| {
				frame.data.as_ref().and_then(|d| d.get("token")).and_then(Value::as_str).map(String::from)
			}) else {
				return Some(ServerFrame::error("auth requires a token"));
			};
			match app.auth_adapter.read_session(&token).await {
				Ok((_session, user)) => {
					conn.user = Some(user);
					Some(ServerFrame {
						typ: "auth".into(),
						channel: None,
						data: Some(json!({ "ok": true })),
					})
				}
				Err(_) => Some(ServerFrame::error("invalid token")),
			}
		}
		"subscribe" => {
			let Some(channel) = frame.channel else {
				return Some(ServerFrame::error("subscribe requires a channel"));
			};
			if !valid_channel_name(&channel) {
				return Some(ServerFrame::error("invalid channel name"));
			}
			if conn.subscriptions.len() >= app.hub.limits.max_subscriptions_per_client {
				return Some(ServerFrame::error("subscription limit reached"));
			}
			if let Err(reason) = check_channel_access(tenant, conn, &channel) {
				return Some(ServerFrame::error(reason));
			}
			let member = MemberInfo {
				client_id: conn.client_id.clone(),
				user_id: conn.user.as_ref().map(|u| u.id),
				name: conn.user.as_ref().and_then(|u| u.name.clone()),
			};
			// The hub already holds this client's sender; reuse it
			let tx = hub.sender_for(&conn.client_id)?;
			match hub.subscribe(&channel, member, tx, app.hub.limits.max_channels_per_app) {
				Ok(()) => {
					conn.subscriptions.insert(channel.clone().into());
					Some(ServerFrame {
						typ: "subscribed".into(),
						channel: Some(channel.into()),
						data: None,
					})
				}
				Err(_) => Some(ServerFrame::error("channel limit reached")),
			}
		}
		"unsubscribe" => {
			let Some(channel) = frame.channel else {
				return Some(ServerFrame::error("unsubscribe requires a channel"));
			};
			if conn.subscriptions.remove(channel.as_str()) {
				hub.unsubscribe(&channel, &conn.client_id);
			}
			None
		}
		"message" => {
			let Some(channel) = frame.channel else {
				return Some(ServerFrame::error("message requires a channel"));
			};
			if !conn.subscriptions.contains(channel.as_str()) {
				return Some(ServerFrame::error("not subscribed"));
			}
			hub.broadcast(&channel, frame.data.unwrap_or(Value::Null));
			None
		}
		"members" | "presence" => {
			let Some(channel) = frame.channel else {
				return Some(ServerFrame::error("members requires a channel"));
			};
			Some(ServerFrame::members(&channel, &hub.members(&channel)))
		}
		other => {
			debug!("ws unknown frame type: {}", other);
			Some(ServerFrame::error("unknown frame type"))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn client_frame_parsing() {
		let frame = ClientFrame::parse(r#"{"type":"subscribe","channel":"chat"}"#).unwrap();
		assert_eq!(frame.typ, "subscribe");
		assert_eq!(frame.channel.as_deref(), Some("chat"));

		let frame =
			ClientFrame::parse(r#"{"type":"message","channel":"chat","data":{"x":1}}"#).unwrap();
		assert_eq!(frame.data.unwrap()["x"], 1);

		assert!(ClientFrame::parse("not json").is_none());
		assert!(ClientFrame::parse(r#"{"channel":"chat"}"#).is_none()); // type required
	}

	#[test]
	fn server_frame_shape() {
		let text = ServerFrame::message("chat", serde_json::json!({"x": 1})).to_json();
		let parsed: Value = serde_json::from_str(&text).unwrap();
		assert_eq!(parsed["type"], "message");
		assert_eq!(parsed["channel"], "chat");
		assert_eq!(parsed["data"]["x"], 1);

		let text = ServerFrame::server_restart().to_json();
		let parsed: Value = serde_json::from_str(&text).unwrap();
		assert_eq!(parsed["type"], "server_restart");
		assert!(parsed.get("channel").is_none());
	}

	#[test]
	fn channel_name_validation() {
		assert!(valid_channel_name("chat"));
		assert!(valid_channel_name("presence-room_1.a"));
		assert!(!valid_channel_name(""));
		assert!(!valid_channel_name("bad channel"));
		assert!(!valid_channel_name(&"x".repeat(200)));
	}
}

// vim: ts=4
