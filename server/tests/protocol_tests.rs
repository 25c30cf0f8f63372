//! Integration tests for the wire-level protocols:
//! - the realtime WebSocket frame protocol
//! - the admin JSON envelope
//! - host routing primitives

#[cfg(test)]
mod tests {
	use serde_json::{json, Value};

	/// WebSocket client frames parse with type/channel/data
	#[test]
	fn test_ws_client_frame_parsing() {
		use fazt::realtime::websocket::ClientFrame;

		let frame = ClientFrame::parse(
			r#"{"type":"subscribe","channel":"presence-lobby"}"#,
		)
		.expect("parse");
		assert_eq!(frame.typ, "subscribe");
		assert_eq!(frame.channel.as_deref(), Some("presence-lobby"));

		let frame = ClientFrame::parse(r#"{"type":"auth","token":"tok-1"}"#).expect("parse auth");
		assert_eq!(frame.token.as_deref(), Some("tok-1"));
	}

	/// Server frames serialize to `{type, channel?, data?}`
	#[test]
	fn test_ws_server_frame_serialization() {
		use fazt::realtime::websocket::ServerFrame;

		let text = ServerFrame::message("chat", json!({"n": 1})).to_json();
		let parsed: Value = serde_json::from_str(&text).expect("json");
		assert_eq!(parsed["type"], "message");
		assert_eq!(parsed["channel"], "chat");
		assert_eq!(parsed["data"]["n"], 1);
	}

	/// The error envelope carries the stable code registry
	#[test]
	fn test_error_envelope_codes() {
		use fazt::error::Error;

		assert_eq!(Error::NotFound.code(), "NOT_FOUND");
		assert_eq!(Error::Unauthorized.code(), "UNAUTHORIZED");
		assert_eq!(Error::SessionExpired.code(), "SESSION_EXPIRED");
		assert_eq!(Error::InvalidCredentials.code(), "INVALID_CREDENTIALS");
		assert_eq!(Error::Forbidden.code(), "FORBIDDEN");
		assert_eq!(Error::Validation("x".into()).code(), "VALIDATION_ERROR");
		assert_eq!(Error::RateLimited { retry_after_secs: 9 }.code(), "RATE_LIMITED");
		assert_eq!(Error::Conflict("x".into()).code(), "CONFLICT");
		assert_eq!(Error::PayloadTooLarge.code(), "PAYLOAD_TOO_LARGE");
		assert_eq!(Error::ServiceUnavailable("x".into()).code(), "SERVICE_UNAVAILABLE");
		assert_eq!(Error::Internal("x".into()).code(), "INTERNAL_ERROR");
		assert_eq!(Error::DbError.code(), "INTERNAL_ERROR");
	}

	/// Success envelope is `{"data": ..., "meta"?: ...}`
	#[test]
	fn test_api_response_envelope() {
		use fazt::types::ApiResponse;

		let body = serde_json::to_value(ApiResponse::new(json!({"echoed": 2}))).expect("ser");
		assert_eq!(body, json!({"data": {"echoed": 2}}));

		let body = serde_json::to_value(ApiResponse::with_meta(
			json!([1, 2, 3]),
			json!({"total": 3}),
		))
		.expect("ser");
		assert_eq!(body["meta"]["total"], 3);
	}

	/// Error body is `{"error": {"code", "message"}}`
	#[test]
	fn test_error_response_shape() {
		use fazt::types::ErrorResponse;

		let body = serde_json::to_value(ErrorResponse::new("NOT_FOUND", "Resource not found"))
			.expect("ser");
		assert_eq!(body["error"]["code"], "NOT_FOUND");
		assert_eq!(body["error"]["message"], "Resource not found");
		assert!(body["error"].get("details").is_none());
	}

	/// Subdomain candidates: spec scenario 2 shapes
	#[test]
	fn test_host_candidates() {
		use fazt::core::router::candidate_from_host;

		assert_eq!(&*candidate_from_host("blog.example.com", "example.com"), "blog");
		assert_eq!(
			&*candidate_from_host("app_bbbb1111.example.com", "example.com"),
			"app_bbbb1111"
		);
		assert_eq!(&*candidate_from_host("zzz.example.com", "example.com"), "zzz");
	}

	/// Manifest channel rules drive private/presence semantics
	#[test]
	fn test_manifest_realtime_rules() {
		use fazt::types::Manifest;

		let manifest: Manifest = serde_json::from_value(json!({
			"spa": true,
			"realtime": {"channels": {
				"mods-*": {"auth": true, "role": "owner"},
				"chat": {}
			}}
		}))
		.expect("manifest");

		assert!(manifest.spa);
		let rule = manifest.channel_rule("mods-room").expect("rule");
		assert!(rule.auth);
		assert_eq!(rule.role.as_deref(), Some("owner"));
		assert!(manifest.channel_rule("chat").expect("chat").role.is_none());
	}
}

// vim: ts=4
