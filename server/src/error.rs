//! Error handling subsystem. Implements a custom Error type.

use axum::{http::StatusCode, response::IntoResponse, Json};

use crate::prelude::*;
use crate::types::ErrorResponse;

pub type FzResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// Core errors
	NotFound,
	Unauthorized,        // 401 - no session
	SessionExpired,      // 401 - session token known but past expiry
	InvalidCredentials,  // 401 - bad login / bad OAuth exchange
	Forbidden,           // 403 - authenticated but wrong role
	DbError,
	Parse,

	// Input validation and constraints
	Validation(String),      // 400 - invalid input data
	Conflict(String),        // 409 - constraint violation (unique label, etc)
	PayloadTooLarge,         // 413 - body over the probe-derived upload cap
	RateLimited { retry_after_secs: u64 }, // 429 with Retry-After

	// Network and external services
	NetworkError(String), // outbound fetch / OAuth exchange failures
	Timeout,              // 504 - serverless deadline exceeded

	// Capability layer: handed to the JS handler as a structured error;
	// surfaces as 403 when it escapes to HTTP
	CapabilityDenied(String),

	// System and configuration
	ConfigError(String),        // missing or invalid configuration
	ServiceUnavailable(String), // 503 - temporary system failures
	Internal(String),           // internal invariant violations, for debugging

	// Processing
	ImageError(String),  // image processing failures
	CryptoError(String), // TLS / certificate store errors

	// externals
	Io(std::io::Error),
}

impl Error {
	/// Stable code as seen by API clients. HTTP status stays the source of
	/// truth; the code is a registry for programmatic handling.
	pub fn code(&self) -> &'static str {
		match self {
			Error::NotFound => "NOT_FOUND",
			Error::Unauthorized => "UNAUTHORIZED",
			Error::SessionExpired => "SESSION_EXPIRED",
			Error::InvalidCredentials => "INVALID_CREDENTIALS",
			Error::Forbidden | Error::CapabilityDenied(_) => "FORBIDDEN",
			Error::Validation(_) => "VALIDATION_ERROR",
			Error::Conflict(_) => "CONFLICT",
			Error::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
			Error::RateLimited { .. } => "RATE_LIMITED",
			Error::Timeout => "TIMEOUT",
			Error::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
			Error::NetworkError(_)
			| Error::DbError
			| Error::Parse
			| Error::ConfigError(_)
			| Error::Internal(_)
			| Error::ImageError(_)
			| Error::CryptoError(_)
			| Error::Io(_) => "INTERNAL_ERROR",
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let retry_after = match &self {
			Error::RateLimited { retry_after_secs } => Some(*retry_after_secs),
			_ => None,
		};
		let (status, message) = match &self {
			Error::NotFound => (StatusCode::NOT_FOUND, "Resource not found".to_string()),
			Error::Unauthorized => {
				(StatusCode::UNAUTHORIZED, "Authentication required".to_string())
			}
			Error::SessionExpired => (StatusCode::UNAUTHORIZED, "Session expired".to_string()),
			Error::InvalidCredentials => {
				(StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
			}
			Error::Forbidden => (
				StatusCode::FORBIDDEN,
				"You do not have permission to access this resource".to_string(),
			),
			Error::CapabilityDenied(msg) => {
				(StatusCode::FORBIDDEN, format!("Operation not permitted: {}", msg))
			}
			Error::Validation(msg) => {
				(StatusCode::BAD_REQUEST, format!("Request validation failed: {}", msg))
			}
			Error::Conflict(msg) => (StatusCode::CONFLICT, format!("Resource conflict: {}", msg)),
			Error::PayloadTooLarge => {
				(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
			}
			Error::RateLimited { retry_after_secs } => (
				StatusCode::TOO_MANY_REQUESTS,
				format!("Rate limited, retry after {}s", retry_after_secs),
			),
			Error::Timeout => (StatusCode::GATEWAY_TIMEOUT, "Handler timed out".to_string()),
			Error::ServiceUnavailable(msg) => (
				StatusCode::SERVICE_UNAVAILABLE,
				format!("Service temporarily unavailable: {}", msg),
			),
			// Server errors (5xx) - no message exposure for security
			Error::DbError
			| Error::Parse
			| Error::NetworkError(_)
			| Error::ImageError(_)
			| Error::CryptoError(_)
			| Error::ConfigError(_)
			| Error::Io(_) => {
				(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
			}
			Error::Internal(msg) => {
				warn!("internal error: {}", msg);
				(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
			}
		};

		let error_response = ErrorResponse::new(self.code(), message);
		let mut response = (status, Json(error_response)).into_response();
		if let Some(secs) = retry_after {
			if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
				response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
			}
		}
		response
	}
}

impl From<std::num::ParseIntError> for Error {
	fn from(_err: std::num::ParseIntError) -> Self {
		warn!("parse int error: {}", _err);
		Error::Parse
	}
}

impl From<std::time::SystemTimeError> for Error {
	fn from(_err: std::time::SystemTimeError) -> Self {
		warn!("system time error: {}", _err);
		Error::ServiceUnavailable("system time error".into())
	}
}

impl From<axum::Error> for Error {
	fn from(_err: axum::Error) -> Self {
		warn!("axum error: {}", _err);
		Error::NetworkError("axum error".into())
	}
}

impl From<axum::http::Error> for Error {
	fn from(_err: axum::http::Error) -> Self {
		warn!("http error: {}", _err);
		Error::NetworkError("http error".into())
	}
}

impl From<axum::http::header::ToStrError> for Error {
	fn from(_err: axum::http::header::ToStrError) -> Self {
		warn!("header to str error: {}", _err);
		Error::Parse
	}
}

impl From<serde_json::Error> for Error {
	fn from(_err: serde_json::Error) -> Self {
		warn!("json error: {}", _err);
		Error::Parse
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(_err: tokio::task::JoinError) -> Self {
		warn!("tokio join error: {}", _err);
		Error::ServiceUnavailable("task execution failed".into())
	}
}

impl From<hyper::Error> for Error {
	fn from(_err: hyper::Error) -> Self {
		warn!("hyper error: {}", _err);
		Error::NetworkError("HTTP client error".into())
	}
}

impl From<hyper_util::client::legacy::Error> for Error {
	fn from(_err: hyper_util::client::legacy::Error) -> Self {
		warn!("hyper error: {}", _err);
		Error::NetworkError("HTTP client error".into())
	}
}

impl From<rustls::Error> for Error {
	fn from(_err: rustls::Error) -> Self {
		warn!("rustls error: {}", _err);
		Error::CryptoError("TLS error".into())
	}
}

impl From<rustls_pki_types::pem::Error> for Error {
	fn from(_err: rustls_pki_types::pem::Error) -> Self {
		warn!("pem error: {}", _err);
		Error::CryptoError("PEM parsing error".into())
	}
}

impl From<image::error::ImageError> for Error {
	fn from(_err: image::error::ImageError) -> Self {
		warn!("image error: {:?}", _err);
		Error::ImageError("Image processing failed".into())
	}
}

impl From<url::ParseError> for Error {
	fn from(_err: url::ParseError) -> Self {
		warn!("url parse error: {}", _err);
		Error::Validation("invalid URL".into())
	}
}

// vim: ts=4
