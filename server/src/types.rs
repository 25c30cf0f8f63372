//! Common types used throughout the Fazt host.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::time::SystemTime;

// AppId //
//*******//
/// Opaque stable app token: `app_` + 8 chars of base36. Immutable for the
/// app's lifetime; labels are the mutable routing attribute.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct AppId(pub Box<str>);

pub const APP_ID_PREFIX: &str = "app_";
pub const APP_ID_SUFFIX_LEN: usize = 8;

impl AppId {
	/// Check the `app_xxxxxxxx` shape without hitting the database.
	pub fn is_valid(s: &str) -> bool {
		s.len() == APP_ID_PREFIX.len() + APP_ID_SUFFIX_LEN
			&& s.starts_with(APP_ID_PREFIX)
			&& s[APP_ID_PREFIX.len()..]
				.chars()
				.all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
	}

	pub fn parse(s: &str) -> Option<AppId> {
		if Self::is_valid(s) { Some(AppId(Box::from(s))) } else { None }
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for AppId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for AppId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for AppId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		AppId::parse(&s).ok_or_else(|| serde::de::Error::custom("malformed app id"))
	}
}

// UserId //
//********//
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for UserId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for UserId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(UserId(i64::deserialize(deserializer)?))
	}
}

// Timestamp //
//***********//
#[derive(Clone, Copy, Debug, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_secs() as i64)
	}

	pub fn from_now(delta: i64) -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_secs() as i64 + delta)
	}

	/// Add seconds to this timestamp
	pub fn add_seconds(&self, seconds: i64) -> Timestamp {
		Timestamp(self.0 + seconds)
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::cmp::PartialEq for Timestamp {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}

impl std::cmp::Eq for Timestamp {}

impl std::cmp::PartialOrd for Timestamp {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl std::cmp::Ord for Timestamp {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.0.cmp(&other.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

// Patch<T> - For PATCH semantics //
//**********************************//
/// Represents a field in a PATCH request with three states:
/// - `Undefined`: Field not present in JSON - don't change existing value
/// - `Null`: Field present with null value - set to NULL in database
/// - `Value(T)`: Field present with value - update to this value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Patch<T> {
	/// Field not present in request - no change
	#[default]
	Undefined,
	/// Field present with null value - delete/set to NULL
	Null,
	/// Field present with value - update to this value
	Value(T),
}

impl<T> Patch<T> {
	pub fn is_undefined(&self) -> bool {
		matches!(self, Patch::Undefined)
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Patch::Null)
	}

	pub fn is_value(&self) -> bool {
		matches!(self, Patch::Value(_))
	}

	pub fn value(&self) -> Option<&T> {
		match self {
			Patch::Value(v) => Some(v),
			_ => None,
		}
	}

	/// Maps a `Patch<T>` to `Patch<U>` by applying a function to the contained value
	pub fn map<U, F>(self, f: F) -> Patch<U>
	where
		F: FnOnce(T) -> U,
	{
		match self {
			Patch::Undefined => Patch::Undefined,
			Patch::Null => Patch::Null,
			Patch::Value(v) => Patch::Value(f(v)),
		}
	}
}

impl<T> Serialize for Patch<T>
where
	T: Serialize,
{
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match self {
			Patch::Undefined | Patch::Null => serializer.serialize_none(),
			Patch::Value(v) => v.serialize(serializer),
		}
	}
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
	T: Deserialize<'de>,
{
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Option::<T>::deserialize(deserializer).map(|opt| match opt {
			None => Patch::Null,
			Some(v) => Patch::Value(v),
		})
	}
}

// App manifest //
//**************//

/// Per-pattern realtime channel rule from `manifest.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelRule {
	/// Require an authenticated session to subscribe
	#[serde(default)]
	pub auth: bool,
	/// Require a specific role (e.g. "owner")
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<Box<str>>,
}

/// Realtime section of the manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeManifest {
	/// Channel pattern (exact name or `prefix-*`) -> rule
	#[serde(default)]
	pub channels: HashMap<Box<str>, ChannelRule>,
}

/// App manifest (`manifest.json`). Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<Box<str>>,
	/// Enables SPA fallback in the VFS
	#[serde(default)]
	pub spa: bool,
	#[serde(default)]
	pub realtime: RealtimeManifest,
}

impl Manifest {
	/// Find the channel rule matching a channel name. Exact match wins over
	/// a `prefix-*` pattern match.
	pub fn channel_rule(&self, channel: &str) -> Option<&ChannelRule> {
		if let Some(rule) = self.realtime.channels.get(channel) {
			return Some(rule);
		}
		self.realtime.channels.iter().find_map(|(pattern, rule)| {
			pattern
				.strip_suffix('*')
				.filter(|prefix| channel.starts_with(prefix))
				.map(|_| rule)
		})
	}
}

// API Response Envelope & Error Types //
//*************************************//

/// Success response envelope: `{"data": ..., "meta"?: ...}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
	pub data: T,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub meta: Option<serde_json::Value>,
}

impl<T> ApiResponse<T> {
	pub fn new(data: T) -> Self {
		Self { data, meta: None }
	}

	pub fn with_meta(data: T, meta: serde_json::Value) -> Self {
		Self { data, meta: Some(meta) }
	}
}

/// Error response format: `{"error": {"code", "message", "details"?}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
	pub code: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
	pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { error: ErrorDetails { code: code.into(), message: message.into(), details: None } }
	}

	pub fn with_details(mut self, details: serde_json::Value) -> Self {
		self.error.details = Some(details);
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn app_id_shape() {
		assert!(AppId::is_valid("app_a1b2c3d4"));
		assert!(!AppId::is_valid("app_A1B2C3D4")); // base36 is lowercase
		assert!(!AppId::is_valid("app_a1b2c3"));
		assert!(!AppId::is_valid("blog"));
		assert!(!AppId::is_valid("app_a1b2c3d4e5"));
	}

	#[test]
	fn manifest_unknown_fields_ignored() {
		let m: Manifest = serde_json::from_str(
			r#"{"name":"demo","spa":true,"permissions":["net"],"whatever":1}"#,
		)
		.unwrap();
		assert!(m.spa);
		assert_eq!(m.name.as_deref(), Some("demo"));
	}

	#[test]
	fn manifest_channel_rule_matching() {
		let m: Manifest = serde_json::from_str(
			r#"{"realtime":{"channels":{"private-*":{"auth":true},"chat":{}}}}"#,
		)
		.unwrap();
		assert!(m.channel_rule("chat").is_some());
		assert!(m.channel_rule("private-room").unwrap().auth);
		assert!(m.channel_rule("other").is_none());
	}

	#[test]
	fn patch_deserialization() {
		#[derive(Deserialize)]
		struct P {
			#[serde(default)]
			label: Patch<String>,
		}
		let p: P = serde_json::from_str(r#"{}"#).unwrap();
		assert!(p.label.is_undefined());
		let p: P = serde_json::from_str(r#"{"label":null}"#).unwrap();
		assert!(p.label.is_null());
		let p: P = serde_json::from_str(r#"{"label":"blog"}"#).unwrap();
		assert_eq!(p.label.value().map(String::as_str), Some("blog"));
	}
}

// vim: ts=4
