//! Configuration store: flat dotted string keys over the config table,
//! with CLI overrides layered in memory on top and a one-time migration
//! from the legacy JSON config file.

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use crate::meta_adapter::MetaAdapter;
use crate::prelude::*;

const CACHE_SIZE: usize = 256;

pub struct ConfigStore {
	meta: Arc<dyn MetaAdapter>,
	/// CLI overrides; consulted before the database, never persisted.
	overrides: RwLock<HashMap<Box<str>, Box<str>>>,
	cache: Mutex<LruCache<Box<str>, Option<Box<str>>>>,
}

impl std::fmt::Debug for ConfigStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConfigStore").finish()
	}
}

/// Flatten a nested JSON object into dotted string keys
/// (`{"server":{"port":8080}}` -> `server.port = "8080"`).
fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
	match value {
		Value::Object(map) => {
			for (key, nested) in map {
				let key = if prefix.is_empty() {
					key.clone()
				} else {
					format!("{}.{}", prefix, key)
				};
				flatten_into(&key, nested, out);
			}
		}
		Value::Null => {}
		Value::String(s) => out.push((prefix.to_string(), s.clone())),
		other => out.push((prefix.to_string(), other.to_string())),
	}
}

impl ConfigStore {
	pub fn new(meta: Arc<dyn MetaAdapter>) -> Arc<ConfigStore> {
		let size = NonZeroUsize::new(CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
		Arc::new(ConfigStore {
			meta,
			overrides: RwLock::new(HashMap::new()),
			cache: Mutex::new(LruCache::new(size)),
		})
	}

	/// Apply an in-memory override (CLI flags). Wins over the database.
	pub fn set_override(&self, key: &str, value: &str) {
		self.overrides.write().insert(Box::from(key), Box::from(value));
	}

	pub async fn get(&self, key: &str) -> FzResult<Option<Box<str>>> {
		if let Some(value) = self.overrides.read().get(key) {
			return Ok(Some(value.clone()));
		}
		if let Some(cached) = self.cache.lock().get(key) {
			return Ok(cached.clone());
		}
		let value = self.meta.read_config(key).await?;
		self.cache.lock().put(Box::from(key), value.clone());
		Ok(value)
	}

	pub async fn get_str(&self, key: &str, default: &str) -> FzResult<Box<str>> {
		Ok(self.get(key).await?.unwrap_or_else(|| Box::from(default)))
	}

	/// Booleans are parsed from `"true"` / `"false"` (anything else reads
	/// as the default).
	pub async fn get_bool(&self, key: &str, default: bool) -> FzResult<bool> {
		Ok(match self.get(key).await?.as_deref() {
			Some("true") => true,
			Some("false") => false,
			_ => default,
		})
	}

	pub async fn get_i64(&self, key: &str, default: i64) -> FzResult<i64> {
		Ok(self
			.get(key)
			.await?
			.and_then(|raw| raw.parse().ok())
			.unwrap_or(default))
	}

	pub async fn set(&self, key: &str, value: Option<&str>) -> FzResult<()> {
		self.meta.write_config(key, value).await?;
		self.cache.lock().pop(key);
		Ok(())
	}

	pub async fn list(&self) -> FzResult<Vec<(Box<str>, Box<str>)>> {
		self.meta.read_config_all().await
	}

	/// One-time legacy import: when a JSON config file exists and the
	/// database holds no `server.*` / `auth.*` keys yet, import its values
	/// and rename the file so the import never repeats.
	pub async fn migrate_legacy_file(&self, path: &Path) -> FzResult<bool> {
		if !path.exists() {
			return Ok(false);
		}
		let already_configured = self
			.meta
			.read_config_all()
			.await?
			.iter()
			.any(|(key, _)| key.starts_with("server.") || key.starts_with("auth."));
		if already_configured {
			return Ok(false);
		}

		let raw = tokio::fs::read_to_string(path).await?;
		let parsed: Value = serde_json::from_str(&raw)
			.map_err(|_| Error::ConfigError(format!("legacy config unreadable: {}", path.display())))?;

		let mut entries = Vec::new();
		flatten_into("", &parsed, &mut entries);
		for (key, value) in &entries {
			self.meta.write_config(key, Some(value)).await?;
		}

		let mut renamed = path.as_os_str().to_owned();
		renamed.push(".imported");
		tokio::fs::rename(path, &renamed).await?;
		info!(
			"imported {} legacy config keys from {}",
			entries.len(),
			path.display()
		);
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn flatten_nested_objects() {
		let mut out = Vec::new();
		flatten_into(
			"",
			&json!({
				"server": { "port": 8080, "domain": "example.com" },
				"https": { "enabled": true },
				"auth": { "username": "admin" }
			}),
			&mut out,
		);
		out.sort();
		assert_eq!(
			out,
			vec![
				("auth.username".to_string(), "admin".to_string()),
				("https.enabled".to_string(), "true".to_string()),
				("server.domain".to_string(), "example.com".to_string()),
				("server.port".to_string(), "8080".to_string()),
			]
		);
	}

	#[test]
	fn flatten_skips_null() {
		let mut out = Vec::new();
		flatten_into("", &json!({ "a": null, "b": 1 }), &mut out);
		assert_eq!(out, vec![("b".to_string(), "1".to_string())]);
	}
}

// vim: ts=4
