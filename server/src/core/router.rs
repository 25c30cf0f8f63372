//! Tenant routing: `Host` header -> app identity.
//!
//! Routing order: reserved system labels, `app_*` IDs, app labels, aliases
//! (proxy / redirect / split / reserved), then the `404` system app. The
//! label is only a routing attribute; everything downstream keys on the
//! immutable app ID.
//!
//! Lookups are cached per candidate subdomain with a tight TTL, and the
//! cache is invalidated explicitly on every app/alias mutation. Label
//! swaps commit atomically in the store, so the TTL only bounds staleness
//! for entries the mutation path failed to name.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::meta_adapter::{AliasKind, AliasRecord, AppRecord, MetaAdapter};
use crate::prelude::*;

/// Labels owned by the system; never assignable to tenant apps.
pub const RESERVED_LABELS: [&str; 3] = ["admin", "root", "404"];

pub const SYSTEM_LABEL_ROOT: &str = "root";
pub const SYSTEM_LABEL_NOT_FOUND: &str = "404";

/// Host-cache TTL. Kept tight: invalidation on mutation is explicit, the
/// TTL only covers entries a mutation could not name.
const CACHE_TTL: Duration = Duration::from_secs(1);

pub fn is_reserved_label(label: &str) -> bool {
	RESERVED_LABELS.contains(&label)
}

/// Outcome of host resolution.
#[derive(Debug, Clone)]
pub enum RouteTarget {
	App(AppRecord),
	Redirect { location: Box<str>, permanent: bool },
}

#[derive(Debug, Clone)]
enum CachedEntry {
	App(AppRecord),
	Alias(AliasRecord),
	Miss,
}

struct CacheSlot {
	entry: CachedEntry,
	at: Instant,
}

pub struct HostRouter {
	meta: Arc<dyn MetaAdapter>,
	base_domain: Box<str>,
	cache: RwLock<HashMap<Box<str>, CacheSlot>>,
}

impl std::fmt::Debug for HostRouter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HostRouter").field("base_domain", &self.base_domain).finish()
	}
}

/// Strip the port and extract the leftmost label. The bare base domain maps
/// to the `root` system label.
pub fn candidate_from_host(host: &str, base_domain: &str) -> Box<str> {
	let host = host.rsplit_once(':').map_or(host, |(h, port)| {
		// IPv6 literals contain colons; only strip a numeric port
		if port.chars().all(|c| c.is_ascii_digit()) { h } else { host }
	});
	let host = host.trim_end_matches('.').to_ascii_lowercase();
	if host == base_domain {
		return Box::from(SYSTEM_LABEL_ROOT);
	}
	match host.split('.').next() {
		Some(label) if !label.is_empty() => Box::from(label),
		_ => Box::from(SYSTEM_LABEL_NOT_FOUND),
	}
}

/// Pick a split target with a stable hash of the client key so a client
/// keeps hitting the same variant.
pub fn pick_split_target<'a>(
	targets: &'a [crate::meta_adapter::SplitTarget],
	client_key: &str,
) -> Option<&'a str> {
	let total: u64 = targets.iter().map(|t| u64::from(t.weight)).sum();
	if total == 0 {
		return None;
	}
	let digest = Sha256::digest(client_key.as_bytes());
	let mut hash = 0u64;
	for byte in &digest[..8] {
		hash = (hash << 8) | u64::from(*byte);
	}
	let mut bucket = hash % total;
	for target in targets {
		let weight = u64::from(target.weight);
		if bucket < weight {
			return Some(&target.target);
		}
		bucket -= weight;
	}
	None
}

impl HostRouter {
	pub fn new(meta: Arc<dyn MetaAdapter>, base_domain: impl Into<Box<str>>) -> HostRouter {
		HostRouter { meta, base_domain: base_domain.into(), cache: RwLock::new(HashMap::new()) }
	}

	pub fn base_domain(&self) -> &str {
		&self.base_domain
	}

	/// Drop the cache entry for one candidate subdomain.
	pub fn invalidate(&self, candidate: &str) {
		self.cache.write().remove(candidate);
	}

	/// Drop everything; used after bulk mutations (app delete cascades,
	/// alias imports).
	pub fn invalidate_all(&self) {
		self.cache.write().clear();
	}

	async fn lookup_candidate(&self, candidate: &str) -> FzResult<CachedEntry> {
		if let Some(slot) = self.cache.read().get(candidate) {
			if slot.at.elapsed() < CACHE_TTL {
				return Ok(slot.entry.clone());
			}
		}

		let entry = self.lookup_uncached(candidate).await?;
		self.cache.write().insert(
			Box::from(candidate),
			CacheSlot { entry: entry.clone(), at: Instant::now() },
		);
		Ok(entry)
	}

	async fn lookup_uncached(&self, candidate: &str) -> FzResult<CachedEntry> {
		if let Some(id) = AppId::parse(candidate) {
			match self.meta.read_app(&id).await {
				Ok(app) => return Ok(CachedEntry::App(app)),
				Err(Error::NotFound) => {}
				Err(err) => return Err(err),
			}
		}

		match self.meta.read_app_by_label(candidate).await {
			Ok(app) => return Ok(CachedEntry::App(app)),
			Err(Error::NotFound) => {}
			Err(err) => return Err(err),
		}

		match self.meta.read_alias(candidate).await {
			Ok(alias) => Ok(CachedEntry::Alias(alias)),
			Err(Error::NotFound) => Ok(CachedEntry::Miss),
			Err(err) => Err(err),
		}
	}

	async fn not_found_app(&self) -> FzResult<RouteTarget> {
		let app = self.meta.read_app_by_label(SYSTEM_LABEL_NOT_FOUND).await?;
		Ok(RouteTarget::App(app))
	}

	async fn resolve_alias_target(&self, target: &str) -> FzResult<RouteTarget> {
		if let Some(id) = AppId::parse(target) {
			match self.meta.read_app(&id).await {
				Ok(app) => return Ok(RouteTarget::App(app)),
				Err(Error::NotFound) => return self.not_found_app().await,
				Err(err) => return Err(err),
			}
		}
		match self.meta.read_app_by_label(target).await {
			Ok(app) => Ok(RouteTarget::App(app)),
			Err(Error::NotFound) => self.not_found_app().await,
			Err(err) => Err(err),
		}
	}

	/// Resolve a `Host` header to a route target. `client_key` feeds the
	/// stable split bucketing (IP + user agent).
	pub async fn resolve(&self, host: &str, client_key: &str) -> FzResult<RouteTarget> {
		let candidate = candidate_from_host(host, &self.base_domain);

		match self.lookup_candidate(&candidate).await? {
			CachedEntry::App(app) => Ok(RouteTarget::App(app)),
			CachedEntry::Alias(alias) => match alias.kind {
				AliasKind::Proxy => match &alias.target {
					Some(target) => self.resolve_alias_target(target).await,
					None => self.not_found_app().await,
				},
				AliasKind::Redirect => match &alias.target {
					Some(location) => Ok(RouteTarget::Redirect {
						location: location.clone(),
						permanent: alias.permanent,
					}),
					None => self.not_found_app().await,
				},
				AliasKind::Split => {
					let keyed = format!("{}|{}", candidate, client_key);
					match pick_split_target(&alias.split_targets, &keyed) {
						Some(target) => {
							let target = target.to_string();
							self.resolve_alias_target(&target).await
						}
						None => self.not_found_app().await,
					}
				}
				AliasKind::Reserved => self.not_found_app().await,
			},
			CachedEntry::Miss => self.not_found_app().await,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::meta_adapter::SplitTarget;

	#[test]
	fn candidate_extraction() {
		assert_eq!(&*candidate_from_host("blog.example.com", "example.com"), "blog");
		assert_eq!(&*candidate_from_host("blog.example.com:8080", "example.com"), "blog");
		assert_eq!(&*candidate_from_host("example.com", "example.com"), "root");
		assert_eq!(&*candidate_from_host("example.com:443", "example.com"), "root");
		assert_eq!(&*candidate_from_host("BLOG.Example.COM", "example.com"), "blog");
		assert_eq!(
			&*candidate_from_host("app_a1b2c3d4.example.com", "example.com"),
			"app_a1b2c3d4"
		);
		assert_eq!(&*candidate_from_host("a.b.example.com", "example.com"), "a");
	}

	#[test]
	fn reserved_labels() {
		assert!(is_reserved_label("admin"));
		assert!(is_reserved_label("root"));
		assert!(is_reserved_label("404"));
		assert!(!is_reserved_label("blog"));
	}

	#[test]
	fn split_target_stability() {
		let targets = vec![
			SplitTarget { target: "app_aaaaaaaa".into(), weight: 50 },
			SplitTarget { target: "app_bbbbbbbb".into(), weight: 50 },
		];
		let first = pick_split_target(&targets, "10.0.0.1|agent").unwrap().to_string();
		for _ in 0..16 {
			assert_eq!(pick_split_target(&targets, "10.0.0.1|agent").unwrap(), first);
		}
	}

	#[test]
	fn split_target_respects_weights() {
		let targets = vec![
			SplitTarget { target: "a".into(), weight: 1 },
			SplitTarget { target: "b".into(), weight: 0 },
		];
		for i in 0..32 {
			let key = format!("client-{}", i);
			assert_eq!(pick_split_target(&targets, &key), Some("a"));
		}
		let empty = vec![SplitTarget { target: "a".into(), weight: 0 }];
		assert_eq!(pick_split_target(&empty, "x"), None);
	}
}

// vim: ts=4
