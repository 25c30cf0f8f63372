//! Shared VFS read cache: LRU keyed `(app_id, path)`, capped by total
//! bytes (budget from the limits probe), invalidated on file writes.

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct CachedFile {
	pub etag: Box<str>,
	pub mime: Box<str>,
	pub bytes: Bytes,
	pub modified_at: Timestamp,
}

struct Inner {
	map: LruCache<(AppId, Box<str>), CachedFile>,
	total_bytes: usize,
}

pub struct VfsCache {
	inner: Mutex<Inner>,
	cap_bytes: usize,
}

impl std::fmt::Debug for VfsCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("VfsCache").field("cap_bytes", &self.cap_bytes).finish()
	}
}

impl VfsCache {
	pub fn new(cap_bytes: usize) -> VfsCache {
		VfsCache {
			inner: Mutex::new(Inner { map: LruCache::unbounded(), total_bytes: 0 }),
			cap_bytes,
		}
	}

	pub fn get(&self, app: &AppId, path: &str) -> Option<CachedFile> {
		let mut inner = self.inner.lock();
		inner.map.get(&(app.clone(), Box::from(path))).cloned()
	}

	pub fn put(&self, app: &AppId, path: &str, file: CachedFile) {
		// Oversized entries would just thrash the cache
		if file.bytes.len() > self.cap_bytes / 4 {
			return;
		}
		let mut inner = self.inner.lock();
		let key = (app.clone(), Box::from(path));
		if let Some(old) = inner.map.put(key, file.clone()) {
			inner.total_bytes = inner.total_bytes.saturating_sub(old.bytes.len());
		}
		inner.total_bytes += file.bytes.len();
		while inner.total_bytes > self.cap_bytes {
			match inner.map.pop_lru() {
				Some((_, evicted)) => {
					inner.total_bytes = inner.total_bytes.saturating_sub(evicted.bytes.len());
				}
				None => break,
			}
		}
	}

	pub fn invalidate(&self, app: &AppId, path: &str) {
		let mut inner = self.inner.lock();
		if let Some(old) = inner.map.pop(&(app.clone(), Box::from(path))) {
			inner.total_bytes = inner.total_bytes.saturating_sub(old.bytes.len());
		}
	}

	/// Drop every entry of one app (deploy, delete cascade).
	pub fn invalidate_app(&self, app: &AppId) {
		let mut inner = self.inner.lock();
		let keys: Vec<_> = inner
			.map
			.iter()
			.filter(|((cached_app, _), _)| cached_app == app)
			.map(|(key, _)| key.clone())
			.collect();
		for key in keys {
			if let Some(old) = inner.map.pop(&key) {
				inner.total_bytes = inner.total_bytes.saturating_sub(old.bytes.len());
			}
		}
	}

	pub fn clear(&self) {
		let mut inner = self.inner.lock();
		inner.map.clear();
		inner.total_bytes = 0;
	}

	pub fn stats(&self) -> (usize, usize) {
		let inner = self.inner.lock();
		(inner.map.len(), inner.total_bytes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn file(len: usize) -> CachedFile {
		CachedFile {
			etag: "\"abc\"".into(),
			mime: "text/plain".into(),
			bytes: Bytes::from(vec![0u8; len]),
			modified_at: Timestamp(0),
		}
	}

	fn app(n: u8) -> AppId {
		AppId(format!("app_0000000{}", n).into())
	}

	#[test]
	fn byte_cap_evicts_lru() {
		let cache = VfsCache::new(1000);
		cache.put(&app(1), "a", file(200));
		cache.put(&app(1), "b", file(200));
		cache.put(&app(1), "c", file(200));
		// Touch "a" so "b" is the LRU victim
		assert!(cache.get(&app(1), "a").is_some());
		cache.put(&app(1), "d", file(500));

		assert!(cache.get(&app(1), "b").is_none());
		let (count, bytes) = cache.stats();
		assert!(bytes <= 1000, "cache over budget: {} ({} entries)", bytes, count);
	}

	#[test]
	fn oversized_entries_skip_cache() {
		let cache = VfsCache::new(1000);
		cache.put(&app(1), "big", file(600));
		assert!(cache.get(&app(1), "big").is_none());
	}

	#[test]
	fn invalidate_app_scoped() {
		let cache = VfsCache::new(10_000);
		cache.put(&app(1), "x", file(10));
		cache.put(&app(2), "x", file(10));
		cache.invalidate_app(&app(1));
		assert!(cache.get(&app(1), "x").is_none());
		assert!(cache.get(&app(2), "x").is_some());
	}
}

// vim: ts=4
