//! Outbound HTTP for handlers, gated by the per-app allowlist.
//!
//! Every rule carries its own https-only flag, token-bucket rate, burst,
//! response cap, timeout and optional response-cache TTL. Requests to
//! domains without a rule fail with a structured capability error the
//! handler can observe.

use bytes::Bytes;
use governor::{Quota, RateLimiter};
use http_body_util::{BodyExt, Full, Limited};
use hyper::Method;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use url::Url;

use crate::meta_adapter::{MetaAdapter, NetRule};
use crate::prelude::*;

type DirectLimiter =
	RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

const RESPONSE_CACHE_ENTRIES: usize = 512;

#[derive(Debug, Clone)]
pub struct FetchRequest {
	pub url: String,
	pub method: String,
	pub headers: Vec<(String, String)>,
	pub body: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: Bytes,
}

struct CachedResponse {
	response: FetchResponse,
	expires_at: Instant,
}

pub struct NetFetch {
	client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
	meta: Arc<dyn MetaAdapter>,
	buckets: Mutex<HashMap<(AppId, Box<str>), Arc<DirectLimiter>>>,
	cache: Mutex<LruCache<(AppId, Box<str>), CachedResponse>>,
	/// Bounded outbound concurrency (probe-derived)
	permits: Arc<tokio::sync::Semaphore>,
}

impl std::fmt::Debug for NetFetch {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NetFetch").finish()
	}
}

impl NetFetch {
	pub fn new(meta: Arc<dyn MetaAdapter>, concurrency: usize) -> FzResult<Arc<NetFetch>> {
		let connector = HttpsConnectorBuilder::new()
			.with_native_roots()
			.map_err(|_| Error::ConfigError("no native root CA certificates found".into()))?
			.https_or_http()
			.enable_http1()
			.build();
		let client = Client::builder(TokioExecutor::new()).build(connector);
		let entries = NonZeroUsize::new(RESPONSE_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN);
		Ok(Arc::new(NetFetch {
			client,
			meta,
			buckets: Mutex::new(HashMap::new()),
			cache: Mutex::new(LruCache::new(entries)),
			permits: Arc::new(tokio::sync::Semaphore::new(concurrency.max(1))),
		}))
	}

	fn bucket(&self, app: &AppId, domain: &str, rule: &NetRule) -> Arc<DirectLimiter> {
		let key = (app.clone(), Box::from(domain));
		let mut buckets = self.buckets.lock();
		buckets
			.entry(key)
			.or_insert_with(|| {
				let rate = NonZeroU32::new(rule.rate_per_min.max(1)).unwrap_or(NonZeroU32::MIN);
				let burst = NonZeroU32::new(rule.burst.max(1)).unwrap_or(NonZeroU32::MIN);
				Arc::new(RateLimiter::direct(Quota::per_minute(rate).allow_burst(burst)))
			})
			.clone()
	}

	async fn find_rule(&self, app: &AppId, host: &str) -> FzResult<NetRule> {
		let rules = self.meta.list_net_rules(app).await?;
		rules
			.into_iter()
			.find(|rule| &*rule.domain == host)
			.ok_or_else(|| Error::CapabilityDenied(format!("domain not in allowlist: {}", host)))
	}

	/// Execute a handler fetch. `deadline` is what remains of the handler's
	/// wall-clock budget; the tighter of it and the rule timeout wins.
	pub async fn fetch(
		&self,
		app: &AppId,
		request: FetchRequest,
		deadline: Option<Duration>,
	) -> FzResult<FetchResponse> {
		let url = Url::parse(&request.url)?;
		let host = url
			.host_str()
			.ok_or_else(|| Error::Validation("fetch URL has no host".into()))?
			.to_ascii_lowercase();

		let rule = self.find_rule(app, &host).await?;
		if rule.https_only && url.scheme() != "https" {
			return Err(Error::CapabilityDenied(format!("{} requires https", host)));
		}

		let method = Method::from_bytes(request.method.as_bytes())
			.map_err(|_| Error::Validation(format!("invalid method: {}", request.method)))?;

		// Response cache (GET only)
		let cache_key = (app.clone(), Box::from(request.url.as_str()));
		if method == Method::GET && rule.cache_ttl_secs > 0 {
			let mut cache = self.cache.lock();
			if let Some(cached) = cache.get(&cache_key) {
				if cached.expires_at > Instant::now() {
					return Ok(cached.response.clone());
				}
				cache.pop(&cache_key);
			}
		}

		// Token bucket per app+domain
		if self.bucket(app, &host, &rule).check().is_err() {
			return Err(Error::CapabilityDenied(format!("rate limit exceeded for {}", host)));
		}

		let _permit = self
			.permits
			.clone()
			.acquire_owned()
			.await
			.map_err(|_| Error::ServiceUnavailable("fetch pool closed".into()))?;

		let mut builder = hyper::Request::builder().method(method.clone()).uri(request.url.clone());
		for (name, value) in &request.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		let req = builder.body(Full::new(request.body.unwrap_or_default()))?;

		let rule_timeout = Duration::from_millis(rule.timeout_ms.max(1));
		let effective = match deadline {
			Some(deadline) => rule_timeout.min(deadline),
			None => rule_timeout,
		};

		let response = timeout(effective, self.client.request(req))
			.await
			.map_err(|_| Error::Timeout)??;

		let status = response.status().as_u16();
		let headers: Vec<(String, String)> = response
			.headers()
			.iter()
			.filter_map(|(name, value)| {
				value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
			})
			.collect();

		let limited = Limited::new(response.into_body(), rule.max_response_bytes as usize);
		let body = timeout(effective, limited.collect())
			.await
			.map_err(|_| Error::Timeout)?
			.map_err(|_| {
				Error::CapabilityDenied(format!(
					"response over {} bytes from {}",
					rule.max_response_bytes, host
				))
			})?
			.to_bytes();

		let result = FetchResponse { status, headers, body };
		if method == Method::GET && rule.cache_ttl_secs > 0 && status < 400 {
			self.cache.lock().put(
				cache_key,
				CachedResponse {
					response: result.clone(),
					expires_at: Instant::now() + Duration::from_secs(rule.cache_ttl_secs),
				},
			);
		}
		Ok(result)
	}

	/// Drop cached responses and buckets for one app (delete cascade).
	pub fn forget_app(&self, app: &AppId) {
		self.buckets.lock().retain(|(bucket_app, _), _| bucket_app != app);
		let mut cache = self.cache.lock();
		let keys: Vec<_> = cache
			.iter()
			.filter(|((cached_app, _), _)| cached_app == app)
			.map(|(key, _)| key.clone())
			.collect();
		for key in keys {
			cache.pop(&key);
		}
	}
}

// vim: ts=4
