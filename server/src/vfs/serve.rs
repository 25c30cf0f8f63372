//! Static serving of app files from store rows: content type, conditional
//! requests, byte ranges, SPA fallback and private-path gating.

use axum::{
	body::Body,
	http::{header, HeaderMap, HeaderValue, StatusCode},
	response::Response,
};
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::core::app::App;
use crate::meta_adapter::{ActivityEntry, Actor, AppRecord};
use crate::prelude::*;
use crate::vfs::cache::CachedFile;
use crate::vfs::mime;

/// Normalize a request path into a stored-file key. Rejects traversal.
pub fn normalize_path(raw: &str) -> FzResult<String> {
	if raw.contains('\0') || raw.contains('\\') {
		return Err(Error::NotFound);
	}
	let mut segments = Vec::new();
	for segment in raw.split('/') {
		match segment {
			"" | "." => {}
			".." => return Err(Error::NotFound),
			other => segments.push(other),
		}
	}
	if segments.is_empty() {
		return Ok("index.html".to_string());
	}
	Ok(segments.join("/"))
}

/// File-extension heuristic from the SPA fallback rule: a dot followed by
/// 2-5 alphanumeric characters in the last segment means "asset".
pub fn has_file_extension(path: &str) -> bool {
	let Some(last_segment) = path.rsplit('/').next() else { return false };
	let Some(dot_pos) = last_segment.rfind('.') else { return false };
	let extension = &last_segment[dot_pos + 1..];
	(2..=5).contains(&extension.len()) && extension.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Does this request accept an HTML document (client-side routing
/// navigation)? Absent `Accept` defaults to `*/*`.
pub fn accepts_html(headers: &HeaderMap) -> bool {
	match headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) {
		None => true,
		Some(accept) => accept.contains("text/html") || accept.contains("*/*"),
	}
}

fn compute_etag(bytes: &[u8]) -> Box<str> {
	let digest = Sha256::digest(bytes);
	let mut etag = String::with_capacity(34);
	etag.push('"');
	for byte in &digest[..16] {
		etag.push_str(&format!("{:02x}", byte));
	}
	etag.push('"');
	etag.into()
}

/// Parse a single `bytes=` range. Multi-range and malformed headers are
/// ignored (full response); an unsatisfiable range yields `Err(())` for a
/// 416.
fn parse_range(header: &str, len: u64) -> Result<Option<(u64, u64)>, ()> {
	let Some(spec) = header.strip_prefix("bytes=") else { return Ok(None) };
	if spec.contains(',') {
		return Ok(None);
	}
	let Some((start, end)) = spec.split_once('-') else { return Ok(None) };
	let range = match (start.is_empty(), end.is_empty()) {
		(false, false) => {
			let start: u64 = start.parse().map_err(|_| ())?;
			let end: u64 = end.parse().map_err(|_| ())?;
			if start > end {
				return Err(());
			}
			(start, end.min(len.saturating_sub(1)))
		}
		(false, true) => {
			let start: u64 = start.parse().map_err(|_| ())?;
			(start, len.saturating_sub(1))
		}
		(true, false) => {
			let suffix: u64 = end.parse().map_err(|_| ())?;
			if suffix == 0 {
				return Err(());
			}
			(len.saturating_sub(suffix), len.saturating_sub(1))
		}
		(true, true) => return Ok(None),
	};
	if range.0 >= len {
		return Err(());
	}
	Ok(Some(range))
}

async fn load_file(app: &App, tenant: &AppId, path: &str) -> FzResult<CachedFile> {
	if let Some(cached) = app.vfs_cache.get(tenant, path) {
		return Ok(cached);
	}
	let record = app.meta_adapter.read_file(tenant, path).await?;
	let mime = if record.mime.is_empty() {
		Box::from(mime::for_path(path))
	} else {
		record.mime
	};
	let cached = CachedFile {
		etag: compute_etag(&record.bytes),
		mime,
		bytes: record.bytes,
		modified_at: record.modified_at,
	};
	app.vfs_cache.put(tenant, path, cached.clone());
	Ok(cached)
}

fn cache_control_for(mime: &str) -> HeaderValue {
	if mime.starts_with("text/html") {
		HeaderValue::from_static("no-cache, must-revalidate")
	} else {
		HeaderValue::from_static("public, max-age=3600")
	}
}

fn build_response(file: &CachedFile, headers: &HeaderMap) -> FzResult<Response> {
	// Conditional request
	if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok())
	{
		if if_none_match
			.split(',')
			.any(|candidate| candidate.trim() == &*file.etag || candidate.trim() == "*")
		{
			return Ok(Response::builder()
				.status(StatusCode::NOT_MODIFIED)
				.header(header::ETAG, &*file.etag)
				.body(Body::empty())?);
		}
	}

	let len = file.bytes.len() as u64;
	if let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
		match parse_range(range_header, len) {
			Ok(Some((start, end))) => {
				let slice: Bytes = file.bytes.slice(start as usize..=(end as usize));
				return Ok(Response::builder()
					.status(StatusCode::PARTIAL_CONTENT)
					.header(header::CONTENT_TYPE, &*file.mime)
					.header(header::ETAG, &*file.etag)
					.header(header::ACCEPT_RANGES, "bytes")
					.header(
						header::CONTENT_RANGE,
						format!("bytes {}-{}/{}", start, end, len),
					)
					.header(header::CACHE_CONTROL, cache_control_for(&file.mime))
					.body(Body::from(slice))?);
			}
			Ok(None) => {}
			Err(()) => {
				return Ok(Response::builder()
					.status(StatusCode::RANGE_NOT_SATISFIABLE)
					.header(header::CONTENT_RANGE, format!("bytes */{}", len))
					.body(Body::empty())?);
			}
		}
	}

	Ok(Response::builder()
		.status(StatusCode::OK)
		.header(header::CONTENT_TYPE, &*file.mime)
		.header(header::ETAG, &*file.etag)
		.header(header::ACCEPT_RANGES, "bytes")
		.header(header::CACHE_CONTROL, cache_control_for(&file.mime))
		.body(Body::from(file.bytes.clone()))?)
}

/// Serve `raw_path` out of `tenant`'s files. `private_ok` is true when the
/// request is an owner session or carries the app-scoped token; denied
/// private paths 404 like any miss, so their existence never leaks.
pub async fn serve_path(
	app: &App,
	tenant: &AppRecord,
	raw_path: &str,
	headers: &HeaderMap,
	private_ok: bool,
) -> FzResult<Response> {
	let path = normalize_path(raw_path)?;

	if (path.starts_with("private/") || path == "private") && !private_ok {
		app.activity.record(ActivityEntry {
			weight: 3,
			actor: Actor::Anonymous,
			actor_id: None,
			resource: format!("app:{}", tenant.id).into(),
			action: "vfs.private_denied".into(),
			result: "denied".into(),
			details: Some(serde_json::json!({ "path": path })),
			created_at: Timestamp::now(),
		});
		return Err(Error::NotFound);
	}

	match load_file(app, &tenant.id, &path).await {
		Ok(file) => build_response(&file, headers),
		Err(Error::NotFound) => {
			// SPA fallback: deep links render the app shell; assets 404.
			if tenant.manifest.spa
				&& accepts_html(headers)
				&& !has_file_extension(&path)
				&& path != "index.html"
			{
				let index = load_file(app, &tenant.id, "index.html").await?;
				return build_response(&index, headers);
			}
			Err(Error::NotFound)
		}
		Err(err) => Err(err),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn path_normalization() {
		assert_eq!(normalize_path("/").unwrap(), "index.html");
		assert_eq!(normalize_path("").unwrap(), "index.html");
		assert_eq!(normalize_path("/a/b.txt").unwrap(), "a/b.txt");
		assert_eq!(normalize_path("a//b").unwrap(), "a/b");
		assert_eq!(normalize_path("./a").unwrap(), "a");
		assert!(normalize_path("/../etc/passwd").is_err());
		assert!(normalize_path("a/../../b").is_err());
	}

	#[test]
	fn extension_heuristic() {
		assert!(has_file_extension("app.js"));
		assert!(has_file_extension("deep/link/logo.png"));
		assert!(!has_file_extension("deep/link"));
		assert!(!has_file_extension("file.toolongext"));
		assert!(!has_file_extension("v1.2")); // single-char "ext"? no: "2" is 1 char
		assert!(has_file_extension("readme.md"));
	}

	#[test]
	fn accept_header_gate() {
		let mut headers = HeaderMap::new();
		assert!(accepts_html(&headers));
		headers.insert(header::ACCEPT, HeaderValue::from_static("text/html,*/*;q=0.8"));
		assert!(accepts_html(&headers));
		headers.insert(header::ACCEPT, HeaderValue::from_static("image/avif,image/webp"));
		assert!(!accepts_html(&headers));
	}

	#[test]
	fn range_parsing() {
		assert_eq!(parse_range("bytes=0-4", 10), Ok(Some((0, 4))));
		assert_eq!(parse_range("bytes=5-", 10), Ok(Some((5, 9))));
		assert_eq!(parse_range("bytes=-3", 10), Ok(Some((7, 9))));
		assert_eq!(parse_range("bytes=0-100", 10), Ok(Some((0, 9))));
		assert_eq!(parse_range("bytes=0-1,3-4", 10), Ok(None)); // multi-range ignored
		assert_eq!(parse_range("items=0-1", 10), Ok(None));
		assert_eq!(parse_range("bytes=20-", 10), Err(()));
		assert_eq!(parse_range("bytes=4-2", 10), Err(()));
	}

	#[test]
	fn etag_is_stable_and_quoted() {
		let a = compute_etag(b"hello");
		let b = compute_etag(b"hello");
		let c = compute_etag(b"world");
		assert_eq!(a, b);
		assert_ne!(a, c);
		assert!(a.starts_with('"') && a.ends_with('"'));
		assert_eq!(a.len(), 34);
	}
}

// vim: ts=4
