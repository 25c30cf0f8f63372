//! Extension -> MIME fallback table.
//!
//! Files carry their MIME from deploy time; this table covers rows stored
//! without one and MIME detection for fresh deploys.

pub const DEFAULT_MIME: &str = "application/octet-stream";

pub fn from_extension(ext: &str) -> Option<&'static str> {
	Some(match ext.to_ascii_lowercase().as_str() {
		"html" | "htm" => "text/html; charset=utf-8",
		"css" => "text/css; charset=utf-8",
		"js" | "mjs" => "application/javascript; charset=utf-8",
		"json" => "application/json",
		"txt" => "text/plain; charset=utf-8",
		"md" => "text/markdown; charset=utf-8",
		"xml" => "application/xml",
		"csv" => "text/csv",
		"svg" => "image/svg+xml",
		"png" => "image/png",
		"jpg" | "jpeg" => "image/jpeg",
		"gif" => "image/gif",
		"webp" => "image/webp",
		"avif" => "image/avif",
		"ico" => "image/x-icon",
		"woff" => "font/woff",
		"woff2" => "font/woff2",
		"ttf" => "font/ttf",
		"otf" => "font/otf",
		"mp3" => "audio/mpeg",
		"ogg" => "audio/ogg",
		"wav" => "audio/wav",
		"mp4" => "video/mp4",
		"webm" => "video/webm",
		"pdf" => "application/pdf",
		"wasm" => "application/wasm",
		"zip" => "application/zip",
		"map" => "application/json",
		_ => return None,
	})
}

/// MIME for a path, used at deploy time and as a read fallback.
pub fn for_path(path: &str) -> &'static str {
	path.rsplit('/')
		.next()
		.and_then(|name| name.rsplit_once('.'))
		.and_then(|(_, ext)| from_extension(ext))
		.unwrap_or(DEFAULT_MIME)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn common_extensions() {
		assert_eq!(for_path("index.html"), "text/html; charset=utf-8");
		assert_eq!(for_path("assets/app.js"), "application/javascript; charset=utf-8");
		assert_eq!(for_path("img/logo.png"), "image/png");
		assert_eq!(for_path("download"), DEFAULT_MIME);
		assert_eq!(for_path("archive.unknownext"), DEFAULT_MIME);
	}
}

// vim: ts=4
