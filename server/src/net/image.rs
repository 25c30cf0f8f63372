//! Image operations for the capability surface: pure, CPU-bound, offloaded
//! to the worker pool.
//!
//! Decodes JPEG/PNG/GIF/WebP (format guessed from the bytes), encodes
//! JPEG/PNG. Fit semantics:
//! - `contain`: fit inside the box, preserve aspect, never upscale
//! - `cover`: scale the shortest side to fill, center-crop
//! - `fill`: stretch to the exact dimensions

use image::ImageReader;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;

use crate::core::worker::WorkerPool;
use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fit {
	#[serde(rename = "contain")]
	Contain,
	#[serde(rename = "cover")]
	Cover,
	#[serde(rename = "fill")]
	Fill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
	#[serde(rename = "jpeg")]
	Jpeg,
	#[serde(rename = "png")]
	Png,
}

impl ImageFormat {
	pub fn mime(&self) -> &'static str {
		match self {
			ImageFormat::Jpeg => "image/jpeg",
			ImageFormat::Png => "image/png",
		}
	}
}

impl std::str::FromStr for ImageFormat {
	type Err = Error;
	fn from_str(s: &str) -> Result<Self, Error> {
		Ok(match s {
			"jpeg" | "jpg" => ImageFormat::Jpeg,
			"png" => ImageFormat::Png,
			_ => return Err(Error::Validation(format!("unsupported image format: {}", s))),
		})
	}
}

#[derive(Debug, Clone, Copy)]
pub struct ResizeOpts {
	pub width: Option<u32>,
	pub height: Option<u32>,
	pub fit: Fit,
	pub format: Option<ImageFormat>,
	/// JPEG quality, 1-100
	pub quality: u8,
}

impl Default for ResizeOpts {
	fn default() -> Self {
		Self { width: None, height: None, fit: Fit::Contain, format: None, quality: 85 }
	}
}

pub struct ResizeResult {
	pub bytes: Box<[u8]>,
	pub width: u32,
	pub height: u32,
	pub mime: &'static str,
}

/// Contain-fit target: scale to fit inside `(tw, th)` preserving aspect,
/// never upscaling.
pub fn contain_dimensions(src: (u32, u32), target: (u32, u32)) -> (u32, u32) {
	let (sw, sh) = src;
	let (tw, th) = target;
	if sw == 0 || sh == 0 {
		return (0, 0);
	}
	if sw <= tw && sh <= th {
		return (sw, sh);
	}
	let scale_w = f64::from(tw) / f64::from(sw);
	let scale_h = f64::from(th) / f64::from(sh);
	let scale = scale_w.min(scale_h);
	let width = (f64::from(sw) * scale).round().max(1.0) as u32;
	let height = (f64::from(sh) * scale).round().max(1.0) as u32;
	(width.min(tw), height.min(th))
}

fn resize_sync(buf: Vec<u8>, opts: ResizeOpts) -> FzResult<ResizeResult> {
	let original = ImageReader::new(Cursor::new(&buf)).with_guessed_format()?.decode()?;
	let src = (original.width(), original.height());

	let target_w = opts.width.unwrap_or(u32::MAX);
	let target_h = opts.height.unwrap_or(u32::MAX);
	if target_w == 0 || target_h == 0 {
		return Err(Error::Validation("resize dimensions must be positive".into()));
	}

	let resized = match opts.fit {
		Fit::Contain => {
			let (w, h) = contain_dimensions(src, (target_w, target_h));
			if (w, h) == src {
				original
			} else {
				original.resize(w, h, image::imageops::FilterType::Lanczos3)
			}
		}
		Fit::Cover => {
			if opts.width.is_none() || opts.height.is_none() {
				return Err(Error::Validation("cover requires width and height".into()));
			}
			original.resize_to_fill(target_w, target_h, image::imageops::FilterType::Lanczos3)
		}
		Fit::Fill => {
			if opts.width.is_none() || opts.height.is_none() {
				return Err(Error::Validation("fill requires width and height".into()));
			}
			original.resize_exact(target_w, target_h, image::imageops::FilterType::Lanczos3)
		}
	};

	let width = resized.width();
	let height = resized.height();
	let format = opts.format.unwrap_or(ImageFormat::Jpeg);
	let mut output = Cursor::new(Vec::new());
	match format {
		ImageFormat::Jpeg => {
			let quality = opts.quality.clamp(1, 100);
			let encoder =
				image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality);
			// JPEG has no alpha channel
			resized.to_rgb8().write_with_encoder(encoder)?;
		}
		ImageFormat::Png => {
			let encoder = image::codecs::png::PngEncoder::new(&mut output);
			resized.write_with_encoder(encoder)?;
		}
	}

	Ok(ResizeResult { bytes: output.into_inner().into(), width, height, mime: format.mime() })
}

pub async fn resize(
	worker: &Arc<WorkerPool>,
	buf: Vec<u8>,
	opts: ResizeOpts,
) -> FzResult<ResizeResult> {
	worker.run(move || resize_sync(buf, opts)).await
}

/// Square thumbnail: contain within `size` x `size`, JPEG output.
pub async fn thumbnail(
	worker: &Arc<WorkerPool>,
	buf: Vec<u8>,
	size: u32,
) -> FzResult<ResizeResult> {
	resize(
		worker,
		buf,
		ResizeOpts {
			width: Some(size),
			height: Some(size),
			fit: Fit::Contain,
			format: Some(ImageFormat::Jpeg),
			quality: 80,
		},
	)
	.await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn contain_preserves_aspect_within_a_pixel() {
		let (w, h) = contain_dimensions((1000, 500), (300, 300));
		assert_eq!((w, h), (300, 150));
		let src_aspect = 1000.0 / 500.0;
		let out_aspect = f64::from(w) / f64::from(h);
		assert!((src_aspect - out_aspect).abs() < 0.02);
	}

	#[test]
	fn contain_never_upscales() {
		assert_eq!(contain_dimensions((100, 80), (300, 300)), (100, 80));
		assert_eq!(contain_dimensions((100, 80), (100, 80)), (100, 80));
	}

	#[test]
	fn contain_bounds_both_dimensions() {
		let (w, h) = contain_dimensions((4000, 3000), (640, 480));
		assert!(w <= 640 && h <= 480);
		assert_eq!((w, h), (640, 480));

		let (w, h) = contain_dimensions((3000, 4000), (640, 480));
		assert!(w <= 640 && h <= 480);
		assert_eq!(h, 480);
	}

	#[test]
	fn resize_roundtrip_on_generated_png() {
		// 64x32 solid PNG generated in-memory
		let img = image::RgbImage::from_pixel(64, 32, image::Rgb([10, 20, 30]));
		let mut png = Cursor::new(Vec::new());
		image::DynamicImage::ImageRgb8(img)
			.write_with_encoder(image::codecs::png::PngEncoder::new(&mut png))
			.unwrap();

		let result = resize_sync(
			png.into_inner(),
			ResizeOpts {
				width: Some(32),
				height: Some(32),
				fit: Fit::Contain,
				format: Some(ImageFormat::Png),
				quality: 85,
			},
		)
		.unwrap();
		assert_eq!(result.width, 32);
		assert_eq!(result.height, 16);
		assert_eq!(result.mime, "image/png");
		assert!(!result.bytes.is_empty());
	}

	#[test]
	fn fill_stretches_exactly() {
		let img = image::RgbImage::from_pixel(64, 32, image::Rgb([1, 2, 3]));
		let mut png = Cursor::new(Vec::new());
		image::DynamicImage::ImageRgb8(img)
			.write_with_encoder(image::codecs::png::PngEncoder::new(&mut png))
			.unwrap();

		let result = resize_sync(
			png.into_inner(),
			ResizeOpts {
				width: Some(20),
				height: Some(20),
				fit: Fit::Fill,
				format: Some(ImageFormat::Jpeg),
				quality: 85,
			},
		)
		.unwrap();
		assert_eq!((result.width, result.height), (20, 20));
		assert_eq!(result.mime, "image/jpeg");
	}

	#[test]
	fn cover_requires_both_dimensions() {
		let img = image::RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0]));
		let mut png = Cursor::new(Vec::new());
		image::DynamicImage::ImageRgb8(img)
			.write_with_encoder(image::codecs::png::PngEncoder::new(&mut png))
			.unwrap();

		let result = resize_sync(
			png.into_inner(),
			ResizeOpts { width: Some(4), height: None, fit: Fit::Cover, format: None, quality: 85 },
		);
		assert!(matches!(result, Err(Error::Validation(_))));
	}
}

// vim: ts=4
