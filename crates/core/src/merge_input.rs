//! Face-merge input validation.
//!
//! Runs before any vendor call so that oversized or unsupported images fail
//! fast instead of costing a round trip.

use image::ImageFormat;

use crate::error::CoreError;

/// Default upper bound on a single merge input (10 MiB).
pub const DEFAULT_MAX_MERGE_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Encodings the vendor merge endpoint accepts.
const SUPPORTED_FORMATS: &[ImageFormat] = &[ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::WebP];

/// Validate one merge input and return its detected encoding.
///
/// `label` names the input in error messages (e.g. `"face"`, `"base"`).
pub fn validate_merge_image(
    label: &str,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<ImageFormat, CoreError> {
    if bytes.is_empty() {
        return Err(CoreError::Validation(format!("{label} image is empty")));
    }
    if bytes.len() > max_bytes {
        return Err(CoreError::Validation(format!(
            "{label} image is {} bytes, limit is {max_bytes}",
            bytes.len()
        )));
    }

    let format = image::guess_format(bytes).map_err(|_| {
        CoreError::Validation(format!("{label} image encoding is not recognised"))
    })?;

    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(CoreError::Validation(format!(
            "{label} image format {format:?} is not supported"
        )));
    }

    Ok(format)
}

/// Detect a supported encoding from magic bytes without size checks.
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes)
        .ok()
        .filter(|format| SUPPORTED_FORMATS.contains(format))
}

/// MIME type for a supported merge format.
pub fn content_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::WebP => "image/webp",
        _ => "application/octet-stream",
    }
}
