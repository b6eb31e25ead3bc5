//! Decoding captured CAPTCHA images.

use image::{DynamicImage, GenericImageView};

use crate::types::{CaptchaError, CaptchaResult};

/// Decode raw image bytes, sniffing the container format.
///
/// Anything the decoder rejects, including an empty buffer, surfaces as
/// [`CaptchaError::Decode`].
pub fn decode_bytes(bytes: &[u8]) -> CaptchaResult<DynamicImage> {
    if bytes.is_empty() {
        return Err(CaptchaError::Decode("empty image buffer".to_string()));
    }
    let img = image::load_from_memory(bytes)?;
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(CaptchaError::Decode(format!("degenerate image {w}x{h}")));
    }
    Ok(img)
}
