//! Input images for API tests

use base64::Engine;
use std::io::Cursor;

/// A small, valid PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_fn(8, 8, |x, y| image::Rgb([(x * 30) as u8, (y * 30) as u8, 128]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encode fixture png");
    out.into_inner()
}

pub fn png_base64() -> String {
    base64::engine::general_purpose::STANDARD.encode(png_bytes())
}

/// Valid base64 that does not decode as any image.
pub fn garbage_base64() -> String {
    base64::engine::general_purpose::STANDARD.encode(b"definitely not an image")
}
