//! Best-effort thumbnail generation for image assets.

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Probed dimensions plus the thumbnail outcome for one image.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub thumbnail_written: bool,
}

/// Decode the image at `source`, record its dimensions, and write a
/// bounded-dimension JPEG thumbnail to `dest`.
///
/// Callers treat failure as best-effort: the asset is still created, the
/// thumbnail fields just stay empty.
pub fn generate(source: &Path, dest: &Path, max_dimension: u32) -> Result<ImageInfo> {
    let img = image::open(source)?;
    let width = img.width();
    let height = img.height();

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // thumbnail() preserves aspect ratio and is fast for large inputs.
    let thumb = img.thumbnail(max_dimension, max_dimension);
    let file = File::create(dest)?;
    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, 85);
    thumb.write_with_encoder(encoder)?;

    Ok(ImageInfo {
        width,
        height,
        thumbnail_written: true,
    })
}

pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_thumbnail_and_dimensions() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src.png");
        let dest = tmp.path().join("thumbs").join("out.jpg");

        let img = image::RgbaImage::from_pixel(300, 200, image::Rgba([10, 20, 30, 255]));
        img.save(&source).unwrap();

        let info = generate(&source, &dest, 64).unwrap();
        assert_eq!(info.width, 300);
        assert_eq!(info.height, 200);
        assert!(dest.exists());

        let thumb = image::open(&dest).unwrap();
        assert!(thumb.width() <= 64 && thumb.height() <= 64);
    }

    #[test]
    fn non_image_input_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("not-an-image.png");
        std::fs::write(&source, b"plain text").unwrap();
        assert!(generate(&source, &tmp.path().join("t.jpg"), 64).is_err());
    }

    #[test]
    fn mime_detection() {
        assert!(is_image_mime("image/png"));
        assert!(!is_image_mime("text/plain"));
    }
}
