//! Still-image handling via the `image` crate.

use image::{codecs::jpeg::JpegEncoder, DynamicImage, GenericImageView};

use tmm_core::{errors::Error, Result};

/// Decode any supported still format and re-encode it as a baseline JPEG.
pub fn reencode_jpeg(raw: &[u8], quality: u8) -> Result<Vec<u8>> {
    let img = decode(raw)?;
    encode_jpeg(&img, quality)
}

/// Aspect-preserving JPEG preview that fits in a `size` x `size` box.
/// Images already inside the box keep their dimensions.
pub fn thumbnail_jpeg(raw: &[u8], size: u32, quality: u8) -> Result<Vec<u8>> {
    let img = decode(raw)?;
    let (width, height) = img.dimensions();
    if width <= size && height <= size {
        return encode_jpeg(&img, quality);
    }
    let thumb = img.thumbnail(size, size);
    encode_jpeg(&thumb, quality)
}

fn decode(raw: &[u8]) -> Result<DynamicImage> {
    if raw.is_empty() {
        return Err(Error::Conversion("empty image payload".to_string()));
    }
    image::load_from_memory(raw).map_err(|e| Error::Conversion(format!("cannot decode image: {e}")))
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder
        .encode_image(&rgb)
        .map_err(|e| Error::Conversion(format!("jpeg encode failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GenericImageView, ImageOutputFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 200])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn png_with_alpha_becomes_jpeg() {
        let jpeg = reencode_jpeg(&png_bytes(40, 30), 75).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (40, 30));
    }

    #[test]
    fn thumbnail_fits_box_and_keeps_aspect() {
        let thumb = thumbnail_jpeg(&png_bytes(600, 300), 150, 65).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.dimensions(), (150, 75));
    }

    #[test]
    fn small_images_are_not_enlarged() {
        let thumb = thumbnail_jpeg(&png_bytes(40, 100), 150, 65).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.dimensions(), (40, 100));
    }

    #[test]
    fn garbage_is_a_conversion_error() {
        let err = reencode_jpeg(b"definitely not an image", 75).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
        assert!(matches!(
            thumbnail_jpeg(&[], 150, 65).unwrap_err(),
            Error::Conversion(_)
        ));
    }
}
