use image::{AnimationDecoder, DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{OverlayError, Result};

/// One decoded raster frame. Frame order matches page numbers `1..=N`.
#[derive(Debug, Clone)]
pub struct PageImage {
    image: DynamicImage,
    source_name: String,
}

impl PageImage {
    pub fn new(image: DynamicImage, source_name: impl Into<String>) -> Self {
        Self {
            image,
            source_name: source_name.into(),
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Intrinsic pixel dimensions `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

pub fn load_page_images(path: &Path) -> Result<Vec<PageImage>> {
    let name = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|err| OverlayError::image_decode(&name, err))?;
    load_page_images_from_bytes(&bytes, &name)
}

/// Decodes every frame of an image. Animated GIFs expand into one page per frame.
pub fn load_page_images_from_bytes(bytes: &[u8], source_name: &str) -> Result<Vec<PageImage>> {
    if let Some(kind) = infer::get(bytes) {
        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(OverlayError::image_decode(
                source_name,
                format!("unsupported format {}", kind.mime_type()),
            ));
        }
    }
    let format =
        image::guess_format(bytes).map_err(|err| OverlayError::image_decode(source_name, err))?;

    if format == ImageFormat::Gif {
        let decoder = image::codecs::gif::GifDecoder::new(Cursor::new(bytes))
            .map_err(|err| OverlayError::image_decode(source_name, err))?;
        let frames = decoder
            .into_frames()
            .collect_frames()
            .map_err(|err| OverlayError::image_decode(source_name, err))?;
        if frames.is_empty() {
            return Err(OverlayError::image_decode(source_name, "no frames"));
        }
        debug!(source = source_name, frames = frames.len(), "expanded multi-frame image");
        return Ok(frames
            .into_iter()
            .map(|frame| {
                PageImage::new(DynamicImage::ImageRgba8(frame.into_buffer()), source_name)
            })
            .collect());
    }

    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|err| OverlayError::image_decode(source_name, err))?;
    Ok(vec![PageImage::new(image, source_name)])
}

/// Loads a batch of input files in order. The first unreadable file fails the batch.
pub fn load_batch(paths: &[PathBuf]) -> Result<Vec<PageImage>> {
    let mut pages = Vec::new();
    for path in paths {
        pages.extend(load_page_images(path)?);
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::new_rgb8(width, height);
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    #[test]
    fn single_frame_image_is_one_page() {
        let pages = load_page_images_from_bytes(&png_bytes(30, 20), "scan.png").expect("load");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].dimensions(), (30, 20));
        assert_eq!(pages[0].source_name(), "scan.png");
    }

    #[test]
    fn gif_frames_expand_into_pages() {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            for shade in [0u8, 128, 255] {
                let buffer = RgbaImage::from_pixel(8, 6, Rgba([shade, shade, shade, 255]));
                encoder
                    .encode_frame(Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(10, 1)))
                    .expect("encode frame");
            }
        }
        let pages = load_page_images_from_bytes(&bytes, "anim.gif").expect("load");
        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|page| page.dimensions() == (8, 6)));
    }

    #[test]
    fn non_image_input_is_rejected() {
        let err = load_page_images_from_bytes(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n", "doc.pdf")
            .expect_err("pdf is not an image");
        assert!(matches!(err, OverlayError::ImageDecode { .. }));
        let err = load_page_images_from_bytes(b"plain text", "notes.txt").expect_err("text");
        assert!(matches!(err, OverlayError::ImageDecode { .. }));
    }

    #[test]
    fn batch_fails_on_first_unreadable_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = dir.path().join("good.png");
        std::fs::write(&good, png_bytes(4, 4)).expect("write");
        let missing = dir.path().join("missing.png");

        assert_eq!(load_batch(&[good.clone(), good.clone()]).expect("batch").len(), 2);
        let err = load_batch(&[good, missing]).expect_err("missing file");
        assert!(matches!(err, OverlayError::ImageDecode { .. }));
    }
}
