use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("failed to parse recognition markup: {0}")]
    Parse(String),

    #[error("glyph {ch:?} (U+{codepoint:04X}) is not mapped by font '{font}'")]
    GlyphCoverage {
        ch: char,
        codepoint: u32,
        font: String,
    },

    #[error("failed to decode image {source_name}: {reason}")]
    ImageDecode { source_name: String, reason: String },

    #[error("font family '{0}' could not be resolved")]
    MissingFontResource(String),

    #[error("recognition failed: {0}")]
    Recognition(String),

    #[error("canvas error: {0}")]
    Canvas(String),

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OverlayError {
    pub(crate) fn glyph_coverage(ch: char, font: &str) -> Self {
        OverlayError::GlyphCoverage {
            ch,
            codepoint: ch as u32,
            font: font.to_string(),
        }
    }

    pub(crate) fn image_decode(source_name: &str, reason: impl std::fmt::Display) -> Self {
        OverlayError::ImageDecode {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OverlayError>;
