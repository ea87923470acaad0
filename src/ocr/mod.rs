mod engine;
mod font;
mod render;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::OverlayError;
use crate::overlay::Rect;

pub use engine::{
    Recognizer, TesseractCli, list_tesseract_languages, parse_documents, parse_hocr, parse_tsv,
};
pub use font::{BuiltinFace, FontHandle, FontRegistry, FontService, FontSource};
pub use render::{render_bbox_svg, render_overlay_png};

/// Recognition-space box, top-left origin, edges inclusive of the last pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PixelBox {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Width in pixels counting both edge pixels; zero or negative for inverted boxes.
    pub fn width(&self) -> i64 {
        self.right as i64 - self.left as i64 + 1
    }

    pub fn height(&self) -> i64 {
        self.bottom as i64 - self.top as i64 + 1
    }
}

/// Where a fragment sits: raw recognition pixels, or a rectangle already in
/// destination points relative to the image origin (bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FragmentBox {
    Pixels(PixelBox),
    Explicit(Rect),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextFragment {
    pub text: String,
    pub bbox: FragmentBox,
}

impl TextFragment {
    pub fn new(text: impl Into<String>, bbox: PixelBox) -> Self {
        Self {
            text: text.into(),
            bbox: FragmentBox::Pixels(bbox),
        }
    }

    pub fn explicit(text: impl Into<String>, rect: Rect) -> Self {
        Self {
            text: text.into(),
            bbox: FragmentBox::Explicit(rect),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Lines,
    Words,
}

impl FromStr for Granularity {
    type Err = OverlayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "line" | "lines" => Ok(Granularity::Lines),
            "word" | "words" => Ok(Granularity::Words),
            other => Err(OverlayError::Settings(format!(
                "unknown granularity '{}' (expected lines or words)",
                other
            ))),
        }
    }
}

/// Fragments per 1-based page number, each page in parse order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageTextIndex {
    pages: BTreeMap<u32, Vec<TextFragment>>,
}

impl PageTextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a page with no fragments yet. Existing fragments are kept.
    pub fn ensure_page(&mut self, page: u32) {
        self.pages.entry(page).or_default();
    }

    pub fn push(&mut self, page: u32, fragment: TextFragment) {
        self.pages.entry(page).or_default().push(fragment);
    }

    pub fn extend_page(&mut self, page: u32, fragments: impl IntoIterator<Item = TextFragment>) {
        self.pages.entry(page).or_default().extend(fragments);
    }

    /// Appends every page of `other`, keeping this index's fragments first.
    pub fn merge(&mut self, other: PageTextIndex) {
        for (page, fragments) in other.pages {
            self.extend_page(page, fragments);
        }
    }

    pub fn page(&self, page: u32) -> &[TextFragment] {
        self.pages.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_page(&self, page: u32) -> bool {
        self.pages.contains_key(&page)
    }

    pub fn page_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.pages.keys().copied()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn fragment_count(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
