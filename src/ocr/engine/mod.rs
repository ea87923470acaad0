mod geom;
mod parse;
mod tesseract;
mod text;

use crate::error::Result;
use crate::ocr::{Granularity, PageTextIndex};
use crate::pages::PageImage;

pub use parse::{parse_documents, parse_hocr, parse_tsv};
pub use tesseract::{TesseractCli, list_tesseract_languages};

/// A live recognition call that yields the parsed text model directly.
///
/// Frame `i` of `pages` is keyed as page `i + 1` in the returned index.
pub trait Recognizer {
    fn recognize(&self, pages: &[PageImage], granularity: Granularity) -> Result<PageTextIndex>;
}
