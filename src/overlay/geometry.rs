use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::OverlayError;
use crate::ocr::FragmentBox;

/// Assumed resolution of recognition pixels when no page size is fixed.
pub const DEFAULT_DPI: f32 = 72.0;
pub const POINTS_PER_INCH: f32 = 72.0;

/// Rectangle in points, bottom-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// The one emptiness predicate: anything without positive extent is never drawn.
    pub fn is_drawable(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub const LETTER: PageSize = PageSize::new(612.0, 792.0);
    pub const LEGAL: PageSize = PageSize::new(612.0, 1008.0);
    pub const A4: PageSize = PageSize::new(595.0, 842.0);
    pub const A3: PageSize = PageSize::new(842.0, 1191.0);

    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl FromStr for PageSize {
    type Err = OverlayError;

    /// Accepts `letter`, `legal`, `a4`, `a3` or `WIDTHxHEIGHT` in points.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "letter" => return Ok(PageSize::LETTER),
            "legal" => return Ok(PageSize::LEGAL),
            "a4" => return Ok(PageSize::A4),
            "a3" => return Ok(PageSize::A3),
            _ => {}
        }
        let invalid = || OverlayError::Settings(format!("invalid page size '{}'", value));
        let (w, h) = normalized.split_once('x').ok_or_else(invalid)?;
        let width: f32 = w.trim().parse().map_err(|_| invalid())?;
        let height: f32 = h.trim().parse().map_err(|_| invalid())?;
        if !(width > 0.0 && height > 0.0) || !width.is_finite() || !height.is_finite() {
            return Err(invalid());
        }
        Ok(PageSize::new(width, height))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    /// Page takes the image's own size.
    #[default]
    Natural,
    /// Largest aspect-preserving fit inside the fixed page, centred.
    ScaleToFit,
    /// Image width matches the page width, centred vertically.
    ScaleWidth,
    /// Image height matches the page height, centred horizontally.
    ScaleHeight,
}

impl FromStr for ScaleMode {
    type Err = OverlayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "natural" | "original" | "keep_original_size" => Ok(ScaleMode::Natural),
            "fit" | "scale_to_fit" => Ok(ScaleMode::ScaleToFit),
            "width" | "scale_width" => Ok(ScaleMode::ScaleWidth),
            "height" | "scale_height" => Ok(ScaleMode::ScaleHeight),
            other => Err(OverlayError::Settings(format!(
                "unknown scale mode '{}' (expected natural, fit, width or height)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// Page box, origin at (0, 0).
    pub page: Rect,
    /// Where the image is drawn on the page. May extend past the page for
    /// `ScaleWidth`/`ScaleHeight`.
    pub image_rect: Rect,
    /// Recognition pixels to points, same on both axes.
    pub multiplier: f32,
}

impl Geometry {
    pub fn page_size(&self) -> PageSize {
        PageSize::new(self.page.width, self.page.height)
    }

    /// Maps a fragment box into page points. Raw pixel boxes are inclusive of
    /// their right/bottom pixel, so both edges are extended by one pixel before
    /// scaling; explicit rectangles are already in points.
    pub fn fragment_rect(&self, bbox: &FragmentBox) -> Rect {
        match bbox {
            FragmentBox::Pixels(pixels) => {
                let m = self.multiplier;
                let width = pixels.width() as f32 * m;
                let height = pixels.height() as f32 * m;
                let x = self.image_rect.x + pixels.left as f32 * m;
                let y = self.image_rect.top() - (pixels.bottom as f32 + 1.0) * m;
                Rect::new(x, y, width, height)
            }
            FragmentBox::Explicit(rect) => Rect::new(
                self.image_rect.x + rect.x,
                self.image_rect.y + rect.y,
                rect.width,
                rect.height,
            ),
        }
    }
}

/// Resolves page and image placement for one frame of `image_px` pixels.
///
/// Without a fixed page size every mode behaves like [`ScaleMode::Natural`].
pub fn resolve(image_px: (u32, u32), mode: ScaleMode, fixed: Option<PageSize>) -> Geometry {
    let image_w = image_px.0.max(1) as f32;
    let image_h = image_px.1.max(1) as f32;

    let page = match (mode, fixed) {
        (ScaleMode::Natural, _) | (_, None) => None,
        (_, Some(page)) => Some(page),
    };
    let Some(page) = page else {
        let multiplier = POINTS_PER_INCH / DEFAULT_DPI;
        let natural = Rect::new(0.0, 0.0, image_w * multiplier, image_h * multiplier);
        return Geometry {
            page: natural,
            image_rect: natural,
            multiplier,
        };
    };

    let ratio = match mode {
        ScaleMode::ScaleWidth => page.width / image_w,
        ScaleMode::ScaleHeight => page.height / image_h,
        _ => (page.width / image_w).min(page.height / image_h),
    };
    let width = image_w * ratio;
    let height = image_h * ratio;
    Geometry {
        page: Rect::new(0.0, 0.0, page.width, page.height),
        image_rect: Rect::new(
            (page.width - width) / 2.0,
            (page.height - height) / 2.0,
            width,
            height,
        ),
        multiplier: ratio,
    }
}
