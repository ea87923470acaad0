use crate::ocr::{FontHandle, FontService};

use super::geometry::Rect;

/// Line height as a multiple of the font size.
pub const LEADING: f32 = 1.2;
pub const MIN_FONT_SIZE: f32 = 0.5;
const SEARCH_STEPS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextFit {
    pub font_size: f32,
    /// Horizontal stretch so the run spans the box exactly; 1.0 is unscaled.
    pub horizontal_scale: f32,
    /// Width of the run at `font_size` before scaling, when the font could measure it.
    pub measured_width: Option<f32>,
}

/// Picks the largest font size whose line fits in `rect.height` and whose
/// run is no wider than `rect.width`, then stretches the run to the box width.
///
/// Returns `None` for fragments that must not be drawn: empty text, a box
/// without positive extent, or text that measures to zero width.
pub fn fit_text(
    fonts: &dyn FontService,
    font: &FontHandle,
    text: &str,
    rect: &Rect,
) -> Option<TextFit> {
    if !rect.is_drawable() || text.trim().is_empty() {
        return None;
    }

    let max_size = rect.height / LEADING;
    let Some(width_at_max) = fonts.measure_width(font, text, max_size) else {
        return Some(TextFit {
            font_size: rect.height,
            horizontal_scale: 1.0,
            measured_width: None,
        });
    };
    if !(width_at_max > 0.0) {
        return None;
    }

    let (font_size, measured) = if width_at_max <= rect.width || max_size <= MIN_FONT_SIZE {
        (max_size, width_at_max)
    } else {
        let mut low = MIN_FONT_SIZE;
        let mut high = max_size;
        let mut best = None;
        for _ in 0..SEARCH_STEPS {
            let mid = (low + high) / 2.0;
            match fonts.measure_width(font, text, mid) {
                Some(width) if width <= rect.width => {
                    best = Some((mid, width));
                    low = mid;
                }
                _ => high = mid,
            }
        }
        match best {
            Some(found) => found,
            None => (
                MIN_FONT_SIZE,
                fonts.measure_width(font, text, MIN_FONT_SIZE)?,
            ),
        }
    };
    if !(measured > 0.0) {
        return None;
    }

    Some(TextFit {
        font_size,
        horizontal_scale: rect.width / measured,
        measured_width: Some(measured),
    })
}
