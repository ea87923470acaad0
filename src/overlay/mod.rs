mod canvas;
mod compositor;
mod fit;
mod geometry;
mod glyph;
mod pdf;

pub use canvas::{Canvas, Command, RecordingCanvas, Rgb, TextDraw, TextPaint};
pub use compositor::{
    BuildOutput, BuildReport, Compositor, DEFAULT_FONT_FAMILY, OverlayOptions, Placement,
    SkipReason, locate, place,
};
pub use fit::{LEADING, MIN_FONT_SIZE, TextFit, fit_text};
pub use geometry::{DEFAULT_DPI, Geometry, PageSize, Rect, ScaleMode, resolve};
pub use glyph::{
    FontKind, Glyph, GlyphCoverageReport, GlyphGuard, GlyphRun, GuardSummary, MissingGlyph,
    RunSegment,
};
pub use pdf::PdfCanvas;
