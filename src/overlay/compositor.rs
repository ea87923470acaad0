use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{OverlayError, Result};
use crate::ocr::{FontHandle, FontService, PageTextIndex, TextFragment};
use crate::pages::PageImage;

use super::canvas::{Canvas, Rgb, TextDraw, TextPaint};
use super::fit::{TextFit, fit_text};
use super::geometry::{Geometry, PageSize, Rect, ScaleMode, resolve};
use super::glyph::{GlyphCoverageReport, GlyphGuard, GlyphRun};

pub const DEFAULT_FONT_FAMILY: &str = "Helvetica";

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayOptions {
    pub scale_mode: ScaleMode,
    pub page_size: Option<PageSize>,
    pub image_layer: Option<String>,
    pub text_layer: Option<String>,
    /// `None` draws the text layer invisibly.
    pub text_color: Option<Rgb>,
    /// Primary family first, then fallbacks in order.
    pub font_families: Vec<String>,
    pub strict: bool,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            scale_mode: ScaleMode::Natural,
            page_size: None,
            image_layer: None,
            text_layer: None,
            text_color: None,
            font_families: vec![DEFAULT_FONT_FAMILY.to_string()],
            strict: false,
        }
    }
}

impl OverlayOptions {
    fn shares_layer(&self) -> bool {
        matches!((&self.image_layer, &self.text_layer), (Some(image), Some(text)) if image == text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyText,
    NotDrawable,
    ZeroWidth,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    Draw { rect: Rect, fit: TextFit },
    Skipped(SkipReason),
}

/// Destination box of a fragment, or why it is not drawn at all.
pub fn locate(
    fragment: &TextFragment,
    geometry: &Geometry,
) -> std::result::Result<Rect, SkipReason> {
    if fragment.text.trim().is_empty() {
        return Err(SkipReason::EmptyText);
    }
    let rect = geometry.fragment_rect(&fragment.bbox);
    if !rect.is_drawable() {
        return Err(SkipReason::NotDrawable);
    }
    Ok(rect)
}

/// Sizes a located fragment for the glyphs that are actually drawn.
pub fn place(fonts: &dyn FontService, font: &FontHandle, run: &GlyphRun, rect: Rect) -> Placement {
    match fit_text(fonts, font, &run.drawn_text(), &rect) {
        Some(fit) => Placement::Draw { rect, fit },
        None => Placement::Skipped(SkipReason::ZeroWidth),
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub pages: usize,
    pub fragments_drawn: usize,
    pub fragments_skipped: usize,
    pub warnings: Vec<String>,
    pub coverage: GlyphCoverageReport,
}

/// A finished build. Only produced when every page composited successfully.
#[derive(Debug)]
pub struct BuildOutput<C> {
    pub canvas: C,
    pub report: BuildReport,
}

/// Draws each page image and its text layer into a canvas.
pub struct Compositor<'a> {
    options: OverlayOptions,
    fonts: &'a mut dyn FontService,
}

impl<'a> Compositor<'a> {
    pub fn new(options: OverlayOptions, fonts: &'a mut dyn FontService) -> Self {
        Self { options, fonts }
    }

    pub fn options(&self) -> &OverlayOptions {
        &self.options
    }

    /// Composites `pages` in order; page `n` takes the fragments indexed under `n`.
    ///
    /// The canvas is consumed and handed back only on success, so a failed
    /// build never leaks a partial document.
    pub fn build<C: Canvas>(
        &mut self,
        mut canvas: C,
        pages: &[PageImage],
        text: &PageTextIndex,
    ) -> Result<BuildOutput<C>> {
        self.fonts.reset();
        let mut report = BuildReport::default();
        let fonts = self.select_fonts(&mut report)?;
        let mut guard = GlyphGuard::new(self.options.strict);

        for page_number in text.page_numbers() {
            if page_number == 0 || page_number as usize > pages.len() {
                let message = format!(
                    "recognized text for page {} has no page image ({} image(s))",
                    page_number,
                    pages.len()
                );
                warn!("{}", message);
                report.warnings.push(message);
            }
        }

        for (idx, image) in pages.iter().enumerate() {
            let page_number = idx as u32 + 1;
            let geometry = resolve(
                image.dimensions(),
                self.options.scale_mode,
                self.options.page_size,
            );
            debug!(
                page = page_number,
                width = geometry.page.width,
                height = geometry.page.height,
                multiplier = geometry.multiplier,
                "resolved page geometry"
            );
            canvas.add_page(geometry.page_size())?;
            self.draw_page(
                &mut canvas,
                image,
                &geometry,
                text.page(page_number),
                &fonts,
                &mut guard,
                &mut report,
            )?;
            report.pages += 1;
        }

        let summary = guard.finish();
        report.warnings.extend(summary.warning);
        report.coverage = summary.coverage;
        info!(
            pages = report.pages,
            drawn = report.fragments_drawn,
            skipped = report.fragments_skipped,
            "composited text layer"
        );
        Ok(BuildOutput { canvas, report })
    }

    /// Resolves the primary family (required) and every fallback that exists.
    fn select_fonts(&mut self, report: &mut BuildReport) -> Result<Vec<FontHandle>> {
        let mut families = self.options.font_families.iter();
        let primary = families.next().ok_or_else(|| {
            OverlayError::MissingFontResource("no font family configured".to_string())
        })?;
        let mut fonts = vec![self.fonts.resolve(primary)?];
        for family in families {
            match self.fonts.resolve(family) {
                Ok(font) => fonts.push(font),
                Err(err) => {
                    let message = format!("fallback font '{}' skipped: {}", family, err);
                    warn!("{}", message);
                    report.warnings.push(message);
                }
            }
        }
        Ok(fonts)
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_page<C: Canvas>(
        &mut self,
        canvas: &mut C,
        image: &PageImage,
        geometry: &Geometry,
        fragments: &[TextFragment],
        fonts: &[FontHandle],
        guard: &mut GlyphGuard,
        report: &mut BuildReport,
    ) -> Result<()> {
        let shared = self.options.shares_layer();

        if let Some(name) = &self.options.image_layer {
            canvas.begin_layer(name)?;
        }
        canvas.draw_image(image, geometry.image_rect)?;
        if self.options.image_layer.is_some() && !shared {
            canvas.end_layer()?;
        }

        if let Some(name) = &self.options.text_layer {
            if !shared {
                canvas.begin_layer(name)?;
            }
        }
        let paint = TextPaint::from_color(self.options.text_color);
        for fragment in fragments {
            let font = self.font_for(fonts, &fragment.text);
            let rect = match locate(fragment, geometry) {
                Ok(rect) => rect,
                Err(reason) => {
                    skip(fragment, reason, report);
                    continue;
                }
            };
            let mut run = GlyphRun::shape(&fragment.text, &*self.fonts, font);
            guard.check(&mut run, font, &*self.fonts)?;
            let fit = match place(&*self.fonts, font, &run, rect) {
                Placement::Draw { fit, .. } => fit,
                Placement::Skipped(reason) => {
                    skip(fragment, reason, report);
                    continue;
                }
            };
            canvas.draw_text(&TextDraw {
                run: &run,
                x: rect.x,
                y: rect.y,
                font,
                size: fit.font_size,
                horizontal_scale: fit.horizontal_scale,
                paint,
            })?;
            report.fragments_drawn += 1;
        }
        if self.options.text_layer.is_some() {
            canvas.end_layer()?;
        }
        Ok(())
    }

    /// First font that maps every character, else the primary.
    fn font_for<'f>(&self, fonts: &'f [FontHandle], text: &str) -> &'f FontHandle {
        fonts
            .iter()
            .find(|font| self.fonts.covers(font, text))
            .unwrap_or(&fonts[0])
    }
}

fn skip(fragment: &TextFragment, reason: SkipReason, report: &mut BuildReport) {
    debug!(text = %fragment.text, reason = ?reason, "skipped fragment");
    report.fragments_skipped += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{BuiltinFace, FontRegistry, FontSource, PixelBox};
    use crate::overlay::canvas::{Command, RecordingCanvas};
    use image::DynamicImage;
    use std::sync::Arc;

    fn page(width: u32, height: u32) -> PageImage {
        PageImage::new(DynamicImage::new_rgb8(width, height), "scan.png")
    }

    fn single_fragment(text: &str, bbox: PixelBox) -> PageTextIndex {
        let mut index = PageTextIndex::new();
        index.push(1, TextFragment::new(text, bbox));
        index
    }

    fn build(
        options: OverlayOptions,
        pages: &[PageImage],
        index: &PageTextIndex,
    ) -> Result<BuildOutput<RecordingCanvas>> {
        let mut fonts = FontRegistry::without_system_fonts();
        Compositor::new(options, &mut fonts).build(RecordingCanvas::new(), pages, index)
    }

    #[test]
    fn natural_page_draws_fragment_once_without_warnings() {
        let index = single_fragment("Hi", PixelBox::new(100, 100, 300, 150));
        let output = build(OverlayOptions::default(), &[page(1000, 2000)], &index).expect("build");
        let commands = output.canvas.commands();
        assert_eq!(commands[0], Command::AddPage { width: 1000.0, height: 2000.0 });
        let texts: Vec<_> = commands
            .iter()
            .filter_map(|command| match command {
                Command::DrawText { x, y, paint, .. } => Some((*x, *y, *paint)),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec![(100.0, 1849.0, TextPaint::Invisible)]);
        assert_eq!(output.report.fragments_drawn, 1);
        assert!(output.report.warnings.is_empty());
    }

    #[test]
    fn shared_layer_name_wraps_image_and_text_once() {
        let mut index = single_fragment("one", PixelBox::new(10, 10, 60, 30));
        index.push(1, TextFragment::new("two", PixelBox::new(10, 40, 60, 60)));
        let options = OverlayOptions {
            image_layer: Some("OCR".to_string()),
            text_layer: Some("OCR".to_string()),
            ..OverlayOptions::default()
        };
        let output = build(options, &[page(200, 200)], &index).expect("build");
        let canvas = output.canvas;
        assert_eq!(canvas.count(|c| matches!(c, Command::BeginLayer(_))), 1);
        assert_eq!(canvas.count(|c| matches!(c, Command::EndLayer)), 1);
        assert!(matches!(canvas.commands().last(), Some(Command::EndLayer)));
    }

    #[test]
    fn distinct_layers_get_their_own_pairs() {
        let index = single_fragment("text", PixelBox::new(10, 10, 60, 30));
        let options = OverlayOptions {
            image_layer: Some("Image".to_string()),
            text_layer: Some("Text".to_string()),
            text_color: Some(Rgb::new(255, 0, 0)),
            ..OverlayOptions::default()
        };
        let output = build(options, &[page(200, 200)], &index).expect("build");
        let kinds: Vec<_> = output
            .canvas
            .commands()
            .iter()
            .map(|command| match command {
                Command::AddPage { .. } => "page".to_string(),
                Command::BeginLayer(name) => format!("begin:{}", name),
                Command::EndLayer => "end".to_string(),
                Command::DrawImage { .. } => "image".to_string(),
                Command::DrawText { paint, .. } => format!("text:{:?}", paint),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "page",
                "begin:Image",
                "image",
                "end",
                "begin:Text",
                "text:Fill(Rgb { r: 255, g: 0, b: 0 })",
                "end"
            ]
        );
    }

    #[test]
    fn strict_build_fails_without_output() {
        let index = single_fragment("日本", PixelBox::new(0, 0, 50, 20));
        let options = OverlayOptions {
            strict: true,
            ..OverlayOptions::default()
        };
        let err = build(options, &[page(100, 100)], &index).expect_err("strict");
        assert!(matches!(err, OverlayError::GlyphCoverage { ch: '日', .. }));
    }

    #[test]
    fn lenient_build_warns_once_and_keeps_actual_text() {
        let mut index = single_fragment("日本", PixelBox::new(0, 0, 50, 20));
        index.push(1, TextFragment::new("語", PixelBox::new(0, 30, 50, 50)));
        let output = build(OverlayOptions::default(), &[page(100, 100)], &index).expect("build");
        assert_eq!(output.report.warnings.len(), 1);
        assert_eq!(output.report.coverage.total(), 3);
        let actual: Vec<_> = output
            .canvas
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::DrawText { actual_text, .. } => Some(actual_text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(actual, vec![vec!["日本".to_string()], vec!["語".to_string()]]);
    }

    /// Builtin Latin face plus a composite face that maps everything.
    struct TwoFamilies;

    impl FontService for TwoFamilies {
        fn resolve(&mut self, family: &str) -> Result<FontHandle> {
            match family {
                "Latin" => Ok(FontHandle {
                    id: 0,
                    family: family.to_string(),
                    source: FontSource::Builtin(BuiltinFace::Helvetica),
                }),
                "Wide" => Ok(FontHandle {
                    id: 1,
                    family: family.to_string(),
                    source: FontSource::Embedded {
                        data: Arc::new(Vec::new()),
                        face_index: 0,
                        units_per_em: 1000,
                    },
                }),
                other => Err(OverlayError::MissingFontResource(other.to_string())),
            }
        }

        fn measure_width(&self, _font: &FontHandle, text: &str, size: f32) -> Option<f32> {
            Some(text.chars().count() as f32 * size * 0.5)
        }

        fn glyph_code(&self, font: &FontHandle, ch: char) -> i32 {
            match &font.source {
                FontSource::Builtin(face) => face.code(ch),
                FontSource::Embedded { .. } => ch as i32,
            }
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn fallback_family_is_used_when_primary_lacks_glyphs() {
        let mut index = single_fragment("abc", PixelBox::new(0, 0, 50, 20));
        index.push(1, TextFragment::new("日本", PixelBox::new(0, 30, 50, 50)));
        let options = OverlayOptions {
            font_families: vec!["Latin".to_string(), "Wide".to_string()],
            strict: true,
            ..OverlayOptions::default()
        };
        let mut fonts = TwoFamilies;
        let output = Compositor::new(options, &mut fonts)
            .build(RecordingCanvas::new(), &[page(100, 100)], &index)
            .expect("fallback covers");
        let families: Vec<_> = output
            .canvas
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::DrawText { font, .. } => Some(font.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(families, vec!["Latin", "Wide"]);
    }

    #[test]
    fn missing_primary_font_is_fatal_but_fallbacks_only_warn() {
        let index = single_fragment("abc", PixelBox::new(0, 0, 50, 20));
        let options = OverlayOptions {
            font_families: vec!["Nonexistent Sans".to_string()],
            ..OverlayOptions::default()
        };
        let err = build(options, &[page(100, 100)], &index).expect_err("primary");
        assert!(matches!(err, OverlayError::MissingFontResource(_)));

        let options = OverlayOptions {
            font_families: vec!["Helvetica".to_string(), "Nonexistent Sans".to_string()],
            ..OverlayOptions::default()
        };
        let output = build(options, &[page(100, 100)], &index).expect("fallback warns");
        assert_eq!(output.report.warnings.len(), 1);
        assert_eq!(output.report.fragments_drawn, 1);
    }

    #[test]
    fn horizontal_scale_matches_the_drawn_glyphs() {
        let index = single_fragment("a→b", PixelBox::new(0, 0, 99, 19));
        let mut fonts = FontRegistry::without_system_fonts();
        let output = Compositor::new(OverlayOptions::default(), &mut fonts)
            .build(RecordingCanvas::new(), &[page(100, 100)], &index)
            .expect("build");
        let Some(Command::DrawText {
            text,
            size,
            horizontal_scale,
            ..
        }) = output
            .canvas
            .commands()
            .iter()
            .find(|command| matches!(command, Command::DrawText { .. }))
        else {
            panic!("no text drawn");
        };
        assert_eq!(text, "a b");
        let font = fonts.resolve("Helvetica").expect("builtin");
        let drawn = fonts.measure_width(&font, text, *size).expect("measurable");
        assert!((drawn * horizontal_scale - 100.0).abs() < 0.01);
    }

    #[test]
    fn degenerate_fragments_are_counted_not_drawn() {
        let mut index = single_fragment("   ", PixelBox::new(0, 0, 50, 20));
        index.push(1, TextFragment::new("flipped", PixelBox::new(50, 20, 10, 10)));
        index.push(1, TextFragment::new("ok", PixelBox::new(0, 30, 50, 50)));
        let output = build(OverlayOptions::default(), &[page(100, 100)], &index).expect("build");
        assert_eq!(output.report.fragments_skipped, 2);
        assert_eq!(output.report.fragments_drawn, 1);
    }

    #[test]
    fn text_for_missing_page_is_reported() {
        let mut index = single_fragment("one", PixelBox::new(0, 0, 50, 20));
        index.push(3, TextFragment::new("three", PixelBox::new(0, 0, 50, 20)));
        let output = build(OverlayOptions::default(), &[page(100, 100)], &index).expect("build");
        assert_eq!(output.report.pages, 1);
        assert!(output.report.warnings[0].contains("page 3"));
    }

    #[test]
    fn fonts_are_reset_at_the_start_of_each_build() {
        let mut fonts = FontRegistry::without_system_fonts();
        fonts.resolve("Courier").expect("builtin");
        let index = single_fragment("abc", PixelBox::new(0, 0, 50, 20));
        Compositor::new(OverlayOptions::default(), &mut fonts)
            .build(RecordingCanvas::new(), &[page(100, 100)], &index)
            .expect("build");
        assert_eq!(fonts.cached_families(), 1);
    }
}
