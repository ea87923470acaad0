use image::DynamicImage;
use ocr_text_layer::ocr::{
    BuiltinFace, FontHandle, FontService, Granularity, PageTextIndex, PixelBox, TextFragment,
    parse_hocr,
};
use ocr_text_layer::overlay::{
    Compositor, OverlayOptions, PageSize, RecordingCanvas, Rgb, ScaleMode,
};
use ocr_text_layer::{OverlayError, PageImage};

/// Every character is half an em wide; only printable ASCII is mapped.
struct MonoFonts;

impl FontService for MonoFonts {
    fn resolve(&mut self, family: &str) -> ocr_text_layer::error::Result<FontHandle> {
        if family != "Mono" {
            return Err(OverlayError::MissingFontResource(family.to_string()));
        }
        Ok(FontHandle {
            id: 0,
            family: family.to_string(),
            source: ocr_text_layer::ocr::FontSource::Builtin(BuiltinFace::Courier),
        })
    }

    fn measure_width(&self, _font: &FontHandle, text: &str, size: f32) -> Option<f32> {
        Some(text.chars().count() as f32 * 0.5 * size)
    }

    fn glyph_code(&self, _font: &FontHandle, ch: char) -> i32 {
        match ch {
            ' '..='~' => ch as i32,
            _ => -1,
        }
    }

    fn reset(&mut self) {}
}

fn mono_options() -> OverlayOptions {
    OverlayOptions {
        font_families: vec!["Mono".to_string()],
        ..OverlayOptions::default()
    }
}

fn page(width: u32, height: u32, name: &str) -> PageImage {
    PageImage::new(DynamicImage::new_rgb8(width, height), name)
}

#[test]
fn natural_page_with_shared_layer() {
    let mut index = PageTextIndex::new();
    index.push(1, TextFragment::new("Hi", PixelBox::new(100, 100, 300, 150)));
    let options = OverlayOptions {
        image_layer: Some("OCR".to_string()),
        text_layer: Some("OCR".to_string()),
        ..mono_options()
    };

    let mut fonts = MonoFonts;
    let output = Compositor::new(options, &mut fonts)
        .build(RecordingCanvas::new(), &[page(1000, 2000, "scan.png")], &index)
        .expect("build");

    assert!(output.report.warnings.is_empty());
    insta::assert_snapshot!(output.canvas.render_log().trim_end(), @r###"
    page 1000.00x2000.00
    begin_layer "OCR"
    image scan.png 1000x2000 at (0.00, 0.00) size 1000.00x2000.00
    text "Hi" font=Mono at (100.00, 1849.00) size=42.50 scale=4.73 paint=invisible
    end_layer
    "###);
}

#[test]
fn fitted_page_with_separate_layers_and_missing_glyph() {
    let mut index = PageTextIndex::new();
    index.push(1, TextFragment::new("a→b", PixelBox::new(0, 0, 199, 99)));
    index.push(1, TextFragment::new("   ", PixelBox::new(10, 10, 20, 20)));
    index.push(1, TextFragment::new("xy", PixelBox::new(1000, 500, 1099, 549)));
    let options = OverlayOptions {
        scale_mode: ScaleMode::ScaleToFit,
        page_size: Some(PageSize::LETTER),
        image_layer: Some("Image".to_string()),
        text_layer: Some("Text".to_string()),
        text_color: Some(Rgb::new(0x1a, 0x2b, 0x3c)),
        ..mono_options()
    };

    let mut fonts = MonoFonts;
    let output = Compositor::new(options, &mut fonts)
        .build(RecordingCanvas::new(), &[page(2000, 1000, "wide.png")], &index)
        .expect("build");

    assert_eq!(output.report.fragments_drawn, 2);
    assert_eq!(output.report.fragments_skipped, 1);
    assert_eq!(output.report.warnings.len(), 1);
    insta::assert_snapshot!(output.canvas.render_log().trim_end(), @r###"
    page 612.00x792.00
    begin_layer "Image"
    image wide.png 2000x1000 at (0.00, 243.00) size 612.00x306.00
    end_layer
    begin_layer "Text"
    text "a b" font=Mono at (0.00, 518.40) size=25.50 scale=1.60 paint=#1a2b3c actual=["→"]
    text "xy" font=Mono at (306.00, 380.70) size=12.75 scale=2.40 paint=#1a2b3c
    end_layer
    "###);
}

#[test]
fn parsed_markup_composites_pages_by_page_number() {
    let markup = r#"<html><body>
<div class="ocr_page" id="page_2" title="bbox 0 0 100 100; ppageno 1">
  <span class="ocr_line" title="bbox 10 10 89 29"><span class="ocrx_word" title="bbox 10 10 89 29">second</span></span>
</div>
<div class="ocr_page" id="page_1" title="bbox 0 0 100 100; ppageno 0">
  <span class="ocr_line" title="bbox 10 70 49 89"><span class="ocrx_word" title="bbox 10 70 49 89">one</span></span>
</div>
</body></html>"#;
    let index = parse_hocr(markup, Granularity::Lines).expect("parse");

    let mut fonts = MonoFonts;
    let output = Compositor::new(mono_options(), &mut fonts)
        .build(
            RecordingCanvas::new(),
            &[page(100, 100, "p1.png"), page(100, 100, "p2.png")],
            &index,
        )
        .expect("build");

    insta::assert_snapshot!(output.canvas.render_log().trim_end(), @r###"
    page 100.00x100.00
    image p1.png 100x100 at (0.00, 0.00) size 100.00x100.00
    text "one" font=Mono at (10.00, 10.00) size=16.67 scale=1.60 paint=invisible
    page 100.00x100.00
    image p2.png 100x100 at (0.00, 0.00) size 100.00x100.00
    text "second" font=Mono at (10.00, 70.00) size=16.67 scale=1.60 paint=invisible
    "###);
}

#[test]
fn strict_build_returns_only_the_coverage_error() {
    let mut index = PageTextIndex::new();
    index.push(1, TextFragment::new("ok", PixelBox::new(0, 0, 49, 19)));
    index.push(1, TextFragment::new("naïve", PixelBox::new(0, 30, 49, 49)));
    let options = OverlayOptions {
        strict: true,
        ..mono_options()
    };

    let mut fonts = MonoFonts;
    let result = Compositor::new(options, &mut fonts).build(
        RecordingCanvas::new(),
        &[page(100, 100, "scan.png")],
        &index,
    );
    let err = result.expect_err("strict");
    insta::assert_snapshot!(err.to_string(), @"glyph 'ï' (U+00EF) is not mapped by font 'Mono'");
}
