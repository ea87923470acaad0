use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{OverlayError, Result};
use crate::ocr::{FontHandle, FontService};

/// Code used for replaced glyphs when the font has no mapped space.
const FALLBACK_SENTINEL: i32 = 0x20;

/// How a font reports characters it cannot map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FontKind {
    /// Glyph-id addressed (embedded TrueType/OpenType). Glyph 0 is `.notdef`.
    Composite,
    /// Single-byte encoded (builtin faces). Characters outside the encoding are -1.
    Simple,
}

impl FontKind {
    pub const fn not_mapped_code(self) -> i32 {
        match self {
            FontKind::Composite => 0,
            FontKind::Simple => -1,
        }
    }

    pub fn is_mapped(self, code: i32) -> bool {
        code != self.not_mapped_code()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    /// Character handed to the canvas.
    pub ch: char,
    /// Character this glyph stands for in the recognized text.
    pub unicode: char,
    pub code: i32,
    pub actual_text: Option<String>,
}

/// Consecutive glyphs that share one actual-text state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSegment {
    pub text: String,
    pub actual_text: Option<String>,
}

/// Shaped glyphs for one draw call. Owned by that call and rewritten in place
/// by the guard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlyphRun {
    glyphs: Vec<Glyph>,
}

impl GlyphRun {
    /// One glyph per character. Characters the text layer shows as a plain
    /// space (no-break space, tab) keep the original as actual text.
    pub fn shape(text: &str, fonts: &dyn FontService, font: &FontHandle) -> Self {
        let glyphs = text
            .chars()
            .map(|unicode| {
                let (ch, actual_text) = match unicode {
                    '\u{00A0}' | '\t' => (' ', Some(unicode.to_string())),
                    _ => (unicode, None),
                };
                Glyph {
                    ch,
                    unicode,
                    code: fonts.glyph_code(font, ch),
                    actual_text,
                }
            })
            .collect();
        Self { glyphs }
    }

    pub fn from_glyphs(glyphs: Vec<Glyph>) -> Self {
        Self { glyphs }
    }

    pub fn glyphs(&self) -> &[Glyph] {
        &self.glyphs
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Text as it will be drawn.
    pub fn drawn_text(&self) -> String {
        self.glyphs.iter().map(|glyph| glyph.ch).collect()
    }

    pub fn source_text(&self) -> String {
        self.glyphs.iter().map(|glyph| glyph.unicode).collect()
    }

    pub fn has_actual_text(&self) -> bool {
        self.glyphs.iter().any(|glyph| glyph.actual_text.is_some())
    }

    pub fn segments(&self) -> Vec<RunSegment> {
        let mut segments: Vec<RunSegment> = Vec::new();
        for glyph in &self.glyphs {
            match (segments.last_mut(), &glyph.actual_text) {
                (Some(last), None) if last.actual_text.is_none() => last.text.push(glyph.ch),
                (Some(last), Some(actual)) if last.actual_text.is_some() => {
                    last.text.push(glyph.ch);
                    if let Some(existing) = last.actual_text.as_mut() {
                        existing.push_str(actual);
                    }
                }
                _ => segments.push(RunSegment {
                    text: glyph.ch.to_string(),
                    actual_text: glyph.actual_text.clone(),
                }),
            }
        }
        segments
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingGlyph {
    pub codepoint: u32,
    pub ch: char,
    pub fonts: Vec<String>,
    pub count: usize,
}

/// Unmapped characters seen during one build, keyed by code point.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GlyphCoverageReport {
    missing: BTreeMap<u32, MissingGlyph>,
}

impl GlyphCoverageReport {
    pub fn record_missing(&mut self, ch: char, font: &str) {
        let codepoint = ch as u32;
        let entry = self.missing.entry(codepoint).or_insert(MissingGlyph {
            codepoint,
            ch,
            fonts: Vec::new(),
            count: 0,
        });
        if !entry.fonts.iter().any(|name| name == font) {
            entry.fonts.push(font.to_string());
        }
        entry.count = entry.count.saturating_add(1);
    }

    pub fn merge(&mut self, other: GlyphCoverageReport) {
        for (codepoint, missing) in other.missing {
            let entry = self.missing.entry(codepoint).or_insert(MissingGlyph {
                codepoint,
                ch: missing.ch,
                fonts: Vec::new(),
                count: 0,
            });
            for font in missing.fonts {
                if !entry.fonts.contains(&font) {
                    entry.fonts.push(font);
                }
            }
            entry.count = entry.count.saturating_add(missing.count);
        }
    }

    pub fn missing(&self) -> Vec<MissingGlyph> {
        self.missing.values().cloned().collect()
    }

    pub fn total(&self) -> usize {
        self.missing.values().map(|missing| missing.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GuardSummary {
    /// The build's single coverage warning, if any glyph was replaced.
    pub warning: Option<String>,
    pub coverage: GlyphCoverageReport,
}

/// Checks every glyph of a run against the active font before it is drawn.
///
/// Strict mode fails on the first unmapped glyph. Otherwise the glyph is drawn
/// as a space carrying its character as actual text, and one warning is
/// emitted for the whole build by [`GlyphGuard::finish`].
#[derive(Debug)]
pub struct GlyphGuard {
    strict: bool,
    report: GlyphCoverageReport,
    last_miss: Option<(char, String)>,
}

impl GlyphGuard {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            report: GlyphCoverageReport::default(),
            last_miss: None,
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn check(
        &mut self,
        run: &mut GlyphRun,
        font: &FontHandle,
        fonts: &dyn FontService,
    ) -> Result<()> {
        let kind = font.kind();
        let mut sentinel = None;
        for glyph in &mut run.glyphs {
            if kind.is_mapped(glyph.code) {
                continue;
            }
            if self.strict {
                return Err(OverlayError::glyph_coverage(glyph.unicode, &font.family));
            }
            let sentinel = *sentinel.get_or_insert_with(|| {
                let space = fonts.glyph_code(font, ' ');
                if kind.is_mapped(space) {
                    space
                } else {
                    FALLBACK_SENTINEL
                }
            });
            if glyph.actual_text.is_none() {
                glyph.actual_text = Some(glyph.unicode.to_string());
            }
            glyph.ch = ' ';
            glyph.code = sentinel;
            self.report.record_missing(glyph.unicode, &font.family);
            self.last_miss = Some((glyph.unicode, font.family.clone()));
        }
        Ok(())
    }

    pub fn finish(self) -> GuardSummary {
        let warning = self.last_miss.map(|(ch, font)| {
            let message = format!(
                "{} glyph(s) not mapped by the active font; last was {:?} (U+{:04X}) in '{}', drawn with actual text",
                self.report.total(),
                ch,
                ch as u32,
                font
            );
            warn!("{}", message);
            message
        });
        GuardSummary {
            warning,
            coverage: self.report,
        }
    }
}
