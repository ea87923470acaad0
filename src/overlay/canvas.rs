use std::fmt::Write as _;
use std::str::FromStr;

use crate::error::{OverlayError, Result};
use crate::ocr::FontHandle;
use crate::pages::PageImage;

use super::geometry::{PageSize, Rect};
use super::glyph::GlyphRun;

/// Page-level drawing surface the compositor writes into.
pub trait Canvas {
    fn add_page(&mut self, size: PageSize) -> Result<()>;
    fn begin_layer(&mut self, name: &str) -> Result<()>;
    fn end_layer(&mut self) -> Result<()>;
    fn draw_image(&mut self, image: &PageImage, rect: Rect) -> Result<()>;
    fn draw_text(&mut self, text: &TextDraw<'_>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Components scaled to `0.0..=1.0`.
    pub fn to_unit(self) -> (f32, f32, f32) {
        (
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        )
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = OverlayError;

    /// Parses `#rrggbb`, `rrggbb` or `#rgb`.
    fn from_str(value: &str) -> Result<Self> {
        let invalid = || OverlayError::Settings(format!("invalid color '{}'", value));
        let hex = value.trim().trim_start_matches('#');
        if !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |digits: &str| u8::from_str_radix(digits, 16).map_err(|_| invalid());
        match hex.len() {
            6 => Ok(Rgb::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            3 => {
                let short = |idx: usize| channel(&hex[idx..idx + 1]).map(|v| v * 17);
                Ok(Rgb::new(short(0)?, short(1)?, short(2)?))
            }
            _ => Err(invalid()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextPaint {
    Fill(Rgb),
    /// Text is present for selection and search but never painted.
    Invisible,
}

impl TextPaint {
    pub fn from_color(color: Option<Rgb>) -> Self {
        color.map(TextPaint::Fill).unwrap_or(TextPaint::Invisible)
    }
}

/// One positioned glyph run. `x`/`y` is the left end of the baseline in points.
#[derive(Debug)]
pub struct TextDraw<'a> {
    pub run: &'a GlyphRun,
    pub x: f32,
    pub y: f32,
    pub font: &'a FontHandle,
    pub size: f32,
    pub horizontal_scale: f32,
    pub paint: TextPaint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddPage {
        width: f32,
        height: f32,
    },
    BeginLayer(String),
    EndLayer,
    DrawImage {
        source: String,
        pixels: (u32, u32),
        rect: Rect,
    },
    DrawText {
        text: String,
        actual_text: Vec<String>,
        font: String,
        x: f32,
        y: f32,
        size: f32,
        horizontal_scale: f32,
        paint: TextPaint,
    },
}

/// Canvas that records every call. Layer calls are checked for balance.
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    commands: Vec<Command>,
    open_layer: Option<String>,
}

impl RecordingCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|command| predicate(command)).count()
    }

    /// One line per command, numbers rounded to two decimals.
    pub fn render_log(&self) -> String {
        let mut out = String::new();
        for command in &self.commands {
            let _ = match command {
                Command::AddPage { width, height } => {
                    writeln!(out, "page {:.2}x{:.2}", width, height)
                }
                Command::BeginLayer(name) => writeln!(out, "begin_layer {:?}", name),
                Command::EndLayer => writeln!(out, "end_layer"),
                Command::DrawImage {
                    source,
                    pixels,
                    rect,
                } => writeln!(
                    out,
                    "image {} {}x{} at ({:.2}, {:.2}) size {:.2}x{:.2}",
                    source, pixels.0, pixels.1, rect.x, rect.y, rect.width, rect.height
                ),
                Command::DrawText {
                    text,
                    actual_text,
                    font,
                    x,
                    y,
                    size,
                    horizontal_scale,
                    paint,
                } => {
                    let paint = match paint {
                        TextPaint::Fill(color) => color.to_hex(),
                        TextPaint::Invisible => "invisible".to_string(),
                    };
                    let mut line = format!(
                        "text {:?} font={} at ({:.2}, {:.2}) size={:.2} scale={:.2} paint={}",
                        text, font, x, y, size, horizontal_scale, paint
                    );
                    if !actual_text.is_empty() {
                        let _ = write!(line, " actual={:?}", actual_text);
                    }
                    writeln!(out, "{}", line)
                }
            };
        }
        out
    }
}

impl Canvas for RecordingCanvas {
    fn add_page(&mut self, size: PageSize) -> Result<()> {
        if let Some(open) = &self.open_layer {
            return Err(OverlayError::Canvas(format!(
                "page added while layer '{}' is open",
                open
            )));
        }
        self.commands.push(Command::AddPage {
            width: size.width,
            height: size.height,
        });
        Ok(())
    }

    fn begin_layer(&mut self, name: &str) -> Result<()> {
        if let Some(open) = &self.open_layer {
            return Err(OverlayError::Canvas(format!(
                "layer '{}' begun inside open layer '{}'",
                name, open
            )));
        }
        self.open_layer = Some(name.to_string());
        self.commands.push(Command::BeginLayer(name.to_string()));
        Ok(())
    }

    fn end_layer(&mut self) -> Result<()> {
        if self.open_layer.take().is_none() {
            return Err(OverlayError::Canvas("end_layer without open layer".to_string()));
        }
        self.commands.push(Command::EndLayer);
        Ok(())
    }

    fn draw_image(&mut self, image: &PageImage, rect: Rect) -> Result<()> {
        self.commands.push(Command::DrawImage {
            source: image.source_name().to_string(),
            pixels: image.dimensions(),
            rect,
        });
        Ok(())
    }

    fn draw_text(&mut self, text: &TextDraw<'_>) -> Result<()> {
        let actual_text = text
            .run
            .segments()
            .into_iter()
            .filter_map(|segment| segment.actual_text)
            .collect();
        self.commands.push(Command::DrawText {
            text: text.run.drawn_text(),
            actual_text,
            font: text.font.family.clone(),
            x: text.x,
            y: text.y,
            size: text.size,
            horizontal_scale: text.horizontal_scale,
            paint: text.paint,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_parse_long_and_short_hex() {
        assert_eq!("#ff8000".parse::<Rgb>().unwrap(), Rgb::new(255, 128, 0));
        assert_eq!("00FF00".parse::<Rgb>().unwrap(), Rgb::new(0, 255, 0));
        assert_eq!("#f0a".parse::<Rgb>().unwrap(), Rgb::new(255, 0, 170));
        assert!("#12345".parse::<Rgb>().is_err());
        assert!("red".parse::<Rgb>().is_err());
        assert_eq!(Rgb::new(1, 2, 255).to_hex(), "#0102ff");
    }

    #[test]
    fn missing_color_means_invisible_text() {
        assert_eq!(TextPaint::from_color(None), TextPaint::Invisible);
        assert_eq!(
            TextPaint::from_color(Some(Rgb::new(0, 0, 0))),
            TextPaint::Fill(Rgb::new(0, 0, 0))
        );
    }

    #[test]
    fn recording_canvas_rejects_unbalanced_layers() {
        let mut canvas = RecordingCanvas::new();
        canvas.add_page(PageSize::LETTER).expect("page");
        assert!(canvas.end_layer().is_err());
        canvas.begin_layer("scan").expect("begin");
        assert!(canvas.begin_layer("text").is_err());
        assert!(canvas.add_page(PageSize::A4).is_err());
        canvas.end_layer().expect("end");
        assert_eq!(canvas.render_log(), "page 612.00x792.00\nbegin_layer \"scan\"\nend_layer\n");
    }
}
