use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use ttf_parser::Face;
use ttf_parser::name_id;
use usvg::fontdb;

use crate::error::{OverlayError, Result};
use crate::overlay::FontKind;

/// Font selection and measurement used while compositing.
///
/// Implementations may cache resolved handles; the compositor calls
/// [`FontService::reset`] at the start of every build.
pub trait FontService {
    fn resolve(&mut self, family: &str) -> Result<FontHandle>;

    /// Width of `text` set at `size` points, or `None` when the font cannot be measured.
    fn measure_width(&self, font: &FontHandle, text: &str, size: f32) -> Option<f32>;

    /// Code the font maps `ch` to. Unmapped characters return
    /// [`FontKind::not_mapped_code`] for the font's kind.
    fn glyph_code(&self, font: &FontHandle, ch: char) -> i32;

    fn reset(&mut self);

    fn covers(&self, font: &FontHandle, text: &str) -> bool {
        let not_mapped = font.kind().not_mapped_code();
        text.chars()
            .all(|ch| ch.is_whitespace() || self.glyph_code(font, ch) != not_mapped)
    }
}

#[derive(Clone)]
pub enum FontSource {
    Embedded {
        data: Arc<Vec<u8>>,
        face_index: u32,
        units_per_em: u16,
    },
    Builtin(BuiltinFace),
}

impl fmt::Debug for FontSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FontSource::Embedded {
                data, face_index, ..
            } => f
                .debug_struct("Embedded")
                .field("bytes", &data.len())
                .field("face_index", face_index)
                .finish(),
            FontSource::Builtin(face) => f.debug_tuple("Builtin").field(face).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FontHandle {
    pub id: usize,
    pub family: String,
    pub source: FontSource,
}

impl FontHandle {
    pub fn builtin(id: usize, face: BuiltinFace) -> Self {
        Self {
            id,
            family: face.name().to_string(),
            source: FontSource::Builtin(face),
        }
    }

    pub fn kind(&self) -> FontKind {
        match self.source {
            FontSource::Embedded { .. } => FontKind::Composite,
            FontSource::Builtin(_) => FontKind::Simple,
        }
    }
}

/// Standard PDF fonts that need no embedding. Both use WinAnsi codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFace {
    Helvetica,
    Courier,
}

// Helvetica advances for 0x20..=0x7E, in 1/1000 em.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, 1015, 667, 667, 722, 722, 667,
    611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667,
    667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500,
    222, 833, 556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];
const HELVETICA_DEFAULT_ADVANCE: u16 = 556;
const COURIER_ADVANCE: u16 = 600;

impl BuiltinFace {
    pub fn from_family(family: &str) -> Option<Self> {
        match family.trim().to_ascii_lowercase().as_str() {
            "helvetica" => Some(BuiltinFace::Helvetica),
            "courier" => Some(BuiltinFace::Courier),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinFace::Helvetica => "Helvetica",
            BuiltinFace::Courier => "Courier",
        }
    }

    /// WinAnsi code for `ch`, or -1 when the encoding has no slot for it.
    pub fn code(&self, ch: char) -> i32 {
        match ch as u32 {
            cp @ (0x20..=0x7E | 0xA0..=0xFF) => cp as i32,
            _ => FontKind::Simple.not_mapped_code(),
        }
    }

    pub fn advance(&self, ch: char) -> u16 {
        match self {
            BuiltinFace::Courier => COURIER_ADVANCE,
            BuiltinFace::Helvetica => match ch as u32 {
                cp @ 0x20..=0x7E => HELVETICA_ASCII[(cp - 0x20) as usize],
                _ => HELVETICA_DEFAULT_ADVANCE,
            },
        }
    }
}

/// Resolves families from registered font files, the builtin faces, or the
/// system font database, in that order.
pub struct FontRegistry {
    files: Vec<PathBuf>,
    system: Option<fontdb::Database>,
    use_system_fonts: bool,
    cache: HashMap<String, FontHandle>,
    next_id: usize,
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FontRegistry {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            system: None,
            use_system_fonts: true,
            cache: HashMap::new(),
            next_id: 0,
        }
    }

    /// Registry that only knows registered files and builtin faces.
    pub fn without_system_fonts() -> Self {
        Self {
            use_system_fonts: false,
            ..Self::new()
        }
    }

    /// Registers a font file and returns the family name it answers to.
    pub fn register_file(&mut self, path: &Path) -> Result<String> {
        let data = std::fs::read(path)?;
        let (_, family, _) = parse_face(&data, None).ok_or_else(|| {
            OverlayError::MissingFontResource(format!("{} (unreadable font file)", path.display()))
        })?;
        let family = family.unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        });
        debug!(path = %path.display(), family = %family, "registered font file");
        self.files.push(path.to_path_buf());
        Ok(family)
    }

    pub fn cached_families(&self) -> usize {
        self.cache.len()
    }

    fn issue(&mut self, family: &str, source: FontSource) -> FontHandle {
        let handle = FontHandle {
            id: self.next_id,
            family: family.to_string(),
            source,
        };
        self.next_id += 1;
        self.cache.insert(cache_key(family), handle.clone());
        handle
    }

    fn lookup_files(&self, family: &str) -> Option<FontSource> {
        for path in &self.files {
            let Ok(data) = std::fs::read(path) else {
                continue;
            };
            let file_stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().eq_ignore_ascii_case(family))
                .unwrap_or(false);
            let preferred = if file_stem { None } else { Some(family) };
            if let Some((face_index, _, units_per_em)) = parse_face(&data, preferred) {
                return Some(FontSource::Embedded {
                    data: Arc::new(data),
                    face_index,
                    units_per_em,
                });
            }
        }
        None
    }

    fn lookup_system(&mut self, family: &str) -> Option<FontSource> {
        if !self.use_system_fonts {
            return None;
        }
        let db = self.system.get_or_insert_with(|| {
            let mut db = fontdb::Database::new();
            db.load_system_fonts();
            db
        });
        let is_sans = family.eq_ignore_ascii_case("sans-serif");
        let families = if is_sans {
            vec![fontdb::Family::SansSerif]
        } else {
            vec![fontdb::Family::Name(family)]
        };
        let query = fontdb::Query {
            families: &families,
            ..Default::default()
        };
        let id = db.query(&query)?;
        let (data, face_index) = db.with_face_data(id, |data, index| (data.to_vec(), index))?;
        let units_per_em = Face::parse(&data, face_index).ok()?.units_per_em().max(1);
        Some(FontSource::Embedded {
            data: Arc::new(data),
            face_index,
            units_per_em,
        })
    }
}

impl FontService for FontRegistry {
    fn resolve(&mut self, family: &str) -> Result<FontHandle> {
        if let Some(handle) = self.cache.get(&cache_key(family)) {
            return Ok(handle.clone());
        }
        let source = self
            .lookup_files(family)
            .or_else(|| BuiltinFace::from_family(family).map(FontSource::Builtin))
            .or_else(|| self.lookup_system(family))
            .ok_or_else(|| OverlayError::MissingFontResource(family.to_string()))?;
        let handle = self.issue(family, source);
        debug!(family, id = handle.id, kind = ?handle.kind(), "resolved font");
        Ok(handle)
    }

    fn measure_width(&self, font: &FontHandle, text: &str, size: f32) -> Option<f32> {
        match &font.source {
            FontSource::Builtin(face) => {
                let units: u32 = text.chars().map(|ch| face.advance(ch) as u32).sum();
                Some(units as f32 * size / 1000.0)
            }
            FontSource::Embedded {
                data,
                face_index,
                units_per_em,
            } => {
                let face = Face::parse(data, *face_index).ok()?;
                let notdef = face.glyph_hor_advance(ttf_parser::GlyphId(0)).unwrap_or(0);
                let mut advance = 0u32;
                for ch in text.chars() {
                    let glyph_advance = face
                        .glyph_index(ch)
                        .and_then(|glyph| face.glyph_hor_advance(glyph))
                        .unwrap_or(notdef);
                    advance = advance.saturating_add(glyph_advance as u32);
                }
                Some(advance as f32 * size / (*units_per_em).max(1) as f32)
            }
        }
    }

    fn glyph_code(&self, font: &FontHandle, ch: char) -> i32 {
        match &font.source {
            FontSource::Builtin(face) => face.code(ch),
            FontSource::Embedded {
                data, face_index, ..
            } => Face::parse(data, *face_index)
                .ok()
                .and_then(|face| face.glyph_index(ch))
                .map(|glyph| glyph.0 as i32)
                .unwrap_or(FontKind::Composite.not_mapped_code()),
        }
    }

    fn reset(&mut self) {
        self.cache.clear();
        self.next_id = 0;
    }
}

fn cache_key(family: &str) -> String {
    family.trim().to_ascii_lowercase()
}

/// Finds a face in `data`, preferring one whose family matches `preferred`.
/// Returns `(face_index, family, units_per_em)`.
fn parse_face(data: &[u8], preferred: Option<&str>) -> Option<(u32, Option<String>, u16)> {
    let mut first = None;
    let count = ttf_parser::fonts_in_collection(data).unwrap_or(1);
    for index in 0..count {
        let Ok(face) = Face::parse(data, index) else {
            continue;
        };
        let family = extract_family_name(&face);
        let units_per_em = face.units_per_em().max(1);
        if let (Some(preferred), Some(found)) = (preferred, &family) {
            if found.eq_ignore_ascii_case(preferred) {
                return Some((index, family, units_per_em));
            }
        }
        if first.is_none() {
            first = Some((index, family, units_per_em));
        }
    }
    match preferred {
        Some(_) => None,
        None => first,
    }
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
