use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{OverlayError, Result};
use crate::ocr::{Granularity, PageTextIndex, PixelBox, TextFragment};

use super::geom::{from_extent, union_bbox};
use super::text::{collapse_whitespace, join_words};

const LINE_CLASSES: &[&str] = &["ocr_line", "ocr_caption", "ocr_textfloat", "ocr_header"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Page,
    Line,
    Word,
    Other,
}

struct LineState {
    bbox: Option<PixelBox>,
    words: Vec<String>,
    loose_text: String,
}

struct WordState {
    bbox: Option<PixelBox>,
    text: String,
}

struct HocrParser {
    granularity: Granularity,
    index: PageTextIndex,
    stack: Vec<Role>,
    page: Option<u32>,
    pages_seen: u32,
    line: Option<LineState>,
    word: Option<WordState>,
    skipped: usize,
}

impl HocrParser {
    fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            index: PageTextIndex::new(),
            stack: Vec::new(),
            page: None,
            pages_seen: 0,
            line: None,
            word: None,
            skipped: 0,
        }
    }

    fn open(&mut self, element: &BytesStart<'_>, self_closing: bool) {
        let attrs = ElementAttrs::read(element);
        let role = attrs.role();
        match role {
            Role::Page => {
                self.pages_seen += 1;
                let number = attrs.page_number().unwrap_or(self.pages_seen);
                self.index.ensure_page(number);
                self.page = Some(number);
            }
            Role::Line if !self_closing => {
                self.line = Some(LineState {
                    bbox: attrs.bbox(),
                    words: Vec::new(),
                    loose_text: String::new(),
                });
            }
            Role::Word if !self_closing => {
                self.word = Some(WordState {
                    bbox: attrs.bbox(),
                    text: String::new(),
                });
            }
            _ => {}
        }
        if self_closing {
            if role == Role::Page {
                self.page = None;
            }
            return;
        }
        self.stack.push(role);
    }

    fn text(&mut self, value: &str) {
        if let Some(word) = self.word.as_mut() {
            word.text.push_str(value);
        } else if let Some(line) = self.line.as_mut() {
            line.loose_text.push_str(value);
        }
    }

    fn close(&mut self) {
        match self.stack.pop() {
            Some(Role::Word) => self.close_word(),
            Some(Role::Line) => self.close_line(),
            Some(Role::Page) => {
                self.word = None;
                self.line = None;
                self.page = None;
            }
            _ => {}
        }
    }

    fn close_word(&mut self) {
        let Some(word) = self.word.take() else {
            return;
        };
        let text = collapse_whitespace(&word.text);
        if self.granularity == Granularity::Words {
            self.emit(text.clone(), word.bbox);
        }
        if let Some(line) = self.line.as_mut() {
            if !text.is_empty() {
                line.words.push(text);
            }
        }
    }

    fn close_line(&mut self) {
        let Some(line) = self.line.take() else {
            return;
        };
        if self.granularity != Granularity::Lines {
            return;
        }
        let text = if line.words.is_empty() {
            collapse_whitespace(&line.loose_text)
        } else {
            join_words(line.words.iter().map(String::as_str))
        };
        self.emit(text, line.bbox);
    }

    fn emit(&mut self, text: String, bbox: Option<PixelBox>) {
        let Some(page) = self.page else {
            debug!("skipping fragment outside any ocr_page: {:?}", text);
            self.skipped += 1;
            return;
        };
        match bbox {
            Some(bbox) if !text.is_empty() => {
                self.index.push(page, TextFragment::new(text, bbox));
            }
            Some(_) => {
                self.skipped += 1;
            }
            None => {
                debug!(page, "skipping fragment without a usable bbox: {:?}", text);
                self.skipped += 1;
            }
        }
    }
}

struct ElementAttrs {
    class: String,
    id: String,
    title: String,
}

impl ElementAttrs {
    fn read(element: &BytesStart<'_>) -> Self {
        let mut attrs = ElementAttrs {
            class: String::new(),
            id: String::new(),
            title: String::new(),
        };
        for attr in element.attributes().flatten() {
            let value = match attr.unescape_value() {
                Ok(value) => value.into_owned(),
                Err(_) => decode_entities(&String::from_utf8_lossy(&attr.value)),
            };
            match attr.key.as_ref() {
                b"class" => attrs.class = value,
                b"id" => attrs.id = value,
                b"title" => attrs.title = value,
                _ => {}
            }
        }
        attrs
    }

    fn role(&self) -> Role {
        let mut classes = self.class.split_whitespace();
        if classes.clone().any(|class| class == "ocr_page") {
            Role::Page
        } else if classes.clone().any(|class| class == "ocrx_word") {
            Role::Word
        } else if classes.any(|class| LINE_CLASSES.contains(&class)) {
            Role::Line
        } else {
            Role::Other
        }
    }

    /// `ppageno` is zero-based; the `page_N` id is already one-based.
    fn page_number(&self) -> Option<u32> {
        let ppageno = title_property(&self.title, "ppageno")
            .and_then(|value| value.trim().parse::<u32>().ok())
            .and_then(|number| number.checked_add(1));
        if ppageno.is_some() {
            return ppageno;
        }
        self.id
            .strip_prefix("page_")
            .and_then(|rest| rest.parse::<u32>().ok())
            .filter(|number| *number > 0)
    }

    fn bbox(&self) -> Option<PixelBox> {
        let value = title_property(&self.title, "bbox")?;
        let nums = value
            .split_whitespace()
            .map(|v| v.parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()?;
        if nums.len() != 4 {
            return None;
        }
        Some(PixelBox::new(nums[0], nums[1], nums[2], nums[3]))
    }
}

fn title_property<'a>(title: &'a str, name: &str) -> Option<&'a str> {
    title.split(';').find_map(|part| {
        let part = part.trim();
        let rest = part.strip_prefix(name)?;
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            Some(rest.trim())
        } else {
            None
        }
    })
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&nbsp;", "\u{00a0}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Parses one hOCR document into a page index.
///
/// Fragments with a missing or malformed `bbox` are skipped. Pages are keyed
/// by `ppageno` (or a `page_N` id), falling back to document order.
pub fn parse_hocr(markup: &str, granularity: Granularity) -> Result<PageTextIndex> {
    let mut reader = Reader::from_str(markup);
    reader.trim_text(false);
    reader.check_end_names(false);
    let mut parser = HocrParser::new(granularity);

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => parser.open(&element, false),
            Ok(Event::Empty(element)) => parser.open(&element, true),
            Ok(Event::End(_)) => parser.close(),
            Ok(Event::Text(text)) => {
                let decoded = match text.unescape() {
                    Ok(value) => value.into_owned(),
                    Err(_) => decode_entities(&String::from_utf8_lossy(&text)),
                };
                parser.text(&decoded);
            }
            Ok(Event::CData(data)) => parser.text(&String::from_utf8_lossy(&data)),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                if parser.pages_seen == 0 {
                    return Err(OverlayError::Parse(format!(
                        "malformed markup at byte {}: {}",
                        reader.buffer_position(),
                        err
                    )));
                }
                warn!(
                    "markup became malformed at byte {} ({}); keeping {} page(s) parsed so far",
                    reader.buffer_position(),
                    err,
                    parser.pages_seen
                );
                break;
            }
        }
    }

    if parser.pages_seen == 0 {
        return Err(OverlayError::Parse(
            "no ocr_page element found in markup".to_string(),
        ));
    }
    if parser.skipped > 0 {
        debug!("skipped {} fragment(s) while parsing hOCR", parser.skipped);
    }
    Ok(parser.index)
}

/// Parses several documents (one per page group) into one index. A page key
/// that appears in more than one document keeps fragments in document order.
pub fn parse_documents<S: AsRef<str>>(
    documents: &[S],
    granularity: Granularity,
) -> Result<PageTextIndex> {
    let mut index = PageTextIndex::new();
    for document in documents {
        index.merge(parse_hocr(document.as_ref(), granularity)?);
    }
    Ok(index)
}

struct TsvWord {
    text: String,
    bbox: PixelBox,
}

/// Parses Tesseract TSV output. Word rows (level 5) become fragments, or are
/// grouped per `(block, paragraph, line)` when granularity is lines.
pub fn parse_tsv(tsv: &str, granularity: Granularity) -> Result<PageTextIndex> {
    let mut index = PageTextIndex::new();
    let mut lines: Vec<(u32, Vec<TsvWord>)> = Vec::new();
    let mut line_slots: HashMap<(u32, u32, u32, u32), usize> = HashMap::new();
    let mut pages_seen = 0usize;

    for (idx, row) in tsv.lines().enumerate() {
        if idx == 0 && row.starts_with("level") {
            continue;
        }
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 2 {
            continue;
        }
        let (Ok(level), Ok(page)) = (cols[0].trim().parse::<u32>(), cols[1].trim().parse::<u32>())
        else {
            debug!(row = idx, "skipping tsv row with malformed level/page");
            continue;
        };
        if level == 1 {
            index.ensure_page(page.max(1));
            pages_seen += 1;
            continue;
        }
        if level != 5 || cols.len() < 12 {
            continue;
        }
        let Some(word) = parse_tsv_word(&cols) else {
            debug!(row = idx, "skipping tsv word with malformed fields");
            continue;
        };
        let page = page.max(1);
        match granularity {
            Granularity::Words => index.push(page, TextFragment::new(word.text, word.bbox)),
            Granularity::Lines => {
                let (Ok(block), Ok(par), Ok(line)) = (
                    cols[2].trim().parse::<u32>(),
                    cols[3].trim().parse::<u32>(),
                    cols[4].trim().parse::<u32>(),
                ) else {
                    debug!(row = idx, "skipping tsv word with malformed line key");
                    continue;
                };
                let slot = *line_slots.entry((page, block, par, line)).or_insert_with(|| {
                    lines.push((page, Vec::new()));
                    lines.len() - 1
                });
                lines[slot].1.push(word);
            }
        }
    }

    if pages_seen == 0 && index.is_empty() && lines.is_empty() {
        return Err(OverlayError::Parse(
            "no page rows found in tsv".to_string(),
        ));
    }

    for (page, mut words) in lines {
        words.sort_by_key(|word| word.bbox.left);
        let mut bbox = words[0].bbox;
        for word in &words[1..] {
            bbox = union_bbox(&bbox, &word.bbox);
        }
        let text = join_words(words.iter().map(|word| word.text.as_str()));
        index.push(page, TextFragment::new(text, bbox));
    }
    Ok(index)
}

fn parse_tsv_word(cols: &[&str]) -> Option<TsvWord> {
    let left: u32 = cols[6].trim().parse().ok()?;
    let top: u32 = cols[7].trim().parse().ok()?;
    let width: u32 = cols[8].trim().parse().ok()?;
    let height: u32 = cols[9].trim().parse().ok()?;
    let conf: f32 = cols[10].trim().parse().ok()?;
    let text = cols[11].trim();
    if text.is_empty() || conf < 0.0 {
        return None;
    }
    Some(TsvWord {
        text: text.to_string(),
        bbox: from_extent(left, top, width, height)?,
    })
}
