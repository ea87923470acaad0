use printpdf::lopdf::content::{Content, Operation};
use printpdf::lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use printpdf::{
    BuiltinFont, Color, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument,
    PdfDocumentReference, PdfLayerReference, TextRenderingMode,
};
use std::collections::HashMap;
use std::io::Cursor;
use tracing::debug;

use crate::error::{OverlayError, Result};
use crate::ocr::{BuiltinFace, FontHandle, FontSource};
use crate::pages::PageImage;

use super::canvas::{Canvas, TextDraw, TextPaint};
use super::geometry::{PageSize, Rect};

/// Canvas backed by a `printpdf` document.
///
/// Everything on a page goes into one content stream in call order. Named
/// layers are marked content tied to one optional content group per name for
/// the whole document; content outside a layer is always visible.
pub struct PdfCanvas {
    doc: PdfDocumentReference,
    page: Option<PdfLayerReference>,
    open_layer: Option<usize>,
    layers: Vec<String>,
    fonts: HashMap<String, IndirectFontRef>,
    pages: usize,
}

impl PdfCanvas {
    pub fn new(title: &str) -> Self {
        Self {
            doc: PdfDocument::empty(title),
            page: None,
            open_layer: None,
            layers: Vec::new(),
            fonts: HashMap::new(),
            pages: 0,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages
    }

    /// Serializes the document.
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.pages == 0 {
            return Err(OverlayError::Canvas("document has no pages".to_string()));
        }
        if self.open_layer.is_some() {
            return Err(OverlayError::Canvas("document finished with an open layer".to_string()));
        }
        let PdfCanvas { doc, layers, .. } = self;
        let raw = doc
            .save_to_bytes()
            .map_err(|err| OverlayError::Canvas(format!("failed to write pdf: {}", err)))?;
        rewrite_optional_content(&raw, &layers)
    }

    fn target(&self) -> Result<PdfLayerReference> {
        self.page
            .clone()
            .ok_or_else(|| OverlayError::Canvas("no page to draw on".to_string()))
    }

    fn font_ref(&mut self, font: &FontHandle) -> Result<IndirectFontRef> {
        if let Some(existing) = self.fonts.get(&font.family) {
            return Ok(existing.clone());
        }
        let added = match &font.source {
            FontSource::Builtin(face) => self.doc.add_builtin_font(builtin_font(*face)),
            FontSource::Embedded { data, .. } => {
                self.doc.add_external_font(Cursor::new(data.as_slice()))
            }
        }
        .map_err(|err| {
            OverlayError::Canvas(format!("failed to add font '{}': {}", font.family, err))
        })?;
        self.fonts.insert(font.family.clone(), added.clone());
        Ok(added)
    }
}

impl Canvas for PdfCanvas {
    fn add_page(&mut self, size: PageSize) -> Result<()> {
        if self.open_layer.is_some() {
            return Err(OverlayError::Canvas("page added while a layer is open".to_string()));
        }
        self.pages += 1;
        let (page, layer) = self.doc.add_page(
            pt_to_mm(size.width),
            pt_to_mm(size.height),
            format!("Page {}", self.pages),
        );
        self.page = Some(self.doc.get_page(page).get_layer(layer));
        Ok(())
    }

    fn begin_layer(&mut self, name: &str) -> Result<()> {
        if self.open_layer.is_some() {
            return Err(OverlayError::Canvas(format!("layer '{}' begun inside another layer", name)));
        }
        let page = self
            .page
            .clone()
            .ok_or_else(|| OverlayError::Canvas("layer begun before any page".to_string()))?;
        let index = match self.layers.iter().position(|layer| layer == name) {
            Some(index) => index,
            None => {
                self.layers.push(name.to_string());
                self.layers.len() - 1
            }
        };
        page.add_operation(Operation::new(
            "BDC",
            vec![
                Object::Name(b"OC".to_vec()),
                Object::Name(layer_key(index).into_bytes()),
            ],
        ));
        self.open_layer = Some(index);
        Ok(())
    }

    fn end_layer(&mut self) -> Result<()> {
        if self.open_layer.take().is_none() {
            return Err(OverlayError::Canvas("end_layer without open layer".to_string()));
        }
        self.target()?.add_operation(Operation::new("EMC", vec![]));
        Ok(())
    }

    fn draw_image(&mut self, image: &PageImage, rect: Rect) -> Result<()> {
        let layer = self.target()?;
        let (width, height) = image.dimensions();

        // printpdf links its own `image` release; hand pixels over as PNG.
        let mut png = Vec::new();
        image::DynamicImage::ImageRgb8(image.image().to_rgb8())
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|err| OverlayError::image_decode(image.source_name(), err))?;
        let decoded = printpdf::image_crate::load_from_memory(&png)
            .map_err(|err| OverlayError::image_decode(image.source_name(), err))?;

        let transform = ImageTransform {
            translate_x: Some(pt_to_mm(rect.x)),
            translate_y: Some(pt_to_mm(rect.y)),
            rotate: None,
            scale_x: Some(rect.width / width.max(1) as f32),
            scale_y: Some(rect.height / height.max(1) as f32),
            dpi: Some(72.0),
        };
        Image::from_dynamic_image(&decoded).add_to_layer(layer, transform);
        debug!(source = image.source_name(), "placed page image");
        Ok(())
    }

    fn draw_text(&mut self, text: &TextDraw<'_>) -> Result<()> {
        let font = self.font_ref(text.font)?;
        let layer = self.target()?;

        layer.begin_text_section();
        layer.set_font(&font, text.size);
        layer.set_text_cursor(pt_to_mm(text.x), pt_to_mm(text.y));
        layer.set_text_scaling(text.horizontal_scale * 100.0);
        match text.paint {
            TextPaint::Invisible => layer.set_text_rendering_mode(TextRenderingMode::Invisible),
            TextPaint::Fill(color) => {
                let (r, g, b) = color.to_unit();
                layer.set_text_rendering_mode(TextRenderingMode::Fill);
                layer.set_fill_color(Color::Rgb(printpdf::Rgb::new(r, g, b, None)));
            }
        }
        for segment in text.run.segments() {
            match &segment.actual_text {
                Some(actual) => {
                    let mut properties = Dictionary::new();
                    properties.set("ActualText", pdf_text_string(actual));
                    layer.add_operation(Operation::new(
                        "BDC",
                        vec![Object::Name(b"Span".to_vec()), Object::Dictionary(properties)],
                    ));
                    layer.write_text(segment.text, &font);
                    layer.add_operation(Operation::new("EMC", vec![]));
                }
                None => layer.write_text(segment.text, &font),
            }
        }
        layer.end_text_section();
        Ok(())
    }
}

fn builtin_font(face: BuiltinFace) -> BuiltinFont {
    match face {
        BuiltinFace::Helvetica => BuiltinFont::Helvetica,
        BuiltinFace::Courier => BuiltinFont::Courier,
    }
}

/// UTF-16BE with byte-order mark, as PDF text strings require outside ASCII.
fn pdf_text_string(value: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn pt_to_mm(pt: f32) -> Mm {
    Mm(pt / 72.0 * 25.4)
}

fn layer_key(index: usize) -> String {
    format!("L{}", index)
}

fn pdf_error(err: impl std::fmt::Display) -> OverlayError {
    OverlayError::Canvas(format!("failed to write pdf: {}", err))
}

/// Replaces printpdf's per-page layer groups with one optional content group
/// per layer name. Unlayered content ends up outside any group.
fn rewrite_optional_content(raw: &[u8], layers: &[String]) -> Result<Vec<u8>> {
    let mut doc = Document::load_mem(raw).map_err(pdf_error)?;

    let groups: Vec<ObjectId> = layers
        .iter()
        .map(|name| {
            doc.add_object(Object::Dictionary(Dictionary::from_iter(vec![
                ("Type", Object::Name(b"OCG".to_vec())),
                ("Name", pdf_text_string(name)),
            ])))
        })
        .collect();
    let properties = Dictionary::from_iter(
        groups
            .iter()
            .enumerate()
            .map(|(index, id)| (layer_key(index), Object::Reference(*id))),
    );

    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    for page_id in page_ids {
        let content = doc.get_page_content(page_id).map_err(pdf_error)?;
        let mut operations = Content::decode(&content).map_err(pdf_error)?.operations;
        let wrapped = operations.first().is_some_and(|op| {
            op.operator == "BDC"
                && op.operands.first().and_then(|name| name.as_name().ok()) == Some(&b"OC"[..])
        });
        if wrapped && operations.last().is_some_and(|op| op.operator == "EMC") {
            operations.remove(0);
            operations.pop();
        }
        let encoded = Content { operations }.encode().map_err(pdf_error)?;
        doc.change_page_content(page_id, encoded).map_err(pdf_error)?;

        let resources = page_resources_mut(&mut doc, page_id)?;
        resources.remove(b"Properties");
        if !groups.is_empty() {
            resources.set("Properties", Object::Dictionary(properties.clone()));
        }
    }

    let catalog = doc.catalog_mut().map_err(pdf_error)?;
    catalog.remove(b"OCProperties");
    if !groups.is_empty() {
        let refs: Vec<Object> = groups.iter().map(|id| Object::Reference(*id)).collect();
        catalog.set(
            "OCProperties",
            Object::Dictionary(Dictionary::from_iter(vec![
                ("OCGs", Object::Array(refs.clone())),
                (
                    "D",
                    Object::Dictionary(Dictionary::from_iter(vec![
                        ("Order", Object::Array(refs.clone())),
                        ("ON", Object::Array(refs)),
                    ])),
                ),
            ])),
        );
    }
    doc.prune_objects();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(pdf_error)?;
    Ok(bytes)
}

fn page_resources_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary> {
    let existing = doc
        .get_dictionary(page_id)
        .and_then(|page| page.get(b"Resources"))
        .ok()
        .cloned();
    let resources_id = match existing {
        Some(Object::Reference(id)) => id,
        other => {
            let inline = match other {
                Some(Object::Dictionary(dict)) => dict,
                _ => Dictionary::new(),
            };
            let id = doc.add_object(Object::Dictionary(inline));
            doc.get_object_mut(page_id)
                .and_then(Object::as_dict_mut)
                .map_err(pdf_error)?
                .set("Resources", Object::Reference(id));
            id
        }
    };
    doc.get_object_mut(resources_id)
        .and_then(Object::as_dict_mut)
        .map_err(pdf_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{FontRegistry, PageTextIndex, PixelBox, TextFragment};
    use crate::overlay::{Compositor, OverlayOptions, Rgb};

    fn composite(options: OverlayOptions, page_count: u32) -> Vec<u8> {
        let pages: Vec<_> = (0..page_count)
            .map(|_| PageImage::new(image::DynamicImage::new_rgb8(40, 20), "scan.png"))
            .collect();
        let mut index = PageTextIndex::new();
        for page in 1..=page_count {
            index.push(page, TextFragment::new("Hello", PixelBox::new(2, 2, 30, 10)));
        }
        let mut fonts = FontRegistry::without_system_fonts();
        let output = Compositor::new(options, &mut fonts)
            .build(PdfCanvas::new("scan"), &pages, &index)
            .expect("build");
        output.canvas.finish().expect("pdf")
    }

    /// Image, text and marked-content operators of each page, in stream order.
    fn page_ops(bytes: &[u8]) -> Vec<Vec<String>> {
        let doc = Document::load_mem(bytes).expect("load");
        doc.get_pages()
            .into_values()
            .map(|page_id| {
                let content = doc.get_page_content(page_id).expect("content");
                Content::decode(&content)
                    .expect("decode")
                    .operations
                    .into_iter()
                    .filter(|op| matches!(op.operator.as_str(), "BDC" | "EMC" | "Do" | "Tj"))
                    .map(|op| {
                        let names: Vec<_> = op
                            .operands
                            .iter()
                            .filter_map(|operand| operand.as_name_str().ok())
                            .collect();
                        match op.operator.as_str() {
                            "BDC" => format!("BDC /{}", names.join(" /")),
                            other => other.to_string(),
                        }
                    })
                    .collect()
            })
            .collect()
    }

    fn optional_content_groups(bytes: &[u8]) -> usize {
        let doc = Document::load_mem(bytes).expect("load");
        doc.objects
            .values()
            .filter(|object| {
                object
                    .as_dict()
                    .and_then(|dict| dict.get(b"Type"))
                    .and_then(Object::as_name)
                    .is_ok_and(|name| name == b"OCG")
            })
            .count()
    }

    #[test]
    fn unlayered_text_is_drawn_after_a_layered_image() {
        let bytes = composite(
            OverlayOptions {
                image_layer: Some("Image".to_string()),
                text_color: Some(Rgb::new(0, 0, 0)),
                ..OverlayOptions::default()
            },
            1,
        );
        assert_eq!(page_ops(&bytes), vec![vec!["BDC /OC /L0", "Do", "EMC", "Tj"]]);
        assert_eq!(optional_content_groups(&bytes), 1);
    }

    #[test]
    fn shared_layer_wraps_image_and_text_once() {
        let bytes = composite(
            OverlayOptions {
                image_layer: Some("OCR".to_string()),
                text_layer: Some("OCR".to_string()),
                ..OverlayOptions::default()
            },
            1,
        );
        assert_eq!(page_ops(&bytes), vec![vec!["BDC /OC /L0", "Do", "Tj", "EMC"]]);
        assert_eq!(optional_content_groups(&bytes), 1);
    }

    #[test]
    fn unlayered_content_is_not_optional() {
        let bytes = composite(OverlayOptions::default(), 1);
        assert_eq!(page_ops(&bytes), vec![vec!["Do", "Tj"]]);
        assert_eq!(optional_content_groups(&bytes), 0);
        let doc = Document::load_mem(&bytes).expect("load");
        assert!(!doc.catalog().expect("catalog").has(b"OCProperties"));
    }

    #[test]
    fn layer_names_map_to_one_group_across_pages() {
        let bytes = composite(
            OverlayOptions {
                image_layer: Some("Image".to_string()),
                text_layer: Some("Text".to_string()),
                ..OverlayOptions::default()
            },
            2,
        );
        let page = vec!["BDC /OC /L0", "Do", "EMC", "BDC /OC /L1", "Tj", "EMC"];
        assert_eq!(page_ops(&bytes), vec![page.clone(), page]);
        assert_eq!(optional_content_groups(&bytes), 2);
    }

    #[test]
    fn composited_document_serializes() {
        let pages = vec![PageImage::new(image::DynamicImage::new_rgb8(40, 20), "scan.png")];
        let mut index = PageTextIndex::new();
        index.push(1, TextFragment::new("Hello", PixelBox::new(2, 2, 30, 10)));
        index.push(1, TextFragment::new("日本", PixelBox::new(2, 12, 30, 18)));
        let options = OverlayOptions {
            image_layer: Some("Image".to_string()),
            text_layer: Some("Text".to_string()),
            ..OverlayOptions::default()
        };
        let mut fonts = FontRegistry::without_system_fonts();
        let output = Compositor::new(options, &mut fonts)
            .build(PdfCanvas::new("scan"), &pages, &index)
            .expect("build");
        assert_eq!(output.canvas.page_count(), 1);
        let bytes = output.canvas.finish().expect("pdf");
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(matches!(
            PdfCanvas::new("empty").finish(),
            Err(OverlayError::Canvas(_))
        ));
    }

    #[test]
    fn layer_calls_must_balance() {
        let mut canvas = PdfCanvas::new("layers");
        assert!(canvas.begin_layer("early").is_err());
        canvas.add_page(PageSize::LETTER).expect("page");
        assert!(canvas.end_layer().is_err());
        canvas.begin_layer("Text").expect("begin");
        assert!(canvas.begin_layer("Nested").is_err());
        canvas.end_layer().expect("end");
    }

    #[test]
    fn actual_text_is_utf16_with_bom() {
        let Object::String(bytes, _) = pdf_text_string("あ") else {
            panic!("expected string");
        };
        assert_eq!(bytes, vec![0xFE, 0xFF, 0x30, 0x42]);
    }
}
