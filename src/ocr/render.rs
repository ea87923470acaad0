use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use resvg::render;
use std::io::Cursor;
use tiny_skia::Pixmap;
use usvg::{Options, Tree};

use super::{FragmentBox, TextFragment};
use crate::pages::PageImage;

const BOX_STROKE: &str = "#00c853";
const EXPLICIT_STROKE: &str = "#2962ff";

/// Page image with one outlined box per fragment, in image pixel space.
pub fn render_bbox_svg(page: &PageImage, fragments: &[TextFragment]) -> Result<String> {
    let (width, height) = page.dimensions();
    let mut png = Vec::new();
    page.image()
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .with_context(|| format!("failed to encode page image: {}", page.source_name()))?;
    let data_uri = format!("data:image/png;base64,{}", BASE64.encode(&png));

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = width,
        h = height
    ));

    for fragment in fragments {
        let (x, y, w, h, stroke) = match fragment.bbox {
            FragmentBox::Pixels(bbox) => (
                bbox.left as f32,
                bbox.top as f32,
                bbox.width().max(0) as f32,
                bbox.height().max(0) as f32,
                BOX_STROKE,
            ),
            // Explicit rects are bottom-left based; flip for SVG.
            FragmentBox::Explicit(rect) => (
                rect.x,
                height as f32 - rect.y - rect.height,
                rect.width.max(0.0),
                rect.height.max(0.0),
                EXPLICIT_STROKE,
            ),
        };
        svg.push_str(&format!(
            r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="none" stroke="{stroke}" stroke-width="2"><title>{title}</title></rect>"#,
            x = x,
            y = y,
            w = w,
            h = h,
            stroke = stroke,
            title = escape_xml(&fragment.text)
        ));
    }

    svg.push_str("</svg>");
    Ok(svg)
}

/// Rasterises an overlay SVG to PNG bytes.
pub fn render_overlay_png(svg: &str) -> Result<Vec<u8>> {
    let tree = Tree::from_str(svg, &Options::default()).with_context(|| "failed to parse SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());
    let image = image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))?;
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .with_context(|| "failed to encode overlay png")?;
    Ok(bytes)
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::PixelBox;
    use crate::overlay::Rect;

    fn page() -> PageImage {
        PageImage::new(image::DynamicImage::new_rgb8(40, 30), "scan.png")
    }

    #[test]
    fn boxes_are_outlined_in_pixel_space() {
        let fragments = vec![
            TextFragment::new("a<b", PixelBox::new(2, 3, 11, 7)),
            TextFragment::explicit("flip", Rect::new(0.0, 0.0, 10.0, 5.0)),
        ];
        let svg = render_bbox_svg(&page(), &fragments).expect("svg");
        assert!(svg.contains(r#"<rect x="2" y="3" width="10" height="5""#));
        assert!(svg.contains(r#"<rect x="0" y="25" width="10" height="5""#));
        assert!(svg.contains("<title>a&lt;b</title>"));
    }

    #[test]
    fn overlay_rasterises_to_png() {
        let svg = render_bbox_svg(&page(), &[]).expect("svg");
        let bytes = render_overlay_png(&svg).expect("png");
        let decoded = image::load_from_memory(&bytes).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
        assert!(render_overlay_png("<svg").is_err());
    }
}
