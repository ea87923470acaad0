use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub mod error;
pub mod logging;
pub mod ocr;
pub mod overlay;
pub mod pages;
pub mod settings;

pub use error::OverlayError;
pub use ocr::{
    FontRegistry, FontService, Granularity, PageTextIndex, Recognizer, TesseractCli, TextFragment,
};
pub use overlay::{BuildOutput, BuildReport, Canvas, Compositor, OverlayOptions, PdfCanvas};
pub use pages::PageImage;

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Page images, in page order. Multi-frame files expand in place.
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    /// hOCR or TSV documents. Without any, the images are recognised with tesseract.
    pub markup: Vec<PathBuf>,
    pub settings_path: Option<PathBuf>,
    pub scale_mode: Option<String>,
    pub page_size: Option<String>,
    pub image_layer: Option<String>,
    pub text_layer: Option<String>,
    pub text_color: Option<String>,
    pub granularity: Option<String>,
    pub strict: bool,
    pub font: Option<PathBuf>,
    pub font_family: Option<String>,
    pub languages: Option<String>,
    pub dump_json: Option<PathBuf>,
    pub debug_overlay: Option<PathBuf>,
    pub show_languages: bool,
}

pub fn run(config: Config) -> Result<String> {
    if config.show_languages {
        let languages = ocr::list_tesseract_languages("tesseract")?;
        return Ok(languages.join("\n"));
    }

    let settings = settings::load_settings(config.settings_path.as_deref())?;
    run_with_settings(settings, &config)
}

/// Builds the PDF from already loaded settings. Overrides in `config` still apply.
pub fn run_with_settings(mut settings: settings::Settings, config: &Config) -> Result<String> {
    apply_overrides(&mut settings, config);
    let mut options = settings
        .overlay_options()
        .with_context(|| "invalid overlay settings")?;
    let granularity = settings.granularity()?;

    if config.inputs.is_empty() {
        return Err(anyhow!("no input images given"));
    }
    let pages = pages::load_batch(&config.inputs)?;
    info!(inputs = config.inputs.len(), pages = pages.len(), "loaded page images");

    let index = if config.markup.is_empty() {
        let recognizer = TesseractCli::new(
            settings.recognition_languages.join("+"),
            settings.recognition_psm,
        );
        recognizer.recognize(&pages, granularity)?
    } else {
        load_markup(&config.markup, granularity)?
    };
    debug!(
        pages = index.page_count(),
        fragments = index.fragment_count(),
        "text index ready"
    );

    if let Some(path) = &config.dump_json {
        let json = serde_json::to_string_pretty(&index)
            .with_context(|| "failed to encode text index")?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    }
    if let Some(dir) = &config.debug_overlay {
        write_debug_overlays(dir, &pages, &index)?;
    }

    let mut fonts = FontRegistry::new();
    if let Some(path) = settings.font_path.as_deref() {
        let family = fonts
            .register_file(Path::new(path))
            .with_context(|| format!("failed to load font: {}", path))?;
        options.font_families.retain(|name| !name.eq_ignore_ascii_case(&family));
        options.font_families.insert(0, family);
    }

    let output = Compositor::new(options, &mut fonts).build(
        PdfCanvas::new(&settings.title),
        &pages,
        &index,
    )?;
    let bytes = output.canvas.finish()?;
    fs::write(&config.output, bytes)
        .with_context(|| format!("failed to write {}", config.output.display()))?;

    Ok(format_summary(&config.output, &output.report))
}

fn apply_overrides(settings: &mut settings::Settings, config: &Config) {
    if let Some(mode) = &config.scale_mode {
        settings.scale_mode = mode.clone();
    }
    if let Some(size) = &config.page_size {
        settings.page_size = Some(size.clone());
    }
    if let Some(layer) = &config.image_layer {
        settings.image_layer = Some(layer.clone());
    }
    if let Some(layer) = &config.text_layer {
        settings.text_layer = Some(layer.clone());
    }
    if let Some(color) = &config.text_color {
        settings.text_color = Some(color.clone());
    }
    if let Some(granularity) = &config.granularity {
        settings.granularity = granularity.clone();
    }
    if config.strict {
        settings.strict = true;
    }
    if let Some(path) = &config.font {
        settings.font_path = Some(path.display().to_string());
    }
    if let Some(family) = &config.font_family {
        settings.font_families.retain(|name| name != family);
        settings.font_families.insert(0, family.clone());
    }
    if let Some(languages) = &config.languages {
        settings.recognition_languages = languages
            .split(['+', ','])
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .map(str::to_string)
            .collect();
    }
}

/// Reads markup files; `.tsv` files (or files with a TSV header) are parsed as
/// tabular output, everything else as hOCR.
fn load_markup(paths: &[PathBuf], granularity: Granularity) -> Result<PageTextIndex> {
    let mut hocr = Vec::new();
    let mut index = PageTextIndex::new();
    for path in paths {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read markup: {}", path.display()))?;
        let is_tsv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("tsv"))
            .unwrap_or(false)
            || content.starts_with("level\t");
        if is_tsv {
            index.merge(
                ocr::parse_tsv(&content, granularity)
                    .with_context(|| format!("failed to parse {}", path.display()))?,
            );
        } else {
            hocr.push(content);
        }
    }
    if !hocr.is_empty() {
        let mut merged = ocr::parse_documents(&hocr, granularity)?;
        merged.merge(index);
        index = merged;
    }
    Ok(index)
}

fn write_debug_overlays(dir: &Path, pages: &[PageImage], index: &PageTextIndex) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create debug directory: {}", dir.display()))?;
    for (idx, page) in pages.iter().enumerate() {
        let page_number = idx as u32 + 1;
        let svg = ocr::render_bbox_svg(page, index.page(page_number))?;
        let png = ocr::render_overlay_png(&svg)?;
        let path = dir.join(format!("page-{:03}.png", page_number));
        fs::write(&path, png).with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "wrote debug overlay");
    }
    Ok(())
}

fn format_summary(output: &Path, report: &BuildReport) -> String {
    let mut summary = format!(
        "{}: {} page(s), {} fragment(s) drawn, {} skipped",
        output.display(),
        report.pages,
        report.fragments_drawn,
        report.fragments_skipped
    );
    for warning in &report.warnings {
        summary.push_str("\nwarning: ");
        summary.push_str(warning);
    }
    summary
}
