use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "ocr-text-layer",
    version,
    about = "Overlay recognised text on page images as a searchable PDF"
)]
struct Cli {
    /// Page images (PNG/JPEG/TIFF/GIF...). Multi-frame files become several pages.
    #[arg(required_unless_present = "show_languages")]
    inputs: Vec<PathBuf>,

    /// Output PDF path
    #[arg(short = 'o', long = "output", default_value = "out.pdf")]
    output: PathBuf,

    /// hOCR or TSV recognition output to use instead of running tesseract (repeatable)
    #[arg(short = 'm', long = "markup")]
    markup: Vec<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<PathBuf>,

    /// Page scaling: natural, fit, width, height
    #[arg(long = "scale-mode")]
    scale_mode: Option<String>,

    /// Fixed page size: letter, legal, a4, a3 or WIDTHxHEIGHT in points
    #[arg(long = "page-size")]
    page_size: Option<String>,

    /// Layer name for the page image
    #[arg(long = "image-layer")]
    image_layer: Option<String>,

    /// Layer name for the text (same as --image-layer to share one layer)
    #[arg(long = "text-layer")]
    text_layer: Option<String>,

    /// Draw text visibly in this hex colour instead of invisibly
    #[arg(long = "text-color")]
    text_color: Option<String>,

    /// Fragment granularity: lines or words
    #[arg(short = 'g', long = "granularity")]
    granularity: Option<String>,

    /// Fail when a character cannot be shown by the font
    #[arg(long = "strict")]
    strict: bool,

    /// Font file to embed (becomes the primary family)
    #[arg(long = "font")]
    font: Option<PathBuf>,

    /// Primary font family
    #[arg(long = "font-family")]
    font_family: Option<String>,

    /// Recognition languages, e.g. eng+jpn
    #[arg(short = 'l', long = "languages")]
    languages: Option<String>,

    /// Write the recognised text index as JSON
    #[arg(long = "dump-json")]
    dump_json: Option<PathBuf>,

    /// Write one PNG per page with fragment boxes into this directory
    #[arg(long = "debug-overlay")]
    debug_overlay: Option<PathBuf>,

    /// Show installed recognition languages and exit
    #[arg(long = "show-languages")]
    show_languages: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    ocr_text_layer::logging::init(cli.verbose)?;

    let config = ocr_text_layer::Config {
        inputs: cli.inputs,
        output: cli.output,
        markup: cli.markup,
        settings_path: cli.read_settings,
        scale_mode: cli.scale_mode,
        page_size: cli.page_size,
        image_layer: cli.image_layer,
        text_layer: cli.text_layer,
        text_color: cli.text_color,
        granularity: cli.granularity,
        strict: cli.strict,
        font: cli.font,
        font_family: cli.font_family,
        languages: cli.languages,
        dump_json: cli.dump_json,
        debug_overlay: cli.debug_overlay,
        show_languages: cli.show_languages,
    };
    let output = ocr_text_layer::run(config)?;
    println!("{}", output);
    Ok(())
}
