use std::io::Write;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::error::{OverlayError, Result};
use crate::ocr::{Granularity, PageTextIndex};
use crate::pages::PageImage;

use super::Recognizer;
use super::parse::parse_hocr;

/// Recognition through the `tesseract` command line tool, hOCR output.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: String,
    languages: String,
    psm: u32,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            languages: "eng".to_string(),
            psm: 3,
        }
    }
}

impl TesseractCli {
    pub fn new(languages: impl Into<String>, psm: u32) -> Self {
        Self {
            languages: languages.into(),
            psm,
            ..Self::default()
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Keeps the requested languages that are installed. Falls back to the
    /// request verbatim when the installed list cannot be read.
    fn effective_languages(&self) -> Result<String> {
        let requested = self.languages.trim();
        if requested.is_empty() {
            return Err(OverlayError::Recognition(
                "ocr languages is empty".to_string(),
            ));
        }
        let available = match list_tesseract_languages(&self.binary) {
            Ok(list) => list,
            Err(_) => return Ok(requested.to_string()),
        };

        let mut chosen = Vec::new();
        let mut missing = Vec::new();
        for raw in requested.split(['+', ',', ' ']) {
            let lang = raw.trim();
            if lang.is_empty() {
                continue;
            }
            if available.iter().any(|value| value == lang) {
                chosen.push(lang.to_string());
            } else {
                missing.push(lang.to_string());
            }
        }

        if chosen.is_empty() {
            return Err(OverlayError::Recognition(format!(
                "ocr language(s) not available: {} (available: {})",
                missing.join(", "),
                available.join(", ")
            )));
        }
        if !missing.is_empty() {
            warn!(
                "ocr language(s) not available: {} (available: {})",
                missing.join(", "),
                available.join(", ")
            );
        }
        Ok(chosen.join("+"))
    }

    fn run_hocr(&self, path: &Path, languages: &str) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg(path)
            .arg("stdout")
            .arg("-l")
            .arg(languages)
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("hocr")
            .output()
            .map_err(|err| {
                OverlayError::Recognition(format!(
                    "failed to run {} (is it installed?): {}",
                    self.binary, err
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OverlayError::Recognition(format!(
                "{} failed: {}",
                self.binary,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Recognizer for TesseractCli {
    fn recognize(&self, pages: &[PageImage], granularity: Granularity) -> Result<PageTextIndex> {
        let languages = self.effective_languages()?;
        let mut index = PageTextIndex::new();
        for (idx, page) in pages.iter().enumerate() {
            let page_number = idx as u32 + 1;
            // Dropped (and deleted) at the end of each iteration, also on `?`.
            let mut tmp = tempfile::Builder::new()
                .prefix("ocr-frame-")
                .suffix(".png")
                .tempfile()?;
            page.image()
                .write_to(&mut tmp, image::ImageFormat::Png)
                .map_err(|err| OverlayError::image_decode(page.source_name(), err))?;
            tmp.flush()?;

            debug!(page = page_number, path = %tmp.path().display(), "running recognition");
            let hocr = self.run_hocr(tmp.path(), &languages)?;
            let parsed = parse_hocr(&hocr, granularity)?;
            let fragments = parsed
                .page_numbers()
                .flat_map(|number| parsed.page(number).to_vec())
                .collect::<Vec<_>>();
            info!(page = page_number, fragments = fragments.len(), "recognised page");
            index.extend_page(page_number, fragments);
        }
        Ok(index)
    }
}

/// Lists installed language packs (informational).
pub fn list_tesseract_languages(binary: &str) -> Result<Vec<String>> {
    let output = Command::new(binary)
        .arg("--list-langs")
        .output()
        .map_err(|err| {
            OverlayError::Recognition(format!("failed to run {} --list-langs: {}", binary, err))
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OverlayError::Recognition(format!(
            "{} --list-langs failed: {}",
            binary,
            stderr.trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_language_list(&stdout))
}

fn parse_language_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}
