use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::OverlayError;
use crate::ocr::Granularity;
use crate::overlay::{DEFAULT_FONT_FAMILY, OverlayOptions, PageSize, Rgb, ScaleMode};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub scale_mode: String,
    pub page_size: Option<String>,
    pub image_layer: Option<String>,
    pub text_layer: Option<String>,
    pub text_color: Option<String>,
    pub granularity: String,
    pub font_families: Vec<String>,
    pub font_path: Option<String>,
    pub strict: bool,
    pub title: String,
    pub recognition_languages: Vec<String>,
    pub recognition_psm: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scale_mode: "natural".to_string(),
            page_size: None,
            image_layer: None,
            text_layer: None,
            text_color: None,
            granularity: "lines".to_string(),
            font_families: vec![DEFAULT_FONT_FAMILY.to_string()],
            font_path: None,
            strict: false,
            title: "OCR".to_string(),
            recognition_languages: vec!["eng".to_string()],
            recognition_psm: 3,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    page: Option<PageSettings>,
    layers: Option<LayerSettings>,
    text: Option<TextSettings>,
    output: Option<OutputSettings>,
    recognition: Option<RecognitionSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct PageSettings {
    scale_mode: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LayerSettings {
    image: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TextSettings {
    color: Option<String>,
    granularity: Option<String>,
    font_families: Option<Vec<String>>,
    font_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputSettings {
    strict: Option<bool>,
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RecognitionSettings {
    languages: Option<Vec<String>>,
    psm: Option<u32>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    load_settings_from(&ordered_paths)
}

/// Embedded defaults, then each existing file in order. Later files win per key.
pub fn load_settings_from(paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults);

    for path in paths {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(page) = incoming.page {
            if let Some(mode) = page.scale_mode {
                if !mode.trim().is_empty() {
                    self.scale_mode = mode;
                }
            }
            if let Some(size) = page.size {
                self.page_size = non_empty(size);
            }
        }
        // An empty layer name turns that layer off again.
        if let Some(layers) = incoming.layers {
            if let Some(image) = layers.image {
                self.image_layer = non_empty(image);
            }
            if let Some(text) = layers.text {
                self.text_layer = non_empty(text);
            }
        }
        if let Some(text) = incoming.text {
            if let Some(color) = text.color {
                self.text_color = non_empty(color);
            }
            if let Some(granularity) = text.granularity {
                if !granularity.trim().is_empty() {
                    self.granularity = granularity;
                }
            }
            if let Some(families) = text.font_families {
                let families: Vec<String> =
                    families.into_iter().filter_map(non_empty).collect();
                if !families.is_empty() {
                    self.font_families = families;
                }
            }
            if let Some(path) = text.font_path {
                self.font_path = non_empty(path);
            }
        }
        if let Some(output) = incoming.output {
            if let Some(strict) = output.strict {
                self.strict = strict;
            }
            if let Some(title) = output.title {
                if !title.trim().is_empty() {
                    self.title = title;
                }
            }
        }
        if let Some(recognition) = incoming.recognition {
            if let Some(languages) = recognition.languages {
                let languages: Vec<String> =
                    languages.into_iter().filter_map(non_empty).collect();
                if !languages.is_empty() {
                    self.recognition_languages = languages;
                }
            }
            if let Some(psm) = recognition.psm {
                self.recognition_psm = psm;
            }
        }
    }

    pub fn granularity(&self) -> crate::error::Result<Granularity> {
        self.granularity.parse()
    }

    /// Typed compositor options. Invalid values are reported, never defaulted.
    pub fn overlay_options(&self) -> crate::error::Result<OverlayOptions> {
        let scale_mode: ScaleMode = self.scale_mode.parse()?;
        let page_size = self
            .page_size
            .as_deref()
            .map(str::parse::<PageSize>)
            .transpose()?;
        let text_color = self
            .text_color
            .as_deref()
            .map(str::parse::<Rgb>)
            .transpose()?;
        if self.font_families.is_empty() {
            return Err(OverlayError::Settings("font_families is empty".to_string()));
        }
        Ok(OverlayOptions {
            scale_mode,
            page_size,
            image_layer: self.image_layer.clone(),
            text_layer: self.text_layer.clone(),
            text_color,
            font_families: self.font_families.clone(),
            strict: self.strict,
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".ocr-text-layer"))
        }
    })
}
