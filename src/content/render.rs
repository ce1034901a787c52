//! Headless-browser screenshot and OCR of the message as a reader would see it.

use crate::error::{AnalysisError, AnalysisResult};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;

const RENDER_HEAD: &str = "<meta charset=\"utf-8\">\
<style>* { font-family: Verdana, Geneva, sans-serif !important; }</style>";

const OCR_NOISE: &str = "Estimating resolution as";

static CID_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)cid:([^"'\s)>]+)"#).expect("cid regex is valid"));
static HEAD_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head[^>]*>").expect("head regex is valid"));

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Renders the HTML document to a PNG inside `out_dir` and returns its path.
    async fn render(&self, html: &str, out_dir: &Path) -> AnalysisResult<PathBuf>;
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image: &Path) -> AnalysisResult<String>;
}

/// Rewrites the message HTML so it renders offline and uniformly.
///
/// `cid:` references become `file://` links to the saved parts, and a UTF-8
/// meta tag plus a single font are injected into the head.
pub fn prepare_html(html: &str, text: &str, images: &HashMap<String, PathBuf>) -> String {
    let body = if html.trim().is_empty() {
        format!("<pre>{}</pre>", escape_html(text))
    } else {
        html.to_string()
    };

    let body = CID_REF.replace_all(&body, |caps: &regex::Captures| {
        match images.get(&caps[1]) {
            Some(path) => format!("file://{}", path.display()),
            None => caps[0].to_string(),
        }
    });

    if let Some(m) = HEAD_TAG.find(&body) {
        format!("{}{}{}", &body[..m.end()], RENDER_HEAD, &body[m.end()..])
    } else {
        format!("<html><head>{RENDER_HEAD}</head><body>{body}</body></html>")
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Drops the engine's diagnostic lines and surrounding whitespace.
pub fn clean_ocr_output(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.contains(OCR_NOISE))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Screenshots through a Chromium-compatible browser in headless mode.
pub struct BrowserRenderer {
    command: String,
    width: u32,
    height: u32,
}

impl BrowserRenderer {
    pub fn new(command: &str, width: u32, height: u32) -> Self {
        Self {
            command: command.to_string(),
            width,
            height,
        }
    }
}

#[async_trait]
impl Renderer for BrowserRenderer {
    async fn render(&self, html: &str, out_dir: &Path) -> AnalysisResult<PathBuf> {
        let page = out_dir.join("render.html");
        let screenshot = out_dir.join("screenshot.png");
        tokio::fs::write(&page, html).await?;

        let output = Command::new(&self.command)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--hide-scrollbars")
            .arg("--allow-file-access-from-files")
            .arg(format!("--window-size={},{}", self.width, self.height))
            .arg(format!("--screenshot={}", screenshot.display()))
            .arg(format!("file://{}", page.display()))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AnalysisError::ExternalService(format!("{}: {e}", self.command)))?;

        if !output.status.success() || !screenshot.exists() {
            return Err(AnalysisError::ExternalService(format!(
                "renderer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(screenshot)
    }
}

/// OCR through the `tesseract` command line.
pub struct TesseractOcr {
    command: String,
}

impl TesseractOcr {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

#[async_trait]
impl TextExtractor for TesseractOcr {
    async fn extract_text(&self, image: &Path) -> AnalysisResult<String> {
        let output = Command::new(&self.command)
            .arg(image)
            .arg("stdout")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AnalysisError::ExternalService(format!("{}: {e}", self.command)))?;
        if !output.status.success() {
            return Err(AnalysisError::ExternalService(format!(
                "ocr exited with {}",
                output.status
            )));
        }
        Ok(clean_ocr_output(&String::from_utf8_lossy(&output.stdout)))
    }
}
