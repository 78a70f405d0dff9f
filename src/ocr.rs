//! OCR fallback for image-based PDFs.
//!
//! Pages are rasterized to PNG at a fixed DPI and sent one at a time
//! to a vision-capable model with a verbatim-transcription instruction.
//! OCR runs page by page and produces a sequence of
//! `(page_index, Result<text>)` pairs; the aggregator joins whatever
//! pages succeeded, in page order. One corrupted page does not
//! invalidate an otherwise-usable document.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::OcrConfig;

const OCR_PROMPT: &str = "Transcribe all text visible in this image verbatim. \
Preserve the original formatting and paragraph structure. \
Output only the transcribed text, with no explanation or commentary.";

/// Renders document pages to PNG images.
pub trait PageRasterizer: Send + Sync {
    fn render_pages(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>>;
}

/// Rasterizer backed by pdfium. Binds the system pdfium library at
/// call time.
pub struct PdfiumRasterizer {
    dpi: f32,
}

impl PdfiumRasterizer {
    pub fn new(dpi: f32) -> Self {
        Self { dpi }
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn render_pages(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        use pdfium_render::prelude::*;

        let bindings = Pdfium::bind_to_system_library()
            .map_err(|e| anyhow!("Failed to bind pdfium library: {}", e))?;
        let pdfium = Pdfium::new(bindings);
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| anyhow!("Failed to open PDF for rendering: {}", e))?;

        let render_config = PdfRenderConfig::new().scale_page_by_factor(self.dpi / 72.0);

        let mut pages = Vec::new();
        for page in document.pages().iter() {
            let image = page
                .render_with_config(&render_config)
                .map_err(|e| anyhow!("Failed to render page: {}", e))?
                .as_image();
            let mut png = Vec::new();
            image.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;
            pages.push(png);
        }
        Ok(pages)
    }
}

/// Transcribes a single page image to text.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn transcribe_page(&self, png: &[u8]) -> Result<String>;
}

/// Vision client for an OpenAI-compatible chat completions endpoint
/// that accepts `image_url` content parts.
pub struct HttpVisionClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    max_output_tokens: u32,
}

impl HttpVisionClient {
    /// # Errors
    ///
    /// Returns an error if `ocr.base_url` or `ocr.model` is not
    /// configured, or the API key environment variable is unset.
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow!("ocr.base_url required for the vision client"))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("ocr.model required for the vision client"))?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            model,
            api_key,
            max_output_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl VisionClient for HttpVisionClient {
    async fn transcribe_page(&self, png: &[u8]) -> Result<String> {
        let data_uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        );

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "image_url", "image_url": { "url": data_uri } },
                    { "type": "text", "text": OCR_PROMPT },
                ],
            }],
            "max_tokens": self.max_output_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Vision API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow!("Invalid vision response: missing message content"))?;

        Ok(content.trim().to_string())
    }
}

/// Drives rasterization and page-by-page transcription.
pub struct OcrEngine {
    rasterizer: Arc<dyn PageRasterizer>,
    vision: Arc<dyn VisionClient>,
}

impl OcrEngine {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>, vision: Arc<dyn VisionClient>) -> Self {
        Self { rasterizer, vision }
    }

    /// Standard wiring: pdfium rasterization at the configured DPI
    /// and the HTTP vision client.
    pub fn from_config(config: &OcrConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(PdfiumRasterizer::new(config.render_dpi)),
            Arc::new(HttpVisionClient::new(config)?),
        ))
    }

    /// OCR every page, returning one result per page in page order.
    /// Rasterization failure is fatal; transcription failures are
    /// per-page and left to the aggregator.
    pub async fn ocr_pages(&self, bytes: &[u8]) -> Result<Vec<(usize, Result<String>)>> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let owned = bytes.to_vec();
        let images =
            tokio::task::spawn_blocking(move || rasterizer.render_pages(&owned)).await??;
        debug!(pages = images.len(), "rendered PDF pages for OCR");

        // Sequential on purpose: bounds concurrent calls to the
        // vision service to one page at a time.
        let mut results = Vec::with_capacity(images.len());
        for (index, png) in images.iter().enumerate() {
            results.push((index, self.vision.transcribe_page(png).await));
        }
        Ok(results)
    }

    /// Rasterize, transcribe, and join the surviving pages.
    pub async fn ocr_document(&self, bytes: &[u8]) -> Result<String> {
        let results = self.ocr_pages(bytes).await?;
        Ok(assemble_pages(results))
    }
}

/// Join successful page texts in page order, separated by blank
/// lines. Failed or empty pages are skipped with a warning.
pub fn assemble_pages(results: Vec<(usize, Result<String>)>) -> String {
    let mut texts = Vec::new();
    for (index, result) in results {
        match result {
            Ok(text) if !text.is_empty() => texts.push(text),
            Ok(_) => debug!(page = index + 1, "OCR returned empty page, skipping"),
            Err(e) => warn!(page = index + 1, error = %e, "OCR page failed, skipping"),
        }
    }
    texts.join("\n\n")
}
