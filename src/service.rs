//! OCR service facade.
//!
//! Owns the lazily loaded model/tokenizer pair and implements the four
//! service operations on top of it. The pair is loaded at most once per
//! process: concurrent first callers wait on the same load.

use crate::model::{
    load_model_pair, InferenceOutput, InferenceRequest, LoadError, LoadedModel, ModelLoader,
    MODEL_NAME,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

pub const DEFAULT_PROMPT: &str = "Free OCR.";
pub const MARKDOWN_PROMPT: &str = "<|grounding|>Convert the document to markdown.";
pub const DEFAULT_BASE_SIZE: u32 = 1024;
pub const DEFAULT_IMAGE_SIZE: u32 = 640;

/// Placeholder the model replaces with the image embedding.
const IMAGE_MARKER: &str = "<image>\n";

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_base_size() -> u32 {
    DEFAULT_BASE_SIZE
}

fn default_image_size() -> u32 {
    DEFAULT_IMAGE_SIZE
}

fn default_true() -> bool {
    true
}

/// Text extraction request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OcrRequest {
    /// Path or identifier of the image; not validated here.
    pub image: String,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Base resolution. The model knows 512, 640, 1024 and 1280; other values pass through.
    #[serde(default = "default_base_size")]
    pub base_size: u32,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default = "default_true")]
    pub crop_mode: bool,
}

#[cfg(test)]
impl OcrRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            prompt: default_prompt(),
            base_size: DEFAULT_BASE_SIZE,
            image_size: DEFAULT_IMAGE_SIZE,
            crop_mode: true,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

/// Markdown conversion request. The prompt is fixed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarkdownRequest {
    pub image: String,
    #[serde(default = "default_base_size")]
    pub base_size: u32,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default = "default_true")]
    pub crop_mode: bool,
}

#[cfg(test)]
impl MarkdownRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            base_size: DEFAULT_BASE_SIZE,
            image_size: DEFAULT_IMAGE_SIZE,
            crop_mode: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OcrResponse {
    pub text: String,
    pub tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkdownResponse {
    pub markdown: String,
    pub tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Outcome of `setup`. Failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupStatus {
    pub status: Status,
    pub model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: Status,
    pub model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

pub struct OcrService {
    loader: Arc<dyn ModelLoader>,
    scratch_dir: PathBuf,
    loaded: Arc<OnceCell<LoadedModel>>,
}

impl OcrService {
    pub fn new(loader: Arc<dyn ModelLoader>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            loader,
            scratch_dir: scratch_dir.into(),
            loaded: Arc::new(OnceCell::new()),
        }
    }

    /// Resident model, loading it first if needed. A failed load leaves the
    /// cell empty so a later call can retry.
    ///
    /// The load runs in its own task: a caller that goes away mid-load does
    /// not cancel it, and later callers wait on the same in-flight load.
    async fn model(&self) -> Result<&LoadedModel, LoadError> {
        if let Some(loaded) = self.loaded.get() {
            return Ok(loaded);
        }

        let cell = Arc::clone(&self.loaded);
        let loader = Arc::clone(&self.loader);
        tokio::spawn(async move {
            cell.get_or_try_init(|| load_model_pair(loader.as_ref(), MODEL_NAME))
                .await
                .map(|_| ())
        })
        .await
        .map_err(|e| LoadError::Interrupted {
            model: MODEL_NAME.to_string(),
            reason: e.to_string(),
        })??;

        self.loaded.get().ok_or_else(|| LoadError::Interrupted {
            model: MODEL_NAME.to_string(),
            reason: "load finished without a model".to_string(),
        })
    }

    /// Load the model if it is not resident yet and report the outcome.
    pub async fn setup(&self) -> SetupStatus {
        match self.model().await {
            Ok(loaded) => SetupStatus {
                status: Status::Ok,
                model_loaded: true,
                model_name: Some(MODEL_NAME.to_string()),
                device: Some(loaded.model.device().to_string()),
                error: None,
            },
            Err(e) => {
                error!("Model setup failed: {}", e);
                SetupStatus {
                    status: Status::Error,
                    model_loaded: false,
                    model_name: None,
                    device: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Run OCR on one image.
    pub async fn extract_text(&self, request: OcrRequest) -> Result<OcrResponse> {
        let loaded = self.model().await?;

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .with_context(|| format!("Failed to create scratch dir {:?}", self.scratch_dir))?;

        let inference = InferenceRequest {
            prompt: format!("{}{}", IMAGE_MARKER, request.prompt),
            image_file: request.image,
            output_path: self.scratch_dir.clone(),
            base_size: request.base_size,
            image_size: request.image_size,
            crop_mode: request.crop_mode,
            save_results: false,
            test_compress: false,
        };

        debug!(
            "Running inference: image={}, base_size={}, image_size={}, crop_mode={}",
            inference.image_file, inference.base_size, inference.image_size, inference.crop_mode
        );

        let output = loaded.model.infer(&inference).await?;

        let response = match output {
            InferenceOutput::Structured { text, tokens } => OcrResponse { text, tokens },
            InferenceOutput::PlainText { value } => {
                let tokens = if value.is_empty() {
                    0
                } else {
                    loaded.tokenizer.count_tokens(&value)?
                };
                OcrResponse {
                    text: value,
                    tokens,
                }
            }
        };

        debug!(
            "Inference complete: {} bytes, {} tokens",
            response.text.len(),
            response.tokens
        );
        Ok(response)
    }

    /// Convert a document image to markdown using the grounding prompt.
    pub async fn to_markdown(&self, request: MarkdownRequest) -> Result<MarkdownResponse> {
        let result = self
            .extract_text(OcrRequest {
                image: request.image,
                prompt: MARKDOWN_PROMPT.to_string(),
                base_size: request.base_size,
                image_size: request.image_size,
                crop_mode: request.crop_mode,
            })
            .await?;

        Ok(MarkdownResponse {
            markdown: result.text,
            tokens: result.tokens,
        })
    }

    /// Report whether the model is resident. Never loads it.
    pub fn health(&self) -> HealthStatus {
        match self.loaded.get() {
            Some(loaded) => HealthStatus {
                status: Status::Ok,
                model_loaded: true,
                device: Some(loaded.model.device().to_string()),
            },
            None => HealthStatus {
                status: Status::Ok,
                model_loaded: false,
                device: None,
            },
        }
    }

    /// Spawn `setup` in the background, logging its outcome.
    pub fn preload(self: &Arc<Self>) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            info!("Preloading {}", MODEL_NAME);
            let status = service.setup().await;
            if status.model_loaded {
                info!("Preload complete on {}", status.device.unwrap_or_default());
            }
        });
    }
}
