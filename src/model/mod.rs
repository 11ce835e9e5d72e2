//! Model collaborator seams.
//!
//! The OCR model itself runs outside this process. This module defines the
//! traits the service talks to ([`OcrModel`], [`TextTokenizer`],
//! [`ModelLoader`]), the values that cross them, and the ordered
//! attention-implementation fallback used when a model is loaded.

pub mod hub;
pub mod runtime;
pub mod tokenizer;

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Hub identifier of the OCR model served by this process.
pub const MODEL_NAME: &str = "deepseek-ai/DeepSeek-OCR";

/// Attention kernel requested from the runtime when loading weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionImpl {
    #[serde(rename = "flash_attention_2")]
    FlashAttention2,
    Eager,
}

impl AttentionImpl {
    /// Attempt order: accelerated kernel first, portable one second.
    pub const PREFERENCE: [AttentionImpl; 2] =
        [AttentionImpl::FlashAttention2, AttentionImpl::Eager];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlashAttention2 => "flash_attention_2",
            Self::Eager => "eager",
        }
    }
}

impl fmt::Display for AttentionImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments for one call to the model's inference entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    /// Full prompt, image marker included.
    pub prompt: String,
    /// Image reference passed through untouched.
    pub image_file: String,
    /// Scratch directory the model may write into.
    pub output_path: PathBuf,
    pub base_size: u32,
    pub image_size: u32,
    pub crop_mode: bool,
    /// Model-side result persistence. Always off: the service shapes its own response.
    pub save_results: bool,
    /// Model-side compression benchmark. Always off.
    pub test_compress: bool,
}

/// What the model handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceOutput {
    /// A structured result that already carries its token count.
    Structured { text: String, tokens: u64 },
    /// Bare text; token count must be derived with the tokenizer.
    PlainText { value: String },
}

impl InferenceOutput {
    /// Decode a raw runtime response.
    ///
    /// Objects become [`InferenceOutput::Structured`] (`text` falls back to the
    /// object's own rendering when missing, `tokens` to 0). A non-string `text`
    /// is rendered as JSON. Strings are plain text, `null` is empty plain text,
    /// and any other value is rendered as JSON.
    pub fn from_value(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Object(map) => {
                let tokens = map.get("tokens").map(decode_tokens).unwrap_or(0);
                let text = match map.get("text") {
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => Value::Object(map).to_string(),
                };
                Self::Structured { text, tokens }
            }
            Value::String(value) => Self::PlainText { value },
            Value::Null => Self::PlainText {
                value: String::new(),
            },
            other => Self::PlainText {
                value: other.to_string(),
            },
        }
    }
}

/// Token count from a structured result. Integral floats and numeric strings
/// are accepted; anything else counts as 0.
fn decode_tokens(value: &serde_json::Value) -> u64 {
    use serde_json::Value;

    let decoded = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };

    if !matches!(value, Value::Number(n) if n.is_u64()) {
        warn!("Unexpected token count {} in inference result", value);
    }
    decoded.unwrap_or(0)
}

/// A loaded OCR model ready for inference.
#[async_trait::async_trait]
pub trait OcrModel: Send + Sync {
    /// Device the weights live on (e.g. `cuda:0`).
    fn device(&self) -> &str;
    async fn infer(&self, request: &InferenceRequest) -> anyhow::Result<InferenceOutput>;
}

/// Text-to-token conversion, used only to count tokens.
pub trait TextTokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> anyhow::Result<u64>;
}

/// Acquires the tokenizer and model from wherever they are hosted.
#[async_trait::async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_tokenizer(&self, model_name: &str) -> anyhow::Result<Arc<dyn TextTokenizer>>;

    async fn load_model(
        &self,
        model_name: &str,
        attention: AttentionImpl,
    ) -> anyhow::Result<Arc<dyn OcrModel>>;
}

/// The resident model/tokenizer pair.
#[derive(Clone)]
pub struct LoadedModel {
    pub model: Arc<dyn OcrModel>,
    pub tokenizer: Arc<dyn TextTokenizer>,
    pub attention: AttentionImpl,
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("device", &self.model.device())
            .field("attention", &self.attention)
            .finish()
    }
}

/// One failed attempt at loading the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub attention: AttentionImpl,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to load tokenizer for {model}: {reason}")]
    Tokenizer { model: String, reason: String },

    #[error("model load for {model} was interrupted: {reason}")]
    Interrupted { model: String, reason: String },

    #[error("failed to load {model} with any attention implementation ({})", describe_attempts(.attempts))]
    AllAttemptsFailed {
        model: String,
        attempts: Vec<AttemptFailure>,
    },
}

fn describe_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.attention, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Load the tokenizer, then the model, walking [`AttentionImpl::PREFERENCE`]
/// until one attention implementation loads.
pub async fn load_model_pair(
    loader: &dyn ModelLoader,
    model_name: &str,
) -> Result<LoadedModel, LoadError> {
    info!("Loading OCR model from {}...", model_name);

    let tokenizer = loader
        .load_tokenizer(model_name)
        .await
        .map_err(|e| LoadError::Tokenizer {
            model: model_name.to_string(),
            reason: format!("{:#}", e),
        })?;

    let mut attempts = Vec::new();
    for attention in AttentionImpl::PREFERENCE {
        match loader.load_model(model_name, attention).await {
            Ok(model) => {
                info!(
                    "Model loaded successfully (attention={}, device={})",
                    attention,
                    model.device()
                );
                return Ok(LoadedModel {
                    model,
                    tokenizer,
                    attention,
                });
            }
            Err(e) => {
                warn!("{} not available ({:#}), trying next attention implementation", attention, e);
                attempts.push(AttemptFailure {
                    attention,
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    Err(LoadError::AllAttemptsFailed {
        model: model_name.to_string(),
        attempts,
    })
}
