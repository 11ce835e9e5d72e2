//! Inference runtime client.
//!
//! The model weights live in a GPU sidecar that exposes two endpoints:
//! `POST /load` to bring a model into accelerator memory and `POST /infer`
//! to run the model's OCR entry point.

use super::{AttentionImpl, InferenceOutput, InferenceRequest, OcrModel};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct LoadRequest<'a> {
    model: &'a str,
    attn_implementation: AttentionImpl,
    trust_remote_code: bool,
    use_safetensors: bool,
    dtype: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoadResponse {
    device: String,
}

#[derive(Debug, Serialize)]
struct InferBody<'a> {
    model: &'a str,
    prompt: &'a str,
    image_file: &'a str,
    output_path: &'a Path,
    base_size: u32,
    image_size: u32,
    crop_mode: bool,
    save_results: bool,
    test_compress: bool,
}

/// HTTP client for the inference runtime sidecar.
#[derive(Clone)]
pub struct RuntimeClient {
    client: Client,
    url: String,
}

impl RuntimeClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build runtime HTTP client")?;

        let url = url.trim_end_matches('/').to_string();
        info!("Inference runtime configured: {}", url);

        Ok(Self { client, url })
    }

    /// Ask the runtime to load `model_name` with the given attention kernel.
    pub async fn load(&self, model_name: &str, attention: AttentionImpl) -> Result<RuntimeModel> {
        let body = LoadRequest {
            model: model_name,
            attn_implementation: attention,
            trust_remote_code: true,
            use_safetensors: true,
            dtype: "bfloat16",
        };

        debug!("Runtime load: model={}, attention={}", model_name, attention);

        let response = self
            .client
            .post(format!("{}/load", self.url))
            .json(&body)
            .send()
            .await
            .context("Failed to reach inference runtime")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Inference runtime load error ({}): {}", status, error_text);
        }

        let loaded: LoadResponse = response
            .json()
            .await
            .context("Failed to parse runtime load response")?;

        Ok(RuntimeModel {
            client: self.clone(),
            model_name: model_name.to_string(),
            device: loaded.device,
        })
    }
}

/// A model resident in the inference runtime.
pub struct RuntimeModel {
    client: RuntimeClient,
    model_name: String,
    device: String,
}

impl RuntimeModel {
    pub fn into_shared(self) -> Arc<dyn OcrModel> {
        Arc::new(self)
    }
}

#[async_trait::async_trait]
impl OcrModel for RuntimeModel {
    fn device(&self) -> &str {
        &self.device
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceOutput> {
        let body = InferBody {
            model: &self.model_name,
            prompt: &request.prompt,
            image_file: &request.image_file,
            output_path: &request.output_path,
            base_size: request.base_size,
            image_size: request.image_size,
            crop_mode: request.crop_mode,
            save_results: request.save_results,
            test_compress: request.test_compress,
        };

        let response = self
            .client
            .client
            .post(format!("{}/infer", self.client.url))
            .json(&body)
            .send()
            .await
            .context("Failed to reach inference runtime")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Inference runtime error ({}): {}", status, error_text);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse runtime inference response")?;

        Ok(InferenceOutput::from_value(raw))
    }
}
