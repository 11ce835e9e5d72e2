//! Production model loader: tokenizer from the model hub, weights in the
//! inference runtime.

use super::runtime::RuntimeClient;
use super::tokenizer::HubTokenizer;
use super::{AttentionImpl, ModelLoader, OcrModel, TextTokenizer};
use anyhow::{Context, Result};
use std::sync::Arc;

pub struct HubModelLoader {
    runtime: RuntimeClient,
}

impl HubModelLoader {
    pub fn new(runtime: RuntimeClient) -> Self {
        Self { runtime }
    }
}

#[async_trait::async_trait]
impl ModelLoader for HubModelLoader {
    async fn load_tokenizer(&self, model_name: &str) -> Result<Arc<dyn TextTokenizer>> {
        let model_name = model_name.to_string();
        let tokenizer = tokio::task::spawn_blocking(move || HubTokenizer::from_hub(&model_name))
            .await
            .context("Tokenizer download task panicked")??;
        Ok(Arc::new(tokenizer))
    }

    async fn load_model(
        &self,
        model_name: &str,
        attention: AttentionImpl,
    ) -> Result<Arc<dyn OcrModel>> {
        let model = self.runtime.load(model_name, attention).await?;
        Ok(model.into_shared())
    }
}
