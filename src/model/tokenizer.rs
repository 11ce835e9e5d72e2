//! Hub-hosted tokenizer used for token counting.

use super::TextTokenizer;
use anyhow::{Context, Result};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::info;

pub struct HubTokenizer {
    inner: Tokenizer,
}

impl HubTokenizer {
    /// Download (or reuse the hub cache for) `tokenizer.json` of `model_name`.
    ///
    /// Blocking: call from `spawn_blocking`.
    pub fn from_hub(model_name: &str) -> Result<Self> {
        let api = Api::new().context("Failed to initialise model hub client")?;
        let repo = api.repo(Repo::new(model_name.to_string(), RepoType::Model));
        let path = repo
            .get("tokenizer.json")
            .with_context(|| format!("Failed to fetch tokenizer.json for {}", model_name))?;

        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;

        info!(
            "Loaded tokenizer with {} tokens from {}",
            inner.get_vocab_size(true),
            path.display()
        );

        Ok(Self { inner })
    }
}

impl TextTokenizer for HubTokenizer {
    fn count_tokens(&self, text: &str) -> Result<u64> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Failed to tokenize text: {}", e))?;
        Ok(encoding.get_ids().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Minimal word-level tokenizer with a BOS post-processor.
    const TOKENIZER_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                {"SpecialToken": {"id": "<bos>", "type_id": 0}},
                {"Sequence": {"id": "A", "type_id": 0}}
            ],
            "pair": [
                {"SpecialToken": {"id": "<bos>", "type_id": 0}},
                {"Sequence": {"id": "A", "type_id": 0}},
                {"Sequence": {"id": "B", "type_id": 1}}
            ],
            "special_tokens": {
                "<bos>": {"id": "<bos>", "ids": [0], "tokens": ["<bos>"]}
            }
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"<bos>": 0, "<unk>": 1, "hello": 2, "world": 3},
            "unk_token": "<unk>"
        }
    }"#;

    fn write_tokenizer() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TOKENIZER_JSON.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_counts_include_special_tokens() {
        let file = write_tokenizer();
        let tokenizer = HubTokenizer::from_file(file.path()).unwrap();
        // <bos> hello world
        assert_eq!(tokenizer.count_tokens("hello world").unwrap(), 3);
        // unknown words still count
        assert_eq!(tokenizer.count_tokens("hello there").unwrap(), 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = HubTokenizer::from_file(Path::new("/nonexistent/tokenizer.json"));
        assert!(result.is_err());
    }
}
