//! Service configuration.
//!
//! Values come from the process environment (after `.env` is applied by
//! `main`). Every variable is optional and falls back to a default.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_RUNTIME_URL: &str = "http://localhost:8001";
const DEFAULT_RUNTIME_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_SCRATCH_DIR: &str = "/tmp/deepseek_ocr_output";

/// Runtime configuration for the OCR service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP server listens on.
    pub bind_addr: SocketAddr,
    /// Base URL of the inference runtime hosting the model weights.
    pub runtime_url: String,
    /// Timeout applied to every call made to the inference runtime.
    pub runtime_timeout: Duration,
    /// Scratch directory handed to the model as its output path.
    pub scratch_dir: PathBuf,
    /// Run `setup` in the background right after boot.
    pub preload: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 3000))),
            runtime_url: DEFAULT_RUNTIME_URL.to_string(),
            runtime_timeout: Duration::from_secs(DEFAULT_RUNTIME_TIMEOUT_SECS),
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            preload: false,
        }
    }
}

impl ServiceConfig {
    /// Load the config from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the config from an arbitrary key lookup (environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("OCR_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .with_context(|| format!("Invalid OCR_BIND_ADDR: {:?}", addr))?;
        }

        if let Some(url) = lookup("OCR_RUNTIME_URL") {
            config.runtime_url = url.trim_end_matches('/').to_string();
        }

        if let Some(secs) = lookup("OCR_RUNTIME_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid OCR_RUNTIME_TIMEOUT_SECS: {:?}", secs))?;
            config.runtime_timeout = Duration::from_secs(secs);
        }

        if let Some(dir) = lookup("OCR_SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(dir);
        }

        if let Some(flag) = lookup("OCR_PRELOAD") {
            config.preload = parse_flag(&flag);
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
