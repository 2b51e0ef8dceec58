//! Environment configuration.
//!
//! Values come from the process environment (after `.env` is loaded by the
//! binaries); CLI flags override individual fields.

use crate::error::{PipelineError, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_DB_PATH: &str = "ecommerce.db";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Gemini,
}

impl Provider {
    pub fn key_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }

    fn model_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_MODEL",
            Provider::Gemini => "GEMINI_MODEL",
        }
    }

    fn base_url_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_BASE_URL",
            Provider::Gemini => "GEMINI_BASE_URL",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Gemini => "gemini-2.5-flash",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }
}

impl FromStr for Provider {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Provider::OpenAi),
            "gemini" | "google" => Ok(Provider::Gemini),
            other => Err(PipelineError::Config(format!(
                "Unknown LLM_PROVIDER '{}', expected 'openai' or 'gemini'",
                other
            ))),
        }
    }
}

/// Settings for the generative-text backend.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub provider: Provider,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let provider = match lookup("LLM_PROVIDER") {
            Some(p) => p.parse()?,
            None => Provider::OpenAi,
        };

        let timeout_secs = match lookup("LLM_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                PipelineError::Config(format!("LLM_TIMEOUT_SECS must be a whole number, got '{}'", raw))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            db_path: lookup("INSIGHT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            data_dir: lookup("INSIGHT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            bind_addr: lookup("INSIGHT_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            provider,
            api_key: lookup(provider.key_var()).filter(|k| !k.trim().is_empty()),
            model: lookup(provider.model_var()).unwrap_or_else(|| provider.default_model().to_string()),
            base_url: lookup(provider.base_url_var())
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            timeout_secs,
        })
    }

    /// Backend settings; fails when no credential is configured.
    pub fn llm(&self) -> Result<LlmConfig> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            PipelineError::Config(format!(
                "{} environment variable is required",
                self.provider.key_var()
            ))
        })?;
        Ok(LlmConfig {
            provider: self.provider,
            api_key,
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            timeout_secs: self.timeout_secs,
        })
    }
}
