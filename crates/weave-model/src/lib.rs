pub mod catalog;
pub mod openai_compat;
pub mod provider;
pub mod token_counter;
pub mod types;
pub mod mock;

pub use catalog::ModelCatalogEntry;
pub use mock::{MockProvider, ScriptedProvider};
pub use openai_compat::{AuthStyle, OpenAICompatProvider};
pub use provider::{ModelProvider, StreamEventStream};
pub use token_counter::{HeuristicTokenCounter, TokenCounter};
pub use types::*;

use anyhow::bail;
use weave_config::ModelConfig;

/// Default base URL for each recognised provider id. A config `base_url`
/// always overrides these.
fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        "lmstudio" => Some("http://localhost:1234/v1"),
        "azure" => None,
        _ => None,
    }
}

fn default_auth_style(provider: &str, key: &Option<String>) -> AuthStyle {
    match provider {
        "azure" => AuthStyle::ApiKeyHeader,
        "ollama" | "lmstudio" => AuthStyle::None,
        "vllm" if key.is_none() => AuthStyle::None,
        _ => AuthStyle::Bearer,
    }
}

fn resolve_api_key(cfg: &ModelConfig) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(env) = &cfg.api_key_env {
        return std::env::var(env).ok();
    }
    None
}

/// Construct a boxed [`ModelProvider`] from configuration. Every non-mock
/// provider id is served by the single OpenAI-compatible client (§9: "a
/// full-featured multi-vendor provider matrix was considered and discarded
/// in favor of one well-tested OpenAI-compatible client").
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    if cfg.provider == "mock" {
        return Ok(Box::new(MockProvider));
    }

    let key = resolve_api_key(cfg);
    let auth_style = default_auth_style(&cfg.provider, &key);
    let base_url = cfg
        .base_url
        .clone()
        .or_else(|| default_base_url(&cfg.provider).map(str::to_string))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "provider {:?} has no default base_url; set `base_url` in config",
                cfg.provider
            )
        })?;

    if matches!(auth_style, AuthStyle::Bearer | AuthStyle::ApiKeyHeader) && key.is_none() {
        bail!(
            "provider {:?} requires an API key (set `api_key` or `api_key_env` in config)",
            cfg.provider
        );
    }

    Ok(Box::new(OpenAICompatProvider::new(
        cfg.provider.clone(),
        cfg.name.clone(),
        key,
        &base_url,
        auth_style,
    )))
}
