//! Static metadata for known models, used as a fallback when a provider or
//! the config does not pin an explicit context window / output cap.

/// Metadata for a single model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    pub id: &'static str,
    pub provider: &'static str,
    pub context_window: u32,
    pub max_output_tokens: u32,
}

const CATALOG: &[ModelCatalogEntry] = &[
    ModelCatalogEntry { id: "gpt-4o", provider: "openai", context_window: 128_000, max_output_tokens: 16_384 },
    ModelCatalogEntry { id: "gpt-4o-mini", provider: "openai", context_window: 128_000, max_output_tokens: 16_384 },
    ModelCatalogEntry { id: "gpt-4.1", provider: "openai", context_window: 1_047_576, max_output_tokens: 32_768 },
    ModelCatalogEntry { id: "o3-mini", provider: "openai", context_window: 200_000, max_output_tokens: 100_000 },
    ModelCatalogEntry { id: "claude-opus-4-6", provider: "anthropic", context_window: 200_000, max_output_tokens: 32_000 },
    ModelCatalogEntry { id: "claude-sonnet-4-5", provider: "anthropic", context_window: 200_000, max_output_tokens: 64_000 },
    ModelCatalogEntry { id: "mock-model", provider: "mock", context_window: 32_000, max_output_tokens: 4_096 },
];

/// Return all bundled catalog entries.
pub fn static_catalog() -> &'static [ModelCatalogEntry] {
    CATALOG
}

/// Look up a single model by provider and id. Returns `None` if not found.
pub fn lookup(provider: &str, model_id: &str) -> Option<ModelCatalogEntry> {
    CATALOG.iter().find(|e| e.provider == provider && e.id == model_id).copied()
}

/// Look up the context window for a model, falling back to `default`.
pub fn context_window(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id).map(|e| e.context_window).unwrap_or(default)
}

/// Look up the max output tokens for a model, falling back to `default`.
pub fn max_output_tokens(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id).map(|e| e.max_output_tokens).unwrap_or(default)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
