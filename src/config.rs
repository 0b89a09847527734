//! Service configuration — environment variables only.
//!
//! Keys never live in code or in files; everything is resolved from the
//! process environment once at startup. A malformed value (e.g. a
//! non-numeric `ROUTER_PORT`) is a fatal startup error rather than a silent
//! fallback.

use anyhow::Context;

/// Resolved service settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Supabase project URL. Empty means the registry is unreachable and
    /// every read falls back to in-memory defaults.
    pub supabase_url: String,
    /// Service-role key used for both `apikey` and bearer headers.
    pub supabase_service_key: String,

    /// Ollama base URL (local tier).
    pub ollama_base_url: String,

    /// OpenRouter credentials and base URL (market tier).
    pub openrouter_api_key: String,
    pub openrouter_base_url: String,

    /// Anthropic key (premium tier).
    pub anthropic_api_key: String,

    /// Port the HTTP surface binds to.
    pub port: u16,
    /// Default log level when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Core resolution, parameterized over the variable source so tests can
    /// supply their own environment.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| {
            get(key).unwrap_or_else(|| default.to_string())
        };

        let port_raw = var("ROUTER_PORT", defaults::PORT);
        let port: u16 = port_raw
            .parse()
            .with_context(|| format!("ROUTER_PORT must be a port number, got `{port_raw}`"))?;

        Ok(Self {
            supabase_url: trim_url(var("SUPABASE_URL", "")),
            supabase_service_key: var("SUPABASE_SERVICE_ROLE_KEY", ""),
            ollama_base_url: trim_url(var("OLLAMA_BASE_URL", defaults::OLLAMA_BASE_URL)),
            openrouter_api_key: var("OPENROUTER_API_KEY", ""),
            openrouter_base_url: trim_url(var(
                "OPENROUTER_BASE_URL",
                defaults::OPENROUTER_BASE_URL,
            )),
            anthropic_api_key: var("ANTHROPIC_API_KEY", ""),
            port,
            log_level: var("LOG_LEVEL", defaults::LOG_LEVEL),
        })
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

mod defaults {
    pub const OLLAMA_BASE_URL: &str = "http://host.docker.internal:11434";
    pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
    pub const PORT: &str = "8100";
    pub const LOG_LEVEL: &str = "INFO";
}
