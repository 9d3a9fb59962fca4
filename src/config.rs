/// One upstream endpoint: where to reach it and which credential to present.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: String,
}

/// Upstream endpoints for the three provider families. Base URLs are
/// overridable so tests can point adapters at a mock server.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub openai: ProviderEndpoint,
    pub anthropic: ProviderEndpoint,
    pub gemini: ProviderEndpoint,
}

impl UpstreamConfig {
    pub fn from_env() -> Self {
        Self {
            openai: ProviderEndpoint {
                base_url: env_or("TOLLGATE_OPENAI_BASE_URL", "https://api.openai.com"),
                api_key: env_or("OPENAI_API_KEY", ""),
            },
            anthropic: ProviderEndpoint {
                base_url: env_or("TOLLGATE_ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
                api_key: env_or("ANTHROPIC_API_KEY", ""),
            },
            gemini: ProviderEndpoint {
                base_url: env_or(
                    "TOLLGATE_GEMINI_BASE_URL",
                    "https://generativelanguage.googleapis.com",
                ),
                api_key: env_or("GEMINI_API_KEY", ""),
            },
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
