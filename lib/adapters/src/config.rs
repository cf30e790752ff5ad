//! Bridge configuration, loaded via the `config` crate from environment
//! variables.
//!
//! A missing credential never fails loading: the affected adapter is
//! constructed unavailable and reports the gap through `status()`, so the
//! router can pick a working fallback.

use serde::Deserialize;

/// Configuration for every provider-backed adapter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    /// Anthropic Messages API settings.
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// OpenAI Chat Completions API settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Self-hosted Ollama settings.
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// Settings for the native tool-use adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicConfig {
    /// API key; the adapter is unavailable without one.
    pub api_key: Option<String>,

    /// Model identifier.
    #[serde(default = "default_anthropic_model")]
    pub model: String,

    /// API base URL.
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,

    /// Maximum tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Settings for the function-calling adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    /// API key; the adapter is unavailable without one.
    pub api_key: Option<String>,

    /// Model identifier.
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// API base URL.
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

/// Settings for the self-hosted adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the local Ollama instance.
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1".to_string()
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_anthropic_model(),
            base_url: default_anthropic_base_url(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_openai_model(),
            base_url: default_openai_base_url(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl BridgeConfig {
    /// Loads configuration from environment variables
    /// (e.g. `ANTHROPIC__API_KEY`, `OLLAMA__BASE_URL`).
    ///
    /// # Errors
    ///
    /// Returns an error if present configuration fails to parse.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_credentials() {
        let config = BridgeConfig::default();
        assert!(config.anthropic.api_key.is_none());
        assert!(config.openai.api_key.is_none());
    }

    #[test]
    fn ollama_defaults_to_local_instance() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "llama3.1");
    }

    #[test]
    fn anthropic_defaults() {
        let config = AnthropicConfig::default();
        assert_eq!(config.max_tokens, 4096);
        assert!(config.base_url.starts_with("https://api.anthropic.com"));
    }
}
