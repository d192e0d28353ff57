//! Process configuration: `.env` loading and environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_OPENAI_TEMPERATURE: f64 = 0.7;

/// Load `.env` from the working directory into the process environment.
///
/// A missing or unreadable file is not an error: providers whose
/// credentials end up absent simply fail to initialize later.
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

/// Load a specific dotenv file. Variables already set in the environment win.
pub fn load_dotenv_from(path: &Path) {
    match dotenvy::from_path(path) {
        Ok(()) => info!("Loaded environment from {}", path.display()),
        Err(e) => debug!("No environment file loaded from {}: {}", path.display(), e),
    }
}

/// Settings for the local Ollama backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model: String,
    /// `None` leaves the server-side default in place.
    pub temperature: Option<f64>,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE_URL.into(),
            model: DEFAULT_OLLAMA_MODEL.into(),
            temperature: None,
        }
    }
}

/// Settings for the OpenAI chat completions backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiSettings {
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.into(),
            model: DEFAULT_OPENAI_MODEL.into(),
            temperature: DEFAULT_OPENAI_TEMPERATURE,
        }
    }
}

impl std::fmt::Debug for OpenAiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub ollama: OllamaSettings,
    pub openai: OpenAiSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            ollama: OllamaSettings::default(),
            openai: OpenAiSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// Unparseable numeric values fall back to their defaults. Empty strings
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = get("PORT")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let ollama = OllamaSettings {
            base_url: get("OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.into()),
            model: get("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.into()),
            temperature: get("OLLAMA_TEMPERATURE").and_then(|t| t.trim().parse().ok()),
        };

        let openai = OpenAiSettings {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.into()),
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
            temperature: get("OPENAI_TEMPERATURE")
                .and_then(|t| t.trim().parse().ok())
                .unwrap_or(DEFAULT_OPENAI_TEMPERATURE),
        };

        Self {
            host: get("CHATRELAY_HOST").unwrap_or_else(|| DEFAULT_HOST.into()),
            port,
            ollama,
            openai,
        }
    }

    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
