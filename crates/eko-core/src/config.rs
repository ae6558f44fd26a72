//! Engine configuration.
//!
//! Loaded from a TOML file, then overridden from the environment.  Every
//! field has a default, so an absent file is a valid configuration.
//!
//! ```toml
//! [llm]
//! provider = "anthropic"
//! model = "claude-sonnet-4-20250514"
//!
//! [action]
//! max_rounds = 25
//! retry_delay_ms = 5000
//!
//! [compression]
//! threshold = 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EkoError, Result};
use crate::llm::{DEFAULT_MODEL, LlmClientConfig};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Which wire protocol the configured endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "openai_compatible")]
    OpenAICompatible,
}

impl std::str::FromStr for ProviderKind {
    type Err = EkoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAI),
            "openai_compatible" | "openai-compatible" | "compatible" => Ok(Self::OpenAICompatible),
            other => Err(EkoError::Config {
                reason: format!("unknown provider `{other}`"),
            }),
        }
    }
}

/// `[llm]` -- the model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: ProviderKind,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            api_key: None,
            model: None,
            base_url: None,
            max_tokens: 4096,
            temperature: None,
            timeout_secs: 120,
        }
    }
}

impl LlmSection {
    /// Build the HTTP client configuration.  Fails when no API key is set.
    pub fn to_client_config(&self) -> Result<LlmClientConfig> {
        let api_key = self.api_key.clone().filter(|k| !k.is_empty()).ok_or_else(|| {
            EkoError::MissingApiKey {
                provider: format!("{:?}", self.provider).to_lowercase(),
            }
        })?;

        let mut config = match self.provider {
            ProviderKind::Anthropic => LlmClientConfig::anthropic(
                api_key,
                self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
            ),
            ProviderKind::OpenAI => {
                LlmClientConfig::openai(api_key, self.model.clone().unwrap_or_else(|| "gpt-4o".into()))
            }
            ProviderKind::OpenAICompatible => {
                let base_url = self.base_url.clone().ok_or_else(|| EkoError::Config {
                    reason: "`llm.base_url` is required for openai_compatible".into(),
                })?;
                let model = self.model.clone().ok_or_else(|| EkoError::Config {
                    reason: "`llm.model` is required for openai_compatible".into(),
                })?;
                LlmClientConfig::openai_compatible(api_key, model, base_url)
            }
        };

        if let Some(url) = &self.base_url {
            config.base_url = url.trim_end_matches('/').to_owned();
        }
        config.max_tokens = self.max_tokens;
        config.timeout_secs = self.timeout_secs;
        Ok(config)
    }
}

/// `[action]` -- the per-node tool-use loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Rounds before the loop forces finalization.
    pub max_rounds: u32,
    /// Retries for a failed model call (attempts = retries + 1).
    pub max_retries: u32,
    /// Fixed back-off between retries.
    pub retry_delay_ms: u64,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// When set, images returned by tools are also written here.
    pub debug_image_dir: Option<PathBuf>,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            max_rounds: 25,
            max_retries: 3,
            retry_delay_ms: 5000,
            model: None,
            max_tokens: None,
            temperature: None,
            debug_image_dir: None,
        }
    }
}

impl ActionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// `[compression]` -- history compression before each round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Transcripts at or below this many messages are left alone.
    pub threshold: usize,
    /// Token budget of the summary call.
    pub max_tokens: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 10,
            max_tokens: 4096,
        }
    }
}

/// `[generator]` -- workflow generation from a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Attempts before giving up on an invalid document.
    pub max_attempts: u32,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_tokens: 8192,
            temperature: Some(0.7),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EkoConfig {
    pub llm: LlmSection,
    pub action: ActionConfig,
    pub compression: CompressionConfig,
    pub generator: GeneratorConfig,
}

impl EkoConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EkoError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load `path` if given (a missing file means defaults), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::warn!(path = %p.display(), "configuration file does not exist, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(env_non_empty)
    }

    /// Apply overrides using `lookup` as the environment.
    ///
    /// `EKO_PROVIDER`, `EKO_MODEL` and `EKO_BASE_URL` override the `[llm]`
    /// section.  The API key comes from `ANTHROPIC_API_KEY` or
    /// `OPENAI_API_KEY` according to the provider, unless the file set one.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(provider) = lookup("EKO_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(model) = lookup("EKO_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(url) = lookup("EKO_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if self.llm.api_key.as_deref().is_none_or(str::is_empty) {
            let var = match self.llm.provider {
                ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
                ProviderKind::OpenAI | ProviderKind::OpenAICompatible => "OPENAI_API_KEY",
            };
            self.llm.api_key = lookup(var);
        }
        Ok(())
    }
}

/// Read a non-empty environment variable.
pub fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = EkoConfig::default();
        assert_eq!(config.action.max_rounds, 25);
        assert_eq!(config.action.max_retries, 3);
        assert_eq!(config.action.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.compression.threshold, 10);
        assert!(config.compression.enabled);
        assert_eq!(config.generator.max_attempts, 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = EkoConfig::from_toml_str(
            r#"
            [llm]
            provider = "openai"
            model = "gpt-4o-mini"

            [action]
            max_rounds = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.provider, ProviderKind::OpenAI);
        assert_eq!(config.action.max_rounds, 5);
        assert_eq!(config.action.max_retries, 3);
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[compression]\nenabled = false").unwrap();
        let config = EkoConfig::from_file(file.path()).unwrap();
        assert!(!config.compression.enabled);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = EkoConfig::from_toml_str("[action\nmax_rounds = ").unwrap_err();
        assert!(matches!(err, EkoError::Config { .. }));
    }

    #[test]
    fn env_selects_provider_and_key() {
        let mut config = EkoConfig::default();
        config
            .apply_env_with(env(&[
                ("EKO_PROVIDER", "openai"),
                ("OPENAI_API_KEY", "sk-test"),
                ("ANTHROPIC_API_KEY", "wrong"),
            ]))
            .unwrap();
        assert_eq!(config.llm.provider, ProviderKind::OpenAI);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));

        let client = config.llm.to_client_config().unwrap();
        assert_eq!(client.default_model, "gpt-4o");
    }

    #[test]
    fn file_key_wins_over_env() {
        let mut config = EkoConfig::default();
        config.llm.api_key = Some("from-file".into());
        config
            .apply_env_with(env(&[("ANTHROPIC_API_KEY", "from-env")]))
            .unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn missing_key_is_reported() {
        let config = EkoConfig::default();
        assert!(matches!(
            config.llm.to_client_config(),
            Err(EkoError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn compatible_provider_requires_base_url() {
        let mut config = EkoConfig::default();
        config.llm.provider = ProviderKind::OpenAICompatible;
        config.llm.api_key = Some("k".into());
        config.llm.model = Some("llama3".into());
        assert!(config.llm.to_client_config().is_err());

        config.llm.base_url = Some("http://localhost:11434/v1/".into());
        let client = config.llm.to_client_config().unwrap();
        assert_eq!(client.base_url, "http://localhost:11434/v1");
    }
}
