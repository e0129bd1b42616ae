//! Engine configuration
//!
//! Loaded from a TOML file, every field defaulted, then overridden from
//! `UCP_*` environment variables.
//!
//! ```toml
//! [limits]
//! max_depth = 32
//!
//! [llm]
//! endpoint = "http://localhost:11434/v1"
//! model = "llama3"
//!
//! [pricing]
//! input_price_per_1k = 0.01
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use ucp_core::model::TokenPricing;
use ucp_core::rules::ValidationOptions;
use ucp_core_types::Sensitive;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_depth: usize,
    pub max_loop_iterations: usize,
    pub max_expression_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_loop_iterations: 10_000,
            max_expression_len: ucp_core::expr::DEFAULT_MAX_EXPRESSION_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    /// Refuse to run packets whose `issued_at + ttl_seconds` has passed
    pub enforce: bool,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self { enforce: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            user_agent: format!("ucp/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (`/chat/completions` is appended)
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "UCP_LLM_API_KEY".to_string(),
            timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: LimitsConfig,
    pub ttl: TtlConfig,
    pub http: HttpConfig,
    pub llm: LlmConfig,
    pub pricing: TokenPricing,
}

impl EngineConfig {
    /// Read a TOML config file
    ///
    /// ## Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read and
    /// `ConfigError::Parse` if it is not valid config TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// ## Errors
    ///
    /// Returns `ConfigError::Parse` on malformed TOML or mistyped fields.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `UCP_*` overrides from the process environment
    ///
    /// ## Errors
    ///
    /// Returns `ConfigError::InvalidEnv` when a variable is set to a value
    /// that does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from any variable source
    ///
    /// ## Errors
    ///
    /// Returns `ConfigError::InvalidEnv` for unparseable values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "UCP_MAX_DEPTH", &mut self.limits.max_depth)?;
        override_parsed(
            &lookup,
            "UCP_MAX_LOOP_ITERATIONS",
            &mut self.limits.max_loop_iterations,
        )?;
        override_parsed(
            &lookup,
            "UCP_MAX_EXPRESSION_LEN",
            &mut self.limits.max_expression_len,
        )?;
        if let Some(value) = lookup("UCP_ENFORCE_TTL") {
            self.ttl.enforce = parse_bool("UCP_ENFORCE_TTL", &value)?;
        }
        override_parsed(&lookup, "UCP_HTTP_TIMEOUT_MS", &mut self.http.timeout_ms)?;
        if let Some(endpoint) = lookup("UCP_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Some(model) = lookup("UCP_LLM_MODEL") {
            self.llm.model = model;
        }
        override_parsed(&lookup, "UCP_LLM_TIMEOUT_MS", &mut self.llm.timeout_ms)?;
        override_parsed(
            &lookup,
            "UCP_INPUT_PRICE_PER_1K",
            &mut self.pricing.input_price_per_1k,
        )?;
        override_parsed(
            &lookup,
            "UCP_OUTPUT_PRICE_PER_1K",
            &mut self.pricing.output_price_per_1k,
        )?;
        Ok(())
    }

    /// The LLM API key, if its variable is set
    pub fn llm_api_key(&self) -> Option<Sensitive<String>> {
        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .map(Sensitive::new)
    }

    /// Validation limits matching the execution limits
    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions {
            max_depth: self.limits.max_depth,
            max_expression_len: self.limits.max_expression_len,
        }
    }
}

fn override_parsed<F, T>(lookup: &F, var: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(value) = lookup(var) {
        *target = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
        })?;
    }
    Ok(())
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.limits.max_depth, 64);
        assert_eq!(config.limits.max_loop_iterations, 10_000);
        assert!(config.ttl.enforce);
        assert_eq!(config.http.timeout_ms, 15_000);
        assert_eq!(config.llm.api_key_env, "UCP_LLM_API_KEY");
        assert_eq!(config.pricing, TokenPricing::default());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [limits]
            max_depth = 8

            [pricing]
            input_price_per_1k = 0.01
            "#,
        )
        .unwrap();
        assert_eq!(config.limits.max_depth, 8);
        assert_eq!(config.limits.max_loop_iterations, 10_000);
        assert_eq!(config.pricing.input_price_per_1k, 0.01);
        assert_eq!(config.pricing.output_price_per_1k, 0.0006);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = EngineConfig::from_toml_str("[limits]\nmax_depth = \"deep\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(vars(&[
                ("UCP_MAX_DEPTH", "12"),
                ("UCP_ENFORCE_TTL", "off"),
                ("UCP_LLM_MODEL", "local-model"),
                ("UCP_OUTPUT_PRICE_PER_1K", "0.002"),
            ]))
            .unwrap();
        assert_eq!(config.limits.max_depth, 12);
        assert!(!config.ttl.enforce);
        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.pricing.output_price_per_1k, 0.002);
    }

    #[test]
    fn test_bad_env_value_names_variable() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(vars(&[("UCP_MAX_LOOP_ITERATIONS", "many")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidEnv { var, value } => {
                assert_eq!(var, "UCP_MAX_LOOP_ITERATIONS");
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ucp.toml");
        std::fs::write(&path, "[ttl]\nenforce = false\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert!(!config.ttl.enforce);

        let missing = EngineConfig::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
