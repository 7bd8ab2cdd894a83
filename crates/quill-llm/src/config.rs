//! Gateway configuration

use serde::Serialize;
use std::env;
use std::time::Duration;
use url::Url;

use quill_core::{Error, Result};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_GROQ_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for the generation gateway
#[derive(Clone, Serialize)]
pub struct GatewayConfig {
    pub ollama_base_url: String,
    pub groq_api_url: String,
    /// Process-wide Groq credential, used when a request carries none
    #[serde(skip_serializing)]
    pub groq_api_key: Option<String>,
    pub temperature: f32,
    pub timeout: Duration,
}

impl GatewayConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ollama_base_url = lookup("OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let groq_api_url = lookup("GROQ_API_URL").unwrap_or_else(|| DEFAULT_GROQ_URL.to_string());
        let groq_api_key = lookup("GROQ_API_KEY").filter(|k| !k.trim().is_empty());

        let temperature = match lookup("QUILL_TEMPERATURE") {
            Some(raw) => raw.trim().parse::<f32>().map_err(|_| {
                Error::Configuration(format!("QUILL_TEMPERATURE must be a number, got '{}'", raw))
            })?,
            None => DEFAULT_TEMPERATURE,
        };

        let timeout_secs = match lookup("QUILL_GENERATION_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                Error::Configuration(format!(
                    "QUILL_GENERATION_TIMEOUT_SECS must be a whole number of seconds, got '{}'",
                    raw
                ))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let config = Self {
            ollama_base_url,
            groq_api_url,
            groq_api_key,
            temperature,
            timeout: Duration::from_secs(timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check URLs, temperature and timeout
    pub fn validate(&self) -> Result<()> {
        validate_base_url("OLLAMA_BASE_URL", &self.ollama_base_url)?;
        validate_base_url("GROQ_API_URL", &self.groq_api_url)?;
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Configuration(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::Configuration("generation timeout must be positive".to_string()));
        }
        Ok(())
    }

    pub fn with_groq_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.groq_api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ollama_base_url: DEFAULT_OLLAMA_URL.to_string(),
            groq_api_url: DEFAULT_GROQ_URL.to_string(),
            groq_api_key: None,
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("ollama_base_url", &self.ollama_base_url)
            .field("groq_api_url", &self.groq_api_url)
            .field("groq_api_key", &self.groq_api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn validate_base_url(name: &str, raw: &str) -> Result<()> {
    let parsed = Url::parse(raw)
        .map_err(|e| Error::Configuration(format!("{} is not a valid URL ({}): {}", name, raw, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Configuration(format!(
            "{} must use http or https, got scheme '{}'",
            name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = GatewayConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.ollama_base_url, DEFAULT_OLLAMA_URL);
        assert_eq!(config.groq_api_url, DEFAULT_GROQ_URL);
        assert!(config.groq_api_key.is_none());
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_blank_api_key_is_absent() {
        let config = GatewayConfig::from_lookup(lookup_from(&[("GROQ_API_KEY", "  ")])).unwrap();
        assert!(config.groq_api_key.is_none());
    }

    #[test]
    fn test_invalid_values_are_configuration_errors() {
        let bad_url = GatewayConfig::from_lookup(lookup_from(&[("OLLAMA_BASE_URL", "not a url")]));
        assert!(matches!(bad_url, Err(Error::Configuration(_))));

        let bad_scheme = GatewayConfig::from_lookup(lookup_from(&[("GROQ_API_URL", "ftp://example.com")]));
        assert!(matches!(bad_scheme, Err(Error::Configuration(_))));

        let bad_temp = GatewayConfig::from_lookup(lookup_from(&[("QUILL_TEMPERATURE", "hot")]));
        assert!(matches!(bad_temp, Err(Error::Configuration(_))));

        let zero_timeout =
            GatewayConfig::from_lookup(lookup_from(&[("QUILL_GENERATION_TIMEOUT_SECS", "0")]));
        assert!(matches!(zero_timeout, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_debug_never_prints_key() {
        let config = GatewayConfig::default().with_groq_api_key("gsk_live_123");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("gsk_live_123"));
    }
}
