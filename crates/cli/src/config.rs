//! Run configuration: TOML file plus `TARAFLOW_*` environment overrides.

use std::path::Path;

use serde::Deserialize;

use llm::{EndpointConfig, RetrySettings};
use nodes::{ConcurrencyLimits, OrchestratorOptions};
use pipeline::provider::SamplingOptions;
use pipeline::TaraError;

/// Complete run configuration. Every field has a default, so a missing
/// config file is not an error; an unreadable or malformed one is.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaraflowConfig {
    pub endpoint: EndpointSection,
    pub retry: RetrySection,
    pub rate_limit: RateLimitSection,
    pub concurrency: ConcurrencySection,
    pub analysis: AnalysisSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointSection {
    /// Base URL up to the API version segment.
    pub base_url: String,
    /// Environment variable holding the bearer credential.
    pub api_key_env: String,
    /// Model identifier.
    pub model: String,
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.siliconflow.cn/v1".into(),
            api_key_env: "DEEPSEEK_API_KEY".into(),
            model: "Pro/deepseek-ai/DeepSeek-V3.2-Exp".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_timeout_secs: u64,
    pub timeout_ceiling_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_timeout_secs: 60,
            timeout_ceiling_secs: 120,
            backoff_base_secs: 1,
            backoff_cap_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSection {
    pub tokens_per_minute: f64,
    pub burst_capacity: f64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            tokens_per_minute: 20.0,
            burst_capacity: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcurrencySection {
    pub max_concurrent_roots: usize,
    pub max_concurrent_steps: usize,
}

impl Default for ConcurrencySection {
    fn default() -> Self {
        Self {
            max_concurrent_roots: 2,
            max_concurrent_steps: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisSection {
    /// System persona sent with every request.
    pub system_persona: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Extra orchestrator attempts for the terminal stage tail.
    pub tail_retries: u32,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            system_persona: pipeline::directives::DEFAULT_SYSTEM_PERSONA.into(),
            temperature: 0.3,
            max_output_tokens: 8000,
            tail_retries: 2,
        }
    }
}

impl Default for TaraflowConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointSection::default(),
            retry: RetrySection::default(),
            rate_limit: RateLimitSection::default(),
            concurrency: ConcurrencySection::default(),
            analysis: AnalysisSection::default(),
        }
    }
}

impl TaraflowConfig {
    /// Loads the configuration: file (when given) → environment overrides →
    /// validation.
    pub fn load(path: Option<&Path>) -> Result<Self, TaraError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| TaraError::Configuration {
                    message: format!("cannot read config {}: {e}", path.display()),
                })?;
                toml::from_str(&text).map_err(|e| TaraError::Configuration {
                    message: format!("invalid config {}: {e}", path.display()),
                })?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        override_string("TARAFLOW_BASE_URL", &mut self.endpoint.base_url);
        override_string("TARAFLOW_API_KEY_ENV", &mut self.endpoint.api_key_env);
        override_string("TARAFLOW_MODEL", &mut self.endpoint.model);
        override_parsed("TARAFLOW_MAX_RETRIES", &mut self.retry.max_retries);
        override_parsed("TARAFLOW_BASE_TIMEOUT_SECS", &mut self.retry.base_timeout_secs);
        override_parsed(
            "TARAFLOW_TOKENS_PER_MINUTE",
            &mut self.rate_limit.tokens_per_minute,
        );
        override_parsed("TARAFLOW_BURST_CAPACITY", &mut self.rate_limit.burst_capacity);
        override_parsed(
            "TARAFLOW_MAX_CONCURRENT_ROOTS",
            &mut self.concurrency.max_concurrent_roots,
        );
        override_parsed(
            "TARAFLOW_MAX_CONCURRENT_STEPS",
            &mut self.concurrency.max_concurrent_steps,
        );
    }

    fn validate(&self) -> Result<(), TaraError> {
        let fail = |message: String| Err(TaraError::Configuration { message });
        if self.endpoint.base_url.is_empty() {
            return fail("endpoint.base_url must not be empty".into());
        }
        if !(self.rate_limit.tokens_per_minute > 0.0) {
            return fail("rate_limit.tokens_per_minute must be positive".into());
        }
        if !(self.rate_limit.burst_capacity >= 1.0) {
            return fail("rate_limit.burst_capacity must be at least 1".into());
        }
        if self.concurrency.max_concurrent_roots == 0 || self.concurrency.max_concurrent_steps == 0
        {
            return fail("concurrency widths must be at least 1".into());
        }
        if !(0.0..=2.0).contains(&self.analysis.temperature) {
            return fail("analysis.temperature must be in 0..=2".into());
        }
        Ok(())
    }

    /// Resolves the bearer credential from the configured environment
    /// variable.
    pub fn resolve_api_key(&self) -> Result<String, TaraError> {
        std::env::var(&self.endpoint.api_key_env).map_err(|_| TaraError::Configuration {
            message: format!("set the {} environment variable", self.endpoint.api_key_env),
        })
    }

    /// Endpoint settings with the resolved credential filled in.
    pub fn endpoint_config(&self, api_key: String) -> EndpointConfig {
        EndpointConfig {
            name: "openai-compat".into(),
            base_url: self.endpoint.base_url.clone(),
            api_key,
            model: self.endpoint.model.clone(),
        }
    }

    /// Request-layer retry settings.
    pub fn retry_settings(&self) -> RetrySettings {
        use std::time::Duration;
        RetrySettings {
            max_retries: self.retry.max_retries,
            base_timeout: Duration::from_secs(self.retry.base_timeout_secs),
            timeout_ceiling: Duration::from_secs(self.retry.timeout_ceiling_secs),
            backoff_base: Duration::from_secs(self.retry.backoff_base_secs),
            backoff_cap: Duration::from_secs(self.retry.backoff_cap_secs),
        }
    }

    /// Orchestrator construction options.
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            limits: ConcurrencyLimits {
                max_concurrent_roots: self.concurrency.max_concurrent_roots,
                max_concurrent_steps: self.concurrency.max_concurrent_steps,
            },
            tail_retries: self.analysis.tail_retries,
            tail_backoff_base: std::time::Duration::from_secs(1),
            system: self.analysis.system_persona.clone(),
            sampling: SamplingOptions {
                temperature: self.analysis.temperature,
                max_output_tokens: self.analysis.max_output_tokens,
            },
        }
    }
}

fn override_string(key: &str, slot: &mut String) {
    if let Ok(value) = std::env::var(key) {
        if !value.is_empty() {
            *slot = value;
        }
    }
}

fn override_parsed<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.trim().parse::<T>() {
            *slot = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = TaraflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.concurrency.max_concurrent_roots, 2);
        assert_eq!(config.rate_limit.tokens_per_minute, 20.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = TaraflowConfig::load(Some(Path::new("/nonexistent/taraflow.toml"))).unwrap_err();
        assert!(matches!(err, TaraError::Configuration { .. }));
    }

    #[test]
    fn partial_file_overrides_defaults_only_where_set() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[retry]\nmax_retries = 5\n\n[concurrency]\nmax_concurrent_steps = 8\n"
        )
        .unwrap();
        let config = TaraflowConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.concurrency.max_concurrent_steps, 8);
        // Untouched sections keep their defaults.
        assert_eq!(config.retry.base_timeout_secs, 60);
        assert_eq!(config.concurrency.max_concurrent_roots, 2);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\nmax_retry = 5\n").unwrap();
        assert!(TaraflowConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn invalid_rate_limit_is_rejected() {
        let mut config = TaraflowConfig::default();
        config.rate_limit.tokens_per_minute = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_takes_effect() {
        // Uses a knob no other test asserts on; tests share the process
        // environment.
        std::env::set_var("TARAFLOW_BURST_CAPACITY", "42");
        let mut config = TaraflowConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("TARAFLOW_BURST_CAPACITY");
        assert_eq!(config.rate_limit.burst_capacity, 42.0);
    }

    #[test]
    fn retry_settings_mapping() {
        let config = TaraflowConfig::default();
        let settings = config.retry_settings();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.base_timeout.as_secs(), 60);
        assert_eq!(settings.timeout_ceiling.as_secs(), 120);
    }
}
