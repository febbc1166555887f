use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ApiError;

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Counter store connection URL; falls back to in-memory when unset
    pub redis_url: Option<String>,
    /// Log level for the service target
    pub log_level: String,
    /// Interval between expired-entry sweeps
    pub sweep_interval: Duration,
    /// Anonymous demo analyses allowed per device per window
    pub demo_limit: u32,
    /// Rolling window for the demo allowance
    pub demo_window: Duration,
    /// Minimum gap between demo requests from the same device
    pub demo_cooldown: Duration,
    /// Monthly analysis allowance for free-tier accounts
    pub free_monthly_limit: u32,
    /// Stricter per-day free allowance; replaces the monthly limit when set
    pub free_daily_limit: Option<u32>,
    /// Upstream AI provider credentials and endpoints
    pub providers: ProvidersConfig,
}

/// Credentials and endpoints for the upstream AI providers
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    /// Per-request timeout applied to every provider call
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".parse().unwrap(),
            redis_url: None,
            log_level: "info".to_string(),
            sweep_interval: Duration::from_secs(300),
            demo_limit: 2,
            demo_window: Duration::from_secs(24 * 60 * 60),
            demo_cooldown: Duration::from_secs(5),
            free_monthly_limit: 50,
            free_daily_limit: None,
            providers: ProvidersConfig::default(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            gemini_api_key: None,
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            anthropic_api_key: None,
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ApiError> {
        let defaults = Config::default();

        Ok(Self {
            bind_addr: env_parse("BIND_ADDR", defaults.bind_addr)?,
            redis_url: env_var("REDIS_URL"),
            log_level: env_var("LOG_LEVEL").unwrap_or(defaults.log_level),
            sweep_interval: Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS", 300)?),
            demo_limit: env_parse("DEMO_DAILY_LIMIT", defaults.demo_limit)?,
            demo_window: Duration::from_secs(env_parse("DEMO_WINDOW_SECS", 24 * 60 * 60)?),
            demo_cooldown: Duration::from_secs(env_parse("DEMO_COOLDOWN_SECS", 5)?),
            free_monthly_limit: env_parse("FREE_MONTHLY_LIMIT", defaults.free_monthly_limit)?,
            free_daily_limit: env_parse_opt("FREE_DAILY_LIMIT")?,
            providers: ProvidersConfig::from_env()?,
        })
    }

    /// Reject configurations that would disable admission control entirely
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.demo_limit == 0 {
            return Err(ApiError::ConfigurationError(
                "DEMO_DAILY_LIMIT must be greater than 0".to_string(),
            ));
        }
        if self.free_monthly_limit == 0 {
            return Err(ApiError::ConfigurationError(
                "FREE_MONTHLY_LIMIT must be greater than 0".to_string(),
            ));
        }
        if self.free_daily_limit == Some(0) {
            return Err(ApiError::ConfigurationError(
                "FREE_DAILY_LIMIT must be greater than 0 when set".to_string(),
            ));
        }
        if self.demo_window.is_zero() {
            return Err(ApiError::ConfigurationError(
                "DEMO_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }
        if self.demo_cooldown >= self.demo_window {
            return Err(ApiError::ConfigurationError(
                "DEMO_COOLDOWN_SECS must be shorter than the demo window".to_string(),
            ));
        }
        if self.providers.request_timeout.is_zero() {
            return Err(ApiError::ConfigurationError(
                "PROVIDER_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl ProvidersConfig {
    pub fn from_env() -> Result<Self, ApiError> {
        let defaults = ProvidersConfig::default();

        Ok(Self {
            openai_api_key: env_var("OPENAI_API_KEY"),
            openai_base_url: env_var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            gemini_api_key: env_var("GEMINI_API_KEY"),
            gemini_base_url: env_var("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            anthropic_api_key: env_var("ANTHROPIC_API_KEY"),
            anthropic_base_url: env_var("ANTHROPIC_BASE_URL")
                .unwrap_or(defaults.anthropic_base_url),
            request_timeout: Duration::from_secs(env_parse("PROVIDER_TIMEOUT_SECS", 30)?),
        })
    }

    /// True when at least one real provider has credentials
    pub fn any_configured(&self) -> bool {
        self.openai_api_key.is_some()
            || self.gemini_api_key.is_some()
            || self.anthropic_api_key.is_some()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, ApiError>
where
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|e| {
            ApiError::ConfigurationError(format!("{} has an invalid value: {}", name, e))
        }),
        Err(_) => Ok(default),
    }
}

fn env_parse_opt<T: FromStr>(name: &str) -> Result<Option<T>, ApiError>
where
    T::Err: fmt::Display,
{
    env_var(name)
        .map(|raw| {
            raw.parse().map_err(|e| {
                ApiError::ConfigurationError(format!("{} has an invalid value: {}", name, e))
            })
        })
        .transpose()
}
