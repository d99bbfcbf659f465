use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::{ClassifiedError, ErrorKind, Result};
use crate::providers::{Provider, ProviderConfig};

#[derive(Clone)]
pub struct Config {
    pub server_addr: SocketAddr,
    /// Cache entry lifetime in milliseconds; 0 disables expiry.
    pub cache_ttl_ms: u64,
    /// Default per-provider admission budget.
    pub rate_limit_max: usize,
    pub rate_limit_window_ms: u64,
    /// Env-provided provider fallback, used when no client supplies one.
    pub provider_config: Option<ProviderConfig>,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
        let port = port
            .parse::<u16>()
            .map_err(|e| config_error(format!("Invalid port: {e}")))?;
        let ip = IpAddr::from_str(&host)
            .map_err(|e| config_error(format!("Invalid host address: {e}")))?;

        let cache_ttl_ms = parse_env("CACHE_TTL_SECS", 24 * 60 * 60)? * 1000;
        let rate_limit_max = parse_env("RATE_LIMIT_MAX", 10)? as usize;
        let rate_limit_window_ms = parse_env("RATE_LIMIT_WINDOW_SECS", 60)? * 1000;

        Ok(Config {
            server_addr: SocketAddr::new(ip, port),
            cache_ttl_ms,
            rate_limit_max,
            rate_limit_window_ms,
            provider_config: load_provider_config()?,
        })
    }
}

/// Optional PROVIDER / API_KEY / MODEL triple for running without a page
/// client supplying configuration.
fn load_provider_config() -> Result<Option<ProviderConfig>> {
    let Ok(provider) = env::var("PROVIDER") else {
        return Ok(None);
    };
    let provider = provider
        .parse::<Provider>()
        .map_err(config_error)?;
    let api_key = env::var("API_KEY")
        .map_err(|_| config_error("PROVIDER is set but API_KEY is missing"))?;
    let model = env::var("MODEL").unwrap_or_else(|_| default_model(provider).to_string());

    Ok(Some(ProviderConfig {
        provider,
        api_key: Some(api_key),
        encrypted_key: None,
        model,
        recovery: None,
    }))
}

fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "gpt-4o-mini",
        Provider::Anthropic => "claude-3-5-haiku-latest",
        Provider::DeepSeek => "deepseek-chat",
    }
}

fn parse_env(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|e| config_error(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn config_error(message: impl Into<String>) -> ClassifiedError {
    ClassifiedError::new(ErrorKind::ConfigError, message)
}
