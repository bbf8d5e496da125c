//! # Service Configuration
//!
//! Environment-driven configuration for the onboarding API. Every value has
//! a default except the token signing secret, which is mandatory outside
//! development.
//!
//! | Variable | Default |
//! |---|---|
//! | `PORT` | `8080` |
//! | `APP_ENV` | `production` (`development` exposes error debug detail) |
//! | `OTP_SIMULATE` | `false` (echo OTPs in responses) |
//! | `JWT_SECRET` | required unless `APP_ENV=development` |
//! | `JWT_ISSUER` | `dsa-onboarding` |
//! | `ACCESS_TOKEN_TTL_SECS` | `900` |
//! | `REFRESH_TOKEN_TTL_SECS` | `604800` |
//! | `RATE_LIMIT_<TIER>_MAX` / `RATE_LIMIT_<TIER>_WINDOW_SECS` | see [`RateLimitSettings`] |
//! | `TRUST_PROXY` | `0` (number of trusted proxy hops; `true` means 1) |
//! | `DATABASE_URL` | unset (in-memory only) |

use std::str::FromStr;
use std::time::Duration;

use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use crate::middleware::client_ip::ProxyTrust;
use crate::middleware::rate_limit::RateLimitConfig;

/// Minimum accepted length of `JWT_SECRET` in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Quotas for each rate-limit tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Every `/api` route: 100 requests per 15 minutes.
    pub general: RateLimitConfig,
    /// Login and refresh: 10 requests per 15 minutes.
    pub auth: RateLimitConfig,
    /// OTP dispatch per phone: 3 requests per minute.
    pub otp: RateLimitConfig,
    /// Calls that reach third-party verification providers: 20 per 5 minutes.
    pub external: RateLimitConfig,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            general: RateLimitConfig::new(100, 15 * 60),
            auth: RateLimitConfig::new(10, 15 * 60),
            otp: RateLimitConfig::new(3, 60),
            external: RateLimitConfig::new(20, 5 * 60),
        }
    }
}

/// Application configuration.
///
/// Custom `Debug` redacts the signing secret.
#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Development mode: error bodies carry a `stack` field.
    pub development: bool,
    /// Echo generated OTPs in the send-otp response instead of relying on SMS.
    pub otp_simulate: bool,
    pub jwt_secret: Zeroizing<String>,
    pub jwt_issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub rate_limits: RateLimitSettings,
    /// Reverse proxies allowed to set `X-Forwarded-For` and `X-Real-IP`.
    pub trusted_proxies: ProxyTrust,
    pub database_url: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("development", &self.development)
            .field("otp_simulate", &self.otp_simulate)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("rate_limits", &self.rate_limits)
            .field("trusted_proxies", &self.trusted_proxies)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Defaults for tests and local runs. Production deployments go through
/// [`AppConfig::from_env`], which refuses to start without a real secret.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            development: false,
            otp_simulate: false,
            jwt_secret: Zeroizing::new("local-development-signing-secret-0000".to_string()),
            jwt_issuer: "dsa-onboarding".to_string(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            rate_limits: RateLimitSettings::default(),
            trusted_proxies: ProxyTrust::none(),
            database_url: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let development = std::env::var("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("development"))
            .unwrap_or(false);

        let jwt_secret = match std::env::var("JWT_SECRET") {
            Ok(secret) if secret.len() >= MIN_SECRET_LEN => Zeroizing::new(secret),
            Ok(_) => return Err(ConfigError::SecretTooShort(MIN_SECRET_LEN)),
            Err(_) if development => {
                tracing::warn!(
                    "JWT_SECRET not set; generated an ephemeral secret. \
                     Tokens will not survive a restart."
                );
                ephemeral_secret()
            }
            Err(_) => return Err(ConfigError::MissingSecret),
        };

        let rate = |tier: &str, fallback: &RateLimitConfig| -> Result<RateLimitConfig, ConfigError> {
            let max = env_parse(&format!("RATE_LIMIT_{tier}_MAX"), fallback.max_requests)?;
            let window = env_parse(
                &format!("RATE_LIMIT_{tier}_WINDOW_SECS"),
                fallback.window.as_secs(),
            )?;
            if max == 0 || window == 0 {
                return Err(ConfigError::Invalid(
                    format!("RATE_LIMIT_{tier}"),
                    "quota and window must be non-zero".to_string(),
                ));
            }
            Ok(RateLimitConfig::new(max, window))
        };
        let limits = &defaults.rate_limits;

        Ok(Self {
            port: env_parse("PORT", defaults.port)?,
            development,
            otp_simulate: env_parse("OTP_SIMULATE", false)?,
            jwt_secret,
            jwt_issuer: std::env::var("JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            access_token_ttl: Duration::from_secs(env_parse(
                "ACCESS_TOKEN_TTL_SECS",
                defaults.access_token_ttl.as_secs(),
            )?),
            refresh_token_ttl: Duration::from_secs(env_parse(
                "REFRESH_TOKEN_TTL_SECS",
                defaults.refresh_token_ttl.as_secs(),
            )?),
            rate_limits: RateLimitSettings {
                general: rate("GENERAL", &limits.general)?,
                auth: rate("AUTH", &limits.auth)?,
                otp: rate("OTP", &limits.otp)?,
                external: rate("EXTERNAL", &limits.external)?,
            },
            trusted_proxies: trust_proxy_from_env()?,
            database_url: std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
        })
    }
}

fn ephemeral_secret() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut bytes[..]);
    Zeroizing::new(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

fn parse_trust_proxy(raw: &str) -> Option<ProxyTrust> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Some(ProxyTrust::hops(1)),
        "false" | "" => Some(ProxyTrust::none()),
        n => n.parse().ok().map(ProxyTrust::hops),
    }
}

fn trust_proxy_from_env() -> Result<ProxyTrust, ConfigError> {
    match std::env::var("TRUST_PROXY") {
        Ok(raw) => parse_trust_proxy(&raw).ok_or(ConfigError::Invalid("TRUST_PROXY".to_string(), raw)),
        Err(_) => Ok(ProxyTrust::none()),
    }
}

fn env_parse<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(var.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JWT_SECRET environment variable is required outside development")]
    MissingSecret,
    #[error("JWT_SECRET must be at least {0} bytes")]
    SecretTooShort(usize),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}
