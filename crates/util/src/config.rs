use std::{env, fmt, net::SocketAddr};

use super::{database_url, server_bind_address};

const DEV_SESSION_SECRET: &str = "estate-desk-development-secret";
const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_HIGHLIGHT_QUOTA: u32 = 6;
const DEFAULT_CODE_MAX_ATTEMPTS: u32 = 5;
const MAX_CODE_ATTEMPTS: u32 = 20;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub session_secret: Vec<u8>,
    /// IANA name of the agency timezone used for follow-up dates.
    pub timezone: String,
    pub highlight_quota: u32,
    pub code_max_attempts: u32,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let session_secret = match env::var("SESSION_SECRET") {
            Ok(value) if !value.trim().is_empty() => value.into_bytes(),
            _ if environment == Environment::Production => {
                return Err(ConfigError::MissingVar("SESSION_SECRET"))
            }
            _ => DEV_SESSION_SECRET.as_bytes().to_vec(),
        };

        let timezone = env::var("APP_TIMEZONE").unwrap_or_else(|_| DEFAULT_TIMEZONE.to_string());
        let highlight_quota = parse_u32("HIGHLIGHT_QUOTA", DEFAULT_HIGHLIGHT_QUOTA)?;
        let code_max_attempts = parse_u32("CODE_MAX_ATTEMPTS", DEFAULT_CODE_MAX_ATTEMPTS)?;
        if code_max_attempts == 0 || code_max_attempts > MAX_CODE_ATTEMPTS {
            return Err(ConfigError::OutOfRange {
                name: "CODE_MAX_ATTEMPTS",
                value: code_max_attempts,
            });
        }

        Ok(Self {
            bind_addr,
            environment,
            database_url: database_url(),
            session_secret,
            timezone,
            highlight_quota,
            code_max_attempts,
        })
    }
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVar(&'static str),
    InvalidNumber { name: &'static str, value: String },
    OutOfRange { name: &'static str, value: u32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVar(name) => write!(f, "{name} must be set in production"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative integer (got {value})")
            }
            Self::OutOfRange { name, value } => {
                write!(f, "{name} must be between 1 and {MAX_CODE_ATTEMPTS} (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
