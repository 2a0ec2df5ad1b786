use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use quad_db::Lifetimes;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

/// Upper bound for both lifetimes, one year.
const MAX_TTL_HOURS: i64 = 8760;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("QUAD_JWT_SECRET is unset or still a placeholder")]
    MissingSecret,

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} must be at most 8760 hours")]
    TooLarge(&'static str),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub request_ttl_hours: i64,
    pub room_ttl_hours: i64,
    pub sweep_interval: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("QUAD_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::MissingSecret);
        }

        let db_path: PathBuf = lookup("QUAD_DB_PATH").unwrap_or_else(|| "quad.db".into()).into();
        let host = lookup("QUAD_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse(&lookup, "QUAD_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: "QUAD_HOST",
                value: host.clone(),
            })?;

        let request_ttl_hours: i64 = parse(&lookup, "QUAD_REQUEST_TTL_HOURS", 48)?;
        let room_ttl_hours: i64 = parse(&lookup, "QUAD_ROOM_TTL_HOURS", 24)?;
        let sweep_secs: u64 = parse(&lookup, "QUAD_SWEEP_INTERVAL_SECS", 300)?;

        check_ttl("QUAD_REQUEST_TTL_HOURS", request_ttl_hours)?;
        check_ttl("QUAD_ROOM_TTL_HOURS", room_ttl_hours)?;
        if sweep_secs == 0 {
            return Err(ConfigError::Zero("QUAD_SWEEP_INTERVAL_SECS"));
        }

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            request_ttl_hours,
            room_ttl_hours,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }

    pub fn lifetimes(&self) -> Lifetimes {
        Lifetimes {
            request: chrono::Duration::hours(self.request_ttl_hours),
            room: chrono::Duration::hours(self.room_ttl_hours),
        }
    }
}

fn check_ttl(name: &'static str, hours: i64) -> Result<(), ConfigError> {
    if hours <= 0 {
        return Err(ConfigError::Zero(name));
    }
    if hours > MAX_TTL_HOURS {
        return Err(ConfigError::TooLarge(name));
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}
