//! Runtime configuration, read from the environment (and `.env` if present).

use std::env;
use std::net::SocketAddr;
use thiserror::Error;

use crate::domain::ExistencePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} is required to create the bootstrap admin")]
    IncompleteAdmin(&'static str),
}

/// Credentials of the admin account created at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub cors_origin: String,
    pub page_size: i64,
    pub max_page_size: i64,
    pub existence: ExistencePolicy,
    pub admin: Option<AdminSeed>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:early_child.db".to_string(),
            database_max_connections: 5,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            cors_origin: "http://localhost:8080".to_string(),
            page_size: 10,
            max_page_size: 100,
            existence: ExistencePolicy::Conceal,
            admin: None,
        }
    }
}

impl Config {
    /// Load `.env`, then read every setting from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let page_size = parse(&lookup, "PAGE_SIZE", defaults.page_size)?;
        let max_page_size = parse(&lookup, "MAX_PAGE_SIZE", defaults.max_page_size)?;
        if page_size < 1 || max_page_size < page_size {
            return Err(ConfigError::Invalid {
                key: "PAGE_SIZE",
                value: page_size.to_string(),
                reason: format!("must be between 1 and MAX_PAGE_SIZE ({})", max_page_size),
            });
        }

        let disclose = parse(&lookup, "DISCLOSE_EXISTENCE", false)?;

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: parse(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            bind_addr: parse(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            cors_origin: lookup("CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            page_size,
            max_page_size,
            existence: if disclose {
                ExistencePolicy::Disclose
            } else {
                ExistencePolicy::Conceal
            },
            admin: admin_seed(&lookup)?,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: value.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn admin_seed<F>(lookup: &F) -> Result<Option<AdminSeed>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match (
        lookup("ADMIN_USERNAME"),
        lookup("ADMIN_PASSWORD"),
        lookup("ADMIN_EMAIL"),
    ) {
        (None, None, None) => Ok(None),
        (Some(username), Some(password), email) => Ok(Some(AdminSeed {
            email: email.unwrap_or_else(|| format!("{}@localhost.localdomain", username)),
            username,
            password,
        })),
        (None, _, _) => Err(ConfigError::IncompleteAdmin("ADMIN_USERNAME")),
        (_, None, _) => Err(ConfigError::IncompleteAdmin("ADMIN_PASSWORD")),
    }
}
