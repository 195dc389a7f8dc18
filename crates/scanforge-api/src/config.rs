//! Environment-driven server configuration.

use std::env;
use std::net::SocketAddr;

use scanforge_core::{Error, Result};

/// Server configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind: SocketAddr,
    /// Bearer token required for mutating requests. `None` disables auth.
    pub api_token: Option<String>,
    pub tick_secs: u64,
    pub dispatch_secs: u64,
    pub workers: Vec<String>,
    pub runner_cmd: String,
    pub ai_url: String,
    pub queue_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| Error::InvalidInput("DATABASE_URL must be set".into()))?;

        let bind = env::var("SCANFORGE_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| Error::InvalidInput(format!("invalid SCANFORGE_BIND: {}", e)))?;

        let workers = env::var("SCANFORGE_WORKERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            database_url,
            bind,
            api_token: env::var("SCANFORGE_API_TOKEN").ok().filter(|t| !t.is_empty()),
            tick_secs: parse_env("SCANFORGE_TICK_SECS", 60)?,
            dispatch_secs: parse_env("SCANFORGE_DISPATCH_SECS", 15)?,
            workers,
            runner_cmd: env::var("SCANFORGE_RUNNER_CMD")
                .unwrap_or_else(|_| "scanforge-runner".to_string()),
            ai_url: env::var("SCANFORGE_AI_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9200".to_string()),
            queue_retention_days: parse_env("SCANFORGE_QUEUE_RETENTION_DAYS", 30)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}
