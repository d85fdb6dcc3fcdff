use std::fmt::Display;
use std::str::FromStr;

use anyhow::{anyhow, ensure, Context};
use tracing::info;

use crate::store::MAX_BATCH_OPS;

pub const DEFAULT_CURRENT_YEAR: i64 = 2026;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub batch_limit: usize,
    pub current_year: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let config = Self {
            database_url,
            max_connections: try_load(&lookup, "PG_MAX_CONNECTIONS", 5)?,
            batch_limit: try_load(&lookup, "PLACEMENT_BATCH_LIMIT", MAX_BATCH_OPS)?,
            current_year: try_load(&lookup, "PLACEMENT_CURRENT_YEAR", DEFAULT_CURRENT_YEAR)?,
        };

        // Long cascades reserve one slot per batch for their checkpoint.
        ensure!(
            (2..=MAX_BATCH_OPS).contains(&config.batch_limit),
            "PLACEMENT_BATCH_LIMIT must be between 2 and {MAX_BATCH_OPS}, got {}",
            config.batch_limit
        );
        Ok(config)
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key} value {raw:?}: {e}")),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
