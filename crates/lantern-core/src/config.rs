use crate::error::{LanternError, Result};
use std::time::Duration;

/// Connection pool settings.
///
/// `acquire_timeout` and `statement_timeout` default to `None`, which keeps
/// the blocking behaviour: pool acquisition waits until a connection is
/// returned and statements run without a server-side limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolConfig {
    pub url: String,
    /// Upper bound on open connections; probed from the server when unset.
    pub max_size: Option<usize>,
    pub acquire_timeout: Option<Duration>,
    pub statement_timeout: Option<Duration>,
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size.max(1));
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Reads `LANTERN_DB_URL` (or `DB_URL`), `LANTERN_MAX_CONNECTIONS`,
    /// `LANTERN_ACQUIRE_TIMEOUT_MS` and `LANTERN_STATEMENT_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("LANTERN_DB_URL")
            .or_else(|_| std::env::var("DB_URL"))
            .map_err(|_| {
                LanternError::Configuration(
                    "set LANTERN_DB_URL to a postgres connection string".into(),
                )
            })?;
        let max_size = std::env::var("LANTERN_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .map(|n| n.max(1));
        let acquire_timeout = std::env::var("LANTERN_ACQUIRE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis);
        let statement_timeout = std::env::var("LANTERN_STATEMENT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis);
        Ok(Self {
            url,
            max_size,
            acquire_timeout,
            statement_timeout,
        })
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(LanternError::Configuration(
                "missing database connection url".into(),
            ));
        }
        Ok(())
    }
}
