//! Process-level settings for the HTTP server.

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Postgres URL; selects the Postgres store on its own.
    pub database_url: Option<String>,
    /// Redis URL; selects the Redis cache when built with the `redis`
    /// feature, independently of the store.
    pub redis_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            database_url: None,
            redis_url: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        Self {
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| {
                tracing::warn!("BIND_ADDR not set; using {DEFAULT_BIND_ADDR}");
                DEFAULT_BIND_ADDR.to_string()
            }),
            database_url: non_empty("DATABASE_URL"),
            redis_url: non_empty("REDIS_URL"),
        }
    }
}
