use serde::Deserialize;
use std::env;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Fixed member id; a random one is generated when unset
    pub member_id: Option<String>,
    /// Rows buffered between a query job and its consumer
    pub result_buffer_capacity: usize,
    /// Back-off of an idle streaming source
    pub idle_poll_millis: u64,
    /// Default wait for the first row of a fetch
    pub fetch_wait_millis: u64,
    /// Open results not fetched for this long are closed
    pub result_idle_timeout_millis: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("catalog.url", "./catalog.db")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("engine.result_buffer_capacity", 4096)?
            .set_default("engine.idle_poll_millis", 10)?
            .set_default("engine.fetch_wait_millis", 1000)?
            .set_default("engine.result_idle_timeout_millis", 300_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        if let Ok(catalog_url) = env::var("CATALOG_URL") {
            builder = builder.set_override("catalog.url", catalog_url)?;
        }

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(member_id) = env::var("MEMBER_ID") {
            builder = builder.set_override("engine.member_id", Some(member_id))?;
        }

        if let Ok(capacity) = env::var("RESULT_BUFFER_CAPACITY") {
            builder = builder.set_override(
                "engine.result_buffer_capacity",
                capacity.parse::<u64>().unwrap_or(4096),
            )?;
        }

        if let Ok(idle_poll) = env::var("JOB_IDLE_POLL_MS") {
            builder = builder.set_override("engine.idle_poll_millis", idle_poll.parse::<u64>().unwrap_or(10))?;
        }

        if let Ok(fetch_wait) = env::var("FETCH_WAIT_MS") {
            builder = builder.set_override("engine.fetch_wait_millis", fetch_wait.parse::<u64>().unwrap_or(1000))?;
        }

        if let Ok(idle_timeout) = env::var("RESULT_IDLE_TIMEOUT_MS") {
            builder = builder.set_override(
                "engine.result_idle_timeout_millis",
                idle_timeout.parse::<u64>().unwrap_or(300_000),
            )?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn member_id(&self) -> Result<Uuid, config::ConfigError> {
        match &self.engine.member_id {
            Some(id) => Uuid::parse_str(id)
                .map_err(|e| config::ConfigError::Message(format!("Invalid MEMBER_ID '{}': {}", id, e))),
            None => Ok(Uuid::new_v4()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert!(config.engine.result_buffer_capacity > 0);
        assert!(config.engine.result_idle_timeout_millis > 0);
        assert!(config.member_id().is_ok());
        assert!(!config.catalog.url.is_empty());
    }
}
