/// Configuration management for the ingest gateway
///
/// Loads configuration from environment variables. `KAFKA_BROKERS` is
/// required; the database URL is handled separately by the db-pool crate.
use serde::{Deserialize, Serialize};

pub const DEFAULT_EVENTS_TOPIC: &str = "events.raw.v1";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// Observability collector endpoint, if configured
    pub otel_endpoint: Option<String>,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

/// Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated)
    pub brokers: String,
    /// Events topic
    pub events_topic: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        let brokers = std::env::var("KAFKA_BROKERS")
            .map_err(|_| "KAFKA_BROKERS environment variable not set".to_string())?;
        if brokers.trim().is_empty() {
            return Err("KAFKA_BROKERS must not be empty".to_string());
        }

        Ok(Config {
            app: AppConfig {
                host: std::env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("GATEWAY_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
            },
            kafka: KafkaConfig {
                brokers,
                events_topic: std::env::var("KAFKA_EVENTS_TOPIC")
                    .unwrap_or_else(|_| DEFAULT_EVENTS_TOPIC.to_string()),
            },
            otel_endpoint: std::env::var("OTEL_EXPORTER_ENDPOINT").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_from_env_requires_brokers() {
        std::env::remove_var("KAFKA_BROKERS");
        assert!(Config::from_env().is_err());

        std::env::set_var("KAFKA_BROKERS", "   ");
        assert!(Config::from_env().is_err());
        std::env::remove_var("KAFKA_BROKERS");
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_defaults() {
        std::env::set_var("KAFKA_BROKERS", "localhost:9092");
        std::env::remove_var("KAFKA_EVENTS_TOPIC");
        std::env::remove_var("GATEWAY_PORT");

        let config = Config::from_env().unwrap();
        assert_eq!(config.kafka.brokers, "localhost:9092");
        assert_eq!(config.kafka.events_topic, DEFAULT_EVENTS_TOPIC);
        assert_eq!(config.app.port, 8080);

        std::env::remove_var("KAFKA_BROKERS");
    }
}
