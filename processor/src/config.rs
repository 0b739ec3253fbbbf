/// Configuration management for the event processor
///
/// Loads configuration from environment variables. `KAFKA_BROKERS` is
/// required; the database URL is handled separately by the db-pool crate.
use serde::{Deserialize, Serialize};

pub const DEFAULT_EVENTS_TOPIC: &str = "events.raw.v1";
pub const DEFAULT_GROUP_ID: &str = "event-processor-v1";
pub const DEFAULT_SINK_URL: &str = "http://localhost:8085";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// Broadcast sink base URL
    pub broadcast_sink_url: String,
    /// Port for the health/metrics sidecar server
    pub http_port: u16,
    /// Observability collector endpoint, if configured
    pub otel_endpoint: Option<String>,
}

/// Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated)
    pub brokers: String,
    /// Events topic
    pub topic: String,
    /// Consumer group ID (stable per deployment)
    pub group_id: String,
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
            kafka: KafkaConfig {
                brokers,
                topic: std::env::var("KAFKA_EVENTS_TOPIC")
                    .unwrap_or_else(|_| DEFAULT_EVENTS_TOPIC.to_string()),
                group_id: std::env::var("CONSUMER_GROUP_ID")
                    .unwrap_or_else(|_| DEFAULT_GROUP_ID.to_string()),
            },
            broadcast_sink_url: std::env::var("BROADCAST_SINK_URL")
                .unwrap_or_else(|_| DEFAULT_SINK_URL.to_string()),
            http_port: std::env::var("PROCESSOR_HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8081),
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
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_defaults() {
        std::env::set_var("KAFKA_BROKERS", "localhost:9092");
        std::env::remove_var("KAFKA_EVENTS_TOPIC");
        std::env::remove_var("CONSUMER_GROUP_ID");
        std::env::remove_var("BROADCAST_SINK_URL");

        let config = Config::from_env().unwrap();
        assert_eq!(config.kafka.topic, DEFAULT_EVENTS_TOPIC);
        assert_eq!(config.kafka.group_id, DEFAULT_GROUP_ID);
        assert_eq!(config.broadcast_sink_url, DEFAULT_SINK_URL);
        assert_eq!(config.http_port, 8081);

        std::env::remove_var("KAFKA_BROKERS");
    }
}
