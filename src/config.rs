use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::outbox::{RelayConfig, TopicsConfig};

/// Service configuration, read from environment variables (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL connection string. Unset runs on the in-memory store.
    pub database_url: Option<String>,
    /// Kafka/Redpanda bootstrap servers. Unset keeps messages in memory.
    pub kafka_brokers: Option<String>,
    pub topics: TopicsConfig,
    pub relay: RelayConfig,
    pub metrics_port: u16,
    /// Run a sample order lifecycle at startup
    pub run_demo: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let defaults = TopicsConfig::default();
        let topic = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let topics = TopicsConfig {
            order_created: topic("TOPIC_ORDER_CREATED", &defaults.order_created),
            product_item_added: topic("TOPIC_PRODUCT_ITEM_ADDED", &defaults.product_item_added),
            product_item_removed: topic("TOPIC_PRODUCT_ITEM_REMOVED", &defaults.product_item_removed),
            order_paid: topic("TOPIC_ORDER_PAID", &defaults.order_paid),
            order_cancelled: topic("TOPIC_ORDER_CANCELLED", &defaults.order_cancelled),
            order_submitted: topic("TOPIC_ORDER_SUBMITTED", &defaults.order_submitted),
            order_completed: topic("TOPIC_ORDER_COMPLETED", &defaults.order_completed),
        };

        let unmapped = topics.unmapped();
        if !unmapped.is_empty() {
            let names: Vec<&str> = unmapped.iter().map(|t| t.as_str()).collect();
            bail!("Empty topic configured for event types: {}", names.join(", "));
        }

        let batch_size: usize = parse_or(var("RELAY_BATCH_SIZE"), "RELAY_BATCH_SIZE", 100)?;
        if batch_size == 0 {
            bail!("RELAY_BATCH_SIZE must be greater than zero");
        }

        let millis = |key: &str, default: u64| -> anyhow::Result<Duration> {
            Ok(Duration::from_millis(parse_or(var(key), key, default)?))
        };
        let positive_millis = |key: &str, default: u64| -> anyhow::Result<Duration> {
            let value = millis(key, default)?;
            if value.is_zero() {
                bail!("{key} must be greater than zero");
            }
            Ok(value)
        };

        let relay = RelayConfig {
            batch_size,
            poll_interval: positive_millis("RELAY_POLL_INTERVAL_MS", 1000)?,
            publish_timeout: positive_millis("PUBLISH_TIMEOUT_MS", 5000)?,
            retry_backoff: millis("RELAY_RETRY_BACKOFF_MS", 1000)?,
            max_retry_backoff: positive_millis("RELAY_MAX_RETRY_BACKOFF_MS", 300_000)?,
        };
        if relay.max_retry_backoff < relay.retry_backoff {
            bail!("RELAY_MAX_RETRY_BACKOFF_MS must not be below RELAY_RETRY_BACKOFF_MS");
        }

        Ok(Self {
            database_url: var("DATABASE_URL"),
            kafka_brokers: var("KAFKA_BROKERS"),
            topics,
            relay,
            metrics_port: parse_or(var("METRICS_PORT"), "METRICS_PORT", 9090)?,
            run_demo: parse_or(var("RUN_DEMO"), "RUN_DEMO", false)?,
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.kafka_brokers, None);
        assert_eq!(config.topics, TopicsConfig::default());
        assert_eq!(config.relay.batch_size, 100);
        assert_eq!(config.relay.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.relay.publish_timeout, Duration::from_millis(5000));
        assert_eq!(config.relay.retry_backoff, Duration::from_secs(1));
        assert_eq!(config.relay.max_retry_backoff, Duration::from_secs(300));
        assert_eq!(config.metrics_port, 9090);
        assert!(!config.run_demo);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("KAFKA_BROKERS", "redpanda:9092"),
            ("TOPIC_ORDER_PAID", "payments.v1"),
            ("RELAY_BATCH_SIZE", "25"),
            ("PUBLISH_TIMEOUT_MS", "250"),
            ("RELAY_RETRY_BACKOFF_MS", "0"),
            ("RELAY_MAX_RETRY_BACKOFF_MS", "60000"),
            ("RUN_DEMO", "true"),
        ])
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/orders"));
        assert_eq!(config.kafka_brokers.as_deref(), Some("redpanda:9092"));
        assert_eq!(config.topics.order_paid, "payments.v1");
        assert_eq!(config.topics.order_created, "order-created");
        assert_eq!(config.relay.batch_size, 25);
        assert_eq!(config.relay.publish_timeout, Duration::from_millis(250));
        assert_eq!(config.relay.retry_backoff, Duration::ZERO);
        assert_eq!(config.relay.max_retry_backoff, Duration::from_secs(60));
        assert!(config.run_demo);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = load(&[("RELAY_POLL_INTERVAL_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("RELAY_POLL_INTERVAL_MS"));

        assert!(load(&[("RELAY_BATCH_SIZE", "0")]).is_err());

        for key in ["RELAY_POLL_INTERVAL_MS", "PUBLISH_TIMEOUT_MS", "RELAY_MAX_RETRY_BACKOFF_MS"] {
            let err = load(&[(key, "0")]).unwrap_err();
            assert!(err.to_string().contains(key), "{key}: {err}");
        }

        let err = load(&[
            ("RELAY_RETRY_BACKOFF_MS", "5000"),
            ("RELAY_MAX_RETRY_BACKOFF_MS", "1000"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("RELAY_MAX_RETRY_BACKOFF_MS"));
    }

    #[test]
    fn test_empty_topic_is_rejected() {
        let err = load(&[("TOPIC_ORDER_CANCELLED", "")]).unwrap_err();
        assert!(err.to_string().contains("OrderCancelled"));
    }
}
