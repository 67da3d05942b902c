use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

// ============================================================================
// Configuration
// ============================================================================
//
// The environment is read once at startup into typed sections which are
// handed to each component's constructor. Each subcommand loads only the
// sections it needs, so `scan` does not demand Kafka settings and `watch`
// does not demand an escalation target.
//
// Loading goes through a lookup function; `from_env` binds it to the
// process environment.
//
// ============================================================================

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ESCALATION_THRESHOLD_SECS: u64 = 4 * 60;

struct Source<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Source<'_> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .ok_or_else(|| anyhow!("missing required environment variable {name}"))
    }

    fn parsed<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.optional(name) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid value for {name}: {raw:?}")),
            None => Ok(default),
        }
    }

    fn seconds(&self, name: &str, default: u64) -> Result<Duration> {
        let secs: u64 = self.parsed(name, default)?;
        if secs == 0 {
            return Err(anyhow!("{name} must be greater than zero"));
        }
        Ok(Duration::from_secs(secs))
    }
}

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Per-call bound applied to every outbound network operation.
pub fn call_timeout_from(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Duration> {
    Source { lookup }.seconds("CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS)
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Clone)]
pub struct StoreConfig {
    pub nodes: Vec<String>,
    pub keyspace: String,
    pub table: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub replication_factor: u32,
    pub call_timeout: Duration,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("nodes", &self.nodes)
            .field("keyspace", &self.keyspace)
            .field("table", &self.table)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .field("replication_factor", &self.replication_factor)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl StoreConfig {
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let src = Source { lookup };
        let nodes: Vec<String> = src
            .required("ORDER_STORE_NODES")?
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        if nodes.is_empty() {
            return Err(anyhow!("ORDER_STORE_NODES must list at least one node"));
        }

        Ok(Self {
            nodes,
            keyspace: src.optional("ORDER_STORE_KEYSPACE").unwrap_or_else(|| "orders_ks".into()),
            table: src.optional("ORDER_STORE_TABLE").unwrap_or_else(|| "orders".into()),
            username: src.optional("ORDER_STORE_USERNAME"),
            password: src.optional("ORDER_STORE_PASSWORD"),
            replication_factor: src.parsed("ORDER_STORE_REPLICATION_FACTOR", 1)?,
            call_timeout: call_timeout_from(lookup)?,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&process_env)
    }
}

/// Object storage holding shipment documents.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// User-metadata key on the uploaded object that names the order.
    pub metadata_key: String,
    pub call_timeout: Duration,
}

impl StorageConfig {
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let src = Source { lookup };
        Ok(Self {
            region: src.optional("AWS_REGION"),
            endpoint: src.optional("OBJECT_STORAGE_ENDPOINT"),
            // S3 lower-cases user-metadata keys.
            metadata_key: src
                .optional("ORDER_METADATA_KEY")
                .unwrap_or_else(|| "orderid".into())
                .to_lowercase(),
            call_timeout: call_timeout_from(lookup)?,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&process_env)
    }
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub brokers: String,
    pub topic: String,
    pub call_timeout: Duration,
}

impl NotifierConfig {
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let src = Source { lookup };
        Ok(Self {
            brokers: src.required("NOTIFICATION_BROKERS")?,
            topic: src.required("NOTIFICATION_TOPIC")?,
            call_timeout: call_timeout_from(lookup)?,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&process_env)
    }
}

#[derive(Debug, Clone)]
pub struct EscalationConfig {
    pub target_scheme: String,
    pub target_host: String,
    pub target_port: u16,
    pub threshold: Duration,
    pub interval: Duration,
    pub concurrency: usize,
    pub call_timeout: Duration,
}

impl EscalationConfig {
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let src = Source { lookup };
        let concurrency: usize = src.parsed("ESCALATION_CONCURRENCY", 8)?;

        Ok(Self {
            target_scheme: src
                .optional("ESCALATION_TARGET_SCHEME")
                .unwrap_or_else(|| "http".into()),
            target_host: src.required("ESCALATION_TARGET_HOST")?,
            target_port: src.parsed("ESCALATION_TARGET_PORT", 3000)?,
            threshold: src.seconds("ESCALATION_THRESHOLD_SECS", DEFAULT_ESCALATION_THRESHOLD_SECS)?,
            interval: src.seconds("ESCALATION_INTERVAL_SECS", 60)?,
            concurrency: concurrency.max(1),
            call_timeout: call_timeout_from(lookup)?,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&process_env)
    }

    pub fn target_base_url(&self) -> String {
        format!("{}://{}:{}", self.target_scheme, self.target_host, self.target_port)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_host: String,
    pub bind_port: u16,
}

impl ServerConfig {
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let src = Source { lookup };
        Ok(Self {
            bind_host: src.optional("HTTP_BIND_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            bind_port: src.parsed("HTTP_BIND_PORT", 3000)?,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&process_env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_store_config_defaults() {
        let cfg = StoreConfig::from_lookup(&env(&[("ORDER_STORE_NODES", "10.0.0.1:9042, 10.0.0.2:9042")]))
            .unwrap();

        assert_eq!(cfg.nodes, vec!["10.0.0.1:9042", "10.0.0.2:9042"]);
        assert_eq!(cfg.keyspace, "orders_ks");
        assert_eq!(cfg.table, "orders");
        assert_eq!(cfg.call_timeout, Duration::from_secs(10));
        assert!(cfg.password.is_none());
    }

    #[test]
    fn test_missing_required_names_the_variable() {
        let err = StoreConfig::from_lookup(&env(&[])).unwrap_err();
        assert!(err.to_string().contains("ORDER_STORE_NODES"));

        let err = NotifierConfig::from_lookup(&env(&[("NOTIFICATION_BROKERS", "k:9092")])).unwrap_err();
        assert!(err.to_string().contains("NOTIFICATION_TOPIC"));
    }

    #[test]
    fn test_escalation_config() {
        let cfg = EscalationConfig::from_lookup(&env(&[
            ("ESCALATION_TARGET_HOST", "orders.internal"),
            ("CALL_TIMEOUT_SECS", "3"),
        ]))
        .unwrap();

        assert_eq!(cfg.threshold, Duration::from_secs(240));
        assert_eq!(cfg.call_timeout, Duration::from_secs(3));
        assert_eq!(cfg.target_base_url(), "http://orders.internal:3000");

        let err = EscalationConfig::from_lookup(&env(&[
            ("ESCALATION_TARGET_HOST", "orders.internal"),
            ("ESCALATION_THRESHOLD_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("ESCALATION_THRESHOLD_SECS"));
    }

    #[test]
    fn test_zero_durations_rejected() {
        let err = call_timeout_from(&env(&[("CALL_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_storage_metadata_key_is_lowercased() {
        let cfg = StorageConfig::from_lookup(&env(&[("ORDER_METADATA_KEY", "OrderId")])).unwrap();
        assert_eq!(cfg.metadata_key, "orderid");
        assert!(cfg.endpoint.is_none());
    }

    #[test]
    fn test_password_redacted_in_debug() {
        let cfg = StoreConfig::from_lookup(&env(&[
            ("ORDER_STORE_NODES", "db:9042"),
            ("ORDER_STORE_USERNAME", "svc"),
            ("ORDER_STORE_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<REDACTED>"));
    }
}
