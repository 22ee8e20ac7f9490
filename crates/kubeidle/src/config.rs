//! Controller configuration

use anyhow::{Context, Result};
use kubeidle_lib::{ControllerConfig, NamespaceSet, RetryPolicy, TimeWindow};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Settings read from unprefixed environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct IdleConfig {
    /// Start of the active period, `HH:MM` or `HHMM` (UTC)
    pub start_time: String,

    /// Start of the stale period, `HH:MM` or `HHMM` (UTC)
    pub stop_time: String,

    /// Comma separated namespaces to watch
    #[serde(default)]
    pub namespaces: String,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Stamped on every scale-down record
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Append scale-down records to this file instead of logging them
    #[serde(default)]
    pub record_path: Option<PathBuf>,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_metrics_port() -> u16 {
    9095
}

fn default_cluster_name() -> String {
    "default".to_string()
}

fn default_reconcile_interval() -> u64 {
    1
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_backoff() -> u64 {
    10
}

impl IdleConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder().add_source(config::Environment::default());
        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config = builder.build().context("failed to read configuration")?;
        config
            .try_deserialize()
            .context("invalid configuration (START_TIME and STOP_TIME are required)")
    }

    pub fn window(&self) -> Result<TimeWindow> {
        Ok(TimeWindow::parse(&self.start_time, &self.stop_time)?)
    }

    pub fn namespace_set(&self) -> NamespaceSet {
        NamespaceSet::from_csv(&self.namespaces)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            check_interval: Duration::from_secs(self.reconcile_interval_secs.max(1)),
            ..ControllerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeidle_lib::KubeIdleError;

    fn builder(pairs: &[(&str, &str)]) -> config::ConfigBuilder<config::builder::DefaultState> {
        pairs.iter().fold(config::Config::builder(), |b, (k, v)| {
            b.set_override(*k, *v).unwrap()
        })
    }

    #[test]
    fn test_defaults_applied() {
        let config =
            IdleConfig::from_builder(builder(&[("start_time", "08:00"), ("stop_time", "20:00")]))
                .unwrap();

        assert_eq!(config.metrics_port, 9095);
        assert_eq!(config.cluster_name, "default");
        assert!(config.record_path.is_none());
        assert_eq!(config.namespace_set().iter().collect::<Vec<_>>(), vec!["default"]);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.controller_config().check_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_overrides_parsed() {
        let config = IdleConfig::from_builder(builder(&[
            ("start_time", "2200"),
            ("stop_time", "0600"),
            ("namespaces", "team-a, team-b"),
            ("metrics_port", "9100"),
            ("record_path", "/var/lib/kubeidle/records.jsonl"),
            ("retry_attempts", "3"),
        ]))
        .unwrap();

        assert_eq!(config.metrics_port, 9100);
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert_eq!(
            config.namespace_set().iter().collect::<Vec<_>>(),
            vec!["team-a", "team-b"]
        );
        assert_eq!(
            config.record_path.as_deref(),
            Some(std::path::Path::new("/var/lib/kubeidle/records.jsonl"))
        );

        let window = config.window().unwrap();
        assert_eq!(window.active_start().format("%H:%M").to_string(), "22:00");
        assert_eq!(window.stale_start().format("%H:%M").to_string(), "06:00");
    }

    #[test]
    fn test_missing_start_time_fails() {
        let err = IdleConfig::from_builder(builder(&[("stop_time", "20:00")])).unwrap_err();
        assert!(format!("{err:#}").contains("start_time"));
    }

    #[test]
    fn test_malformed_time_fails_fast() {
        let config =
            IdleConfig::from_builder(builder(&[("start_time", "25:61"), ("stop_time", "20:00")]))
                .unwrap();

        let err = config.window().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KubeIdleError>(),
            Some(KubeIdleError::InvalidTimeFormat { .. })
        ));
    }
}
