//! Querier configuration and layered loading (defaults, TOML file, `TSQ_*` environment).

use crate::error::DbError;
use crate::query::is_power_of_two;
use crate::telemetry::{noop_event_listener, noop_reporter, PerformanceReporter, QueryEventListener};

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Environment variable prefix for configuration overrides, e.g. `TSQ_QUERY_WORKERS=4`.
pub const ENV_PREFIX: &str = "TSQ";

/// Configuration options for the [`crate::query::Querier`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuerierConfig {
    /// Number of parallel partition readers. Must be a power of two and > 0.
    pub query_workers: usize,
    /// Skip client-side aggregation; requested functions are not evaluated and raw
    /// columns are returned.
    pub disable_client_aggr: bool,
    /// Structured event hook for observability (no-op by default).
    #[serde(skip, default = "noop_event_listener")]
    pub event_listener: Arc<dyn QueryEventListener>,
    /// Timer sink wrapped around the query body (no-op by default).
    #[serde(skip, default = "noop_reporter")]
    pub reporter: Arc<dyn PerformanceReporter>,
}

impl Default for QuerierConfig {
    fn default() -> Self {
        QuerierConfig {
            query_workers: 8,
            disable_client_aggr: false,
            event_listener: noop_event_listener(),
            reporter: noop_reporter(),
        }
    }
}

impl QuerierConfig {
    /// Loads defaults, then `path` (TOML, if given), then `TSQ_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, DbError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(DbError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .ignore_empty(true),
        );
        let cfg: QuerierConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DbError::Configuration(e.to_string()))?;
        Ok(cfg)
    }

    /// Checks the invariants the fan-out relies on.
    pub fn validate(&self) -> Result<(), DbError> {
        if !is_power_of_two(self.query_workers) {
            return Err(DbError::Configuration(format!(
                "Query workers num must be a power of 2 and > 0, got {}",
                self.query_workers
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = QuerierConfig::default();
        assert_eq!(cfg.query_workers, 8);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_power_of_two() {
        for workers in [0, 3, 6] {
            let cfg = QuerierConfig {
                query_workers: workers,
                ..QuerierConfig::default()
            };
            assert!(matches!(cfg.validate(), Err(DbError::Configuration(_))));
        }
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "query_workers = 2\ndisable_client_aggr = true").unwrap();
        let cfg = QuerierConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.query_workers, 2);
        assert!(cfg.disable_client_aggr);
    }

    #[test]
    fn load_missing_file_is_a_configuration_error() {
        let err = QuerierConfig::load(Some(Path::new("/nonexistent/tsq.toml"))).unwrap_err();
        assert!(matches!(err, DbError::Configuration(_)));
    }
}
