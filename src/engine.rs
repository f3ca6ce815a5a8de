//! The execution façade: one call runs lookup, parameter validation,
//! binding, pooled execution, materialization, and JSON encoding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_postgres::Row;

use crate::bind::{BoundStatement, NamedBindSet};
use crate::catalog::Catalog;
use crate::db::{materialize, PgPool, PoolStats};
use crate::error::EngineError;

pub const HEALTH_STATUS_HEALTHY: &str = "HEALTHY";
pub const HEALTH_STATUS_UNHEALTHY: &str = "UNHEALTHY";

/// Health probe report: overall status plus per-dependency detail.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub dependency_status: HashMap<String, String>,
    pub pool: PoolStats,
}

/// The long-lived query service engine. The catalog is immutable after
/// construction and shared read-only across concurrent calls; the pool is
/// the only shared mutable resource and no connection is ever held across
/// two calls.
#[derive(Clone)]
pub struct QueryStore {
    catalog: Arc<Catalog>,
    pool: PgPool,
    statement_timeout: Option<Duration>,
    debug_level: u8,
}

impl QueryStore {
    pub fn new(catalog: Catalog, pool: PgPool) -> Self {
        Self {
            catalog: Arc::new(catalog),
            pool,
            statement_timeout: None,
            debug_level: 0,
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_debug_level(mut self, level: u8) -> Self {
        self.debug_level = level;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Serialized snapshot of all retained definitions, for discovery.
    pub fn list(&self) -> Result<Vec<u8>, EngineError> {
        self.catalog.list_json().map_err(|e| {
            tracing::error!(error = %e, "error marshalling query list");
            EngineError::Serialization {
                message: e.to_string(),
            }
        })
    }

    /// Run one catalog method with the caller's named string parameters and
    /// return the result rows as a JSON array of row objects.
    ///
    /// Backend execution failures are logged in full and masked from the
    /// caller. Materialization or serialization failures still yield a
    /// well-formed fallback body via [`EngineError::fallback_body`].
    pub async fn execute(
        &self,
        service_name: &str,
        method_name: &str,
        call_parameters: &HashMap<String, String>,
    ) -> Result<Vec<u8>, EngineError> {
        let service_name = service_name.trim();
        let method_name = method_name.trim();

        if self.debug_level > 1 {
            self.log_pool_stats();
        }

        let method = self
            .catalog
            .lookup(service_name, method_name)
            .filter(|m| m.enabled)
            .ok_or_else(|| EngineError::MethodNotFound {
                service: service_name.to_string(),
                method: method_name.to_string(),
            })?;

        // Both validation passes collect every offending name before
        // failing, so one response reports the complete set of problems.
        let missing: Vec<String> = method
            .required_parameter_names()
            .into_iter()
            .filter(|name| !call_parameters.contains_key(*name))
            .map(String::from)
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::MissingParameters { names: missing });
        }

        let declared = method.parameter_names();
        let mut extra: Vec<String> = call_parameters
            .keys()
            .filter(|name| !declared.contains(&name.as_str()))
            .cloned()
            .collect();
        if !extra.is_empty() {
            extra.sort();
            return Err(EngineError::UnexpectedParameters { names: extra });
        }

        let binds = NamedBindSet::bind(method, call_parameters)?;
        let statement = BoundStatement::prepare(method, &binds)?;

        if self.debug_level > 0 {
            tracing::info!(query = %statement.sql, params = statement.param_count(), "running catalog query");
        }

        let rows = match self.run_query(&statement).await {
            Ok(rows) => rows,
            Err(e) => {
                // The backend error is logged here and never passed to the
                // caller, to avoid leaking schema or data details.
                tracing::error!(
                    service = service_name,
                    method = method_name,
                    error = %e,
                    "error detected on query call"
                );
                return Err(EngineError::Backend);
            }
        };

        let result = materialize(&rows).map_err(|source| {
            tracing::error!(error = %source, "error encountered while processing query results");
            EngineError::Materialize { source }
        })?;

        serde_json::to_vec(&result).map_err(|e| {
            tracing::error!(error = %e, "failed to marshal valid results returned from query");
            EngineError::Serialization {
                message: e.to_string(),
            }
        })
    }

    async fn run_query(&self, statement: &BoundStatement) -> anyhow::Result<Vec<Row>> {
        let client = self.pool.acquire().await?;
        let params = statement.sql_params();
        let query = client.query(statement.sql.as_str(), &params);
        match self.statement_timeout {
            Some(timeout) => Ok(tokio::time::timeout(timeout, query)
                .await
                .map_err(|_| anyhow::anyhow!("statement timed out after {timeout:?}"))??),
            None => Ok(query.await?),
        }
    }

    /// Verify connectivity to the backing store and report pool statistics.
    /// Does not execute any catalog statement.
    pub async fn health_check(&self) -> HealthStatus {
        let pool = self.pool.stats();
        let mut dependency_status = HashMap::new();

        let status = match self.pool.ping().await {
            Ok(()) => {
                if self.debug_level > 0 {
                    tracing::info!("health check successfully connected to database");
                }
                dependency_status.insert("database".to_string(), HEALTH_STATUS_HEALTHY.to_string());
                HEALTH_STATUS_HEALTHY
            }
            Err(e) => {
                tracing::warn!(error = %e, "health check failed to reach database");
                dependency_status
                    .insert("database".to_string(), HEALTH_STATUS_UNHEALTHY.to_string());
                HEALTH_STATUS_UNHEALTHY
            }
        };

        HealthStatus {
            status: status.to_string(),
            dependency_status,
            pool,
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn log_pool_stats(&self) {
        let stats = self.pool.stats();
        tracing::info!(
            total_connections = stats.total_connections,
            acquired_connections = stats.acquired_connections,
            idle_connections = stats.idle_connections,
            max_connections = stats.max_connections,
            max_connection_idle_time = stats.max_connection_idle_time,
            max_connection_lifetime = stats.max_connection_lifetime,
            "pool stats"
        );
    }
}
