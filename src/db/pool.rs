//! Connection pool construction and the contract the engine requires of it:
//! named-parameter query execution, a liveness probe, pool statistics, and
//! enforced bounds on connection count, idle time, and lifetime.

use std::time::Duration;

use anyhow::{Context, Result};
use deadpool_postgres::{
    Client, Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;

/// SSL/TLS connection modes, matching the standard PostgreSQL `sslmode`
/// parameter. `VerifyCa`/`VerifyFull` require SSL with strict certificate
/// verification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

/// Database connection settings for the pool the engine executes against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
    /// Accept invalid/self-signed certificates. Ignored for the
    /// verify-ca/verify-full modes, which always verify.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Optional path to a custom CA certificate file (PEM format). If not
    /// set, the system CA store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_conn_bound_secs")]
    pub max_conn_idle_secs: u64,
    #[serde(default = "default_conn_bound_secs")]
    pub max_conn_lifetime_secs: u64,
}

fn default_max_connections() -> usize {
    15
}

fn default_conn_bound_secs() -> u64 {
    60
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 5432,
            dbname: String::from("postgres"),
            user: String::from("postgres"),
            password: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
            max_connections: default_max_connections(),
            max_conn_idle_secs: default_conn_bound_secs(),
            max_conn_lifetime_secs: default_conn_bound_secs(),
        }
    }
}

impl DbConfig {
    pub fn display_string(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

/// Point-in-time pool statistics, including the configured bounds.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_connections: usize,
    pub acquired_connections: usize,
    pub idle_connections: usize,
    pub max_connections: usize,
    pub max_connection_idle_time: u64,
    pub max_connection_lifetime: u64,
}

/// A bounded connection pool. Connections past the configured idle time or
/// lifetime are discarded on acquisition and replaced by the pool.
#[derive(Clone)]
pub struct PgPool {
    pool: Pool,
    max_idle: Duration,
    max_lifetime: Duration,
}

impl PgPool {
    /// Build the pool and verify connectivity with an initial ping.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let pool = Self::build(config)?;
        pool.ping()
            .await
            .context("unable to connect to database")?;
        tracing::info!(db = %config.display_string(), "successfully connected to database");
        Ok(pool)
    }

    /// Build the pool without touching the network. Connections are created
    /// lazily on first acquisition.
    pub fn build(config: &DbConfig) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.dbname.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.connect_timeout = Some(Duration::from_secs(10));
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.max_connections));

        let pool = match config.ssl_mode {
            SslMode::Disable => cfg
                .create_pool(Some(Runtime::Tokio1), NoTls)
                .context("failed to create connection pool")?,
            SslMode::Prefer | SslMode::Require => {
                let tls = build_tls_connector(config, false)?;
                cfg.create_pool(Some(Runtime::Tokio1), tls)
                    .context("failed to create connection pool")?
            }
            SslMode::VerifyCa | SslMode::VerifyFull => {
                let tls = build_tls_connector(config, true)?;
                cfg.create_pool(Some(Runtime::Tokio1), tls)
                    .context("failed to create connection pool with certificate verification")?
            }
        };

        Ok(Self {
            pool,
            max_idle: Duration::from_secs(config.max_conn_idle_secs),
            max_lifetime: Duration::from_secs(config.max_conn_lifetime_secs),
        })
    }

    /// Acquire a connection, discarding any pooled connection that has
    /// exceeded its idle time or lifetime bound.
    pub async fn acquire(&self) -> Result<Client> {
        loop {
            let client = self
                .pool
                .get()
                .await
                .context("failed to acquire connection from pool")?;
            let metrics = Object::metrics(&client);
            if metrics.age() > self.max_lifetime || metrics.last_used() > self.max_idle {
                tracing::debug!(
                    age_secs = metrics.age().as_secs(),
                    idle_secs = metrics.last_used().as_secs(),
                    "discarding connection past its idle/lifetime bound"
                );
                drop(Object::take(client));
                continue;
            }
            return Ok(client);
        }
    }

    /// Liveness probe: round-trips a trivial statement on a pooled
    /// connection without touching any catalog query.
    pub async fn ping(&self) -> Result<()> {
        let client = self.acquire().await?;
        client
            .simple_query("SELECT 1")
            .await
            .context("unable to ping database")?;
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            total_connections: status.size,
            acquired_connections: status.size.saturating_sub(status.available),
            idle_connections: status.available,
            max_connections: status.max_size,
            max_connection_idle_time: self.max_idle.as_secs(),
            max_connection_lifetime: self.max_lifetime.as_secs(),
        }
    }
}

/// Build a TLS connector with the configured certificate handling.
/// `strict_verify` forces certificate verification regardless of
/// `accept_invalid_certs` (for the verify-ca/verify-full modes).
fn build_tls_connector(config: &DbConfig, strict_verify: bool) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(ca_path) = &config.ca_cert_path {
        let ca_data = std::fs::read(ca_path)
            .with_context(|| format!("failed to read CA certificate file: {ca_path}"))?;
        let cert = native_tls::Certificate::from_pem(&ca_data)
            .context("failed to parse CA certificate")?;
        builder.add_root_certificate(cert);
    }

    let connector = builder.build().context("failed to build TLS connector")?;
    Ok(MakeTlsConnector::new(connector))
}
