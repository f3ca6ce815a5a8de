use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use queryfile::catalog::Catalog;
use queryfile::config::ServiceConfig;
use queryfile::db::PgPool;
use queryfile::engine::QueryStore;
use queryfile::error::EngineError;

/// Run parameterized catalog queries against PostgreSQL
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the service config file (TOML)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the loaded query catalog as JSON
    List,
    /// Execute one catalog method with name=value parameters
    Run {
        service: String,
        method: String,
        /// Parameters as name=value pairs
        params: Vec<String>,
    },
    /// Check database connectivity and report pool statistics
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(ServiceConfig::default_path);
    let mut config = ServiceConfig::load(&config_path)?;

    let needs_db = !matches!(cli.command, Command::List);

    // Resolve password: config file, then env (handled by load), then prompt.
    if needs_db && config.db.password.is_empty() {
        let prompt = format!("Password for {}: ", config.db.display_string());
        config.db.password = rpassword::read_password_from_tty(Some(&prompt))?;
    }

    let mut queries_files = vec![config.queries_file.clone()];
    if let Some(public) = &config.public_queries_file {
        queries_files.push(public.clone());
    }
    let catalog = Catalog::load_files(&queries_files).context("failed to load queries files")?;
    tracing::info!(methods = catalog.len(), "loaded query catalog");

    match cli.command {
        Command::List => {
            let store = QueryStore::new(catalog, PgPool::build(&config.db)?);
            write_body(&mut std::io::stdout(), &store.list()?)?;
        }
        Command::Run {
            service,
            method,
            params,
        } => {
            let call_parameters = parse_params(&params)?;
            let pool = PgPool::connect(&config.db).await?;
            let store = QueryStore::new(catalog, pool)
                .with_statement_timeout(config.statement_timeout_secs.map(Duration::from_secs))
                .with_debug_level(config.debug_level);
            let result = store.execute(&service, &method, &call_parameters).await;
            let code = report_outcome(&mut std::io::stdout(), result)?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::Health => {
            let store = QueryStore::new(catalog, PgPool::build(&config.db)?);
            let health = store.health_check().await;
            write_body(&mut std::io::stdout(), &serde_json::to_vec_pretty(&health)?)?;
        }
    }

    Ok(())
}

fn parse_params(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut params = HashMap::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("invalid parameter {pair:?}: expected name=value");
        };
        params.insert(name.to_string(), value.to_string());
    }
    Ok(params)
}

/// Print the call outcome and return the process exit code. On failure any
/// fallback body still reaches stdout, so a caller piping the output sees a
/// well-formed payload alongside the error on stderr.
fn report_outcome(out: &mut dyn Write, result: Result<Vec<u8>, EngineError>) -> Result<i32> {
    match result {
        Ok(body) => {
            write_body(out, &body)?;
            Ok(0)
        }
        Err(e) => {
            if let Some(body) = e.fallback_body() {
                write_body(out, &body)?;
            }
            eprintln!("Error: {e}");
            Ok(1)
        }
    }
}

fn write_body(out: &mut dyn Write, body: &[u8]) -> Result<()> {
    out.write_all(body)?;
    out.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use queryfile::db::MaterializeError;

    #[test]
    fn test_report_outcome_success_writes_body() {
        let mut out = Vec::new();
        let code = report_outcome(&mut out, Ok(b"[{\"id\":1}]".to_vec())).unwrap();
        assert_eq!(code, 0);
        assert_eq!(out, b"[{\"id\":1}]\n");
    }

    #[test]
    fn test_report_outcome_emits_fallback_body_on_materialize_failure() {
        let err = EngineError::Materialize {
            source: MaterializeError::UnsupportedType {
                type_name: "xml".into(),
            },
        };
        let mut out = Vec::new();
        let code = report_outcome(&mut out, Err(err)).unwrap();
        assert_eq!(code, 1);
        assert_eq!(out, b"[]\n");
    }

    #[test]
    fn test_report_outcome_writes_nothing_for_client_faults() {
        let err = EngineError::MissingParameters {
            names: vec!["id".into()],
        };
        let mut out = Vec::new();
        let code = report_outcome(&mut out, Err(err)).unwrap();
        assert_eq!(code, 1);
        assert!(out.is_empty());
    }
}
