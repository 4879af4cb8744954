use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub max_body_bytes: usize,
    pub cors: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP gateway for databases, documents and chunked files")]
pub struct Args {
    /// Host to bind to (overrides DOC_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DOC_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides DOC_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Pool size (overrides DOC_GATEWAY_MAX_CONNECTIONS)
    #[arg(long)]
    pub max_connections: Option<u32>,

    /// Largest accepted request body in bytes (overrides DOC_GATEWAY_MAX_BODY_BYTES)
    #[arg(long)]
    pub max_body_bytes: Option<usize>,

    /// Allow cross-origin requests (overrides DOC_GATEWAY_CORS)
    #[arg(long)]
    pub cors: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("DOC_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("DOC_GATEWAY_PORT", 3000u16)?;
        let env_db = env::var("DOC_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/doc_gateway.db".into());
        let env_max_connections = env_or("DOC_GATEWAY_MAX_CONNECTIONS", 5u32)?;
        let env_max_body = env_or("DOC_GATEWAY_MAX_BODY_BYTES", 64 * 1024 * 1024usize)?;
        let env_cors = env_or("DOC_GATEWAY_CORS", false)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            max_connections: args.max_connections.unwrap_or(env_max_connections),
            max_body_bytes: args.max_body_bytes.unwrap_or(env_max_body),
            cors: args.cors || env_cors,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an environment variable, falling back to `default` when it
/// is not set.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
