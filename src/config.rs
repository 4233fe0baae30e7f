use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub analyzer_url: String,
    pub max_cache_bytes: u64,
    pub file_ttl_hours: i64,
    pub sweep_interval_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked upload & ephemeral analysis cache API")]
pub struct Args {
    /// Host to bind to (overrides SCAN_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SCAN_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Upstream analysis service URL (overrides SCAN_STORE_ANALYZER_URL)
    #[arg(long)]
    pub analyzer_url: Option<String>,

    /// Cache size ceiling in bytes (overrides SCAN_STORE_MAX_CACHE_BYTES)
    #[arg(long)]
    pub max_cache_bytes: Option<u64>,

    /// Cache entry TTL in hours (overrides SCAN_STORE_FILE_TTL_HOURS)
    #[arg(long)]
    pub file_ttl_hours: Option<i64>,

    /// Sweep period in seconds (overrides SCAN_STORE_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("SCAN_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("SCAN_STORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing SCAN_STORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading SCAN_STORE_PORT"),
        };
        let env_analyzer = env::var("SCAN_STORE_ANALYZER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:9000/analyze".into());
        let env_max_bytes = parse_env_number::<u64>(
            "SCAN_STORE_MAX_CACHE_BYTES",
            crate::services::cache_service::DEFAULT_MAX_CACHE_BYTES,
        )?;
        let env_ttl = parse_env_number::<i64>(
            "SCAN_STORE_FILE_TTL_HOURS",
            crate::services::cache_service::DEFAULT_TTL_HOURS,
        )?;
        let env_sweep = parse_env_number::<u64>(
            "SCAN_STORE_SWEEP_INTERVAL_SECS",
            crate::services::cache_service::DEFAULT_SWEEP_INTERVAL_SECS,
        )?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            analyzer_url: args.analyzer_url.unwrap_or(env_analyzer),
            max_cache_bytes: args.max_cache_bytes.unwrap_or(env_max_bytes),
            file_ttl_hours: args.file_ttl_hours.unwrap_or(env_ttl),
            sweep_interval_secs: args.sweep_interval_secs.unwrap_or(env_sweep),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env_number<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
