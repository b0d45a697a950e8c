//! CLI argument parsing. Only the ambient operational knobs are exposed as
//! flags; the enumerated domain configuration (spec §6) is environment-only
//! and validated in `AppConfig::load`.

use clap::Parser;

use super::constants::{ENV_BIND_ADDRESS, ENV_CACHE_BACKEND, ENV_LOG};

#[derive(Parser)]
#[command(name = "tracewatch")]
#[command(version, about = "Traceback aggregation and triage service", long_about = None)]
pub struct Cli {
    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = ENV_BIND_ADDRESS)]
    pub bind_address: Option<String>,

    /// Cache backend: memory or redis
    #[arg(long, env = ENV_CACHE_BACKEND)]
    pub cache_backend: Option<String>,

    /// Log filter (passed to tracing_subscriber::EnvFilter)
    #[arg(long, env = ENV_LOG)]
    pub log_level: Option<String>,
}

/// Configuration derived from CLI arguments.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub bind_address: Option<String>,
    pub cache_backend: Option<String>,
    pub log_level: Option<String>,
}

pub fn parse() -> CliConfig {
    let cli = Cli::parse();
    CliConfig {
        bind_address: cli.bind_address,
        cache_backend: cli.cache_backend,
        log_level: cli.log_level,
    }
}
