//! Gateway configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use shoal_core::filter::DEFAULT_PAGE_SIZE;

/// In-memory SQLite database name.
pub const MEMORY_DATABASE: &str = ":memory:";

/// Shoal Data API gateway command line arguments.
#[derive(Debug, Parser)]
#[command(name = "shoal-gateway")]
#[command(about = "Data API gateway for Shoal entities")]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// JSON schema file declaring the served entities.
    #[arg(short, long)]
    pub schema: Option<PathBuf>,

    /// Storage backend.
    #[arg(short, long, value_enum, default_value_t = ProviderKind::Memory)]
    pub provider: ProviderKind,

    /// SQLite database file, used with `--provider sqlite`.
    #[arg(short, long, default_value = MEMORY_DATABASE)]
    pub database: String,

    /// Page size applied when `_page` is given without `_limit`.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub default_page_size: u32,
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Rows kept in process memory.
    Memory,
    /// Rows stored in SQLite.
    Sqlite,
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to listen on for HTTP requests.
    pub listen_addr: String,
    /// Schema file, if any.
    pub schema_path: Option<PathBuf>,
    /// Storage backend.
    pub provider: ProviderKind,
    /// SQLite database file.
    pub database: String,
    /// Page size applied when `_page` is given without `_limit`.
    pub default_page_size: u32,
}

impl From<&Args> for GatewayConfig {
    fn from(args: &Args) -> Self {
        Self {
            listen_addr: args.listen.clone(),
            schema_path: args.schema.clone(),
            provider: args.provider,
            database: args.database.clone(),
            default_page_size: args.default_page_size.max(1),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            schema_path: None,
            provider: ProviderKind::Memory,
            database: MEMORY_DATABASE.to_string(),
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}
