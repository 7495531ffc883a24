//! CLI surface (spec §6.6): a config file plus a handful of overrides,
//! mirroring the teacher's `rusk/src/bin/args.rs` shape.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    author = "the block-lattice ledger maintainers",
    version,
    about = "Block-lattice ledger node: gateway ingestion, election, and client subscription plane"
)]
pub struct Args {
    /// Path to the single JSON config file (spec §6.6).
    #[clap(long, short, env = "LATTICE_NODE_CONFIG", value_parser)]
    pub config: Option<PathBuf>,

    /// Output log level, overrides the config file's `log_level`.
    #[clap(long)]
    pub log_level: Option<tracing::Level>,

    /// Path to the RocksDB ledger database, overrides the config file's
    /// `db_path`.
    #[clap(long, value_parser)]
    pub db_path: Option<PathBuf>,

    /// Upstream gateway WebSocket URL, overrides the config file's
    /// `gateway_url`.
    #[clap(long)]
    pub gateway_url: Option<String>,

    /// Address the client-facing WebSocket listener binds, overrides the
    /// config file's `client_listen_addr`.
    #[clap(long)]
    pub client_listen_addr: Option<String>,
}
