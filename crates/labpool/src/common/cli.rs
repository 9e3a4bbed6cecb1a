use clap::Parser;
use std::path::PathBuf;

use crate::client::commands::alloc::AllocOpts;
use crate::client::commands::guest::GuestOpts;
use crate::client::commands::server::ServerOpts;
use crate::client::output::OutputMode;

#[derive(Parser)]
#[command(
    name = "lp",
    version = crate::LP_VERSION,
    about = "Arbiter of exclusive access to a shared pool of test targets"
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub struct CommonOpts {
    /// Directory with server metadata.
    #[arg(long, global = true, env = "LP_SERVER_DIR")]
    pub server_dir: Option<PathBuf>,

    /// User name presented to the server; defaults to $USER.
    #[arg(long, global = true, env = "LP_USER")]
    pub user: Option<String>,

    /// Console output mode.
    #[arg(long, global = true, default_value = "cli", value_enum)]
    pub output_mode: OutputMode,

    /// Enable debug logging.
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Server management.
    Server(ServerOpts),
    /// Allocation management.
    Alloc(AllocOpts),
    /// Guest management.
    Guest(GuestOpts),
    /// Pool statistics of a running server.
    Stats,
}
