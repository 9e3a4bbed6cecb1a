use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::task::LocalSet;

use crate::client::globalsettings::GlobalSettings;
use crate::client::output;
use crate::rpc_call;
use crate::server::bootstrap::{get_client_session, init_server, ServerConfig};
use crate::server::conf::load_pool_conf;
use crate::transfer::messages::{FromClientMessage, ToClientMessage};

#[derive(Parser)]
pub struct ServerOpts {
    #[clap(subcommand)]
    subcmd: ServerCommand,
}

#[derive(Parser)]
enum ServerCommand {
    /// Start the pool server.
    Start(ServerStartOpts),
    /// Stop a running server.
    Stop,
    /// Show information about a running server.
    Info,
}

#[derive(Parser)]
pub struct ServerStartOpts {
    /// Pool description file (TOML) with targets and policies.
    #[arg(long)]
    conf: PathBuf,

    /// Hostname stored into the access file; defaults to the local hostname.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on; a random free port is used by default.
    #[arg(long)]
    port: Option<u16>,

    /// Period of the idleness monitor.
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    sweep_interval: Duration,
}

pub async fn command_server(gsettings: &GlobalSettings, opts: ServerOpts) -> anyhow::Result<()> {
    match opts.subcmd {
        ServerCommand::Start(opts) => start_server(gsettings, opts).await,
        ServerCommand::Stop => stop_server(gsettings).await,
        ServerCommand::Info => server_info(gsettings).await,
    }
}

async fn start_server(gsettings: &GlobalSettings, opts: ServerStartOpts) -> anyhow::Result<()> {
    let pool = load_pool_conf(&opts.conf)?;
    let host = opts.host.unwrap_or_else(|| {
        gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "localhost".to_string())
    });
    let server_cfg = ServerConfig {
        host,
        port: opts.port,
        pool,
        sweep_interval: opts.sweep_interval,
    };

    let local_set = LocalSet::new();
    local_set
        .run_until(init_server(gsettings.server_directory(), server_cfg))
        .await
}

async fn stop_server(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    let mut session = get_client_session(gsettings.server_directory()).await?;
    session.connection().send(FromClientMessage::Stop).await?;
    log::info!("Stop command sent");
    Ok(())
}

async fn server_info(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    let mut session = get_client_session(gsettings.server_directory()).await?;
    let info = rpc_call!(
        session.connection(),
        FromClientMessage::ServerInfo,
        ToClientMessage::ServerInfoResponse(info) => info
    )
    .await?;
    output::print_server_info(gsettings, &info);
    Ok(())
}
