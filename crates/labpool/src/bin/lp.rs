use clap::Parser;

use labpool::client::commands::alloc::command_alloc;
use labpool::client::commands::guest::command_guest;
use labpool::client::commands::server::command_server;
use labpool::client::default_server_directory_path;
use labpool::client::globalsettings::GlobalSettings;
use labpool::client::output;
use labpool::common::cli::{RootOptions, SubCommand};
use labpool::common::setup::setup_logging;
use labpool::rpc_call;
use labpool::server::bootstrap::get_client_session;
use labpool::transfer::messages::{FromClientMessage, ToClientMessage};

async fn command_stats(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    let mut session = get_client_session(gsettings.server_directory()).await?;
    let response = rpc_call!(
        session.connection(),
        FromClientMessage::Stats,
        ToClientMessage::StatsResponse(response) => response
    )
    .await?;
    output::print_stats(gsettings, &response);
    Ok(())
}

fn make_global_settings(opts: &labpool::common::cli::CommonOpts) -> GlobalSettings {
    let server_dir = opts
        .server_dir
        .clone()
        .unwrap_or_else(default_server_directory_path);
    let user = opts
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string());
    GlobalSettings::new(server_dir, user, opts.output_mode)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opts = RootOptions::parse();
    setup_logging(opts.common.debug);

    let gsettings = make_global_settings(&opts.common);

    let result = match opts.subcmd {
        SubCommand::Server(opts) => command_server(&gsettings, opts).await,
        SubCommand::Alloc(opts) => command_alloc(&gsettings, opts).await,
        SubCommand::Guest(opts) => command_guest(&gsettings, opts).await,
        SubCommand::Stats => command_stats(&gsettings).await,
    };

    if let Err(e) = result {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}
