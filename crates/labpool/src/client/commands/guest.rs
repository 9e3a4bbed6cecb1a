use clap::Parser;

use crate::client::globalsettings::GlobalSettings;
use crate::client::output;
use crate::rpc_call;
use crate::server::bootstrap::get_client_session;
use crate::transfer::messages::{FromClientMessage, GuestMessage, ToClientMessage};
use zamek::AllocationId;

#[derive(Parser)]
pub struct GuestOpts {
    #[clap(subcommand)]
    subcmd: GuestCommand,
}

#[derive(Parser)]
enum GuestCommand {
    /// Grant a user the use of an allocation's targets.
    Add(GuestChangeOpts),
    /// Drop a guest from an allocation.
    Remove(GuestChangeOpts),
}

#[derive(Parser)]
pub struct GuestChangeOpts {
    /// Allocation id.
    id: AllocationId,
    /// Guest user name.
    guest: String,
}

pub async fn command_guest(gsettings: &GlobalSettings, opts: GuestOpts) -> anyhow::Result<()> {
    let message = match opts.subcmd {
        GuestCommand::Add(opts) => FromClientMessage::GuestAdd(GuestMessage {
            user: gsettings.user().to_string(),
            id: opts.id,
            guest: opts.guest,
        }),
        GuestCommand::Remove(opts) => FromClientMessage::GuestRemove(GuestMessage {
            user: gsettings.user().to_string(),
            id: opts.id,
            guest: opts.guest,
        }),
    };

    let mut session = get_client_session(gsettings.server_directory()).await?;
    let outcome = rpc_call!(
        session.connection(),
        message,
        ToClientMessage::GuestResponse(outcome) => outcome
    )
    .await?;
    output::print_guest_outcome(gsettings, outcome);
    Ok(())
}
