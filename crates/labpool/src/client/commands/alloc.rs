use clap::Parser;

use crate::client::globalsettings::GlobalSettings;
use crate::client::output;
use crate::rpc_call;
use crate::server::bootstrap::get_client_session;
use crate::transfer::messages::{
    FromClientMessage, KeepAliveMessage, QueryMessage, RemoveMessage, RequestMessage,
    ToClientMessage,
};
use zamek::allocation::{AllocState, GroupResources, ResourceGroup};
use zamek::pool::RequestSpec;
use zamek::AllocationId;

#[derive(Parser)]
pub struct AllocOpts {
    #[clap(subcommand)]
    subcmd: AllocCommand,
}

#[derive(Parser)]
enum AllocCommand {
    /// Request an allocation of one of the given alternative target groups.
    Request(AllocRequestOpts),
    /// List allocations visible to you.
    List,
    /// Remove an allocation; as a guest, leave its guest set.
    Remove(AllocRemoveOpts),
    /// Refresh and reconcile allocations you believe you hold.
    KeepAlive(KeepAliveOpts),
    /// Check whether a user may act on a target right now.
    Authorize(AuthorizeOpts),
}

/// One alternative group written as `name=target1,target2`.
#[derive(Clone)]
struct GroupDef {
    name: String,
    resources: Vec<String>,
}

fn parse_group(value: &str) -> Result<GroupDef, String> {
    let (name, resources) = value
        .split_once('=')
        .ok_or_else(|| "Expected format <name>=<target>[,<target>...]".to_string())?;
    if name.is_empty() {
        return Err("Group name is empty".to_string());
    }
    let resources: Vec<String> = resources
        .split(',')
        .filter(|r| !r.is_empty())
        .map(|r| r.to_string())
        .collect();
    if resources.is_empty() {
        return Err(format!("Group {name} names no targets"));
    }
    Ok(GroupDef {
        name: name.to_string(),
        resources,
    })
}

/// One keepalive belief written as `<id>=<state>`.
#[derive(Clone)]
struct BeliefDef {
    id: AllocationId,
    state: AllocState,
}

fn parse_belief(value: &str) -> Result<BeliefDef, String> {
    let (id, state) = value
        .split_once('=')
        .ok_or_else(|| "Expected format <id>=<state>".to_string())?;
    Ok(BeliefDef {
        id: id.parse().map_err(|_| format!("Invalid id '{id}'"))?,
        state: state.parse()?,
    })
}

#[derive(Parser)]
pub struct AllocRequestOpts {
    /// Alternative group, e.g. `-g main=board1,board2`; may be repeated,
    /// the first satisfiable one (in the given order) is granted.
    #[arg(short = 'g', long = "group", required = true, value_parser = parse_group)]
    groups: Vec<GroupDef>,

    /// Priority of the request, 0 (highest) to 1000 (lowest).
    #[arg(long)]
    priority: Option<u32>,

    /// Request preemption of lower-priority holders (admin only).
    #[arg(long)]
    preempt: bool,

    /// Wait in the queues when the request cannot be satisfied right now.
    #[arg(long)]
    queue: bool,

    /// Create the allocation on behalf of another user (admin only).
    #[arg(long)]
    obo: Option<String>,

    /// User allowed to use the allocated targets, without removal rights;
    /// may be repeated.
    #[arg(long = "guest")]
    guests: Vec<String>,

    /// Free-text description of the allocation.
    #[arg(long, default_value = "")]
    reason: String,
}

#[derive(Parser)]
pub struct AllocRemoveOpts {
    /// Allocation id.
    id: AllocationId,
}

#[derive(Parser)]
pub struct KeepAliveOpts {
    /// Believed states, e.g. `3=active 4=queued`.
    #[arg(required = true, value_parser = parse_belief)]
    beliefs: Vec<BeliefDef>,
}

#[derive(Parser)]
pub struct AuthorizeOpts {
    /// Target name.
    resource: String,

    /// User to check; defaults to the requesting user.
    #[arg(long)]
    user: Option<String>,
}

pub async fn command_alloc(gsettings: &GlobalSettings, opts: AllocOpts) -> anyhow::Result<()> {
    match opts.subcmd {
        AllocCommand::Request(opts) => request_allocation(gsettings, opts).await,
        AllocCommand::List => list_allocations(gsettings).await,
        AllocCommand::Remove(opts) => remove_allocation(gsettings, opts).await,
        AllocCommand::KeepAlive(opts) => keepalive(gsettings, opts).await,
        AllocCommand::Authorize(opts) => authorize(gsettings, opts).await,
    }
}

async fn request_allocation(
    gsettings: &GlobalSettings,
    opts: AllocRequestOpts,
) -> anyhow::Result<()> {
    let spec = RequestSpec {
        groups: opts
            .groups
            .into_iter()
            .map(|g| ResourceGroup {
                name: g.name,
                resources: g.resources.into_iter().map(|r| r.into()).collect::<GroupResources>(),
            })
            .collect(),
        priority: opts.priority,
        preempt: opts.preempt,
        queue: opts.queue,
        obo: opts.obo,
        guests: opts.guests,
        reason: opts.reason,
    };
    let message = FromClientMessage::Request(RequestMessage {
        user: gsettings.user().to_string(),
        spec,
    });

    let mut session = get_client_session(gsettings.server_directory()).await?;
    let outcome = rpc_call!(
        session.connection(),
        message,
        ToClientMessage::RequestResponse(outcome) => outcome
    )
    .await?;
    output::print_request_outcome(gsettings, &outcome);
    Ok(())
}

async fn list_allocations(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    let mut session = get_client_session(gsettings.server_directory()).await?;
    let response = rpc_call!(
        session.connection(),
        FromClientMessage::Query(QueryMessage {
            user: gsettings.user().to_string(),
        }),
        ToClientMessage::QueryResponse(response) => response
    )
    .await?;
    output::print_allocations(gsettings, &response.allocations);
    Ok(())
}

async fn remove_allocation(
    gsettings: &GlobalSettings,
    opts: AllocRemoveOpts,
) -> anyhow::Result<()> {
    let mut session = get_client_session(gsettings.server_directory()).await?;
    let outcome = rpc_call!(
        session.connection(),
        FromClientMessage::Remove(RemoveMessage {
            user: gsettings.user().to_string(),
            id: opts.id,
        }),
        ToClientMessage::RemoveResponse(outcome) => outcome
    )
    .await?;
    output::print_remove_outcome(gsettings, outcome);
    Ok(())
}

async fn keepalive(gsettings: &GlobalSettings, opts: KeepAliveOpts) -> anyhow::Result<()> {
    let beliefs: Vec<(AllocationId, AllocState)> =
        opts.beliefs.into_iter().map(|b| (b.id, b.state)).collect();
    let mut session = get_client_session(gsettings.server_directory()).await?;
    let response = rpc_call!(
        session.connection(),
        FromClientMessage::KeepAlive(KeepAliveMessage {
            user: gsettings.user().to_string(),
            beliefs,
        }),
        ToClientMessage::KeepAliveResponse(response) => response
    )
    .await?;
    output::print_keepalive(gsettings, &response.divergent);
    Ok(())
}

async fn authorize(gsettings: &GlobalSettings, opts: AuthorizeOpts) -> anyhow::Result<()> {
    let user = opts.user.unwrap_or_else(|| gsettings.user().to_string());
    let mut session = get_client_session(gsettings.server_directory()).await?;
    let allowed = rpc_call!(
        session.connection(),
        FromClientMessage::Authorize(crate::transfer::messages::AuthorizeMessage {
            user: user.clone(),
            resource: opts.resource.clone(),
        }),
        ToClientMessage::AuthorizeResponse(allowed) => allowed
    )
    .await?;
    output::print_authorize(gsettings, &user, &opts.resource, allowed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{parse_belief, parse_group};
    use zamek::allocation::AllocState;
    use zamek::AllocationId;

    #[test]
    fn group_parsing() {
        let group = parse_group("main=b1,b2").unwrap();
        assert_eq!(group.name, "main");
        assert_eq!(
            group.resources,
            vec!["b1".to_string(), "b2".to_string()]
        );

        assert!(parse_group("noequals").is_err());
        assert!(parse_group("=b1").is_err());
        assert!(parse_group("g=").is_err());
    }

    #[test]
    fn belief_parsing() {
        let belief = parse_belief("3=active").unwrap();
        assert_eq!(belief.id, AllocationId::new(3));
        assert!(matches!(belief.state, AllocState::Active));

        assert!(parse_belief("x=active").is_err());
        assert!(parse_belief("3=unknown").is_err());
        assert!(parse_belief("restart-needed").is_err());
    }
}
