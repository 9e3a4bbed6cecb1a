use crate::server::state::StateRef;
use crate::transfer::messages::{
    AuthorizeMessage, GuestMessage, KeepAliveMessage, KeepAliveResponse, QueryMessage,
    QueryResponse, RemoveMessage, RequestMessage, StatsResponse, ToClientMessage,
};

pub fn handle_request(state_ref: &StateRef, msg: RequestMessage) -> ToClientMessage {
    let mut state = state_ref.get_mut();
    let pool = state.pool_mut();
    let caller = pool.caller(&msg.user);
    match pool.request(&caller, msg.spec) {
        Ok(outcome) => {
            log::debug!(
                "Allocation {} of {} resolved to {}",
                outcome.id,
                caller.user,
                outcome.state
            );
            ToClientMessage::RequestResponse(outcome)
        }
        Err(error) => ToClientMessage::Error(error.to_string()),
    }
}

pub fn handle_query(state_ref: &StateRef, msg: QueryMessage) -> ToClientMessage {
    let state = state_ref.get();
    let pool = state.pool();
    let caller = pool.caller(&msg.user);
    let mut allocations: Vec<_> = pool.visible(&caller).cloned().collect();
    allocations.sort_by_key(|a| a.id);
    ToClientMessage::QueryResponse(QueryResponse { allocations })
}

pub fn handle_keepalive(state_ref: &StateRef, msg: KeepAliveMessage) -> ToClientMessage {
    let mut state = state_ref.get_mut();
    let pool = state.pool_mut();
    let caller = pool.caller(&msg.user);
    let divergent = pool.keepalive(&caller, &msg.beliefs);
    ToClientMessage::KeepAliveResponse(KeepAliveResponse { divergent })
}

pub fn handle_remove(state_ref: &StateRef, msg: RemoveMessage) -> ToClientMessage {
    let mut state = state_ref.get_mut();
    let pool = state.pool_mut();
    let caller = pool.caller(&msg.user);
    ToClientMessage::RemoveResponse(pool.remove(&caller, msg.id))
}

pub fn handle_guest_add(state_ref: &StateRef, msg: GuestMessage) -> ToClientMessage {
    let mut state = state_ref.get_mut();
    let pool = state.pool_mut();
    let caller = pool.caller(&msg.user);
    ToClientMessage::GuestResponse(pool.guest_add(&caller, msg.id, &msg.guest))
}

pub fn handle_guest_remove(state_ref: &StateRef, msg: GuestMessage) -> ToClientMessage {
    let mut state = state_ref.get_mut();
    let pool = state.pool_mut();
    let caller = pool.caller(&msg.user);
    ToClientMessage::GuestResponse(pool.guest_remove(&caller, msg.id, &msg.guest))
}

pub fn handle_authorize(state_ref: &StateRef, msg: AuthorizeMessage) -> ToClientMessage {
    let mut state = state_ref.get_mut();
    let pool = state.pool_mut();
    let caller = pool.caller(&msg.user);
    ToClientMessage::AuthorizeResponse(pool.authorize(&caller, &msg.resource.into()))
}

pub fn handle_stats(state_ref: &StateRef) -> ToClientMessage {
    let state = state_ref.get();
    ToClientMessage::StatsResponse(StatsResponse {
        server_uid: state.server_info().server_uid.clone(),
        stats: state.pool().stats(),
    })
}

pub fn handle_server_info(state_ref: &StateRef) -> ToClientMessage {
    ToClientMessage::ServerInfoResponse(state_ref.get().server_info().clone())
}
