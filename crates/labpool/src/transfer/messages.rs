use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::Serialize;

use zamek::allocation::{AllocState, Allocation};
use zamek::pool::{GuestOutcome, PoolStats, RemoveOutcome, RequestOutcome, RequestSpec};
use zamek::AllocationId;

// Messages client -> server
#[derive(Serialize, Deserialize, Debug)]
pub enum FromClientMessage {
    Request(RequestMessage),
    Query(QueryMessage),
    KeepAlive(KeepAliveMessage),
    Remove(RemoveMessage),
    GuestAdd(GuestMessage),
    GuestRemove(GuestMessage),
    Authorize(AuthorizeMessage),
    Stats,
    ServerInfo,
    Stop,
}

/// Every request carries the user name asserted over the authenticated
/// channel; roles are derived server-side from the pool configuration.
#[derive(Serialize, Deserialize, Debug)]
pub struct RequestMessage {
    pub user: String,
    pub spec: RequestSpec,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct QueryMessage {
    pub user: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct KeepAliveMessage {
    pub user: String,
    pub beliefs: Vec<(AllocationId, AllocState)>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RemoveMessage {
    pub user: String,
    pub id: AllocationId,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GuestMessage {
    pub user: String,
    pub id: AllocationId,
    pub guest: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AuthorizeMessage {
    pub user: String,
    pub resource: String,
}

// Messages server -> client
#[allow(clippy::large_enum_variant)]
#[derive(Serialize, Deserialize, Debug)]
pub enum ToClientMessage {
    RequestResponse(RequestOutcome),
    QueryResponse(QueryResponse),
    KeepAliveResponse(KeepAliveResponse),
    RemoveResponse(RemoveOutcome),
    GuestResponse(GuestOutcome),
    AuthorizeResponse(bool),
    StatsResponse(StatsResponse),
    ServerInfoResponse(ServerInfo),
    Error(String),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct QueryResponse {
    pub allocations: Vec<Allocation>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct KeepAliveResponse {
    pub divergent: Vec<(AllocationId, AllocState)>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StatsResponse {
    pub server_uid: String,
    pub stats: PoolStats,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerInfo {
    pub version: String,
    pub server_uid: String,
    pub host: String,
    pub port: u16,
    pub pid: u32,
    pub start_date: DateTime<Utc>,
}
