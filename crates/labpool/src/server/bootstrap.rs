use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::common::error::LpError;
use crate::common::serverdir::{default_server_directory, AccessRecord, ServerDir};
use crate::server::client::handle_client_connections;
use crate::server::state::StateRef;
use crate::transfer::auth::generate_key;
use crate::transfer::connection::ClientSession;
use crate::transfer::messages::ServerInfo;
use crate::LP_VERSION;
use zamek::pool::{Pool, PoolConfig};

enum ServerStatus {
    Offline,
    Online,
}

pub struct ServerConfig {
    pub host: String,
    pub port: Option<u16>,
    pub pool: PoolConfig,
    pub sweep_interval: Duration,
}

/// Initialize the server in the given directory.
///
/// If the directory already describes a server that is still reachable, an
/// error is returned; stale metadata of a dead server is silently replaced.
pub async fn init_server(server_directory: &Path, server_cfg: ServerConfig) -> anyhow::Result<()> {
    match get_server_status(server_directory).await {
        Err(_) | Ok(ServerStatus::Offline) => {
            log::info!("No online server found, starting a new server");
            start_server(server_directory, server_cfg).await
        }
        Ok(ServerStatus::Online) => anyhow::bail!(
            "Server at {0} is already online, please stop it first using \
            `lp server stop --server-dir {0}`",
            server_directory.display()
        ),
    }
}

/// Connect to the server described by the given directory.
pub async fn get_client_session(server_directory: &Path) -> anyhow::Result<ClientSession> {
    let default_home = default_server_directory();
    let sd = ServerDir::open(server_directory).context("Invalid server directory")?;
    let server_dir_msg = if default_home != server_directory {
        format!(" --server-dir {}", server_directory.display())
    } else {
        String::new()
    };
    let access_record_r = sd.read_access_record();

    if let Err(LpError::VersionError(msg)) = access_record_r {
        anyhow::bail!(msg);
    }
    let access_record = access_record_r.with_context(|| {
        format!(
            "No running server instance found at {:?}.\n\
            Try to start the server: `lp server start{}` or use a different server directory.",
            sd.directory(),
            server_dir_msg,
        )
    })?;

    let session = ClientSession::connect_to_server(&access_record)
        .await
        .with_context(|| {
            format!(
                "Access token found but the server {}:{} is unreachable.\n\
                Try to (re)start the server using `lp server start{}`",
                access_record.host(),
                access_record.port(),
                server_dir_msg,
            )
        })?;

    Ok(session)
}

async fn get_server_status(server_directory: &Path) -> crate::Result<ServerStatus> {
    let record = ServerDir::open(server_directory).and_then(|sd| sd.read_access_record())?;

    if ClientSession::connect_to_server(&record).await.is_err() {
        return Ok(ServerStatus::Offline);
    }

    Ok(ServerStatus::Online)
}

pub fn generate_server_uid() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

async fn start_server(server_directory: &Path, server_cfg: ServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(SocketAddr::new(
        Ipv4Addr::UNSPECIFIED.into(),
        server_cfg.port.unwrap_or(0),
    ))
    .await
    .context("Cannot create server socket")?;
    let port = listener.local_addr()?.port();

    let key = Arc::new(generate_key());
    let server_uid = generate_server_uid();

    let record = AccessRecord::new(
        server_cfg.host.clone(),
        port,
        server_uid.clone(),
        key.clone(),
    );
    let server_dir = ServerDir::create(server_directory, &record)?;

    let mut pool = Pool::open(server_cfg.pool, &server_dir.journal_filename())?;
    // Whatever became free while the server was down goes back to waiters.
    pool.reoffer_free();

    let state_ref = StateRef::new(
        ServerInfo {
            version: LP_VERSION.to_string(),
            server_uid,
            host: server_cfg.host,
            port,
            pid: std::process::id(),
            start_date: Utc::now(),
        },
        pool,
    );

    {
        let state = state_ref.get();
        let info = state.server_info();
        log::info!(
            "Server {} listening on {}:{} (pid {})",
            info.server_uid,
            info.host,
            info.port,
            info.pid
        );
    }

    let end_flag = Arc::new(Notify::new());
    let end_flag_check = end_flag.clone();

    let stop_check = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received SIGINT, attempting to stop");
            }
            _ = end_flag_check.notified() => {
                log::info!("Received stop command from client");
            }
        };
    };

    tokio::select! {
        _ = stop_check => {}
        () = handle_client_connections(state_ref.clone(), listener, end_flag, key) => {}
        () = idle_sweep_process(state_ref.clone(), server_cfg.sweep_interval) => {}
    }

    log::info!("Stopping server");
    Ok(())
}

/// Periodic pass of the idleness monitor, independent of any request.
async fn idle_sweep_process(state_ref: StateRef, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let report = state_ref.get_mut().pool_mut().sweep(Utc::now());
        if !report.is_empty() {
            log::info!(
                "Idleness sweep: {} timed out, {} overtime",
                report.timed_out.len(),
                report.overtime.len()
            );
        }
    }
}
