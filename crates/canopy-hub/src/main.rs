use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use canopy_core::wire::{AgentPayload, HubMessage, WorkspacePayload};
use canopy_core::Snapshot;
use canopy_discovery::{find_all, SnapshotFile};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod hub;
mod socket;

use api::AppContext;
use hub::HubHandle;

const DEFAULT_ADDR: &str = "127.0.0.1:4477";
const DEFAULT_POLL_SECONDS: u64 = 2;
const DEFAULT_MAX_DEPTH: i32 = 3;

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    root: PathBuf,
    poll_interval: Duration,
    max_depth: i32,
    registry_path: PathBuf,
    debug: bool,
}

#[derive(Parser, Debug)]
#[command(name = "canopy-hub")]
struct Args {
    /// Loopback address to serve on
    #[arg(long, default_value = "")]
    addr: String,
    /// Directory tree scanned for repositories
    #[arg(long, default_value = "")]
    root: String,
    #[arg(long, default_value_t = DEFAULT_POLL_SECONDS)]
    poll_seconds: u64,
    /// Scan depth limit; negative means unlimited
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: i32,
    /// Snapshot file for out-of-process observers
    #[arg(long, default_value = "")]
    registry: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    init_logging(&config);

    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };
    if !addr.ip().is_loopback() {
        error!(event = "invalid_addr", addr = %config.addr);
        return;
    }

    let hub = HubHandle::spawn();
    let snapshot = api::SharedSnapshot::new();
    let ctx = AppContext {
        hub: hub.clone(),
        snapshot: snapshot.clone(),
    };

    tokio::spawn(refresh_loop(config.clone(), hub, snapshot));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/workspaces", get(api::workspaces))
        .route("/api/agents", get(api::agents))
        .route("/api/health", get(api::health))
        .with_state(ctx);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(event = "hub_start", addr = %config.addr, root = %config.root.display());

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        error!(event = "hub_error", error = %err);
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(ctx): State<AppContext>,
) -> impl IntoResponse {
    if !addr.ip().is_loopback() {
        return axum::http::StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| socket::handle_socket(socket, ctx.hub))
}

/// Runs a discovery pass on a fixed cadence, replaces the shared snapshot
/// wholesale, persists it for out-of-process observers, and pushes the
/// updates to every subscriber.
async fn refresh_loop(config: Config, hub: HubHandle, snapshot: api::SharedSnapshot) {
    let registry = SnapshotFile::new(&config.registry_path);
    let mut ticker = tokio::time::interval(config.poll_interval);
    // A slow scan must not cause a burst of catch-up passes.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let worktrees = find_all(&config.root, config.max_depth).await;
        let next = Snapshot::new(worktrees);

        if let Err(err) = registry.write(&next).await {
            warn!(event = "registry_write_failed", path = %registry.path().display(), error = %err);
        }

        let workspaces: Vec<WorkspacePayload> =
            next.workspaces.iter().map(WorkspacePayload::from).collect();
        let agents: Vec<AgentPayload> = next.agents.iter().map(AgentPayload::from).collect();
        debug!(
            event = "snapshot_refreshed",
            workspaces = workspaces.len(),
            agents = agents.len()
        );

        snapshot.replace(next).await;
        hub.broadcast(HubMessage::WorkspacesUpdated(workspaces)).await;
        hub.broadcast(HubMessage::AgentsUpdated(agents)).await;
    }
}

fn load_config() -> Config {
    let args = Args::parse();
    let registry_path = if args.registry.trim().is_empty() {
        SnapshotFile::default_path()
    } else {
        PathBuf::from(args.registry)
    };
    Config {
        addr: resolve_addr(&args.addr),
        root: resolve_root(&args.root),
        poll_interval: Duration::from_secs(args.poll_seconds.max(1)),
        max_depth: args.max_depth,
        registry_path,
        debug: args.debug || env_true("CANOPY_DEBUG"),
    }
}

fn init_logging(config: &Config) {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("CANOPY_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resolve_addr(addr_flag: &str) -> String {
    if !addr_flag.trim().is_empty() {
        return addr_flag.to_string();
    }
    if let Ok(value) = std::env::var("CANOPY_HUB_ADDR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    DEFAULT_ADDR.to_string()
}

fn resolve_root(root_flag: &str) -> PathBuf {
    if !root_flag.trim().is_empty() {
        return PathBuf::from(root_flag);
    }
    if let Ok(value) = std::env::var("CANOPY_ROOT") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    PathBuf::from(".")
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
