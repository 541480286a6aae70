use std::{env, io, path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use gastown_dispatch::{ProcessRunner, TaskDispatcher, TaskStore};
use gastown_mcp_server::{
    config::{self, CliOptions},
    http_server, McpServer, ServerInfo,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gastown-mcp", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Optional TOML configuration file ([mcp_server] and [dispatch] sections)
    #[arg(long = "config", value_name = "FILE")]
    config_path: Option<PathBuf>,

    /// Optional log filter (e.g. info, debug)
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,

    /// Host binding for the HTTP transport
    #[arg(long = "host", value_name = "HOST")]
    host: Option<String>,

    /// Port binding for the HTTP transport
    #[arg(long = "port", value_name = "PORT")]
    port: Option<u16>,

    /// Gastown workspace root
    #[arg(long = "gt-root", value_name = "PATH")]
    gt_root: Option<PathBuf>,

    /// Inbox identity that Mayor replies are addressed to
    #[arg(long = "identity", value_name = "NAME")]
    identity: Option<String>,

    /// Model for one-shot execution
    #[arg(long = "model", value_name = "MODEL")]
    model: Option<String>,

    /// File holding the request-signing secret
    #[arg(long = "token-file", value_name = "FILE")]
    token_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let cli = CliOptions {
        host: args.host.clone(),
        port: args.port,
        gt_root: args.gt_root.clone(),
        identity: args.identity.clone(),
        model: args.model.clone(),
        token_file: args.token_file.clone(),
    };
    let file = config::load_file_config(args.config_path.as_deref())?;
    let runtime = config::resolve(&cli, file.as_ref(), |key| env::var(key).ok())?;

    tracing::info!(
        "Starting Gastown MCP Server {} on port {}",
        runtime.server.server_version,
        runtime.server.port
    );
    tracing::info!("GT_ROOT: {}", runtime.dispatch.gt_root.display());
    tracing::info!(
        "Token configured: {}",
        runtime.server.instance_token.is_some()
    );
    if runtime.server.instance_token.is_none() {
        tracing::warn!("No instance token configured; request signatures are not checked");
    }

    let dispatcher = Arc::new(TaskDispatcher::new(
        runtime.dispatch,
        Arc::new(ProcessRunner::new()),
        Arc::new(TaskStore::new()),
    ));
    let server = Arc::new(McpServer::for_dispatcher(
        Arc::clone(&dispatcher),
        ServerInfo::from(&runtime.server),
    ));

    http_server::run_http_transport(server, dispatcher, &runtime.server).await
}

fn init_tracing(args: &Args) {
    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);

    let _ = builder.try_init();
}
