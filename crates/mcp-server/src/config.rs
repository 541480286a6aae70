use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use gastown_dispatch::{config::parse_seconds, DispatchConfig, ReplyMatching};
use serde::Deserialize;

pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";
pub const DEFAULT_TOKEN_FILE: &str = "/tmp/gastown/instance_token";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// HMAC secret; `None` disables signature checks.
    pub instance_token: Option<String>,
    pub timestamp_freshness: Duration,
    pub server_version: String,
    pub protocol_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            instance_token: None,
            timestamp_freshness: Duration::from_secs(300),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Default, Clone)]
pub struct CliOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub gt_root: Option<PathBuf>,
    pub identity: Option<String>,
    pub model: Option<String>,
    pub token_file: Option<PathBuf>,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct FileConfig {
    #[serde(default)]
    mcp_server: Option<RawServerSection>,
    #[serde(default)]
    dispatch: Option<RawDispatchSection>,
}

#[derive(Deserialize, Default, Debug, Clone)]
struct RawServerSection {
    host: Option<String>,
    port: Option<u16>,
    instance_token: Option<String>,
    instance_token_file: Option<String>,
    timestamp_freshness: Option<u64>,
    protocol_version: Option<String>,
}

#[derive(Deserialize, Default, Debug, Clone)]
struct RawDispatchSection {
    gt_root: Option<String>,
    gt_bin: Option<String>,
    agent_bin: Option<String>,
    model: Option<String>,
    identity: Option<String>,
    peer: Option<String>,
    poll_interval: Option<u64>,
    status_timeout: Option<u64>,
    mailbox_timeout: Option<u64>,
    send_timeout: Option<u64>,
    default_task_timeout: Option<u64>,
    max_task_timeout: Option<u64>,
    reply_matching: Option<ReplyMatching>,
}

pub fn load_file_config(path: Option<&Path>) -> Result<Option<FileConfig>> {
    let Some(path) = path else {
        return Ok(None);
    };

    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let mut parsed: FileConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse TOML config {}", path.display()))?;

    let base = path.parent().unwrap_or(Path::new("."));
    if let Some(server) = parsed.mcp_server.as_mut() {
        server.instance_token_file = server
            .instance_token_file
            .take()
            .map(|file| resolve_relative(base, Path::new(&file)).to_string_lossy().into_owned());
    }

    Ok(Some(parsed))
}

/// Layer defaults, file, environment and CLI (lowest to highest precedence).
pub fn resolve<F>(cli: &CliOptions, file: Option<&FileConfig>, lookup: F) -> Result<RuntimeConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let env = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
    let mut config = RuntimeConfig::default();
    let mut token_file: Option<PathBuf> = None;

    if let Some(section) = file.and_then(|cfg| cfg.mcp_server.as_ref()) {
        apply_server_section(&mut config.server, section);
        token_file = section.instance_token_file.as_ref().map(PathBuf::from);
    }
    if let Some(section) = file.and_then(|cfg| cfg.dispatch.as_ref()) {
        apply_dispatch_section(&mut config.dispatch, section);
    }

    config
        .dispatch
        .apply_env(&lookup)
        .context("Invalid dispatch configuration in environment")?;

    let server = &mut config.server;
    if let Some(host) = env("MCP_HOST") {
        server.host = host;
    }
    if let Some(port) = env("MCP_PORT") {
        server.port = port
            .trim()
            .parse()
            .with_context(|| format!("Invalid MCP_PORT '{port}'"))?;
    }
    if let Some(token) = env("INSTANCE_TOKEN") {
        server.instance_token = Some(token);
    }
    if let Some(file) = env("INSTANCE_TOKEN_FILE") {
        token_file = Some(PathBuf::from(file));
    }
    if let Some(value) = env("TIMESTAMP_FRESHNESS") {
        server.timestamp_freshness = parse_seconds("TIMESTAMP_FRESHNESS", &value)?;
    }
    if let Some(version) = env("SERVER_VERSION") {
        server.server_version = version;
    }
    if let Some(version) = env("PROTOCOL_VERSION") {
        server.protocol_version = version;
    }

    if let Some(host) = &cli.host {
        server.host = host.clone();
    }
    if let Some(port) = cli.port {
        server.port = port;
    }
    if let Some(file) = &cli.token_file {
        token_file = Some(file.clone());
    }
    if let Some(root) = &cli.gt_root {
        config.dispatch.gt_root = root.clone();
    }
    if let Some(identity) = &cli.identity {
        config.dispatch.identity = identity.clone();
    }
    if let Some(model) = &cli.model {
        config.dispatch.model = model.clone();
    }

    if config.server.instance_token.is_none() {
        let path = token_file.unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE));
        config.server.instance_token = load_token_file(&path)?;
    }

    if config.dispatch.max_task_timeout < config.dispatch.default_task_timeout {
        tracing::warn!(
            "DEFAULT_TASK_TIMEOUT ({}s) exceeds MAX_TASK_TIMEOUT ({}s); tasks will be capped",
            config.dispatch.default_task_timeout.as_secs(),
            config.dispatch.max_task_timeout.as_secs()
        );
    }

    Ok(config)
}

fn apply_server_section(server: &mut ServerConfig, section: &RawServerSection) {
    if let Some(host) = &section.host {
        server.host = host.clone();
    }
    if let Some(port) = section.port {
        server.port = port;
    }
    if let Some(token) = section.instance_token.as_ref().filter(|t| !t.trim().is_empty()) {
        server.instance_token = Some(token.trim().to_string());
    }
    if let Some(secs) = section.timestamp_freshness {
        server.timestamp_freshness = Duration::from_secs(secs);
    }
    if let Some(version) = &section.protocol_version {
        server.protocol_version = version.clone();
    }
}

fn apply_dispatch_section(dispatch: &mut DispatchConfig, section: &RawDispatchSection) {
    if let Some(root) = &section.gt_root {
        dispatch.gt_root = PathBuf::from(root);
    }
    if let Some(bin) = &section.gt_bin {
        dispatch.gt_bin = bin.clone();
    }
    if let Some(bin) = &section.agent_bin {
        dispatch.agent_bin = bin.clone();
    }
    if let Some(model) = &section.model {
        dispatch.model = model.clone();
    }
    if let Some(identity) = &section.identity {
        dispatch.identity = identity.clone();
    }
    if let Some(peer) = &section.peer {
        dispatch.peer = peer.clone();
    }

    let seconds = [
        (section.poll_interval, &mut dispatch.poll_interval),
        (section.status_timeout, &mut dispatch.status_timeout),
        (section.mailbox_timeout, &mut dispatch.mailbox_timeout),
        (section.send_timeout, &mut dispatch.send_timeout),
        (section.default_task_timeout, &mut dispatch.default_task_timeout),
        (section.max_task_timeout, &mut dispatch.max_task_timeout),
    ];
    for (value, slot) in seconds {
        if let Some(secs) = value {
            *slot = Duration::from_secs(secs);
        }
    }

    if let Some(matching) = section.reply_matching {
        dispatch.reply_matching = matching;
    }
}

fn load_token_file(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read instance token file {}", path.display()))?;
    let token = contents.trim();
    Ok((!token.is_empty()).then(|| token.to_string()))
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
