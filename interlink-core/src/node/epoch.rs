//! Driver for Epoch nodes launched through `rebar3 shell`.
//!
//! Queries are Erlang expressions terminated by `.`. Values are bound to
//! `Pub`, printed with `erlang:display/1` and unbound again with `f(Pub).` so
//! the same query can be repeated.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::info;

use super::{
    await_marker, discard_on_error, expect_ack, read_binary, Node, NodeKind, SyncEndpoint,
};
use crate::allocator::ResourceAllocator;
use crate::config::{HarnessConfig, ReplSettings};
use crate::error::{HarnessError, Result};
use crate::repl::ReplProcess;

/// Startup output after which the console accepts commands.
pub const READY_MARKER: &str = "aec_peers started at";
/// Acknowledgment of a successful `add_and_ping_peers`.
pub const ACK_TOKEN: &str = "ok";
/// Rendered configuration, inside the working directory.
pub const CONFIG_FILE: &str = "system.config";
/// Genesis accounts file name under `data/aecore/.genesis`.
pub const GENESIS_FILE: &str = "accounts.json";

const KEYS_DIR: &str = "data/aecore/keys";
const GENESIS_DIR: &str = "data/aecore/.genesis";

static PROMPT: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^\d+>").expect("static erlang prompt pattern")
});

/// Ports written into an Epoch node's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochPorts {
    /// Peer-to-peer sync listener.
    pub sync: u16,
    /// External HTTP API.
    pub http: u16,
    /// Internal HTTP API.
    pub internal: u16,
    /// Internal websocket.
    pub internal_websocket: u16,
    /// State channel websocket.
    pub channel_websocket: u16,
}

impl EpochPorts {
    /// Sync port first, then the HTTP family.
    pub fn allocate(alloc: &mut ResourceAllocator) -> Result<Self> {
        Ok(Self {
            sync: alloc.allocate_port()?,
            http: alloc.allocate_port()?,
            internal: alloc.allocate_port()?,
            internal_websocket: alloc.allocate_port()?,
            channel_websocket: alloc.allocate_port()?,
        })
    }
}

/// Literal token substitution into the node configuration template.
pub fn render_config(template: &str, ports: &EpochPorts, tmp_dir: &Path) -> String {
    let tmp_dir = tmp_dir.to_string_lossy();
    [
        ("CONF_HTTP_PORT", ports.http.to_string()),
        ("CONF_INTERNAL_PORT", ports.internal.to_string()),
        ("CONF_INTERNAL_WEBSOCKET_PORT", ports.internal_websocket.to_string()),
        ("CONF_CHANNEL_WEBSOCKET_PORT", ports.channel_websocket.to_string()),
        ("CONF_SYNC_PORT", ports.sync.to_string()),
        ("CONF_TMP_DIR", tmp_dir.into_owned()),
    ]
    .into_iter()
    .fold(template.to_string(), |conf, (token, value)| {
        conf.replace(token, &value)
    })
}

/// Handle on one `rebar3 shell` console.
#[derive(Debug)]
pub struct EpochNode {
    tmp_dir: PathBuf,
    conf_path: PathBuf,
    ports: EpochPorts,
    repl_settings: ReplSettings,
    process: ReplProcess,
}

impl EpochNode {
    /// Prepares the working directory, renders the configuration and starts
    /// the console from `build_path`, waiting for [`READY_MARKER`]. The
    /// directory is removed again if startup fails.
    pub async fn spawn(
        alloc: &mut ResourceAllocator,
        config: &HarnessConfig,
        build_path: &Path,
    ) -> Result<Self> {
        // The child runs inside the build directory, so the launcher path
        // must not be relative to it.
        let build = fs::canonicalize(build_path).map_err(|e| {
            HarnessError::Io(io::Error::new(
                e.kind(),
                format!("epoch build path {}: {e}", build_path.display()),
            ))
        })?;
        let tmp_dir = alloc.allocate_directory(NodeKind::Epoch.dir_prefix())?;
        let started = Self::start(alloc, config, &build, tmp_dir.clone()).await;
        discard_on_error(&tmp_dir, started)
    }

    async fn start(
        alloc: &mut ResourceAllocator,
        config: &HarnessConfig,
        build: &Path,
        tmp_dir: PathBuf,
    ) -> Result<Self> {
        fs::create_dir_all(tmp_dir.join(KEYS_DIR))?;
        fs::create_dir(tmp_dir.join(GENESIS_DIR))?;
        fs::copy(
            alloc.genesis_accounts(),
            tmp_dir.join(GENESIS_DIR).join(GENESIS_FILE),
        )?;

        let ports = EpochPorts::allocate(alloc)?;
        let conf_path = tmp_dir.join(CONFIG_FILE);
        fs::write(
            &conf_path,
            render_config(alloc.get_config_template(), &ports, &tmp_dir),
        )?;

        let mut command = Command::new(build.join(&config.epoch.shell));
        command
            .arg("shell")
            .arg("--config")
            .arg(&conf_path)
            .current_dir(build);
        let label = tmp_dir.display().to_string();
        let mut process = ReplProcess::spawn(label, command)?;
        await_marker(&mut process, READY_MARKER, config.epoch.startup_timeout()).await?;
        info!(node = %tmp_dir.display(), sync_port = ports.sync, "epoch node ready");

        Ok(Self {
            tmp_dir,
            conf_path,
            ports,
            repl_settings: config.repl.clone(),
            process,
        })
    }

    /// Rendered `system.config`.
    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    /// Ports written into the configuration.
    pub fn ports(&self) -> &EpochPorts {
        &self.ports
    }

    async fn query_binary(&mut self, call: &str) -> Result<String> {
        self.process.send_line(&format!("{{ok, Pub}} = {call}.")).await?;
        self.process.clean(self.repl_settings.quiet_period()).await;
        self.process.send_line("erlang:display(Pub).").await?;
        let value = read_binary(&mut self.process, &self.repl_settings).await?;
        self.process.send_line("f(Pub).").await?;
        Ok(value)
    }
}

#[async_trait]
impl Node for EpochNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Epoch
    }

    fn working_dir(&self) -> &Path {
        &self.tmp_dir
    }

    fn sync_endpoint(&self) -> SyncEndpoint {
        SyncEndpoint::local(self.ports.sync)
    }

    fn repl(&mut self) -> &mut ReplProcess {
        &mut self.process
    }

    async fn signing_pubkey(&mut self) -> Result<String> {
        self.query_binary("aec_keys:pubkey()").await
    }

    async fn connection_pubkey(&mut self) -> Result<String> {
        self.query_binary("aec_keys:peer_pubkey()").await
    }

    async fn connect_to(&mut self, peer: &SyncEndpoint, pubkey: &str) -> Result<()> {
        self.process.clean(self.repl_settings.quiet_period()).await;
        self.process
            .send_line(&format!(
                "aec_peers:add_and_ping_peers([#{{ host => <<\"{}\">>, port => {}, pubkey => {} }}]).",
                peer.host, peer.port, pubkey
            ))
            .await?;
        expect_ack(&mut self.process, &self.repl_settings, &PROMPT, ACK_TOKEN).await
    }

    async fn before_interactive(&mut self) -> Result<()> {
        self.process.send_line("2+2.").await?;
        self.process
            .read_line(self.repl_settings.query_timeout())
            .await
            .map(drop)
    }
}
