//! Driver for Elixir nodes launched through `iex -S mix`.
//!
//! The console prints `iex(1)>` before the project environment has loaded,
//! so startup waits for a second prompt after nudging it with a blank line.

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
use crate::error::Result;
use crate::repl::ReplProcess;

/// Printed before the Mix project has loaded.
pub const FIRST_PROMPT: &str = "iex(1)>";
/// Printed once the console is usable.
pub const SECOND_PROMPT: &str = "iex(2)>";
/// Acknowledgment of a successful `Peers.try_connect`.
pub const ACK_TOKEN: &str = ":ok";

static PROMPT: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^iex\(\d+\)>").expect("static iex prompt pattern")
});

/// Environment handed to the child; the harness's own environment is left
/// untouched.
pub fn node_env(tmp_dir: &Path, sync_port: u16) -> Vec<(&'static str, String)> {
    let dir = tmp_dir.to_string_lossy().into_owned();
    vec![
        ("PEER_KEYS_PATH", dir.clone()),
        ("SIGN_KEYS_PATH", dir.clone()),
        ("PERSISTENCE_PATH", dir),
        ("MIX_ENV", "prod".to_string()),
        ("SYNC_PORT", sync_port.to_string()),
    ]
}

/// A bare name is looked up on `PATH`. A relative path with a directory part
/// is anchored at the harness's working directory, not the build directory
/// the child starts in.
fn launcher(program: &str) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.is_relative() && path.components().count() > 1 {
        Ok(std::env::current_dir()?.join(path))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Handle on one `iex -S mix` console.
#[derive(Debug)]
pub struct ElixirNode {
    tmp_dir: PathBuf,
    sync_port: u16,
    repl_settings: ReplSettings,
    process: ReplProcess,
}

impl ElixirNode {
    /// Allocates a directory and sync port, starts the console and waits for
    /// the second prompt. The directory is removed again if startup fails.
    pub async fn spawn(
        alloc: &mut ResourceAllocator,
        config: &HarnessConfig,
        build_path: &Path,
    ) -> Result<Self> {
        let tmp_dir = alloc.allocate_directory(NodeKind::Elixir.dir_prefix())?;
        let started = Self::start(alloc, config, build_path, tmp_dir.clone()).await;
        discard_on_error(&tmp_dir, started)
    }

    async fn start(
        alloc: &mut ResourceAllocator,
        config: &HarnessConfig,
        build_path: &Path,
        tmp_dir: PathBuf,
    ) -> Result<Self> {
        let sync_port = alloc.allocate_port()?;

        let mut command = Command::new(launcher(&config.elixir.program)?);
        command
            .arg("-S")
            .arg("mix")
            .current_dir(build_path)
            .envs(node_env(&tmp_dir, sync_port));
        let label = tmp_dir.display().to_string();
        let mut process = ReplProcess::spawn(label, command)?;

        let limit = config.elixir.prompt_timeout();
        await_marker(&mut process, FIRST_PROMPT, limit).await?;
        process.send_line("").await?;
        await_marker(&mut process, SECOND_PROMPT, limit).await?;
        info!(node = %tmp_dir.display(), sync_port, "elixir node ready");

        Ok(Self {
            tmp_dir,
            sync_port,
            repl_settings: config.repl.clone(),
            process,
        })
    }

    async fn inspect(&mut self, expr: &str) -> Result<String> {
        self.process
            .send_line(&format!("IO.inspect({expr}, limit: :infinity)"))
            .await?;
        read_binary(&mut self.process, &self.repl_settings).await
    }
}

#[async_trait]
impl Node for ElixirNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Elixir
    }

    fn working_dir(&self) -> &Path {
        &self.tmp_dir
    }

    fn sync_endpoint(&self) -> SyncEndpoint {
        SyncEndpoint::local(self.sync_port)
    }

    fn repl(&mut self) -> &mut ReplProcess {
        &mut self.process
    }

    async fn signing_pubkey(&mut self) -> Result<String> {
        self.process.send_line("{pub, _} = Keys.keypair(:sign)").await?;
        self.process.clean(self.repl_settings.quiet_period()).await;
        self.inspect("pub").await
    }

    async fn connection_pubkey(&mut self) -> Result<String> {
        self.process.clean(self.repl_settings.quiet_period()).await;
        self.inspect("Peers.state.local_peer.pubkey").await
    }

    async fn connect_to(&mut self, peer: &SyncEndpoint, pubkey: &str) -> Result<()> {
        self.process.clean(self.repl_settings.quiet_period()).await;
        self.process
            .send_line(&format!(
                "Peers.try_connect(%{{host: '{}', port: {}, pubkey: {}}})",
                peer.host, peer.port, pubkey
            ))
            .await?;
        expect_ack(&mut self.process, &self.repl_settings, &PROMPT, ACK_TOKEN).await
    }

    async fn before_interactive(&mut self) -> Result<()> {
        self.process.send_line("2+2").await?;
        self.process
            .read_line(self.repl_settings.query_timeout())
            .await
            .map(drop)
    }

    async fn serialized_object(&mut self, name: &str) -> Result<String> {
        self.process
            .send_line(&format!(
                "{{:ok, serialized_obj}} = Serialization.rlp_encode({name})"
            ))
            .await?;
        self.process.clean(self.repl_settings.quiet_period()).await;
        self.inspect("serialized_obj").await
    }
}
