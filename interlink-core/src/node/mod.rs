//! The node handle contract and the drivers implementing it.
//!
//! A [`Node`] owns one console process of a particular implementation and
//! exposes the same identity and peering operations regardless of which
//! REPL dialect sits underneath.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::allocator::ResourceAllocator;
use crate::config::{HarnessConfig, ReplSettings};
use crate::error::{HarnessError, Result};
use crate::repl::ReplProcess;
use crate::sanitize::{extract_binary, normalize, strip_prompt, BINARY_CLOSE, BINARY_OPEN};

pub mod elixir;
pub mod epoch;

pub use elixir::ElixirNode;
pub use epoch::EpochNode;

/// Host every locally launched node listens on.
pub const SYNC_HOST: &str = "localhost";

/// Address of a node's peer-to-peer sync listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncEndpoint {
    /// Host name as passed to the peer's connect call.
    pub host: String,
    /// Sync listener port.
    pub port: u16,
}

impl SyncEndpoint {
    /// Endpoint on [`SYNC_HOST`].
    pub fn local(port: u16) -> Self {
        Self {
            host: SYNC_HOST.to_string(),
            port,
        }
    }
}

impl fmt::Display for SyncEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.host, self.port)
    }
}

/// Selects the driver used to create a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Erlang implementation, started through `rebar3 shell`.
    Epoch,
    /// Elixir implementation, started through `iex -S mix`.
    Elixir,
}

impl NodeKind {
    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Epoch => "Epoch",
            Self::Elixir => "Elixir",
        }
    }

    /// Prefix of the working directories allocated for this kind.
    pub fn dir_prefix(self) -> &'static str {
        match self {
            Self::Epoch => "epoch",
            Self::Elixir => "elixir",
        }
    }

    /// Build location configured for this kind.
    pub fn default_build_path(self, config: &HarnessConfig) -> PathBuf {
        match self {
            Self::Epoch => config.epoch.build_path.clone(),
            Self::Elixir => config.elixir.build_path.clone(),
        }
    }

    /// Launches a node of this kind and waits until its console is ready.
    pub async fn spawn(
        self,
        alloc: &mut ResourceAllocator,
        config: &HarnessConfig,
        build_path: &Path,
    ) -> Result<Box<dyn Node>> {
        Ok(match self {
            Self::Epoch => Box::new(EpochNode::spawn(alloc, config, build_path).await?),
            Self::Elixir => Box::new(ElixirNode::spawn(alloc, config, build_path).await?),
        })
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A running node driven through its interactive console.
#[async_trait]
pub trait Node: Send {
    /// Implementation behind this handle.
    fn kind(&self) -> NodeKind;

    /// Directory exclusively owned by this node.
    fn working_dir(&self) -> &Path;

    /// Static endpoint assigned at creation; no console round-trip.
    fn sync_endpoint(&self) -> SyncEndpoint;

    /// The console process.
    fn repl(&mut self) -> &mut ReplProcess;

    /// Long-term key used to sign blocks and transactions.
    async fn signing_pubkey(&mut self) -> Result<String>;

    /// Key presented during the peer-to-peer handshake.
    async fn connection_pubkey(&mut self) -> Result<String>;

    /// Asks this node to connect to `peer`, failing with
    /// [`HarnessError::ProtocolAssertion`] unless the console acknowledges.
    async fn connect_to(&mut self, peer: &SyncEndpoint, pubkey: &str) -> Result<()>;

    /// Warm-up exchange before the console is handed to an operator.
    async fn before_interactive(&mut self) -> Result<()>;

    /// Wire encoding of a value bound in the console under `name`.
    async fn serialized_object(&mut self, _name: &str) -> Result<String> {
        Err(HarnessError::unsupported(
            self.kind().name(),
            "serialized_object",
        ))
    }

    /// Removes the working directory. Fails if it was already removed.
    fn clean(&self) -> Result<()> {
        std::fs::remove_dir_all(self.working_dir())?;
        Ok(())
    }

    /// One-line summary; queries both keys from the live console.
    async fn describe(&mut self) -> Result<String> {
        let peer_pub = self.connection_pubkey().await?;
        let sign_pub = self.signing_pubkey().await?;
        Ok(format!(
            "{}, logs: {}, addr: {}, peer_pub: {}, sign_pub: {}",
            self.kind(),
            self.working_dir().display(),
            self.sync_endpoint(),
            peer_pub,
            sign_pub
        ))
    }
}

/// Waits for a startup marker, reporting a miss as a startup timeout.
pub(crate) async fn await_marker(
    repl: &mut ReplProcess,
    marker: &str,
    limit: Duration,
) -> Result<()> {
    repl.read_until(marker, limit)
        .await
        .map(drop)
        .map_err(HarnessError::into_startup)
}

/// Removes a freshly allocated working directory when bring-up failed, so a
/// node that never started leaves nothing behind.
pub(crate) fn discard_on_error<T>(dir: &Path, started: Result<T>) -> Result<T> {
    if let Err(e) = &started {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => warn!(path = %dir.display(), error = %e, "node failed to start, removed working directory"),
            Err(rm) => warn!(
                path = %dir.display(),
                error = %e,
                cleanup_error = %rm,
                "node failed to start, working directory left behind"
            ),
        }
    }
    started
}

/// Reads the next `<<...>>` binary printed by the console, normalized.
pub(crate) async fn read_binary(repl: &mut ReplProcess, settings: &ReplSettings) -> Result<String> {
    let limit = settings.query_timeout();
    let mut text = String::from(BINARY_OPEN);
    repl.read_until(BINARY_OPEN, limit).await?;
    text.push_str(&repl.read_until(BINARY_CLOSE, limit).await?);
    let binary = extract_binary(&text)
        .ok_or_else(|| HarnessError::assertion("<<...>>", text.clone()))?;
    Ok(normalize(binary))
}

/// Reads the acknowledgment of a command and compares it with `token`.
/// Blank lines are skipped and a leading console prompt is ignored.
pub(crate) async fn expect_ack(
    repl: &mut ReplProcess,
    settings: &ReplSettings,
    prompt: &Regex,
    token: &str,
) -> Result<()> {
    let line = loop {
        let line = normalize(&repl.read_line(settings.query_timeout()).await?);
        let line = strip_prompt(&line, prompt).to_string();
        if !line.is_empty() {
            break line;
        }
    };
    debug!(node = %repl.label(), ack = %line, expected = token, "acknowledgment");
    if line == token {
        Ok(())
    } else {
        Err(HarnessError::assertion(token, line))
    }
}
