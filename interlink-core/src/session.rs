//! The set of nodes managed during one harness run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncWrite, Lines};
use tracing::{error, info, warn};

use crate::allocator::ResourceAllocator;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::linker;
use crate::node::{Node, NodeKind};

const HANDOFF_QUIET: Duration = Duration::from_millis(50);

/// Outcome of removing every node's working directory.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Directories that were deleted.
    pub removed: Vec<PathBuf>,
    /// Directories that could not be deleted, with the reason.
    pub failed: Vec<(PathBuf, HarnessError)>,
}

impl CleanupReport {
    /// True when nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Insertion-ordered, append-only collection of node handles.
#[derive(Default)]
pub struct Session {
    nodes: Vec<Box<dyn Node>>,
}

impl Session {
    /// Empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True before the first node is added.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a node and returns its index.
    pub fn push(&mut self, node: Box<dyn Node>) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Node at `index`.
    pub fn get(&self, index: usize) -> Option<&dyn Node> {
        self.nodes.get(index).map(|n| n.as_ref())
    }

    /// Node at `index`, mutably.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn Node + 'static)> {
        self.nodes.get_mut(index).map(|n| n.as_mut())
    }

    /// Working directories in insertion order.
    pub fn working_dirs(&self) -> impl Iterator<Item = &Path> {
        self.nodes.iter().map(|n| n.working_dir())
    }

    /// Launches a node of `kind` from `build_path` and appends it.
    pub async fn create(
        &mut self,
        kind: NodeKind,
        alloc: &mut ResourceAllocator,
        config: &HarnessConfig,
        build_path: &Path,
    ) -> Result<usize> {
        info!(%kind, build_path = %build_path.display(), "creating node");
        let node = kind.spawn(alloc, config, build_path).await?;
        Ok(self.push(node))
    }

    /// Descriptions of every node, in insertion order. Each one queries
    /// the node's console.
    pub async fn describe_all(&mut self) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for node in &mut self.nodes {
            out.push(node.describe().await?);
        }
        Ok(out)
    }

    /// Makes node `from` connect to node `to`.
    pub async fn link(&mut self, from: usize, to: usize) -> Result<()> {
        let (from, to) = self.pair_mut(from, to)?;
        linker::link(from.as_mut(), to.as_mut()).await
    }

    /// Makes node `from` connect to every other node. Stops at the first
    /// failed link and returns how many links succeeded otherwise.
    pub async fn link_to_all(&mut self, from: usize) -> Result<usize> {
        self.index(from)?;
        let mut linked = 0;
        for to in 0..self.nodes.len() {
            if to != from {
                self.link(from, to).await?;
                linked += 1;
            }
        }
        Ok(linked)
    }

    /// Hands node `index`'s console to the operator until they detach.
    pub async fn interactive<R, W>(
        &mut self,
        index: usize,
        input: &mut Lines<R>,
        out: &mut W,
        prompt: &str,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let index = self.index(index)?;
        let node = self.nodes[index].as_mut();
        node.repl().clean(HANDOFF_QUIET).await;
        node.before_interactive().await?;
        node.repl().interactive(input, out, prompt).await
    }

    /// Removes every working directory, continuing past failures.
    pub fn clean_all(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for node in &self.nodes {
            let dir = node.working_dir().to_path_buf();
            match node.clean() {
                Ok(()) => {
                    info!(path = %dir.display(), "removed working directory");
                    report.removed.push(dir);
                }
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "failed to remove working directory");
                    report.failed.push((dir, e));
                }
            }
        }
        report
    }

    /// Stops every console process and empties the session.
    pub async fn shutdown_all(&mut self) {
        for mut node in self.nodes.drain(..) {
            if let Err(e) = node.repl().shutdown().await {
                error!(path = %node.working_dir().display(), error = %e, "failed to stop node");
            }
        }
    }

    fn index(&self, index: usize) -> Result<usize> {
        if index < self.nodes.len() {
            Ok(index)
        } else {
            Err(HarnessError::selection(format!(
                "no node #{} (session has {})",
                index + 1,
                self.nodes.len()
            )))
        }
    }

    fn pair_mut(&mut self, a: usize, b: usize) -> Result<(&mut Box<dyn Node>, &mut Box<dyn Node>)> {
        self.index(a)?;
        self.index(b)?;
        if a == b {
            return Err(HarnessError::selection(format!(
                "node #{} cannot link to itself",
                a + 1
            )));
        }
        if a < b {
            let (left, right) = self.nodes.split_at_mut(b);
            Ok((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.nodes.split_at_mut(a);
            Ok((&mut right[0], &mut left[b]))
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("nodes", &self.working_dirs().collect::<Vec<_>>())
            .finish()
    }
}
