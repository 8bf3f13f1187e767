//! Line-oriented driving of an interactive child process.
//!
//! stdout and stderr are pumped by background tasks into a single channel, so
//! a marker is found regardless of which stream the console wrote it to. All
//! reads carry a deadline and fail with [`HarnessError::Timeout`] rather than
//! blocking forever.

use std::process::Stdio;
use std::time::Duration;

use memchr::memmem;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::error::{HarnessError, Result};

/// Line that hands the console back to the harness during pass-through.
pub const DETACH_LINE: &str = "~.";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One interactive child process and its buffered output.
pub struct ReplProcess {
    label: String,
    child: Child,
    stdin: ChildStdin,
    output: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl std::fmt::Debug for ReplProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplProcess")
            .field("label", &self.label)
            .field("pid", &self.child.id())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ReplProcess {
    /// Spawns `command` with piped stdio. The child is killed if the handle
    /// is dropped without [`ReplProcess::shutdown`].
    pub fn spawn(label: impl Into<String>, mut command: Command) -> Result<Self> {
        let label = label.into();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            let program = command.as_std().get_program().to_string_lossy().into_owned();
            HarnessError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to spawn {program} for {label}: {e}"),
            ))
        })?;
        info!(node = %label, pid = ?child.id(), "spawned console process");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::config("child stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::config("child stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HarnessError::config("child stderr was not captured"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(stdout, tx.clone(), label.clone(), "stdout"));
        tokio::spawn(pump(stderr, tx, label.clone(), "stderr"));

        Ok(Self {
            label,
            child,
            stdin,
            output: rx,
            pending: Vec::new(),
        })
    }

    /// Name used in logs and errors.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id, if still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Writes `line` and a newline to the console.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        debug!(node = %self.label, %line, "send");
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Consumes output up to and including `marker` and returns it.
    /// Output after the marker stays buffered for the next read.
    pub async fn read_until(&mut self, marker: &str, limit: Duration) -> Result<String> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(pos) = memmem::find(&self.pending, marker.as_bytes()) {
                let consumed: Vec<u8> = self.pending.drain(..pos + marker.len()).collect();
                let text = String::from_utf8_lossy(&consumed).into_owned();
                trace!(node = %self.label, %marker, %text, "matched");
                return Ok(text);
            }
            match timeout_at(deadline, self.output.recv()).await {
                Ok(Some(chunk)) => self.pending.extend_from_slice(&chunk),
                Ok(None) => {
                    return Err(HarnessError::ProcessExited {
                        node: self.label.clone(),
                        marker: marker.to_string(),
                    })
                }
                Err(_) => {
                    return Err(HarnessError::Timeout {
                        node: self.label.clone(),
                        marker: marker.to_string(),
                        after: limit,
                    })
                }
            }
        }
    }

    /// Consumes output through the next newline.
    pub async fn read_line(&mut self, limit: Duration) -> Result<String> {
        self.read_until("\n", limit).await
    }

    /// Discards everything the child printed until it stays silent for
    /// `quiet`. Returns the discarded text.
    pub async fn clean(&mut self, quiet: Duration) -> String {
        while let Ok(Some(chunk)) = timeout(quiet, self.output.recv()).await {
            self.pending.extend_from_slice(&chunk);
        }
        let drained = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&drained).into_owned();
        if !text.is_empty() {
            trace!(node = %self.label, %text, "drained");
        }
        text
    }

    /// Passes operator lines to the child and child output to `out` until
    /// the operator sends [`DETACH_LINE`], input ends, or the child exits.
    pub async fn interactive<R, W>(
        &mut self,
        input: &mut Lines<R>,
        out: &mut W,
        prompt: &str,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(node = %self.label, "entering interactive mode");
        if !self.pending.is_empty() {
            out.write_all(&std::mem::take(&mut self.pending)).await?;
        }
        out.write_all(prompt.as_bytes()).await?;
        out.flush().await?;

        loop {
            tokio::select! {
                line = input.next_line() => match line? {
                    None => break,
                    Some(line) if line.trim() == DETACH_LINE => break,
                    Some(line) => {
                        self.send_line(&line).await?;
                        out.write_all(prompt.as_bytes()).await?;
                        out.flush().await?;
                    }
                },
                chunk = self.output.recv() => match chunk {
                    Some(bytes) => {
                        out.write_all(&bytes).await?;
                        out.flush().await?;
                    }
                    None => {
                        warn!(node = %self.label, "console closed during interactive mode");
                        break;
                    }
                },
            }
        }
        info!(node = %self.label, "left interactive mode");
        Ok(())
    }

    /// Kills the child and waits for it to exit.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!(node = %self.label, "shutting down console process");
        let _ = self.child.start_kill();
        match timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(node = %self.label, ?status, "console process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(node = %self.label, "console process did not exit in time, killing");
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}

async fn pump<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    label: String,
    stream: &'static str,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                trace!(node = %label, stream, bytes = n, "output");
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) => {
                error!(node = %label, stream, error = %e, "failed to read console output");
                break;
            }
        }
    }
}
