//! Numbered operator menu over a [`Session`].

use std::fmt::Display;
use std::future::Future;

use anyhow::Result;
use console::style;
use interlink_core::{
    CleanupReport, HarnessConfig, HarnessError, NodeKind, ResourceAllocator, Session, DETACH_LINE,
};
use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines,
};
use tracing::{info, warn};

const CHOICES: [&str; 6] = [
    "Create Elixir node",
    "Create Epoch node",
    "List managed nodes",
    "Interactive shell",
    "Connect chosen node to all others",
    "Exit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create(NodeKind),
    List,
    Interactive,
    ConnectAll,
    Exit,
}

fn parse_action(choice: &str) -> Option<Action> {
    Some(match choice.trim() {
        "1" => Action::Create(NodeKind::Elixir),
        "2" => Action::Create(NodeKind::Epoch),
        "3" => Action::List,
        "4" => Action::Interactive,
        "5" => Action::ConnectAll,
        "6" => Action::Exit,
        _ => return None,
    })
}

/// Anything but an explicit "n"/"no" means yes; so does end of input.
fn confirms(answer: Option<&str>) -> bool {
    match answer.map(|a| a.trim().to_ascii_lowercase()) {
        Some(a) => !(a == "n" || a == "no"),
        None => true,
    }
}

/// Runs the menu on the process's stdin and stdout, then tears the session down.
pub async fn run(config: HarnessConfig, alloc: ResourceAllocator) -> Result<()> {
    let input = BufReader::new(io::stdin()).lines();
    let mut menu = Menu::new(config, alloc, input, io::stdout());
    let interrupted = tokio::select! {
        res = menu.run_loop() => {
            res?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        info!("interrupted, leaving menu");
        menu.write("\n").await?;
    }
    menu.finish(tokio::signal::ctrl_c).await
}

/// Operator loop over one session, generic over its console streams.
pub struct Menu<R, W> {
    config: HarnessConfig,
    alloc: ResourceAllocator,
    session: Session,
    input: Lines<R>,
    out: W,
}

impl<R, W> Menu<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Menu with an empty session.
    pub fn new(config: HarnessConfig, alloc: ResourceAllocator, input: Lines<R>, out: W) -> Self {
        Self {
            config,
            alloc,
            session: Session::new(),
            input,
            out,
        }
    }

    /// Serves choices until Exit or end of input. Failed operations are
    /// reported and the menu continues.
    pub async fn run_loop(&mut self) -> Result<()> {
        loop {
            self.print_choices().await?;
            let Some(line) = self.input.next_line().await? else {
                return Ok(());
            };
            let Some(action) = parse_action(&line) else {
                self.say(style(format!("unknown choice: {}", line.trim())).yellow())
                    .await?;
                continue;
            };
            if action == Action::Exit {
                return Ok(());
            }
            if let Err(e) = self.dispatch(action).await {
                self.say(style(format!("error: {e}")).red()).await?;
            }
        }
    }

    async fn dispatch(&mut self, action: Action) -> Result<(), HarnessError> {
        match action {
            Action::Create(kind) => {
                let build = kind.default_build_path(&self.config);
                let index = self
                    .session
                    .create(kind, &mut self.alloc, &self.config, &build)
                    .await?;
                self.say(style(format!("{kind} node #{} is up", index + 1)).green())
                    .await?;
            }
            Action::List => {
                if self.session.is_empty() {
                    self.say("no nodes").await?;
                }
                for (i, line) in self.session.describe_all().await?.into_iter().enumerate() {
                    self.say(format!("{}. {line}", i + 1)).await?;
                }
            }
            Action::Interactive => {
                let index = self.pick_node().await?;
                self.say(style(format!("type {DETACH_LINE} on its own line to return")).dim())
                    .await?;
                let prompt = format!("#{}> ", index + 1);
                self.session
                    .interactive(index, &mut self.input, &mut self.out, &prompt)
                    .await?;
                self.say("").await?;
            }
            Action::ConnectAll => {
                let index = self.pick_node().await?;
                let linked = self.session.link_to_all(index).await?;
                self.say(style(format!("node #{} linked to {linked} peer(s)", index + 1)).green())
                    .await?;
            }
            Action::Exit => {}
        }
        Ok(())
    }

    /// Asks for a 1-based node number and returns its index.
    async fn pick_node(&mut self) -> Result<usize, HarnessError> {
        if self.session.is_empty() {
            return Err(HarnessError::selection("no nodes yet"));
        }
        self.write(&format!("node [1-{}]: ", self.session.len())).await?;
        let line = self
            .input
            .next_line()
            .await?
            .ok_or_else(|| HarnessError::selection("no node chosen"))?;
        match line.trim().parse::<usize>() {
            Ok(n) if (1..=self.session.len()).contains(&n) => Ok(n - 1),
            _ => Err(HarnessError::selection(format!(
                "not a node number: {}",
                line.trim()
            ))),
        }
    }

    /// Offers to remove working directories, then stops every node.
    /// `interrupt` resolves on Ctrl-C: at the prompt it counts as yes, and
    /// during shutdown it abandons the graceful stop (children are still
    /// killed when the session drops).
    pub async fn finish<F, Fut>(mut self, interrupt: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        if !self.session.is_empty() && self.confirm_cleanup(interrupt()).await? {
            let report = self.session.clean_all();
            self.report_cleanup(&report).await?;
        }
        tokio::select! {
            _ = self.session.shutdown_all() => {}
            _ = interrupt() => warn!("interrupted, killing remaining nodes"),
        }
        self.out.flush().await?;
        Ok(())
    }

    async fn confirm_cleanup(
        &mut self,
        interrupt: impl Future<Output = io::Result<()>>,
    ) -> io::Result<bool> {
        self.write("remove temporary node directories? [Y/n] ").await?;
        let mut interrupted = false;
        let answer = tokio::select! {
            line = self.input.next_line() => line.ok().flatten(),
            _ = interrupt => {
                interrupted = true;
                None
            }
        };
        if interrupted {
            self.write("\n").await?;
        }
        Ok(confirms(answer.as_deref()))
    }

    async fn report_cleanup(&mut self, report: &CleanupReport) -> io::Result<()> {
        for dir in &report.removed {
            self.say(format!("removed {}", dir.display())).await?;
        }
        for (dir, e) in &report.failed {
            self.say(style(format!("could not remove {}: {e}", dir.display())).red())
                .await?;
        }
        Ok(())
    }

    async fn print_choices(&mut self) -> io::Result<()> {
        let mut text = String::from("\n");
        for (i, choice) in CHOICES.iter().enumerate() {
            text.push_str(&format!("{} {choice}\n", style(format!("{}.", i + 1)).bold()));
        }
        text.push_str("> ");
        self.write(&text).await
    }

    async fn say(&mut self, line: impl Display) -> io::Result<()> {
        self.write(&format!("{line}\n")).await
    }

    async fn write(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.flush().await
    }
}
