//! Persistent local shell session
//!
//! The shell is spawned once. Two reader tasks drain stdout and stderr into a
//! channel, and every command line is followed by `echo <marker>` on both
//! streams so the reader knows where its output ends on each of them.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as ProcessCommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{strip_blank_edges, Command, CommandError, CommandExecutor};
use crate::constants::{MARKER_SUFFIX, SHELL_MARKER_PREFIX};
use crate::text::preview;

/// How long `close` waits for the shell to exit before killing it
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Message type for shell output streaming
#[derive(Debug)]
pub enum ShellOutput {
    /// Line from standard output
    Stdout(String),
    /// Line from standard error
    Stderr(String),
}

pub struct ShellExecutor {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    output: mpsc::UnboundedReceiver<ShellOutput>,
    readers: Vec<JoinHandle<()>>,
    /// Limit for one command line (None waits forever)
    timeout: Option<Duration>,
}

impl ShellExecutor {
    /// Spawn `program` as an interactive shell without any initialization
    pub fn open(program: &str, timeout: Option<Duration>) -> Result<Self, CommandError> {
        let mut process = ProcessCommand::new(program);
        if cfg!(target_os = "windows") && program.eq_ignore_ascii_case("cmd") {
            process.arg("/Q");
        }
        let mut child = process
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or(CommandError::ChannelClosed)?;
        let stdout = child.stdout.take().ok_or(CommandError::ChannelClosed)?;
        let stderr = child.stderr.take().ok_or(CommandError::ChannelClosed)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let readers = vec![
            spawn_reader(stdout, sender.clone(), ShellOutput::Stdout),
            spawn_reader(stderr, sender, ShellOutput::Stderr),
        ];

        info!("Started shell {} (pid {:?})", program, child.id());
        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            output: receiver,
            readers,
            timeout,
        })
    }

    /// Spawn the shell and move to the home directory
    pub async fn start(program: &str, timeout: Option<Duration>) -> Result<Self, CommandError> {
        let mut executor = Self::open(program, timeout)?;
        let home = if cfg!(target_os = "windows") {
            "cd %USERPROFILE%"
        } else {
            "cd ~"
        };
        let mut output = String::new();
        executor.run_line(home, &mut output).await?;
        Ok(executor)
    }

    pub fn is_open(&self) -> bool {
        self.stdin.is_some()
    }

    async fn run_line(&mut self, line: &str, output: &mut String) -> Result<(), CommandError> {
        let stdin = self.stdin.as_mut().ok_or(CommandError::NotOpen)?;

        // stray output of a previous command, e.g. late stderr lines
        while let Ok(stale) = self.output.try_recv() {
            debug!("Discarding stale shell output: {:?}", stale);
        }

        let marker = format!("{}{}{}", SHELL_MARKER_PREFIX, Uuid::new_v4().simple(), MARKER_SUFFIX);
        let payload = format!("{}\necho {}\necho {} 1>&2\n", line, marker, marker);
        debug!("shell <- {}", preview(line));
        stdin.write_all(payload.as_bytes()).await?;
        stdin.flush().await?;

        let mut stdout_done = false;
        let mut stderr_done = false;
        while !(stdout_done && stderr_done) {
            let next = match self.timeout {
                Some(limit) => tokio::time::timeout(limit, self.output.recv())
                    .await
                    .map_err(|_| CommandError::Timeout(format!("no marker after {:?}", limit)))?,
                None => self.output.recv().await,
            };

            match next {
                None => return Err(CommandError::ShellTerminated),
                Some(ShellOutput::Stdout(text)) => {
                    let text = text.trim_end_matches('\r');
                    if text.trim_end() == marker {
                        stdout_done = true;
                    } else if !text.ends_with(&marker) {
                        push_line(output, text);
                    }
                }
                Some(ShellOutput::Stderr(text)) => {
                    let text = text.trim_end_matches('\r');
                    if text.trim_end() == marker {
                        stderr_done = true;
                    } else if !text.contains(&marker) {
                        push_line(output, text);
                    }
                }
            }
        }
        Ok(())
    }
}

fn push_line(output: &mut String, line: &str) {
    output.push_str(line);
    output.push('\n');
}

fn spawn_reader<R>(
    stream: R,
    sender: mpsc::UnboundedSender<ShellOutput>,
    wrap: fn(String) -> ShellOutput,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer);
                    let line = line.trim_end_matches('\n').to_string();
                    if sender.send(wrap(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Shell reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&mut self, command: &mut Command) -> i32 {
        if !command.kind.is_shell() {
            return command.skip();
        }

        let mut output = String::new();
        let mut failure = None;
        for line in &command.cmds {
            if let Err(e) = self.run_line(line, &mut output).await {
                failure = Some(e);
                break;
            }
        }

        let mut output = strip_blank_edges(output);
        command.exit_code = match failure {
            None => 0,
            Some(e) => {
                warn!("Shell command failed: {}", e);
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&format!("[error] {}", e));
                1
            }
        };
        debug!("shell -> {}", preview(&output));
        command.output = output;
        command.exit_code
    }

    async fn close(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"exit\n").await;
            let _ = stdin.flush().await;
        }
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => info!("Shell exited with {}", status),
                _ => {
                    warn!("Shell did not exit, killing it");
                    let _ = child.kill().await;
                }
            }
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}
