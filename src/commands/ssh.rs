//! Shell session on a remote host over SSH
//!
//! Every invocation is framed by two fresh tokens: `echo <BEGIN>`, the command
//! lines, then `echo <END>`. A reader thread turns the channel bytes into
//! lines; the collector ignores everything before BEGIN and stops at END.

use async_trait::async_trait;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Command, CommandError, CommandExecutor};
use crate::config::SshConfig;
use crate::constants::{MARKER_SUFFIX, SSH_BEGIN_PREFIX, SSH_END_PREFIX};
use crate::text::preview;

/// Pause of the reader thread when the channel has no data
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Byte stream to an interactive remote shell
///
/// Calls may block; the executor runs them on the blocking thread pool.
pub trait ShellChannel: Send {
    /// Write raw input to the shell
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Close the channel and the connection behind it
    fn close(&mut self) -> io::Result<()>;
}

/// [`ShellChannel`] backed by an `ssh2` session with a pty
pub struct Ssh2Channel {
    session: ssh2::Session,
    channel: Arc<Mutex<ssh2::Channel>>,
    stop: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

impl Ssh2Channel {
    /// Connect, authenticate and open an interactive shell
    ///
    /// Blocking; returns the channel and the receiving end of its lines.
    pub fn connect(
        config: &SshConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<String>), CommandError> {
        let address = format!("{}:{}", config.host, config.port);
        let tcp = TcpStream::connect(&address)
            .map_err(|e| CommandError::Connection(format!("{}: {}", address, e)))?;

        let mut session = ssh2::Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        match (&config.key_file, &config.password) {
            (Some(key_file), _) => {
                session.userauth_pubkey_file(&config.user, None, key_file, None)?
            }
            (None, Some(password)) => session.userauth_password(&config.user, password)?,
            (None, None) => {
                return Err(CommandError::Connection(
                    "neither password nor key file configured".to_string(),
                ))
            }
        }
        if !session.authenticated() {
            return Err(CommandError::Connection(format!(
                "authentication failed for {}",
                config.user
            )));
        }

        let mut channel = session.channel_session()?;
        channel.request_pty("xterm", None, None)?;
        channel.shell()?;
        session.set_blocking(false);

        let channel = Arc::new(Mutex::new(channel));
        let stop = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::unbounded_channel();
        let reader = spawn_reader(Arc::clone(&channel), Arc::clone(&stop), sender);

        info!("Connected to {} as {}", address, config.user);
        Ok((
            Self {
                session,
                channel,
                stop,
                reader: Some(reader),
            },
            receiver,
        ))
    }
}

fn spawn_reader(
    channel: Arc<Mutex<ssh2::Channel>>,
    stop: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];
        while !stop.load(Ordering::Relaxed) {
            let read = match channel.lock() {
                Ok(mut channel) => {
                    if channel.eof() {
                        break;
                    }
                    channel.read(&mut chunk)
                }
                Err(_) => break,
            };

            match read {
                Ok(0) => thread::sleep(POLL_INTERVAL),
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line);
                        let line = line.trim_end_matches(['\r', '\n']).to_string();
                        if sender.send(line).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    warn!("SSH reader stopped: {}", e);
                    break;
                }
            }
        }
        debug!("SSH reader finished");
    })
}

impl ShellChannel for Ssh2Channel {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            let result = match self.channel.lock() {
                Ok(mut channel) => channel.write(&data[written..]),
                Err(_) => return Err(io::Error::other("SSH channel lock poisoned")),
            };
            match result {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.session.set_blocking(true);
        if let Ok(mut channel) = self.channel.lock() {
            channel.close().map_err(io::Error::from)?;
        }
        self.session
            .disconnect(None, "closing", None)
            .map_err(io::Error::from)
    }
}

pub struct SshExecutor {
    channel: Option<Box<dyn ShellChannel>>,
    lines: mpsc::UnboundedReceiver<String>,
    command_timeout: Duration,
    inactivity_timeout: Duration,
}

impl SshExecutor {
    /// Wrap an already open channel and its line stream
    pub fn with_channel(
        channel: Box<dyn ShellChannel>,
        lines: mpsc::UnboundedReceiver<String>,
        config: &SshConfig,
    ) -> Self {
        Self {
            channel: Some(channel),
            lines,
            command_timeout: config.command_timeout,
            inactivity_timeout: config.inactivity_timeout,
        }
    }

    /// Connect to the configured host and move to the home directory
    pub async fn connect(config: &SshConfig) -> Result<Self, CommandError> {
        let settings = config.clone();
        let (channel, lines) = tokio::task::spawn_blocking(move || Ssh2Channel::connect(&settings))
            .await
            .map_err(|e| CommandError::Connection(e.to_string()))??;

        let mut executor = Self::with_channel(Box::new(channel), lines, config);
        executor.run_and_capture(&["cd ~".to_string()]).await?;
        Ok(executor)
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Send the command lines framed by fresh markers and collect their output
    pub async fn run_and_capture(&mut self, cmds: &[String]) -> Result<String, CommandError> {
        let mut output = Vec::new();
        self.capture_into(cmds, &mut output).await?;
        Ok(output.join("\n").trim_end().to_string())
    }

    async fn capture_into(
        &mut self,
        cmds: &[String],
        output: &mut Vec<String>,
    ) -> Result<(), CommandError> {
        let channel = self.channel.take().ok_or(CommandError::NotOpen)?;

        while let Ok(stale) = self.lines.try_recv() {
            debug!("Discarding stale SSH output: {}", preview(&stale));
        }

        let token = Uuid::new_v4().simple().to_string();
        let begin = format!("{}{}{}", SSH_BEGIN_PREFIX, token, MARKER_SUFFIX);
        let end = format!("{}{}{}", SSH_END_PREFIX, token, MARKER_SUFFIX);

        let mut payload = format!("echo {}\n", begin);
        for cmd in cmds {
            debug!("ssh <- {}", preview(cmd));
            payload.push_str(cmd);
            payload.push('\n');
        }
        payload.push_str(&format!("echo {}\n", end));
        let (channel, sent) = send_blocking(channel, payload.into_bytes()).await;
        self.channel = channel;
        sent?;

        self.collect(&begin, &end, output).await
    }

    async fn collect(
        &mut self,
        begin: &str,
        end: &str,
        output: &mut Vec<String>,
    ) -> Result<(), CommandError> {
        let deadline = Instant::now() + self.command_timeout;
        let echoed_end = format!("echo {}", end);
        let mut started = false;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(CommandError::Timeout(format!(
                    "command exceeded {:?}",
                    self.command_timeout
                )));
            }
            let wait = self.inactivity_timeout.min(deadline - now);

            let line = match tokio::time::timeout(wait, self.lines.recv()).await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(CommandError::ChannelClosed),
                Err(_) if wait < self.inactivity_timeout => {
                    return Err(CommandError::Timeout(format!(
                        "command exceeded {:?}",
                        self.command_timeout
                    )))
                }
                Err(_) => {
                    return Err(CommandError::Timeout(format!(
                        "no output for {:?}",
                        self.inactivity_timeout
                    )))
                }
            };

            let text = line.trim_start_matches('\r').trim_end();
            if !started {
                started = text == begin;
                continue;
            }
            if text == end {
                return Ok(());
            }
            if text.ends_with(&echoed_end) {
                continue;
            }
            output.push(line.trim_end_matches('\r').to_string());
        }
    }
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    async fn execute(&mut self, command: &mut Command) -> i32 {
        if !command.kind.is_shell() {
            return command.skip();
        }

        let mut lines = Vec::new();
        let result = self.capture_into(&command.cmds, &mut lines).await;
        let mut output = lines.join("\n").trim_end().to_string();

        command.exit_code = match result {
            Ok(()) => 0,
            Err(e) => {
                warn!("SSH command failed: {}", e);
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&format!("[error] {}", e));
                1
            }
        };
        debug!("ssh -> {}", preview(&output));
        command.output = output;
        command.exit_code
    }

    async fn close(&mut self) {
        let Some(mut channel) = self.channel.take() else {
            return;
        };
        let closed = tokio::task::spawn_blocking(move || {
            let _ = channel.send(b"exit\n");
            channel.close()
        })
        .await;
        match closed {
            Ok(Ok(())) => info!("SSH session closed"),
            Ok(Err(e)) => warn!("Closing SSH channel failed: {}", e),
            Err(e) => warn!("Closing SSH channel panicked: {}", e),
        }
    }
}

/// Write `data` on the blocking pool and hand the channel back
///
/// The channel is lost only if the write panicked.
async fn send_blocking(
    mut channel: Box<dyn ShellChannel>,
    data: Vec<u8>,
) -> (Option<Box<dyn ShellChannel>>, io::Result<()>) {
    let sent = tokio::task::spawn_blocking(move || {
        let result = channel.send(&data);
        (channel, result)
    })
    .await;
    match sent {
        Ok((channel, result)) => (Some(channel), result),
        Err(e) => (None, Err(io::Error::other(e.to_string()))),
    }
}
