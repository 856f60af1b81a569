use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ssh2::{Channel, CheckResult, KnownHostFileKind, Session};

use super::{Connector, Shell};
use crate::{DebugSender, Result, TargetConfig, ToneFleetError};

/// Upper bound for TCP connect, handshake and authentication.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Password-authenticated SSH sessions verified against a known-hosts file.
#[derive(Debug, Clone)]
pub struct SshConnector {
    known_hosts: PathBuf,
    timeout: Duration,
}

impl SshConnector {
    pub fn new(known_hosts: impl Into<PathBuf>) -> Self {
        Self {
            known_hosts: known_hosts.into(),
            timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn open_tcp(&self, target: &TargetConfig) -> Result<TcpStream> {
        let connect_error = |message: String| ToneFleetError::Connect {
            target: target.name.clone(),
            message,
        };
        let addrs = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|err| connect_error(format!("cannot resolve {}: {err}", target.host)))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_error = Some(err),
            }
        }
        Err(connect_error(match last_error {
            Some(err) => format!("dial {}: {err}", target.address()),
            None => format!("no addresses found for {}", target.host),
        }))
    }

    fn verify_host_key(&self, session: &Session, target: &TargetConfig) -> Result<()> {
        let host_key_error = |message: String| ToneFleetError::HostKey {
            target: target.name.clone(),
            message,
        };
        let mut known_hosts = session
            .known_hosts()
            .map_err(|err| host_key_error(err.to_string()))?;
        known_hosts
            .read_file(&self.known_hosts, KnownHostFileKind::OpenSSH)
            .map_err(|err| {
                host_key_error(format!("reading {}: {err}", self.known_hosts.display()))
            })?;

        let (key, _) = session
            .host_key()
            .ok_or_else(|| host_key_error("server presented no host key".to_string()))?;
        match known_hosts.check_port(&target.host, target.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound => Err(host_key_error(format!(
                "{} is not listed in {}",
                target.address(),
                self.known_hosts.display()
            ))),
            CheckResult::Mismatch => Err(host_key_error(format!(
                "key for {} does not match {}",
                target.address(),
                self.known_hosts.display()
            ))),
            CheckResult::Failure => Err(host_key_error("known-hosts check failed".to_string())),
        }
    }
}

impl Connector for SshConnector {
    fn connect(&self, target: &TargetConfig, debug: &DebugSender) -> Result<Box<dyn Shell>> {
        let address = target.address();
        debug.line(&target.name, format!("Connecting to {address}"))?;
        let ssh_error = |err: ssh2::Error| ToneFleetError::Connect {
            target: target.name.clone(),
            message: err.to_string(),
        };

        let tcp = self.open_tcp(target)?;
        let mut session = Session::new().map_err(ssh_error)?;
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(ssh_error)?;
        if let Some(server_id) = session.banner() {
            tracing::debug!(device = %target.name, server_id, "ssh handshake done");
        }

        self.verify_host_key(&session, target)?;
        let auth = session.userauth_password(&target.username, &target.password);
        if let Ok(Some(banner)) = session.userauth_banner() {
            for line in banner.lines() {
                debug.line(&target.name, line)?;
            }
        }
        auth.map_err(ssh_error)?;
        if !session.authenticated() {
            return Err(ToneFleetError::Connect {
                target: target.name.clone(),
                message: "authentication rejected".to_string(),
            });
        }

        let mut channel = session.channel_session().map_err(ssh_error)?;
        channel.shell().map_err(ssh_error)?;

        // Playback has no deadline; from here on the shell is polled.
        session.set_timeout(0);
        session.set_blocking(false);
        let streams = vec![channel.stream(0), channel.stderr()];
        let reader = {
            let name = target.name.clone();
            let debug = debug.clone();
            thread::Builder::new()
                .name(format!("{name}-output"))
                .spawn(move || forward_output(streams, &name, &debug))?
        };

        debug.line(&target.name, format!("Connected to {address}"))?;
        Ok(Box::new(SshShell {
            session,
            channel: Outgoing(channel),
            reader: Some(reader),
        }))
    }
}

struct SshShell {
    session: Session,
    channel: Outgoing<Channel>,
    reader: Option<JoinHandle<()>>,
}

impl Write for SshShell {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.channel.flush()
    }
}

/// Write half of a non-blocking channel. `Channel::flush` discards unread
/// remote output, so flushing here never reaches the inner writer; each
/// completed write is already queued on the transport.
struct Outgoing<W>(W);

impl<W: Write> Write for Outgoing<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        retry(|| self.0.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Shell for SshShell {
    fn finish(self: Box<Self>) -> Result<()> {
        let mut shell = *self;
        retry(|| shell.channel.0.send_eof().map_err(io::Error::from))?;
        if let Some(reader) = shell.reader.take() {
            reader
                .join()
                .map_err(|_| ToneFleetError::msg("shell output forwarder panicked"))?;
        }
        shell.session.set_blocking(true);
        shell.channel.0.wait_close().map_err(io::Error::from)?;
        Ok(())
    }
}

fn retry<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match op() {
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            other => return other,
        }
    }
}

// Relays remote stdout and stderr to the debug sink one line at a time until
// both streams reach end of file.
fn forward_output(mut streams: Vec<ssh2::Stream>, name: &str, debug: &DebugSender) {
    let mut partial: Vec<Vec<u8>> = vec![Vec::new(); streams.len()];
    let mut open: Vec<bool> = vec![true; streams.len()];
    let mut chunk = [0u8; 4096];

    while open.iter().any(|still_open| *still_open) {
        let mut progressed = false;
        for (index, stream) in streams.iter_mut().enumerate() {
            if !open[index] {
                continue;
            }
            match stream.read(&mut chunk) {
                Ok(0) => open[index] = false,
                Ok(read) => {
                    progressed = true;
                    partial[index].extend_from_slice(&chunk[..read]);
                    while let Some(end) = partial[index].iter().position(|byte| *byte == b'\n') {
                        let line: Vec<u8> = partial[index].drain(..=end).collect();
                        let _ = debug.line(name, clean_line(&line));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    tracing::debug!(device = name, error = %err, "shell output closed");
                    open[index] = false;
                }
            }
        }
        if !progressed {
            thread::sleep(POLL_INTERVAL);
        }
    }

    for rest in partial.into_iter().filter(|rest| !rest.is_empty()) {
        let _ = debug.line(name, clean_line(&rest));
    }
}

fn clean_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}
