//! SSH transport backed by libssh2.
//!
//! libssh2 is blocking, so every call runs on the blocking pool and the
//! session sits behind a mutex.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use ssh2::Session;

use super::{CONNECT_TIMEOUT, CommandOutput, DirEntry, ExecutorError, RemoteTransport};
use crate::config::{AuthConfig, MachineTarget};

pub struct SshTransport {
    target: String,
    session: Arc<Mutex<Session>>,
}

impl SshTransport {
    pub async fn connect(target: &MachineTarget) -> Result<Self, ExecutorError> {
        let name = target.name.clone();
        let host = target
            .host
            .clone()
            .ok_or_else(|| ExecutorError::connection_failed(&name, "no host configured"))?;
        let port = target.effective_port().unwrap_or(22);
        let username = target
            .username
            .clone()
            .ok_or_else(|| ExecutorError::connection_failed(&name, "no username configured"))?;
        let auth = target.auth.clone();

        let session = tokio::task::spawn_blocking({
            let name = name.clone();
            move || open_session(&name, &host, port, &username, auth.as_ref())
        })
        .await
        .map_err(|e| ExecutorError::connection_failed(&name, e.to_string()))??;

        tracing::info!(target_name = %name, "SSH session established");
        Ok(Self {
            target: name,
            session: Arc::new(Mutex::new(session)),
        })
    }

    async fn with_session<T, F>(&self, op: F) -> Result<T, ExecutorError>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, ExecutorError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let guard = session
                .lock()
                .map_err(|_| ExecutorError::Protocol(format!("{} session lock poisoned", target)))?;
            op(&guard)
        })
        .await
        .map_err(|e| ExecutorError::Protocol(e.to_string()))?
    }
}

fn open_session(
    name: &str,
    host: &str,
    port: u16,
    username: &str,
    auth: Option<&AuthConfig>,
) -> Result<Session, ExecutorError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| ExecutorError::connection_failed(name, e.to_string()))?
        .next()
        .ok_or_else(|| ExecutorError::connection_failed(name, format!("cannot resolve {}", host)))?;
    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .map_err(|e| ExecutorError::connection_failed(name, e.to_string()))?;
    stream.set_nodelay(true).ok();

    let mut session = Session::new().map_err(|e| ExecutorError::connection_failed(name, e.to_string()))?;
    session.set_tcp_stream(stream);
    session.set_timeout(CONNECT_TIMEOUT.as_millis() as u32);
    session
        .handshake()
        .map_err(|e| ExecutorError::connection_failed(name, format!("handshake failed: {}", e)))?;

    let result = match auth {
        Some(AuthConfig::Password { password }) => {
            session.userauth_password(username, password.expose_secret())
        }
        Some(AuthConfig::Key {
            key_path,
            passphrase,
        }) => session.userauth_pubkey_file(
            username,
            None,
            key_path,
            passphrase.as_ref().map(|p| p.expose_secret()),
        ),
        None => session.userauth_agent(username),
    };
    if let Err(e) = result {
        return Err(ExecutorError::authentication_failed(name, e.to_string()));
    }
    if !session.authenticated() {
        return Err(ExecutorError::authentication_failed(name, "server rejected credentials"));
    }
    Ok(session)
}

fn protocol_err(e: impl std::fmt::Display) -> ExecutorError {
    ExecutorError::Protocol(e.to_string())
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Pause between polls when neither stream has data.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn exec(session: &Session, command: &str) -> Result<CommandOutput, ExecutorError> {
    exec_with_deadline(session, command, None)
}

fn exec_with_deadline(
    session: &Session,
    command: &str,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ExecutorError> {
    let mut channel = session.channel_session().map_err(protocol_err)?;
    channel.exec(command).map_err(protocol_err)?;

    session.set_blocking(false);
    let drained = drain_streams(channel.stream(0), channel.stderr(), timeout);
    session.set_blocking(true);
    let (stdout, stderr) = drained?;

    channel.wait_close().map_err(protocol_err)?;
    let exit_code = channel.exit_status().map_err(protocol_err)?;
    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Reads both streams to EOF, alternating between them so a full stderr
/// window cannot stall stdout. The readers must be non-blocking.
fn drain_streams(
    mut stdout: impl Read,
    mut stderr: impl Read,
    timeout: Option<Duration>,
) -> Result<(Vec<u8>, Vec<u8>), ExecutorError> {
    let deadline = timeout.map(|t| (Instant::now() + t, t));
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut out_done = false;
    let mut err_done = false;
    let mut buf = [0u8; 8192];

    while !(out_done && err_done) {
        let mut progressed = false;
        if !out_done {
            match poll_read(&mut stdout, &mut buf, &mut out)? {
                ReadStep::Data => progressed = true,
                ReadStep::Eof => out_done = true,
                ReadStep::Pending => {}
            }
        }
        if !err_done {
            match poll_read(&mut stderr, &mut buf, &mut err)? {
                ReadStep::Data => progressed = true,
                ReadStep::Eof => err_done = true,
                ReadStep::Pending => {}
            }
        }
        if !progressed {
            if let Some((at, limit)) = deadline
                && Instant::now() >= at
            {
                return Err(ExecutorError::Timeout(limit));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    Ok((out, err))
}

enum ReadStep {
    Data,
    Eof,
    Pending,
}

fn poll_read(reader: &mut impl Read, buf: &mut [u8], sink: &mut Vec<u8>) -> Result<ReadStep, ExecutorError> {
    match reader.read(buf) {
        Ok(0) => Ok(ReadStep::Eof),
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(ReadStep::Data)
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
            Ok(ReadStep::Pending)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    fn protocol(&self) -> &'static str {
        "ssh"
    }

    /// Asks the server's SFTP `realpath`. Paths that do not exist yet resolve
    /// through their nearest existing ancestor.
    async fn canonicalize(&self, path: &str) -> Result<Option<String>, ExecutorError> {
        let path = path.to_string();
        self.with_session(move |session| {
            let sftp = session.sftp().map_err(protocol_err)?;
            let requested = Path::new(&path);
            for ancestor in requested.ancestors() {
                if ancestor.as_os_str().is_empty() {
                    break;
                }
                if let Ok(real) = sftp.realpath(ancestor) {
                    let rest = requested.strip_prefix(ancestor).unwrap_or(Path::new(""));
                    let joined = if rest.as_os_str().is_empty() { real } else { real.join(rest) };
                    return Ok(Some(joined.to_string_lossy().into_owned()));
                }
            }
            Ok(None)
        })
        .await
    }

    async fn read_file(&self, path: &str, max_bytes: u64) -> Result<String, ExecutorError> {
        let path = path.to_string();
        self.with_session(move |session| {
            let sftp = session.sftp().map_err(protocol_err)?;
            let mut file = sftp
                .open(Path::new(&path))
                .map_err(|_| ExecutorError::NotFound(path.clone()))?;
            let stat = file.stat().map_err(protocol_err)?;
            let size = stat.size.unwrap_or(0);
            if size > max_bytes {
                return Err(ExecutorError::FileTooLarge {
                    path,
                    size,
                    limit: max_bytes,
                });
            }
            let mut bytes = Vec::with_capacity(size as usize);
            file.read_to_end(&mut bytes)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
        .await
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), ExecutorError> {
        let path = path.to_string();
        let content = content.to_string();
        self.with_session(move |session| {
            if let Some(parent) = Path::new(&path).parent().and_then(|p| p.to_str())
                && !parent.is_empty()
            {
                exec(session, &format!("mkdir -p {}", shell_quote(parent)))?;
            }
            let sftp = session.sftp().map_err(protocol_err)?;
            let mut file = sftp.create(Path::new(&path)).map_err(protocol_err)?;
            file.write_all(content.as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ExecutorError> {
        let command = command.to_string();
        self.with_session(move |session| {
            exec_with_deadline(session, &command, Some(timeout))
        })
        .await
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, ExecutorError> {
        let path = path.to_string();
        self.with_session(move |session| {
            let sftp = session.sftp().map_err(protocol_err)?;
            let entries = sftp
                .readdir(Path::new(&path))
                .map_err(|_| ExecutorError::NotFound(path.clone()))?;
            Ok(entries
                .into_iter()
                .filter_map(|(entry, stat)| {
                    let name = entry.file_name()?.to_string_lossy().into_owned();
                    Some(DirEntry {
                        name,
                        is_dir: stat.is_dir(),
                    })
                })
                .collect())
        })
        .await
    }

    async fn disconnect(&self) -> Result<(), ExecutorError> {
        self.with_session(|session| {
            session
                .disconnect(None, "closing", None)
                .map_err(protocol_err)
        })
        .await
    }
}
