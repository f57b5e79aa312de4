//! WinRM transport: one remote shell per target, commands over WS-Management.
//!
//! Plain commands run in the cmd shell. File operations are PowerShell
//! scripts sent with `-EncodedCommand`.

mod soap;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use uuid::Uuid;

use self::soap::Envelope;
use super::{CONNECT_TIMEOUT, CommandOutput, DirEntry, ExecutorError, RemoteTransport};
use crate::config::{AuthConfig, MachineTarget};

/// Raw bytes per write round trip; a multiple of 3 keeps base64 chunks unpadded.
const WRITE_CHUNK_BYTES: usize = 3 * 1024;

const EXIT_NOT_FOUND: i32 = 2;
const EXIT_TOO_LARGE: i32 = 3;

pub struct WinRmTransport {
    target: String,
    client: reqwest::Client,
    endpoint: String,
    auth_header: SecretString,
    operation_timeout: String,
    shell_id: Mutex<Option<String>>,
}

impl WinRmTransport {
    pub async fn connect(target: &MachineTarget) -> Result<Self, ExecutorError> {
        let host = target
            .host
            .as_deref()
            .ok_or_else(|| ExecutorError::connection_failed(&target.name, "no host configured"))?;
        let username = target
            .username
            .as_deref()
            .ok_or_else(|| ExecutorError::connection_failed(&target.name, "no username configured"))?;
        let password = match &target.auth {
            Some(AuthConfig::Password { password }) => password.clone(),
            _ => {
                return Err(ExecutorError::authentication_failed(
                    &target.name,
                    "WinRM requires password authentication",
                ));
            }
        };

        let scheme = if target.effective_ssl() { "https" } else { "http" };
        let port = target.effective_port().unwrap_or(5986);
        let endpoint = format!("{}://{}:{}/wsman", scheme, host, port);
        Self::open(&target.name, endpoint, username, &password).await
    }

    /// Opens a shell against an explicit endpoint URL.
    pub async fn open(
        target: &str,
        endpoint: impl Into<String>,
        username: &str,
        password: &SecretString,
    ) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ExecutorError::connection_failed(target, e.to_string()))?;

        let credentials = STANDARD.encode(format!("{}:{}", username, password.expose_secret()));
        let transport = Self {
            target: target.to_string(),
            client,
            endpoint: endpoint.into(),
            auth_header: SecretString::from(format!("Basic {}", credentials)),
            operation_timeout: "PT60S".to_string(),
            shell_id: Mutex::new(None),
        };

        let response = transport
            .send(|env| env.create_shell(), CONNECT_TIMEOUT)
            .await?;
        let shell_id = soap::shell_id(&response)
            .ok_or_else(|| ExecutorError::Protocol("create shell response carried no ShellId".into()))?;
        tracing::info!(target_name = %target, shell_id = %shell_id, "WinRM shell created");
        *transport.shell_id.lock().await = Some(shell_id);
        Ok(transport)
    }

    async fn send<F>(&self, build: F, timeout: Duration) -> Result<String, ExecutorError>
    where
        F: FnOnce(&Envelope<'_>) -> String,
    {
        let message_id = Uuid::new_v4().to_string().to_uppercase();
        let body = build(&Envelope {
            endpoint: &self.endpoint,
            message_id: &message_id,
            timeout: &self.operation_timeout,
        });

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/soap+xml;charset=UTF-8"),
        );
        let auth = HeaderValue::from_str(self.auth_header.expose_secret())
            .map_err(|e| ExecutorError::authentication_failed(&self.target, e.to_string()))?;
        headers.insert(AUTHORIZATION, auth);

        tracing::trace!(target_name = %self.target, bytes = body.len(), "WinRM request");
        let response = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutorError::Timeout(timeout)
                } else {
                    ExecutorError::connection_failed(&self.target, e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExecutorError::Protocol(e.to_string()))?;

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                ExecutorError::authentication_failed(&self.target, format!("HTTP {}", status)),
            ),
            s if s.is_success() => Ok(text),
            s => {
                let fault = soap::parse_fault(&text).unwrap_or(text);
                Err(ExecutorError::Protocol(format!("HTTP {}: {}", s, fault)))
            }
        }
    }

    async fn current_shell(&self) -> Result<String, ExecutorError> {
        self.shell_id
            .lock()
            .await
            .clone()
            .ok_or_else(|| ExecutorError::Closed(self.target.clone()))
    }

    async fn run_raw(
        &self,
        command: &str,
        arguments: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutorError> {
        let shell = self.current_shell().await?;
        let response = self
            .send(|env| env.command(&shell, command, arguments), timeout)
            .await?;
        let command_id = soap::command_id(&response)
            .ok_or_else(|| ExecutorError::Protocol("command response carried no CommandId".into()))?;

        let mut output = CommandOutput {
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
        };
        loop {
            let response = self
                .send(|env| env.receive(&shell, &command_id), timeout)
                .await?;
            let chunk = soap::parse_receive(&response);
            output.stdout.push_str(&chunk.stdout);
            output.stderr.push_str(&chunk.stderr);
            if chunk.done {
                output.exit_code = chunk.exit_code.unwrap_or(0);
                break;
            }
        }

        if let Err(e) = self
            .send(|env| env.terminate(&shell, &command_id), CONNECT_TIMEOUT)
            .await
        {
            tracing::debug!(target_name = %self.target, error = %e, "Command cleanup failed");
        }
        Ok(output)
    }

    async fn run_powershell(&self, script: &str) -> Result<CommandOutput, ExecutorError> {
        let args = vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-EncodedCommand".to_string(),
            soap::encode_powershell(script),
        ];
        self.run_raw("powershell.exe", &args, Duration::from_secs(60))
            .await
    }
}

/// Single-quoted PowerShell literal with Windows separators.
fn ps_literal(path: &str) -> String {
    format!("'{}'", path.replace('/', "\\").replace('\'', "''"))
}

fn script_failed(output: &CommandOutput) -> ExecutorError {
    let detail = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    ExecutorError::Protocol(format!("exit code {}: {}", output.exit_code, detail))
}

#[async_trait]
impl RemoteTransport for WinRmTransport {
    fn protocol(&self) -> &'static str {
        "winrm"
    }

    async fn read_file(&self, path: &str, max_bytes: u64) -> Result<String, ExecutorError> {
        let script = format!(
            "$p = {p}\n\
             if (-not (Test-Path -LiteralPath $p -PathType Leaf)) {{ exit {nf} }}\n\
             $len = (Get-Item -LiteralPath $p).Length\n\
             if ($len -gt {max}) {{ Write-Output $len; exit {tl} }}\n\
             [Console]::Out.Write([System.IO.File]::ReadAllText($p))",
            p = ps_literal(path),
            nf = EXIT_NOT_FOUND,
            max = max_bytes,
            tl = EXIT_TOO_LARGE,
        );
        let output = self.run_powershell(&script).await?;
        match output.exit_code {
            0 => Ok(output.stdout),
            EXIT_NOT_FOUND => Err(ExecutorError::NotFound(path.to_string())),
            EXIT_TOO_LARGE => Err(ExecutorError::FileTooLarge {
                path: path.to_string(),
                size: output.stdout.trim().parse().unwrap_or(0),
                limit: max_bytes,
            }),
            _ => Err(script_failed(&output)),
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), ExecutorError> {
        let literal = ps_literal(path);
        let bytes = content.as_bytes();
        let mut chunks: Vec<&[u8]> = bytes.chunks(WRITE_CHUNK_BYTES).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let prelude = if i == 0 {
                "$d = Split-Path -Parent $p\n\
                 if ($d -and -not (Test-Path -LiteralPath $d)) { New-Item -ItemType Directory -Force -Path $d | Out-Null }\n"
            } else {
                ""
            };
            let mode = if i == 0 { "Create" } else { "Append" };
            let script = format!(
                "$p = {literal}\n{prelude}\
                 $b = [System.Convert]::FromBase64String('{data}')\n\
                 $f = [System.IO.File]::Open($p, [System.IO.FileMode]::{mode})\n\
                 try {{ $f.Write($b, 0, $b.Length) }} finally {{ $f.Close() }}",
                data = STANDARD.encode(chunk),
            );
            let output = self.run_powershell(&script).await?;
            if !output.success() {
                return Err(script_failed(&output));
            }
        }
        Ok(())
    }

    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ExecutorError> {
        self.run_raw(command, &[], timeout).await
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, ExecutorError> {
        let script = format!(
            "$p = {p}\n\
             if (-not (Test-Path -LiteralPath $p -PathType Container)) {{ exit {nf} }}\n\
             Get-ChildItem -LiteralPath $p -Force | ForEach-Object {{ \
             if ($_.PSIsContainer) {{ 'dir: ' + $_.Name }} else {{ 'file: ' + $_.Name }} }}",
            p = ps_literal(path),
            nf = EXIT_NOT_FOUND,
        );
        let output = self.run_powershell(&script).await?;
        match output.exit_code {
            0 => Ok(output
                .stdout
                .lines()
                .filter_map(|line| {
                    let line = line.trim_end_matches('\r');
                    if let Some(name) = line.strip_prefix("dir: ") {
                        Some(DirEntry::dir(name))
                    } else {
                        line.strip_prefix("file: ").map(DirEntry::file)
                    }
                })
                .collect()),
            EXIT_NOT_FOUND => Err(ExecutorError::NotFound(path.to_string())),
            _ => Err(script_failed(&output)),
        }
    }

    async fn disconnect(&self) -> Result<(), ExecutorError> {
        let Some(shell) = self.shell_id.lock().await.take() else {
            return Ok(());
        };
        self.send(|env| env.delete_shell(&shell), CONNECT_TIMEOUT)
            .await
            .map(|_| ())
    }
}
