//! OpenSSH remote host connector
//!
//! Uses the system `ssh` binary. `connect` starts a ControlMaster process
//! bound to a private socket; every later command of the session is
//! multiplexed over that socket, and `close` tells the master to exit.

use async_trait::async_trait;
use sdk::errors::{InstallerError, Result};
use sdk::remote::{HostConnector, RemoteSession};
use sdk::types::SshEndpoint;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::expand_path;
use crate::normalizer;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const MEMORY_LOCK_CAPABILITY: &str = "cap_ipc_lock";

static SOCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Opens [`OpenSshSession`]s with the system `ssh` client
#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    program: String,
}

impl Default for OpenSshConnector {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
        }
    }
}

impl OpenSshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different `ssh` executable
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl HostConnector for OpenSshConnector {
    async fn connect(&self, endpoint: &SshEndpoint) -> Result<Box<dyn RemoteSession>> {
        let key = expand_path(Path::new(endpoint.secret.unsecure()))?;
        let socket = std::env::temp_dir().join(format!(
            "vplug-{}-{}.sock",
            std::process::id(),
            SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        info!("Opening SSH session to {}", endpoint);
        // The master forks into the background and keeps inherited pipes open,
        // so its diagnostics go to a log file instead of stderr.
        let log = socket.with_extension("log");
        let mut command = Command::new(&self.program);
        command
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-M", "-f", "-N"])
            .arg("-E")
            .arg(&log)
            .arg("-S")
            .arg(&socket)
            .arg("-i")
            .arg(&key)
            .arg("-p")
            .arg(endpoint.port.to_string())
            .arg(destination(endpoint))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| InstallerError::Remote(format!("failed to start ssh: {}", e)))?;
        let status = match tokio::time::timeout(COMMAND_TIMEOUT, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                return Err(InstallerError::Remote(format!(
                    "connecting to {} timed out after {} seconds",
                    endpoint,
                    COMMAND_TIMEOUT.as_secs()
                )))
            }
        };

        let diagnostics = std::fs::read_to_string(&log).unwrap_or_default();
        let _ = std::fs::remove_file(&log);
        if !status.success() {
            return Err(normalizer::from_remote(&diagnostics));
        }

        Ok(Box::new(OpenSshSession {
            program: self.program.clone(),
            endpoint: endpoint.clone(),
            socket,
        }))
    }
}

/// One multiplexed SSH session
#[derive(Debug)]
pub struct OpenSshSession {
    program: String,
    endpoint: SshEndpoint,
    socket: PathBuf,
}

impl OpenSshSession {
    async fn exec(&self, remote_command: &str, stdin: Option<&[u8]>) -> Result<Output> {
        debug!("[{}] {}", self.endpoint, remote_command);
        let mut command = Command::new(&self.program);
        command
            .arg("-S")
            .arg(&self.socket)
            .arg("-p")
            .arg(self.endpoint.port.to_string())
            .arg(destination(&self.endpoint))
            .arg("--")
            .arg(remote_command);
        run(command, stdin).await
    }

    /// Run a command that must succeed
    async fn exec_checked(&self, remote_command: &str, stdin: Option<&[u8]>) -> Result<Output> {
        let output = self.exec(remote_command, stdin).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(normalizer::from_remote(&String::from_utf8_lossy(
                &output.stderr,
            )))
        }
    }
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    fn describe(&self) -> String {
        self.endpoint.to_string()
    }

    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        self.exec_checked(&format!("cat > {}", quote(path)), Some(contents))
            .await?;
        Ok(())
    }

    async fn file_exists(&mut self, path: &str) -> Result<bool> {
        let output = self.exec(&format!("test -f {}", quote(path)), None).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(normalizer::from_remote(&String::from_utf8_lossy(
                &output.stderr,
            ))),
        }
    }

    async fn grant_memory_lock(&mut self, path: &str) -> Result<()> {
        self.exec_checked(
            &format!("sudo -n setcap {}=+ep {}", MEMORY_LOCK_CAPABILITY, quote(path)),
            None,
        )
        .await?;
        Ok(())
    }

    async fn has_memory_lock(&mut self, path: &str) -> Result<bool> {
        let output = self
            .exec_checked(&format!("getcap {}", quote(path)), None)
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).contains(MEMORY_LOCK_CAPABILITY))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        debug!("Closing SSH session to {}", self.endpoint);
        let mut command = Command::new(&self.program);
        command
            .arg("-S")
            .arg(&self.socket)
            .args(["-O", "exit"])
            .arg(destination(&self.endpoint));
        let output = run(command, None).await;

        if self.socket.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket) {
                warn!("Failed to remove control socket {:?}: {}", self.socket, e);
            }
        }

        let output = output?;
        if output.status.success() {
            Ok(())
        } else {
            Err(normalizer::from_remote(&String::from_utf8_lossy(
                &output.stderr,
            )))
        }
    }
}

fn destination(endpoint: &SshEndpoint) -> String {
    format!("{}@{}", endpoint.user, endpoint.host)
}

/// Single-quote `value` for a POSIX shell
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

async fn run(mut command: Command, stdin: Option<&[u8]>) -> Result<Output> {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| InstallerError::Remote(format!("failed to start ssh: {}", e)))?;

    // Stream stdin while collecting output. The remote side may stop reading
    // early (e.g. "Text file busy"); its stderr still decides the outcome.
    let pipe = child.stdin.take();
    let writer = async move {
        match (stdin, pipe) {
            (Some(data), Some(mut pipe)) => {
                pipe.write_all(data).await?;
                pipe.shutdown().await
            }
            _ => Ok(()),
        }
    };

    let (written, output) = tokio::time::timeout(COMMAND_TIMEOUT, async {
        tokio::join!(writer, child.wait_with_output())
    })
    .await
    .map_err(|_| {
        InstallerError::Remote(format!(
            "ssh command timed out after {} seconds",
            COMMAND_TIMEOUT.as_secs()
        ))
    })?;
    let output = output?;

    if let Err(e) = written {
        if output.status.success() {
            return Err(InstallerError::Remote(format!(
                "failed to stream to ssh: {}",
                e
            )));
        }
        debug!("ssh stopped reading stdin: {}", e);
    }
    Ok(output)
}
