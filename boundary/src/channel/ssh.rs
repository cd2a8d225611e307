//! Command channel over the system `ssh` client.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::classify::is_connection_failure;
use super::{CommandChannel, CommandOutput};
use crate::config::{AuthMethod, Config};
use crate::errors::ChannelError;
use crate::utils::shell::sh_c;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Runs each command in a fresh `ssh` invocation.
///
/// Key authentication uses `BatchMode`; password authentication goes through
/// `sshpass -e` with the password passed in the environment, never on the
/// command line.
#[derive(Clone)]
pub struct SshChannel {
    host: String,
    port: u16,
    username: String,
    auth: AuthMethod,
    command_timeout: Duration,
    ssh_program: String,
}

impl std::fmt::Debug for SshChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshChannel")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl SshChannel {
    /// Creates a channel to `username@host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            ssh_program: "ssh".to_string(),
        }
    }

    /// Creates a channel from the pipeline configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.host, config.port, &config.username, config.auth.clone())
    }

    /// Sets the per-command deadline.
    #[must_use]
    pub fn with_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Uses a different `ssh` executable.
    #[must_use]
    pub fn with_ssh_program(mut self, program: impl Into<String>) -> Self {
        self.ssh_program = program.into();
        self
    }

    /// The command line executed on the remote side.
    #[must_use]
    pub fn remote_command(&self, command: &str, sudo: bool) -> String {
        if !sudo {
            return command.to_string();
        }
        match self.auth {
            AuthMethod::Password(_) => format!("sudo -S -p '' {}", sh_c(command)),
            AuthMethod::Key(_) => format!("sudo -n {}", sh_c(command)),
        }
    }

    /// Program and arguments of the local invocation.
    #[must_use]
    pub fn argv(&self, remote_command: &str) -> (String, Vec<String>) {
        let mut args = Vec::new();
        let program = match &self.auth {
            AuthMethod::Password(_) => {
                args.push("-e".to_string());
                args.push(self.ssh_program.clone());
                "sshpass".to_string()
            }
            AuthMethod::Key(_) => self.ssh_program.clone(),
        };

        let batch_mode = matches!(self.auth, AuthMethod::Key(_));
        for option in [
            format!("BatchMode={}", if batch_mode { "yes" } else { "no" }),
            format!("ConnectTimeout={CONNECT_TIMEOUT_SECONDS}"),
            "StrictHostKeyChecking=accept-new".to_string(),
            "ServerAliveInterval=15".to_string(),
        ] {
            args.push("-o".to_string());
            args.push(option);
        }
        args.push("-p".to_string());
        args.push(self.port.to_string());
        if let AuthMethod::Key(path) = &self.auth {
            args.push("-i".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        args.push(format!("{}@{}", self.username, self.host));
        args.push("--".to_string());
        args.push(remote_command.to_string());

        (program, args)
    }

    async fn run(&self, command: &str, sudo: bool) -> Result<std::process::Output, ChannelError> {
        let remote = self.remote_command(command, sudo);
        let (program, args) = self.argv(&remote);
        let feed_password = match (&self.auth, sudo) {
            (AuthMethod::Password(password), true) => Some(password.clone()),
            _ => None,
        };

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(if feed_password.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let AuthMethod::Password(password) = &self.auth {
            cmd.env("SSHPASS", password);
        }

        let mut child = cmd.spawn().map_err(ChannelError::Spawn)?;

        if let (Some(password), Some(mut stdin)) = (feed_password, child.stdin.take()) {
            stdin.write_all(format!("{password}\n").as_bytes()).await?;
            stdin.shutdown().await?;
        }

        match timeout(self.command_timeout, child.wait_with_output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ChannelError::Timeout {
                seconds: self.command_timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl CommandChannel for SshChannel {
    async fn execute(&self, command: &str, sudo: bool) -> Result<CommandOutput, ChannelError> {
        debug!(host = %self.host, sudo, command, "Executing remote command");

        let output = self.run(command, sudo).await?;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if is_connection_failure(exit_code, &stderr) {
            return Err(ChannelError::Connection {
                host: self.host.clone(),
                detail: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}
