//! Remote-action gateway: SSH command execution and Docker container calls.
//!
//! External processes are invoked with structured argument vectors, never a
//! concatenated shell string, and every call runs under a bounded timeout.

use crate::errors::{AppError, ErrorType};
use crate::models::{DockerStats, Secret};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: i32,
    pub username: String,
    pub password: Secret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockerAction {
    Start,
    Stop,
    Restart,
}

impl DockerAction {
    pub fn parse(raw: &str) -> Result<DockerAction, AppError> {
        match raw {
            "start" => Ok(DockerAction::Start),
            "stop" => Ok(DockerAction::Stop),
            "restart" => Ok(DockerAction::Restart),
            _ => Err(AppError::new(
                "Invalid action. Must be start, stop, or restart",
                ErrorType::BadRequest,
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DockerAction::Start => "start",
            DockerAction::Stop => "stop",
            DockerAction::Restart => "restart",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteExecutor {
    timeout: Duration,
}

impl RemoteExecutor {
    pub fn new(timeout_secs: u64) -> RemoteExecutor {
        RemoteExecutor {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Runs `command` on the target over SSH and captures both streams.
    /// Non-zero exit maps to `RemoteExecution` carrying the stderr text.
    pub async fn ssh_exec(
        &self,
        target: &SshTarget,
        command: &str,
    ) -> Result<CommandOutput, AppError> {
        let args = ssh_args(target, command);
        self.run("sshpass", &args, "Failed to execute command")
            .await
    }

    pub async fn docker_status(&self, container: &str) -> Result<String, AppError> {
        let output = self
            .run(
                "docker",
                &docker_args(&["inspect", "--format", "{{.State.Status}}"], container),
                "Failed to get Docker container status",
            )
            .await?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn docker_stats(&self, container: &str) -> Result<DockerStats, AppError> {
        let output = self
            .run(
                "docker",
                &docker_args(
                    &[
                        "stats",
                        "--no-stream",
                        "--format",
                        "{{.CPUPerc}}|{{.MemUsage}}|{{.NetIO}}",
                    ],
                    container,
                ),
                "Failed to get Docker container stats",
            )
            .await?;

        parse_stats_line(output.stdout.trim()).ok_or_else(|| {
            AppError::new(
                "Failed to get Docker container stats",
                ErrorType::RemoteExecution,
            )
        })
    }

    pub async fn docker_logs(&self, container: &str) -> Result<String, AppError> {
        let output = self
            .run(
                "docker",
                &docker_args(&["logs", "--tail", "100"], container),
                "Failed to get Docker container logs",
            )
            .await?;
        // docker writes container logs to both streams
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    pub async fn docker_action(
        &self,
        container: &str,
        action: DockerAction,
    ) -> Result<(), AppError> {
        let context = format!("Failed to {} Docker container", action.as_str());
        self.run("docker", &docker_args(&[action.as_str()], container), &context)
            .await?;
        Ok(())
    }

    async fn run(
        &self,
        program: &str,
        args: &[String],
        context: &str,
    ) -> Result<CommandOutput, AppError> {
        let result = timeout(self.timeout, Command::new(program).args(args).output()).await;

        let output = match result {
            Err(_) => {
                return Err(AppError::new(
                    "Remote execution timed out",
                    ErrorType::Timeout,
                ))
            }
            Ok(Err(err)) => {
                log::error!("{}: could not spawn {}: {}", context, program, err);
                return Err(AppError::new(context, ErrorType::RemoteExecution));
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            log::error!("{}: {}", context, stderr.trim());
            return Err(AppError::new(
                &format!("{}: {}", context, stderr.trim()),
                ErrorType::RemoteExecution,
            ));
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

/// Argument vector for `sshpass`. The remote command travels as a single
/// argv entry; nothing here passes through a local shell.
fn ssh_args(target: &SshTarget, command: &str) -> Vec<String> {
    vec![
        "-p".to_string(),
        target.password.0.clone(),
        "ssh".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-p".to_string(),
        target.port.to_string(),
        format!("{}@{}", target.username, target.host),
        "--".to_string(),
        command.to_string(),
    ]
}

fn docker_args(base: &[&str], container: &str) -> Vec<String> {
    let mut args: Vec<String> = base.iter().map(|s| s.to_string()).collect();
    args.push(container.to_string());
    args
}

/// `docker stats --format "{{.CPUPerc}}|{{.MemUsage}}|{{.NetIO}}"` output.
pub fn parse_stats_line(line: &str) -> Option<DockerStats> {
    let mut parts = line.splitn(3, '|');
    let cpu_usage = parts.next()?.trim().to_string();
    let memory_usage = parts.next()?.trim().to_string();
    let network_io = parts.next()?.trim().to_string();

    Some(DockerStats {
        cpu_usage,
        memory_usage,
        network_io,
        last_updated: Some(Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SshTarget {
        SshTarget {
            host: "10.0.0.5".to_string(),
            port: 2222,
            username: "pi".to_string(),
            password: Secret("hunter2".to_string()),
        }
    }

    #[test]
    fn ssh_argv_is_structured_not_interpolated() {
        // A hostile command stays a single argv entry; no quoting layer to escape.
        let command = "echo hi; rm -rf / #\"'";
        let args = ssh_args(&target(), command);
        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "hunter2");
        assert_eq!(args[2], "ssh");
        assert_eq!(args[6], "2222");
        assert_eq!(args[7], "pi@10.0.0.5");
        assert_eq!(args[8], "--");
        assert_eq!(args.last().unwrap(), command);
    }

    #[test]
    fn docker_argv_places_the_container_last() {
        assert_eq!(
            docker_args(&["logs", "--tail", "100"], "abc123"),
            vec!["logs", "--tail", "100", "abc123"]
        );
        assert_eq!(docker_args(&["start"], "abc123"), vec!["start", "abc123"]);
    }

    #[test]
    fn stats_line_parses_into_the_cached_shape() {
        let stats = parse_stats_line("0.15%|34.5MiB / 1.944GiB|1.2kB / 648B").unwrap();
        assert_eq!(stats.cpu_usage, "0.15%");
        assert_eq!(stats.memory_usage, "34.5MiB / 1.944GiB");
        assert_eq!(stats.network_io, "1.2kB / 648B");
        assert!(stats.last_updated.is_some());
    }

    #[test]
    fn short_stats_line_is_rejected() {
        assert!(parse_stats_line("0.15%|34.5MiB / 1.944GiB").is_none());
        assert!(parse_stats_line("").is_none());
    }

    #[test]
    fn docker_action_enum_is_closed() {
        assert_eq!(DockerAction::parse("start").unwrap(), DockerAction::Start);
        assert_eq!(DockerAction::parse("stop").unwrap(), DockerAction::Stop);
        assert_eq!(DockerAction::parse("restart").unwrap(), DockerAction::Restart);

        let err = DockerAction::parse("pause").unwrap_err();
        assert_eq!(err.message, "Invalid action. Must be start, stop, or restart");
        assert_eq!(err.err_type, ErrorType::BadRequest);
    }
}
