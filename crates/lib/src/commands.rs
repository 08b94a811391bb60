//! Command handling: what a relayed command does on this machine.
//!
//! The relay forwards each command text to a `CommandHandler` and acks with its outcome.
//! Allowlisted commands run a fixed argv; no shell is used, so nothing in the command text is interpreted.

use crate::config::Config;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::process::Command;

/// Receives each command relayed from a session. Err carries a short reason for the ack.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, session_id: &str, command: &str) -> Result<(), String>;
}

/// Log the command and report success.
#[derive(Debug, Clone, Default)]
pub struct AcknowledgeOnly;

#[async_trait]
impl CommandHandler for AcknowledgeOnly {
    async fn handle(&self, session_id: &str, command: &str) -> Result<(), String> {
        log::debug!("{}: acknowledged: {}", session_id, command);
        Ok(())
    }
}

/// Allowlist: command text (e.g. "run_command") -> argv to execute.
#[derive(Debug, Clone, Default)]
pub struct AllowlistHandler {
    commands: BTreeMap<String, Vec<String>>,
}

impl AllowlistHandler {
    pub fn new() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }

    /// Allow `command` to run `argv` (program first). Entries with an empty argv are ignored.
    pub fn allow(&mut self, command: impl Into<String>, argv: Vec<String>) {
        if argv.is_empty() {
            return;
        }
        self.commands.insert(command.into(), argv);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Run the argv for `command`. Returns stdout; on non-zero exit stderr is included in the error.
    pub async fn run(&self, command: &str) -> Result<String, String> {
        let argv = self
            .commands
            .get(command.trim())
            .ok_or_else(|| format!("command not allowlisted: {}", command.trim()))?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| format!("empty argv for {}", command))?;
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("exec failed: {}", e))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            Ok(stdout)
        } else {
            let mut msg = stderr.trim().to_string();
            if msg.is_empty() {
                msg = stdout.trim().to_string();
            }
            if msg.is_empty() {
                Err(format!("exit {}", output.status))
            } else {
                Err(format!("exit {}: {}", output.status, msg))
            }
        }
    }
}

impl From<&BTreeMap<String, Vec<String>>> for AllowlistHandler {
    fn from(commands: &BTreeMap<String, Vec<String>>) -> Self {
        let mut handler = AllowlistHandler::new();
        for (command, argv) in commands {
            handler.allow(command.clone(), argv.clone());
        }
        handler
    }
}

#[async_trait]
impl CommandHandler for AllowlistHandler {
    async fn handle(&self, session_id: &str, command: &str) -> Result<(), String> {
        log::info!("{}: running command: {}", session_id, command);
        match self.run(command).await {
            Ok(stdout) => {
                if !stdout.trim().is_empty() {
                    log::debug!("{}: {} output: {}", session_id, command, stdout.trim());
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("{}: command {} failed: {}", session_id, command, e);
                Err(e)
            }
        }
    }
}

/// Handler for the configured allowlist; acknowledge-only when no commands are configured.
pub fn handler_from_config(config: &Config) -> Arc<dyn CommandHandler> {
    let allowlist = AllowlistHandler::from(&config.commands);
    if allowlist.is_empty() {
        Arc::new(AcknowledgeOnly)
    } else {
        log::info!("{} allowlisted command(s)", allowlist.commands.len());
        Arc::new(allowlist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acknowledge_only_always_succeeds() {
        assert_eq!(AcknowledgeOnly.handle("sess-1", "run_command").await, Ok(()));
        assert_eq!(AcknowledgeOnly.handle("sess-1", "").await, Ok(()));
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let mut handler = AllowlistHandler::new();
        handler.allow("run_command", vec!["true".to_string()]);
        let err = handler.handle("sess-1", "rm -rf /").await.unwrap_err();
        assert_eq!(err, "command not allowlisted: rm -rf /");
    }

    #[test]
    fn empty_argv_is_not_allowed() {
        let mut handler = AllowlistHandler::new();
        handler.allow("noop", Vec::new());
        assert!(handler.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn allowlisted_command_runs_argv() {
        let mut handler = AllowlistHandler::new();
        handler.allow("greet", vec!["echo".to_string(), "hello".to_string()]);
        assert_eq!(handler.run("greet").await.unwrap().trim(), "hello");
        assert_eq!(handler.handle("sess-1", " greet ").await, Ok(()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_reports_exit() {
        let mut handler = AllowlistHandler::new();
        handler.allow("broken", vec!["false".to_string()]);
        let err = handler.handle("sess-1", "broken").await.unwrap_err();
        assert!(err.starts_with("exit "), "{}", err);
    }

    #[tokio::test]
    async fn config_without_commands_acknowledges_only() {
        let handler = handler_from_config(&Config::default());
        assert_eq!(handler.handle("sess-1", "anything").await, Ok(()));
        assert_eq!(handler.handle("sess-1", "rm -rf /").await, Ok(()));
    }

    #[tokio::test]
    async fn config_with_commands_enforces_allowlist() {
        let mut config = Config::default();
        config
            .commands
            .insert("run_command".to_string(), vec!["true".to_string()]);
        let handler = handler_from_config(&config);
        assert_eq!(
            handler.handle("sess-1", "anything").await,
            Err("command not allowlisted: anything".to_string())
        );
    }
}
