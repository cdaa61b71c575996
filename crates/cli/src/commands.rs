//! Built-in job commands.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use batchline_core::Job;
use batchline_engine::{CommandRegistry, JobCommand, JobConsole};

/// Register the commands every batchline process understands.
pub fn register_builtins(registry: &CommandRegistry) {
    registry.register("echo", Arc::new(EchoCommand));
    registry.register("shell", Arc::new(ShellCommand));
}

/// Prints the job's `text` parameter and returns it as the result.
struct EchoCommand;

#[async_trait]
impl JobCommand for EchoCommand {
    async fn prepare(&self, _job: &Job) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn run(
        &self,
        job: &Job,
        console: &JobConsole,
    ) -> Result<serde_json::Value, anyhow::Error> {
        let text = job
            .params
            .get("text")
            .and_then(|v| v.as_str())
            .context("echo job requires a string `text` parameter")?;
        console.line(text);
        Ok(serde_json::json!(text))
    }
}

/// Runs the job's `command_line` parameter under `sh -c`, streaming its
/// output through the job console.
struct ShellCommand;

#[async_trait]
impl JobCommand for ShellCommand {
    async fn prepare(&self, _job: &Job) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn run(
        &self,
        job: &Job,
        console: &JobConsole,
    ) -> Result<serde_json::Value, anyhow::Error> {
        let command_line = job
            .params
            .get("command_line")
            .and_then(|v| v.as_str())
            .context("shell job requires a string `command_line` parameter")?;

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .output()
            .await
            .with_context(|| format!("failed to spawn: {}", command_line))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            console.line(line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            console.line(line);
        }

        if !output.status.success() {
            anyhow::bail!("command exited with {}: {}", output.status, command_line);
        }
        Ok(serde_json::json!({
            "exit_code": output.status.code().unwrap_or(-1),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchline_engine::ConsoleCapture;

    #[tokio::test]
    async fn echo_returns_its_text() {
        let capture = ConsoleCapture::begin().await.unwrap();
        let job = Job::new("echo", "j0").with_param("text", serde_json::json!("hello"));

        let result = EchoCommand.run(&job, &capture.console()).await.unwrap();
        assert_eq!(result, serde_json::json!("hello"));

        let transcript = std::fs::read_to_string(capture.path()).unwrap();
        assert_eq!(transcript, "hello\n");
    }

    #[tokio::test]
    async fn echo_without_text_fails() {
        let capture = ConsoleCapture::begin().await.unwrap();
        let job = Job::new("echo", "j0");
        assert!(EchoCommand.run(&job, &capture.console()).await.is_err());
    }

    #[tokio::test]
    async fn shell_captures_output_and_exit_code() {
        let capture = ConsoleCapture::begin().await.unwrap();
        let job = Job::new("shell", "j0")
            .with_param("command_line", serde_json::json!("printf 'one\\ntwo\\n'"));

        let result = ShellCommand.run(&job, &capture.console()).await.unwrap();
        assert_eq!(result, serde_json::json!({ "exit_code": 0 }));

        let transcript = std::fs::read_to_string(capture.path()).unwrap();
        assert_eq!(transcript, "one\ntwo\n");
    }

    #[tokio::test]
    async fn shell_failure_is_an_error() {
        let capture = ConsoleCapture::begin().await.unwrap();
        let job = Job::new("shell", "j0").with_param("command_line", serde_json::json!("exit 3"));
        assert!(ShellCommand.run(&job, &capture.console()).await.is_err());
    }

    #[test]
    fn builtins_are_registered() {
        let registry = CommandRegistry::new();
        register_builtins(&registry);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("shell").is_some());
    }
}
