//! External program invocation with JSON output
//!
//! Every call to a provider or executor script goes through [`run_json`], so
//! spawn failures, non-zero exits and unparseable output are reported the
//! same way everywhere.

use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::{debug, warn};

const RAW_OUTPUT_LIMIT: usize = 500;

/// Program and arguments to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Result of running a program and decoding its stdout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome<T> {
    Success(T),
    /// Spawn failure or non-zero exit
    ProcessError(String),
    /// The program succeeded but its output could not be decoded.
    /// `raw` is truncated.
    ParseError { raw: String, message: String },
}

impl<T> CommandOutcome<T> {
    /// Collapse into a `Result`, rendering failures as text
    pub fn into_result(self) -> std::result::Result<T, String> {
        match self {
            CommandOutcome::Success(value) => Ok(value),
            CommandOutcome::ProcessError(message) => Err(message),
            CommandOutcome::ParseError { raw, message } => {
                Err(format!("{} (output: {})", message, raw))
            }
        }
    }
}

/// Run a program and decode its stdout with `parse`
pub async fn run_and_parse<T, F>(spec: &CommandSpec, parse: F) -> CommandOutcome<T>
where
    F: FnOnce(&str) -> std::result::Result<T, String>,
{
    debug!(program = %spec.program, args = ?spec.args, "Running external command");

    let output = match Command::new(&spec.program).args(&spec.args).output().await {
        Ok(output) => output,
        Err(e) => {
            warn!("Failed to start '{}': {}", spec.program, e);
            return CommandOutcome::ProcessError(format!(
                "failed to start '{}': {}",
                spec.program, e
            ));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        warn!("'{}' exited with {}: {}", spec.program, code, detail);
        return CommandOutcome::ProcessError(format!(
            "'{}' exited with {}: {}",
            spec.program, code, detail
        ));
    }

    match parse(&stdout) {
        Ok(value) => CommandOutcome::Success(value),
        Err(message) => CommandOutcome::ParseError {
            raw: truncate(&stdout, RAW_OUTPUT_LIMIT),
            message,
        },
    }
}

/// Run a program whose stdout is a JSON document of type `T`
pub async fn run_json<T: DeserializeOwned>(spec: &CommandSpec) -> CommandOutcome<T> {
    run_and_parse(spec, |body| {
        serde_json::from_str(body.trim()).map_err(|e| format!("invalid JSON output: {}", e))
    })
    .await
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_json_output_is_decoded() {
        let outcome: CommandOutcome<Value> = run_json(&sh(r#"echo '{"results":[]}'"#)).await;
        match outcome {
            CommandOutcome::Success(value) => assert!(value["results"].is_array()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_process_error() {
        let outcome: CommandOutcome<Value> = run_json(&sh("echo denied >&2; exit 3")).await;
        match outcome {
            CommandOutcome::ProcessError(message) => {
                assert!(message.contains("denied"));
                assert!(message.contains('3'));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_process_error() {
        let outcome: CommandOutcome<Value> =
            run_json(&CommandSpec::new("/nonexistent/drsync-helper")).await;
        assert!(matches!(outcome, CommandOutcome::ProcessError(_)));
    }

    #[tokio::test]
    async fn test_garbage_output_is_truncated_parse_error() {
        let outcome: CommandOutcome<Value> =
            run_json(&sh("head -c 2000 /dev/zero | tr '\\0' x")).await;
        match outcome {
            CommandOutcome::ParseError { raw, .. } => assert_eq!(raw.len(), RAW_OUTPUT_LIMIT),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
