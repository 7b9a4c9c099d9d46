//! Exec command - Run a program in the project directory.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Arg, ArgAction};
use serde::Serialize;
use serde_json::Value;

use nops_core::{
    Command, CommandContext, CommandDefinition, CommandResult, DefinitionConfig, LogContext,
    ValidationError,
};

use super::info::{InfoCommand, InfoReport};

pub fn definition(logging: &LogContext) -> CommandResult<CommandDefinition> {
    CommandDefinition::new(
        DefinitionConfig::new()
            .command("exec <program> [args..]")
            .describe("Run a program in the current project")
            .builder(|app| {
                app.arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Print the command line instead of running it"),
                )
                .arg(
                    Arg::new("report")
                        .long("report")
                        .action(ArgAction::SetTrue)
                        .help("Print an info report before running"),
                )
            })
            .command_class::<ExecCommand>(),
        logging,
    )
}

/// Result of a completed [`ExecCommand`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecOutput {
    pub program: String,
    pub args: Vec<String>,
    /// Exit status of the program; `None` when it was terminated by a signal
    pub code: Option<i32>,
    pub report: Option<InfoReport>,
}

#[derive(Debug, Default)]
pub struct ExecCommand {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    dry_run: bool,
    report: bool,
    info: Option<InfoReport>,
}

impl ExecCommand {
    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Command for ExecCommand {
    type Output = ExecOutput;

    async fn configure_properties(&mut self, ctx: &CommandContext) -> CommandResult<()> {
        let options = ctx.options();
        self.program = options.get_str("program").unwrap_or_default().to_string();
        self.args = match options.get("args") {
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        };
        self.cwd = ctx.argv().cwd.clone().unwrap_or_else(|| PathBuf::from("."));
        self.dry_run = options.get_bool("dry-run").unwrap_or(false);
        self.report = options.get_bool("report").unwrap_or(false);
        Ok(())
    }

    async fn run_validations(&mut self, ctx: &CommandContext) -> CommandResult<()> {
        if self.program.trim().is_empty() {
            return Err(ValidationError::new(ctx.name(), "A program to run is required").into());
        }
        if !self.cwd.is_dir() {
            return Err(ValidationError::new(
                ctx.name(),
                format!("Working directory {} does not exist", self.cwd.display()),
            )
            .into());
        }
        Ok(())
    }

    async fn run_preparations(&mut self, ctx: &CommandContext) -> CommandResult<()> {
        if self.report {
            self.info = ctx.compose(InfoCommand).await?;
        }
        Ok(())
    }

    async fn initialize(&mut self, ctx: &CommandContext) -> CommandResult<bool> {
        let logger = ctx.logger()?;
        if self.dry_run {
            println!("{}", self.command_line());
            logger.info(format!("Dry run, not executing: {}", self.command_line()));
            ctx.set_exit_code(0);
            return Ok(false);
        }

        logger.verbose(format!("Running {} in {}", self.command_line(), self.cwd.display()));
        Ok(true)
    }

    async fn execute(&mut self, ctx: &CommandContext) -> CommandResult<ExecOutput> {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.cwd)
            .status()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;

        let logger = ctx.logger()?;
        match status.code() {
            Some(0) => logger.success(format!("{} finished", self.program)),
            Some(code) => {
                logger.warn(format!("{} exited with status {}", self.program, code));
                ctx.set_exit_code(code);
            }
            None => {
                logger.warn(format!("{} was terminated by a signal", self.program));
                ctx.set_exit_code(1);
            }
        }

        Ok(ExecOutput {
            program: self.program.clone(),
            args: self.args.clone(),
            code: status.code(),
            report: self.info.take(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nops_core::{Argv, Invocation, MemorySink};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn memory_logging() -> (LogContext, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (LogContext::new(sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_missing_program_is_validation_failure() {
        let (logging, _sink) = memory_logging();
        let err = Invocation::start(ExecCommand::default(), Argv::new(), logging)
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(err.as_validation().unwrap().prefix, "exec");
    }

    #[tokio::test]
    async fn test_dry_run_short_circuits() {
        let temp = tempdir().unwrap();
        let (logging, _sink) = memory_logging();
        let argv = Argv::new()
            .cwd(temp.path())
            .with("program", "definitely-not-installed")
            .with("args", json!(["--flag"]))
            .with("dry-run", true);

        let invocation = Invocation::start(ExecCommand::default(), argv, logging);
        assert_eq!(invocation.wait().await.unwrap(), None);
        assert_eq!(invocation.exit_code(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_status_sets_exit_code() {
        let temp = tempdir().unwrap();
        let (logging, _sink) = memory_logging();
        let argv = Argv::new()
            .cwd(temp.path())
            .with("program", "sh")
            .with("args", json!(["-c", "exit 3"]));

        let invocation = Invocation::start(ExecCommand::default(), argv, logging);
        let output = invocation.wait().await.unwrap().unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.args, vec!["-c", "exit 3"]);
        assert!(output.report.is_none());
        assert_eq!(invocation.exit_code(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_report_composes_info() {
        let temp = tempdir().unwrap();
        let (logging, _sink) = memory_logging();
        let argv = Argv::new()
            .cwd(temp.path())
            .cli_version("1.0.0")
            .with("program", "true")
            .with("report", true);

        let output = Invocation::start(ExecCommand::default(), argv, logging)
            .await
            .unwrap()
            .unwrap();

        let report = output.report.unwrap();
        assert_eq!(report.version, "1.0.0");
        assert_eq!(report.options.get_str("composed"), Some("exec"));
        assert_eq!(output.code, Some(0));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_unexpected_and_logged() {
        let temp = tempdir().unwrap();
        let (logging, sink) = memory_logging();
        let argv = Argv::new()
            .cwd(temp.path())
            .with("program", "nops-definitely-not-a-real-program");

        let err = Invocation::start(ExecCommand::default(), argv, logging)
            .await
            .unwrap_err();

        assert!(!err.is_validation());
        let errors = sink.lines_at("error");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Failed to run nops-definitely-not-a-real-program"));
    }
}
