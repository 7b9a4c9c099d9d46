//! nops CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success (or the code a command requested)
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Validation failure

use std::process::ExitCode;

use clap::{CommandFactory, FromArgMatches};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nops_core::{CommandError, LogContext};

mod commands;

use commands::Cli;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
}

#[tokio::main]
async fn main() -> ExitCode {
    // Command records reach the subscriber already filtered by their own level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,nops=trace"));
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let logging = LogContext::tracing();

    let registry = match commands::registry(&logging) {
        Ok(registry) => registry,
        Err(err) => return fail(&logging, &err),
    };

    let app = registry.augment(Cli::command());
    let matches = match app.try_get_matches() {
        Ok(matches) => matches,
        Err(err) => return usage(err),
    };
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(err) => return usage(err),
    };

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(err) => return fail(&logging, &CommandError::from(err)),
    };
    debug!("Working directory: {}", cwd.display());

    let invocation = match registry.dispatch(&matches, cli.base_argv(cwd)) {
        Ok(invocation) => invocation,
        Err(err) => return fail(&logging, &err),
    };

    match invocation.wait().await {
        Ok(_) => exit_code(invocation.exit_code()),
        Err(err) => fail(&logging, &err),
    }
}

/// Print a clap error (or help/version text) and pick the exit code.
fn usage(err: clap::Error) -> ExitCode {
    let _ = err.print();
    if err.use_stderr() {
        ExitCode::from(ExitCodes::INVALID_ARGS)
    } else {
        ExitCode::from(ExitCodes::SUCCESS)
    }
}

/// Report a failed command and pick the exit code.
///
/// Unexpected failures were logged by the lifecycle; validation failures
/// are reported here, without a trace.
fn fail(logging: &LogContext, err: &CommandError) -> ExitCode {
    logging.resume();
    match err.as_validation() {
        Some(validation) => {
            logging.error(&validation.prefix, &validation.message);
            ExitCode::from(ExitCodes::VALIDATION_FAILURE)
        }
        None => ExitCode::from(ExitCodes::GENERAL_ERROR),
    }
}

/// Exit code requested by a successful command.
fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::from(ExitCodes::GENERAL_ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nops_core::MemorySink;
    use std::sync::Arc;

    #[test]
    fn test_validation_failure_is_reported_tersely() {
        let sink = Arc::new(MemorySink::new());
        let logging = LogContext::new(sink.clone());
        logging.begin();

        let err = CommandError::validation("exec", "A program to run is required");
        fail(&logging, &err);

        assert!(!logging.is_paused());
        assert_eq!(
            sink.lines_at("error"),
            vec!["exec A program to run is required"]
        );
    }

    #[test]
    fn test_unexpected_failure_only_flushes() {
        let sink = Arc::new(MemorySink::new());
        let logging = LogContext::new(sink.clone());
        logging.begin();
        logging.error("", "already logged");

        fail(&logging, &CommandError::unexpected(anyhow::anyhow!("boom")));
        assert_eq!(sink.lines_at("error"), vec!["already logged"]);
    }
}
