//! CLI command definitions.
//!
//! Global flags are declared with clap's derive API; subcommands come from
//! [`CommandDefinition`]s registered in a [`CommandRegistry`].

use std::path::PathBuf;

use clap::Parser;

use nops_core::{Argv, CommandDefinition, CommandRegistry, CommandResult, LogContext};

pub mod exec;
pub mod info;

/// nops - run project tasks with a predictable lifecycle
#[derive(Parser, Debug, Default)]
#[command(name = "nops")]
#[command(version, about = "nops - run project tasks with a predictable lifecycle")]
#[command(long_about = r#"
nops runs project tasks as commands with a fixed lifecycle: configure,
validate, prepare, then execute.

COMMANDS:
  info   → Print program and environment information as JSON
  exec   → Run a program in the current project

CONFIGURATION:
  nops.json, nops.toml or nops.yaml in the project root (or any parent
  directory) supplies defaults. Keys under [command.<name>] apply to that
  command only.

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Validation failure
"#)]
#[command(propagate_version = true, subcommand_required = true)]
pub struct Cli {
    /// Log level (silly, verbose, info, notice, warn, error, silent)
    #[arg(long, global = true, env = "NOPS_LOGLEVEL")]
    pub loglevel: Option<String>,

    /// Show progress output
    #[arg(long, global = true, overrides_with = "no_progress")]
    pub progress: bool,

    /// Hide progress output
    #[arg(long = "no-progress", global = true, overrides_with = "progress")]
    pub no_progress: bool,
}

impl Cli {
    /// Arguments shared by every subcommand.
    ///
    /// Flags the user did not pass stay unset so project configuration can
    /// supply them.
    pub fn base_argv(&self, cwd: PathBuf) -> Argv {
        let mut argv = Argv::new()
            .cli_version(env!("CARGO_PKG_VERSION"))
            .cwd(cwd)
            .bin("nops");

        if let Some(level) = &self.loglevel {
            argv = argv.with("loglevel", level.as_str());
        }
        if self.progress {
            argv = argv.with("progress", true);
        } else if self.no_progress {
            argv = argv.with("progress", false);
        }
        argv
    }
}

/// Definitions of all built-in commands.
pub fn definitions(logging: &LogContext) -> CommandResult<Vec<CommandDefinition>> {
    Ok(vec![info::definition(logging)?, exec::definition(logging)?])
}

/// A registry holding every built-in command.
pub fn registry(logging: &LogContext) -> CommandResult<CommandRegistry> {
    let mut registry = CommandRegistry::new();
    for definition in definitions(logging)? {
        registry.register(definition)?;
    }
    Ok(registry)
}
