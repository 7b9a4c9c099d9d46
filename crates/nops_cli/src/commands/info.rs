//! Info command - Report program and environment details.

use std::path::PathBuf;

use async_trait::async_trait;
use clap::{Arg, ArgAction};
use serde::Serialize;

use nops_core::{
    Command, CommandContext, CommandDefinition, CommandError, CommandResult, DefinitionConfig,
    LogContext, Options,
};

pub fn definition(logging: &LogContext) -> CommandResult<CommandDefinition> {
    CommandDefinition::new(
        DefinitionConfig::new()
            .command("info")
            .describe("Print program and environment information as JSON")
            .builder(|app| {
                app.arg(
                    Arg::new("compact")
                        .long("compact")
                        .action(ArgAction::SetTrue)
                        .help("Print the report on a single line"),
                )
            })
            .command_class::<InfoCommand>(),
        logging,
    )
}

/// Environment report produced by [`InfoCommand`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoReport {
    pub program: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub cwd: Option<PathBuf>,
    pub options: Options,
}

#[derive(Debug, Default)]
pub struct InfoCommand;

impl InfoCommand {
    fn report(ctx: &CommandContext) -> InfoReport {
        let argv = ctx.argv();
        InfoReport {
            program: argv.bin.clone().unwrap_or_else(|| "nops".to_string()),
            version: argv
                .cli_version
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cwd: argv.cwd.clone(),
            options: ctx.options().clone(),
        }
    }
}

#[async_trait]
impl Command for InfoCommand {
    type Output = InfoReport;

    async fn initialize(&mut self, _ctx: &CommandContext) -> CommandResult<bool> {
        Ok(true)
    }

    async fn execute(&mut self, ctx: &CommandContext) -> CommandResult<InfoReport> {
        let report = Self::report(ctx);

        let rendered = if ctx.options().get_bool("compact") == Some(true) {
            serde_json::to_string(&report)
        } else {
            serde_json::to_string_pretty(&report)
        }
        .map_err(CommandError::from)?;
        println!("{}", rendered);

        ctx.logger()?.verbose(format!("Reported {} {}", report.program, report.version));
        Ok(report)
    }
}
