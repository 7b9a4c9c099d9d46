//! The command contract and the context its lifecycle stages run against.
//!
//! A concrete subcommand implements [`Command`] and overrides at least
//! [`Command::initialize`] and [`Command::execute`]. Every other stage has a
//! working default, so a minimal command reads:
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use nops_core::{Command, CommandContext, CommandResult, Invocation, LogContext, Argv};
//!
//! #[derive(Default)]
//! struct GreetCommand;
//!
//! #[async_trait]
//! impl Command for GreetCommand {
//!     type Output = String;
//!
//!     async fn initialize(&mut self, _ctx: &CommandContext) -> CommandResult<bool> {
//!         Ok(true)
//!     }
//!
//!     async fn execute(&mut self, ctx: &CommandContext) -> CommandResult<String> {
//!         ctx.logger()?.success("hello");
//!         Ok("hello".to_string())
//!     }
//! }
//!
//! let greeting = Invocation::start(GreetCommand, Argv::new(), LogContext::tracing()).await?;
//! ```

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use uuid::Uuid;

use crate::argv::{Argv, Options};
use crate::error::{CommandError, CommandResult, ValidationError};
use crate::lifecycle::Invocation;
use crate::logging::{LogContext, Logger};
use crate::project::ProjectConfig;

/// Last segment of a type path, without generic arguments.
///
/// `app::commands::FooCommand<T>` becomes `FooCommand`.
pub fn short_type_name(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

/// Command name for a type path: the short type name with a trailing
/// `Command` (any case) removed, lower-cased.
pub fn derive_name(type_name: &str) -> String {
    static SUFFIX: OnceLock<Option<Regex>> = OnceLock::new();

    let short = short_type_name(type_name);
    let stripped = match SUFFIX.get_or_init(|| Regex::new(r"(?i)command$").ok()) {
        Some(re) => re.replace(short, "").into_owned(),
        None => short.to_string(),
    };
    stripped.to_lowercase()
}

/// Process exit code shared between a command and its composed children.
#[derive(Debug, Clone, Default)]
pub struct ExitSignal(Arc<AtomicI32>);

impl ExitSignal {
    /// Current exit code.
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Request an exit code for the process.
    pub fn set(&self, code: i32) {
        self.0.store(code, Ordering::SeqCst);
    }
}

/// A runnable subcommand.
///
/// Stages run in declaration order, each exactly once, and any error aborts
/// the rest. See [`Invocation`] for how a command is started and observed.
#[async_trait]
pub trait Command: Send + 'static {
    /// Value produced by a successful `execute`.
    type Output: Clone + Send + Sync + 'static;

    /// Name used for log scoping and composition checks.
    fn name() -> String
    where
        Self: Sized,
    {
        derive_name(std::any::type_name::<Self>())
    }

    /// Produce the environment defaults.
    ///
    /// Defaults to the baseline overlaid with project configuration.
    async fn configure_environment(&mut self, ctx: &CommandContext) -> CommandResult<Options> {
        ctx.default_environment()
    }

    /// Produce the effective options: raw arguments over environment defaults.
    async fn configure_options(&mut self, ctx: &CommandContext) -> CommandResult<Options> {
        Ok(ctx.environment().overlay(ctx.argv().public_view()))
    }

    async fn configure_properties(&mut self, _ctx: &CommandContext) -> CommandResult<()> {
        Ok(())
    }

    /// Apply the effective verbosity and create the scoped logger.
    async fn configure_logging(&mut self, ctx: &CommandContext) -> CommandResult<Logger> {
        ctx.logging().configure(ctx.name(), ctx.options().loglevel())
    }

    /// Precondition checks. Failures must be [`ValidationError`]s.
    async fn run_validations(&mut self, _ctx: &CommandContext) -> CommandResult<()> {
        Ok(())
    }

    async fn run_preparations(&mut self, _ctx: &CommandContext) -> CommandResult<()> {
        Ok(())
    }

    /// Run `initialize`, then `execute` only if it returned `true`.
    async fn run_command(&mut self, ctx: &CommandContext) -> CommandResult<Option<Self::Output>> {
        if self.initialize(ctx).await? {
            self.execute(ctx).await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Decide whether to proceed. Returning `false` ends the run successfully
    /// without output; set an exit code first to report failure.
    async fn initialize(&mut self, ctx: &CommandContext) -> CommandResult<bool> {
        Err(ValidationError::new(ctx.name(), "initialize() needs to be implemented.").into())
    }

    async fn execute(&mut self, ctx: &CommandContext) -> CommandResult<Self::Output> {
        Err(ValidationError::new(ctx.name(), "execute() needs to be implemented.").into())
    }
}

/// State of one command invocation, filled in stage by stage.
#[derive(Debug)]
pub struct CommandContext {
    id: Uuid,
    name: String,
    type_name: &'static str,
    composed: bool,
    argv: Arc<Argv>,
    pub(crate) environment: Options,
    pub(crate) options: Options,
    pub(crate) logger: Option<Logger>,
    logging: LogContext,
    exit: ExitSignal,
}

impl CommandContext {
    pub(crate) fn new(
        id: Uuid,
        name: String,
        type_name: &'static str,
        composed: bool,
        argv: Arc<Argv>,
        logging: LogContext,
        exit: ExitSignal,
    ) -> Self {
        Self {
            id,
            name,
            type_name,
            composed,
            argv,
            environment: Options::new(),
            options: Options::new(),
            logger: None,
            logging,
            exit,
        }
    }

    /// Unique id of this invocation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Command name, derived from the type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full type path of the running command.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether another command started this one.
    pub fn composed(&self) -> bool {
        self.composed
    }

    /// The frozen constructor input.
    pub fn argv(&self) -> &Argv {
        &self.argv
    }

    /// Environment defaults; empty until `configure_environment` completed.
    pub fn environment(&self) -> &Options {
        &self.environment
    }

    /// Effective options; empty until `configure_options` completed.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Log context shared with parent and children.
    pub fn logging(&self) -> &LogContext {
        &self.logging
    }

    /// The scoped logger, available from `run_validations` on.
    pub fn logger(&self) -> CommandResult<&Logger> {
        self.logger.as_ref().ok_or_else(|| {
            CommandError::unexpected(anyhow::anyhow!(
                "logger requested before logging was configured for {}",
                self.name
            ))
        })
    }

    /// Exit code requested so far.
    pub fn exit_code(&self) -> i32 {
        self.exit.get()
    }

    /// Request an exit code for the process.
    pub fn set_exit_code(&self, code: i32) {
        self.exit.set(code);
    }

    /// Exit code cell shared with composed commands.
    pub fn exit_signal(&self) -> &ExitSignal {
        &self.exit
    }

    /// Baseline defaults, overlaid with the project configuration found
    /// from `argv.cwd`, if any.
    pub fn default_environment(&self) -> CommandResult<Options> {
        let baseline = Options::baseline();
        let Some(cwd) = self.argv.cwd.as_deref() else {
            return Ok(baseline);
        };

        match ProjectConfig::discover(cwd)? {
            Some(config) => {
                self.logging
                    .verbose("config", format!("Using {}", config.path.display()));
                Ok(baseline.overlay(config.defaults_for(&self.name)))
            }
            None => Ok(baseline),
        }
    }

    /// Start `child` as a composed invocation with a copy of this command's
    /// arguments.
    pub fn compose<C: Command>(&self, child: C) -> Invocation<C::Output> {
        self.compose_with(child, (*self.argv).clone())
    }

    /// Start `child` as a composed invocation with its own arguments.
    ///
    /// `cliVersion` and `cwd` are inherited when `argv` leaves them unset.
    pub fn compose_with<C: Command>(&self, child: C, mut argv: Argv) -> Invocation<C::Output> {
        if argv.cli_version.is_none() {
            argv.cli_version = self.argv.cli_version.clone();
        }
        if argv.cwd.is_none() {
            argv.cwd = self.argv.cwd.clone();
        }
        argv.composed = Some(self.name.clone());

        Invocation::launch(
            child,
            argv,
            self.logging.clone(),
            self.exit.clone(),
            Ok,
        )
    }
}
