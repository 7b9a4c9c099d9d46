//! # nops_core
//!
//! Command lifecycle engine for the nops CLI.
//!
//! Every subcommand is a [`Command`]: a value that, once started, runs a fixed
//! pipeline of configuration, validation and execution stages exactly once and
//! settles a single, memoized outcome.
//!
//! # Architecture
//!
//! - **Commands**: implement `initialize` and `execute`, override other stages as needed
//! - **Invocations**: started commands, awaitable for their outcome
//! - **Definitions**: validated registration records with a factory handler
//! - **Registry**: maps subcommand names to definitions and dispatches parsed arguments
//! - **Logging**: an injected, bufferable logging context shared by composed commands
//!
//! # Example
//!
//! ```rust,ignore
//! use nops_core::{CommandDefinition, CommandRegistry, DefinitionConfig, LogContext, Argv};
//!
//! let logging = LogContext::tracing();
//! let mut registry = CommandRegistry::new();
//! registry.register(CommandDefinition::new(
//!     DefinitionConfig::new()
//!         .command("info")
//!         .describe("Print environment information")
//!         .builder(|app| app)
//!         .command_class::<InfoCommand>(),
//!     &logging,
//! )?)?;
//!
//! let app = registry.augment(clap::Command::new("nops"));
//! let matches = app.get_matches();
//! let output = registry.dispatch(&matches, Argv::new())?.await?;
//! ```

pub mod argv;
pub mod command;
pub mod definition;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod project;
pub mod registry;
pub mod trace;

// Re-export main types for convenience
pub use argv::{deep_merge, Argv, Options};
pub use command::{derive_name, Command, CommandContext, ExitSignal};
pub use definition::{
    ArgsBuilder, CommandClass, CommandDefinition, DefinitionConfig, Field, Handler,
    DEFINITION_PREFIX,
};
pub use error::{CommandError, CommandResult, ValidationError};
pub use lifecycle::{Invocation, Outcome};
pub use logging::{
    Color, LevelStyle, LogContext, LogSink, Logger, MemorySink, Record, TracingSink,
};
pub use project::ProjectConfig;
pub use registry::{CommandPattern, CommandRegistry, DISPATCH_PREFIX};
pub use trace::{clean_failure, clean_trace};
