//! Declarative subcommand definitions.
//!
//! A [`DefinitionConfig`] describes a subcommand loosely, the way it might be
//! assembled from plugin metadata. [`CommandDefinition::new`] checks its shape
//! and produces the record handed to the dispatch table.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::argv::Argv;
use crate::command::Command;
use crate::error::{CommandError, CommandResult, ValidationError};
use crate::lifecycle::Invocation;
use crate::logging::LogContext;

/// Prefix of definition validation failures.
pub const DEFINITION_PREFIX: &str = "CommandDefinition";

/// Callback declaring a subcommand's arguments.
pub type ArgsBuilder = Arc<dyn Fn(clap::Command) -> clap::Command + Send + Sync>;

/// Factory producing a started invocation from parsed arguments.
pub type Handler = Arc<dyn Fn(Argv) -> Invocation<Value> + Send + Sync>;

type Constructor = Arc<dyn Fn(Argv, LogContext) -> Invocation<Value> + Send + Sync>;

/// A type-erased command implementation.
#[derive(Clone)]
pub struct CommandClass {
    type_name: &'static str,
    name: String,
    construct: Constructor,
}

impl CommandClass {
    /// Erase `C`, serializing its output to JSON.
    pub fn of<C>() -> Self
    where
        C: Command + Default,
        C::Output: Serialize,
    {
        Self {
            type_name: std::any::type_name::<C>(),
            name: C::name(),
            construct: Arc::new(|argv: Argv, logging: LogContext| {
                Invocation::start_with(C::default(), argv, logging, |output: C::Output| {
                    serde_json::to_value(output).map_err(CommandError::from)
                })
            }),
        }
    }

    /// Full type path of the command.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Derived command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Construct and start a fresh instance.
    pub fn instantiate(&self, argv: Argv, logging: LogContext) -> Invocation<Value> {
        (self.construct)(argv, logging)
    }
}

impl fmt::Debug for CommandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[class {}]", self.type_name)
    }
}

/// A loosely typed configuration value.
#[derive(Clone)]
pub enum Field {
    Value(Value),
    Function(ArgsBuilder),
    Class(CommandClass),
}

impl Field {
    pub fn function(f: impl Fn(clap::Command) -> clap::Command + Send + Sync + 'static) -> Self {
        Self::Function(Arc::new(f))
    }

    pub fn class<C>() -> Self
    where
        C: Command + Default,
        C::Output: Serialize,
    {
        Self::Class(CommandClass::of::<C>())
    }

    fn render(&self) -> String {
        match self {
            Self::Value(value) => value.to_string(),
            Self::Function(_) => "[Function]".to_string(),
            Self::Class(class) => format!("{:?}", class),
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<i64> for Field {
    fn from(value: i64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<bool> for Field {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

impl From<CommandClass> for Field {
    fn from(class: CommandClass) -> Self {
        Self::Class(class)
    }
}

/// Unvalidated input to [`CommandDefinition::new`].
#[derive(Clone, Default, Debug)]
pub struct DefinitionConfig {
    pub command: Option<Field>,
    pub describe: Option<Field>,
    pub builder: Option<Field>,
    pub command_class: Option<Field>,
}

impl DefinitionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, command: impl Into<Field>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn describe(mut self, describe: impl Into<Field>) -> Self {
        self.describe = Some(describe.into());
        self
    }

    pub fn builder(
        mut self,
        builder: impl Fn(clap::Command) -> clap::Command + Send + Sync + 'static,
    ) -> Self {
        self.builder = Some(Field::function(builder));
        self
    }

    pub fn command_class<C>(mut self) -> Self
    where
        C: Command + Default,
        C::Output: Serialize,
    {
        self.command_class = Some(Field::class::<C>());
        self
    }

    fn entries(&self) -> [(&'static str, Option<&Field>); 4] {
        [
            ("command", self.command.as_ref()),
            ("describe", self.describe.as_ref()),
            ("builder", self.builder.as_ref()),
            ("commandClass", self.command_class.as_ref()),
        ]
    }
}

/// Where a configuration field failed its check.
struct Violation {
    key: &'static str,
    message: String,
}

impl Violation {
    fn new(key: &'static str, rule: &str) -> Self {
        Self {
            key,
            message: format!("\"{}\" {}", key, rule),
        }
    }
}

fn required<'a>(key: &'static str, field: Option<&'a Field>) -> Result<&'a Field, Violation> {
    field.ok_or_else(|| Violation::new(key, "is required"))
}

fn string_field(key: &'static str, field: Option<&Field>) -> Result<String, Violation> {
    match required(key, field)? {
        Field::Value(Value::String(s)) if s.is_empty() => {
            Err(Violation::new(key, "is not allowed to be empty"))
        }
        Field::Value(Value::String(s)) => Ok(s.clone()),
        _ => Err(Violation::new(key, "must be a string")),
    }
}

fn function_field(key: &'static str, field: Option<&Field>) -> Result<ArgsBuilder, Violation> {
    match required(key, field)? {
        Field::Function(f) => Ok(f.clone()),
        _ => Err(Violation::new(key, "must be of type function")),
    }
}

fn class_field(key: &'static str, field: Option<&Field>) -> Result<CommandClass, Violation> {
    match required(key, field)? {
        Field::Class(class) => Ok(class.clone()),
        Field::Function(_) => Err(Violation::new(key, "must be a class")),
        Field::Value(_) => Err(Violation::new(key, "must be of type function")),
    }
}

/// Render `config` with the offending key marked, for the diagnostic log.
fn annotate(config: &DefinitionConfig, violation: &Violation) -> String {
    let mut lines = Vec::new();
    let mut missing = None;

    for (key, field) in config.entries() {
        let marker = if key == violation.key { " [1]" } else { "" };
        match field {
            Some(field) => lines.push(format!("  \"{}\"{}: {}", key, marker, field.render())),
            None if key == violation.key => {
                missing = Some(format!("  \"{}\"{}: -- missing --", key, marker));
            }
            None => {}
        }
    }
    lines.extend(missing);

    format!("{{\n{}\n}}\n\n[1] {}", lines.join(",\n"), violation.message)
}

/// A validated subcommand, ready for registration.
#[derive(Clone)]
pub struct CommandDefinition {
    pub command: String,
    pub describe: String,
    pub builder: ArgsBuilder,
    handler: Handler,
    class: CommandClass,
}

impl CommandDefinition {
    /// Check `config` and build the definition.
    ///
    /// Fields are checked in order; the first violation is logged with an
    /// annotated copy of the config and returned as a validation failure.
    pub fn new(config: DefinitionConfig, logging: &LogContext) -> CommandResult<Self> {
        let checked = (|| {
            Ok::<_, Violation>((
                string_field("command", config.command.as_ref())?,
                string_field("describe", config.describe.as_ref())?,
                function_field("builder", config.builder.as_ref())?,
                class_field("commandClass", config.command_class.as_ref())?,
            ))
        })();

        let (command, describe, builder, class) = match checked {
            Ok(fields) => fields,
            Err(violation) => {
                logging.error("", annotate(&config, &violation));
                return Err(ValidationError::new(DEFINITION_PREFIX, violation.message).into());
            }
        };

        debug!("Defined command {:?} as {}", command, class.type_name());

        let handler_class = class.clone();
        let handler_logging = logging.clone();
        let handler: Handler =
            Arc::new(move |argv: Argv| handler_class.instantiate(argv, handler_logging.clone()));

        Ok(Self {
            command,
            describe,
            builder,
            handler,
            class,
        })
    }

    /// Start a new instance of the command class with `argv`.
    pub fn handle(&self, argv: Argv) -> Invocation<Value> {
        (self.handler)(argv)
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// The command implementation this definition dispatches to.
    pub fn command_class(&self) -> &CommandClass {
        &self.class
    }

    /// Subcommand name: the first word of the invocation pattern.
    pub fn name(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or("")
    }

    /// Apply the argument builder to `app`.
    pub fn build(&self, app: clap::Command) -> clap::Command {
        (self.builder)(app)
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("command", &self.command)
            .field("describe", &self.describe)
            .field("command_class", &self.class)
            .finish()
    }
}
