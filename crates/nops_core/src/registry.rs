//! Registry of command definitions and dispatch from parsed arguments.

use std::collections::BTreeMap;

use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches};
use serde_json::Value;
use tracing::debug;

use crate::argv::Argv;
use crate::definition::CommandDefinition;
use crate::error::{CommandResult, ValidationError};
use crate::lifecycle::Invocation;

/// Prefix of dispatch failures.
pub const DISPATCH_PREFIX: &str = "nops";

/// A positional argument declared by an invocation pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Positional {
    pub name: String,
    pub required: bool,
    pub variadic: bool,
}

/// A parsed invocation pattern such as `exec <program> [args..]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPattern {
    pub name: String,
    pub positionals: Vec<Positional>,
}

impl CommandPattern {
    /// Parse a pattern: the subcommand name, then `<required>` and
    /// `[optional]` positionals, either of which may end in `..`.
    pub fn parse(pattern: &str) -> CommandResult<Self> {
        let invalid = |message: String| ValidationError::new(DISPATCH_PREFIX, message);
        let mut tokens = pattern.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| invalid(format!("Invalid command pattern \"{}\"", pattern)))?
            .to_string();

        let mut positionals = Vec::new();
        for token in tokens {
            let (inner, required) = if let Some(inner) =
                token.strip_prefix('<').and_then(|t| t.strip_suffix('>'))
            {
                (inner, true)
            } else if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                (inner, false)
            } else {
                return Err(invalid(format!(
                    "Invalid positional \"{}\" in command pattern \"{}\"",
                    token, pattern
                ))
                .into());
            };

            let (inner, variadic) = match inner.strip_suffix("..") {
                Some(stripped) => (stripped, true),
                None => (inner, false),
            };
            if inner.is_empty() {
                return Err(invalid(format!("Empty positional in command pattern \"{}\"", pattern)).into());
            }

            positionals.push(Positional {
                name: inner.to_string(),
                required,
                variadic,
            });
        }

        Ok(Self { name, positionals })
    }

    fn to_args(&self) -> Vec<Arg> {
        self.positionals
            .iter()
            .map(|p| {
                let arg = Arg::new(p.name.clone()).required(p.required);
                if p.variadic {
                    arg.num_args(1..)
                        .action(ArgAction::Append)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                } else {
                    arg.action(ArgAction::Set)
                }
            })
            .collect()
    }
}

/// Definitions keyed by subcommand name.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, (CommandPattern, CommandDefinition)>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under the first word of its pattern.
    ///
    /// A definition with the same name is replaced.
    pub fn register(&mut self, definition: CommandDefinition) -> CommandResult<()> {
        let pattern = CommandPattern::parse(&definition.command)?;
        debug!("Registering command: {}", pattern.name);
        self.commands
            .insert(pattern.name.clone(), (pattern, definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.get(name).map(|(_, definition)| definition)
    }

    pub fn get_required(&self, name: &str) -> CommandResult<&CommandDefinition> {
        self.get(name).ok_or_else(|| {
            ValidationError::new(DISPATCH_PREFIX, format!("Unknown command \"{}\"", name)).into()
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.commands.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn subcommand(pattern: &CommandPattern, definition: &CommandDefinition) -> clap::Command {
        let app = clap::Command::new(pattern.name.clone())
            .about(definition.describe.clone())
            .args(pattern.to_args());
        definition.build(app)
    }

    /// Add one subcommand per definition to `app`.
    pub fn augment(&self, app: clap::Command) -> clap::Command {
        self.commands
            .values()
            .fold(app, |app, (pattern, definition)| {
                app.subcommand(Self::subcommand(pattern, definition))
            })
    }

    /// Start the subcommand selected in `matches`.
    ///
    /// Values the user supplied (on the command line or through the
    /// environment) are copied into `base`; clap defaults are left out so
    /// the command's environment can provide them.
    pub fn dispatch(&self, matches: &ArgMatches, base: Argv) -> CommandResult<Invocation<Value>> {
        let Some((name, sub_matches)) = matches.subcommand() else {
            return Err(ValidationError::new(DISPATCH_PREFIX, "A command is required").into());
        };
        let (pattern, definition) = self.commands.get(name).ok_or_else(|| {
            ValidationError::new(DISPATCH_PREFIX, format!("Unknown command \"{}\"", name))
        })?;

        let mut argv = base;
        let app = Self::subcommand(pattern, definition);
        for arg in app.get_arguments() {
            let id = arg.get_id().as_str();
            match sub_matches.value_source(id) {
                None | Some(ValueSource::DefaultValue) => continue,
                Some(_) => {}
            }
            if let Some(value) = arg_value(arg, sub_matches) {
                argv.values.insert(id.to_string(), value);
            }
        }

        debug!("Dispatching command: {}", name);
        Ok(definition.handle(argv))
    }
}

/// Convert one argument's matched value to JSON.
fn arg_value(arg: &Arg, matches: &ArgMatches) -> Option<Value> {
    let id = arg.get_id().as_str();
    let raw = || -> Vec<Value> {
        matches
            .get_raw(id)
            .map(|values| {
                values
                    .map(|v| Value::String(v.to_string_lossy().into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    };

    match arg.get_action() {
        ArgAction::SetTrue | ArgAction::SetFalse => {
            matches.try_get_one::<bool>(id).ok().flatten().copied().map(Value::Bool)
        }
        ArgAction::Count => matches
            .try_get_one::<u8>(id)
            .ok()
            .flatten()
            .map(|count| Value::from(*count)),
        ArgAction::Append => Some(Value::Array(raw())),
        ArgAction::Set => {
            let multiple = arg
                .get_num_args()
                .map_or(false, |range| range.max_values() > 1);
            let mut values = raw();
            if multiple {
                Some(Value::Array(values))
            } else {
                values.pop()
            }
        }
        _ => None,
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}
