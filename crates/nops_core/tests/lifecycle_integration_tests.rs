//! Integration tests for the command lifecycle and definitions.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;

use nops_core::{
    Argv, Command, CommandContext, CommandDefinition, CommandError, CommandResult,
    DefinitionConfig, Invocation, LogContext, MemorySink, Options, ValidationError,
};

fn memory_logging() -> (LogContext, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (LogContext::new(sink.clone()), sink)
}

/// Overrides nothing.
#[derive(Default)]
struct BareCommand;

#[async_trait]
impl Command for BareCommand {
    type Output = ();
}

/// Overrides `initialize` only.
#[derive(Default)]
struct HalfCommand;

#[async_trait]
impl Command for HalfCommand {
    type Output = ();

    async fn initialize(&mut self, _ctx: &CommandContext) -> CommandResult<bool> {
        Ok(true)
    }
}

/// Records whether `execute` ran; proceeds when `proceed` is set.
#[derive(Default)]
struct GateCommand {
    proceed: bool,
    executed: Arc<AtomicBool>,
}

#[async_trait]
impl Command for GateCommand {
    type Output = String;

    async fn initialize(&mut self, ctx: &CommandContext) -> CommandResult<bool> {
        if !self.proceed {
            ctx.set_exit_code(2);
        }
        Ok(self.proceed)
    }

    async fn execute(&mut self, _ctx: &CommandContext) -> CommandResult<String> {
        self.executed.store(true, Ordering::SeqCst);
        Ok("done".to_string())
    }
}

/// Returns its effective options.
#[derive(Default)]
struct InspectCommand;

#[async_trait]
impl Command for InspectCommand {
    type Output = Options;

    async fn initialize(&mut self, _ctx: &CommandContext) -> CommandResult<bool> {
        Ok(true)
    }

    async fn execute(&mut self, ctx: &CommandContext) -> CommandResult<Options> {
        ctx.logger()?.success("inspected");
        Ok(ctx.options().clone())
    }
}

/// Fails in `execute` with the configured kind of error.
struct FailCommand {
    validation: bool,
}

#[async_trait]
impl Command for FailCommand {
    type Output = ();

    async fn initialize(&mut self, _ctx: &CommandContext) -> CommandResult<bool> {
        Ok(true)
    }

    async fn execute(&mut self, ctx: &CommandContext) -> CommandResult<()> {
        if self.validation {
            Err(ValidationError::new(ctx.name(), "nothing to do").into())
        } else {
            Err(anyhow::anyhow!("boom").into())
        }
    }
}

/// Fails its validations.
#[derive(Default)]
struct StrictCommand {
    executed: Arc<AtomicBool>,
}

#[async_trait]
impl Command for StrictCommand {
    type Output = ();

    async fn run_validations(&mut self, ctx: &CommandContext) -> CommandResult<()> {
        if ctx.options().get_str("target").is_none() {
            return Err(ValidationError::new(ctx.name(), "--target is required").into());
        }
        Ok(())
    }

    async fn initialize(&mut self, _ctx: &CommandContext) -> CommandResult<bool> {
        Ok(true)
    }

    async fn execute(&mut self, _ctx: &CommandContext) -> CommandResult<()> {
        self.executed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Reports how it was invoked.
#[derive(Default)]
struct ChildCommand;

#[async_trait]
impl Command for ChildCommand {
    type Output = Value;

    async fn configure_properties(&mut self, ctx: &CommandContext) -> CommandResult<()> {
        if ctx.options().get_bool("panic_child") == Some(true) {
            panic!("child lost its footing");
        }
        Ok(())
    }

    async fn initialize(&mut self, _ctx: &CommandContext) -> CommandResult<bool> {
        Ok(true)
    }

    async fn execute(&mut self, ctx: &CommandContext) -> CommandResult<Value> {
        if ctx.options().get_bool("fail_child") == Some(true) {
            return Err(ValidationError::new(ctx.name(), "child refused").into());
        }
        ctx.set_exit_code(4);
        Ok(json!({
            "composed": ctx.composed(),
            "marker": ctx.argv().composed,
            "cliVersion": ctx.argv().cli_version,
        }))
    }
}

/// Runs a [`ChildCommand`] and returns its output.
#[derive(Default)]
struct ParentCommand;

#[async_trait]
impl Command for ParentCommand {
    type Output = Value;

    async fn initialize(&mut self, _ctx: &CommandContext) -> CommandResult<bool> {
        Ok(true)
    }

    async fn execute(&mut self, ctx: &CommandContext) -> CommandResult<Value> {
        let child = ctx.compose(ChildCommand).await?;
        Ok(child.unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn test_missing_initialize_is_validation_failure() {
    let (logging, sink) = memory_logging();
    let err = Invocation::start(BareCommand, Argv::new(), logging)
        .await
        .unwrap_err();

    let validation = err.as_validation().expect("validation failure");
    assert_eq!(validation.prefix, "bare");
    assert_eq!(validation.message, "initialize() needs to be implemented.");
    assert!(sink.lines_at("error").is_empty());
}

#[tokio::test]
async fn test_missing_execute_is_validation_failure() {
    let (logging, _sink) = memory_logging();
    let err = Invocation::start(HalfCommand, Argv::new(), logging)
        .await
        .unwrap_err();

    let validation = err.as_validation().expect("validation failure");
    assert_eq!(validation.prefix, "half");
    assert_eq!(validation.message, "execute() needs to be implemented.");
}

#[tokio::test]
async fn test_truthy_initialize_returns_execute_result() {
    let (logging, _sink) = memory_logging();
    let command = GateCommand {
        proceed: true,
        ..GateCommand::default()
    };
    let executed = command.executed.clone();

    let invocation = Invocation::start(command, Argv::new(), logging);
    assert_eq!(invocation.wait().await.unwrap(), Some("done".to_string()));
    assert!(executed.load(Ordering::SeqCst));
    assert_eq!(invocation.exit_code(), 0);
}

#[tokio::test]
async fn test_falsy_initialize_skips_execute() {
    let (logging, _sink) = memory_logging();
    let command = GateCommand::default();
    let executed = command.executed.clone();

    let invocation = Invocation::start(command, Argv::new(), logging);
    assert_eq!(invocation.wait().await.unwrap(), None);
    assert!(!executed.load(Ordering::SeqCst));
    assert_eq!(invocation.exit_code(), 2);
}

#[tokio::test]
async fn test_composed_detection() {
    let (logging, _sink) = memory_logging();

    let plain = Invocation::start(InspectCommand, Argv::new(), logging.clone());
    assert!(!plain.composed());

    let nested = Invocation::start(InspectCommand, Argv::new().composed("publish"), logging.clone());
    assert!(nested.composed());

    let own_name = Invocation::start(InspectCommand, Argv::new().composed("inspect"), logging);
    assert!(!own_name.composed());

    for invocation in [plain, nested, own_name] {
        invocation.await.unwrap();
    }
}

#[tokio::test]
async fn test_options_are_raw_input_over_environment() {
    let (logging, _sink) = memory_logging();
    let argv = Argv::new()
        .with("loglevel", "silent")
        .cwd("/definitely/not/a/project")
        .bin("nops");

    let options = Invocation::start(InspectCommand, argv, logging)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        serde_json::to_value(&options).unwrap(),
        json!({ "loglevel": "silent", "progress": false })
    );
}

#[tokio::test]
async fn test_project_config_supplies_environment() {
    let temp = tempdir().unwrap();
    fs::write(
        temp.path().join("nops.json"),
        r#"{ "progress": true, "command": { "inspect": { "depth": 3, "loglevel": "warn" } } }"#,
    )
    .unwrap();

    let (logging, _sink) = memory_logging();
    let argv = Argv::new().cwd(temp.path()).with("depth", 5);
    let options = Invocation::start(InspectCommand, argv, logging.clone())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        serde_json::to_value(&options).unwrap(),
        json!({ "loglevel": "warn", "progress": true, "depth": 5 })
    );
    assert_eq!(logging.level(), "warn");
}

#[tokio::test]
async fn test_malformed_project_config_rejects() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("nops.yaml"), "- just\n- a list\n").unwrap();

    let (logging, _sink) = memory_logging();
    let err = Invocation::start(InspectCommand, Argv::new().cwd(temp.path()), logging)
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_unreadable_project_config_is_logged_and_flushed() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("nops.json"), [0xff, 0xfe, 0x7b]).unwrap();

    let (logging, sink) = memory_logging();
    let err = Invocation::start(InspectCommand, Argv::new().cwd(temp.path()), logging.clone())
        .await
        .unwrap_err();

    assert!(!err.is_validation());
    assert!(!logging.is_paused());
    let errors = sink.lines_at("error");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Failed to read"));
    assert!(errors[0].contains("nops.json"));
}

#[tokio::test]
async fn test_validation_failure_from_execute_is_not_logged() {
    let (logging, sink) = memory_logging();
    let err = Invocation::start(FailCommand { validation: true }, Argv::new(), logging)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(err.to_string(), "nothing to do");
    assert!(sink.lines_at("error").is_empty());
}

#[tokio::test]
async fn test_unexpected_failure_is_logged_once() {
    let (logging, sink) = memory_logging();
    let err = Invocation::start(FailCommand { validation: false }, Argv::new(), logging)
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::Unexpected(_)));
    let errors = sink.lines_at("error");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("boom"));
}

#[tokio::test]
async fn test_failed_validation_stops_pipeline() {
    let (logging, _sink) = memory_logging();
    let command = StrictCommand::default();
    let executed = command.executed.clone();

    let err = Invocation::start(command, Argv::new(), logging.clone())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "--target is required");
    assert!(!executed.load(Ordering::SeqCst));

    let command = StrictCommand::default();
    let executed = command.executed.clone();
    Invocation::start(command, Argv::new().with("target", "prod"), logging)
        .await
        .unwrap();
    assert!(executed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_unknown_loglevel_rejects() {
    let (logging, _sink) = memory_logging();
    let err = Invocation::start(InspectCommand, Argv::new().with("loglevel", "chatty"), logging)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(err.as_validation().unwrap().prefix, "inspect");
}

#[tokio::test]
async fn test_composition_shares_exit_signal_and_logging() {
    let (logging, sink) = memory_logging();
    let argv = Argv::new().cli_version("2.0.0").with("loglevel", "notice");

    let invocation = Invocation::start(ParentCommand, argv, logging);
    let output = invocation.wait().await.unwrap().unwrap();

    assert_eq!(
        output,
        json!({ "composed": true, "marker": "parent", "cliVersion": "2.0.0" })
    );
    assert_eq!(invocation.exit_code(), 4);
    assert_eq!(sink.lines_at("notice"), vec!["cli v2.0.0"]);
}

#[tokio::test]
async fn test_composed_failure_propagates() {
    let (logging, sink) = memory_logging();
    let argv = Argv::new().with("fail_child", true);

    let err = Invocation::start(ParentCommand, argv, logging.clone())
        .await
        .unwrap_err();

    assert_eq!(err.as_validation().unwrap().prefix, "child");
    assert_eq!(err.to_string(), "child refused");
    assert!(!logging.is_paused());
    assert!(sink.lines_at("error").is_empty());
}

#[tokio::test]
async fn test_composed_panic_settles_parent_and_resumes_log() {
    let (logging, sink) = memory_logging();
    let argv = Argv::new().with("panic_child", true);

    let err = Invocation::start(ParentCommand, argv, logging.clone())
        .await
        .unwrap_err();

    match &err {
        CommandError::Runtime(message) => {
            assert!(message.contains("child panicked: child lost its footing"))
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!logging.is_paused());
    let errors = sink.lines_at("error");
    assert!(!errors.is_empty());
    assert!(errors[0].contains("child lost its footing"));
}

#[tokio::test]
async fn test_definition_handler_starts_command_class() {
    let (logging, _sink) = memory_logging();
    let definition = CommandDefinition::new(
        DefinitionConfig::new()
            .command("inspect")
            .describe("the inspect command")
            .builder(|app| app)
            .command_class::<InspectCommand>(),
        &logging,
    )
    .unwrap();

    let argv = Argv::new().with("subCmd", "value").with("loglevel", "info");
    let invocation = definition.handle(argv.clone());

    assert!(invocation.type_name().ends_with("InspectCommand"));
    assert_eq!(invocation.name(), "inspect");
    assert_eq!(invocation.argv(), &argv);

    let output = invocation.await.unwrap().unwrap();
    assert_eq!(output["subCmd"], json!("value"));

    // Every call builds a fresh instance.
    let again = definition.handle(Argv::new());
    assert_ne!(again.id(), definition.handle(Argv::new()).id());
    again.await.unwrap();
}

#[test]
fn test_definition_rejects_missing_command() {
    let (logging, sink) = memory_logging();
    let config = DefinitionConfig::new()
        .describe("something")
        .builder(|app| app)
        .command_class::<InspectCommand>();

    let err = CommandDefinition::new(config, &logging).unwrap_err();
    assert_eq!(err.name(), "ValidationError");
    assert_eq!(err.to_string(), "\"command\" is required");
    assert_eq!(sink.lines_at("error").len(), 1);
}
