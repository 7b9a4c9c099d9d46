//! The command lifecycle engine.
//!
//! # Lifecycle
//!
//! 1. **Start**: [`Invocation::start`] pauses logging, announces the program
//!    version (outermost invocations only) and spawns the pipeline.
//! 2. **Configure**: environment, options, properties, logging.
//! 3. **Check**: validations, then preparations.
//! 4. **Run**: `initialize`, then `execute` if initialization said to proceed.
//! 5. **Settle**: the [`Outcome`] receives the result or the failure, once.
//!
//! Unexpected failures, panics included, are logged with a trimmed trace
//! before settling; validation failures are left to the caller. Either way
//! the shared log is resumed so nothing stays buffered.

use std::any::Any;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, debug_span, Instrument};
use uuid::Uuid;

use crate::argv::Argv;
use crate::command::{short_type_name, Command, CommandContext, ExitSignal};
use crate::error::{CommandError, CommandResult};
use crate::logging::LogContext;
use crate::trace::clean_failure;

type Settled<T> = Option<CommandResult<Option<T>>>;

/// Single-assignment result of an invocation, readable any number of times.
pub struct Outcome<T> {
    rx: watch::Receiver<Settled<T>>,
}

impl<T> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T: Clone> Outcome<T> {
    fn settled(result: CommandResult<Option<T>>) -> Self {
        let (_tx, rx) = watch::channel(Some(result));
        Self { rx }
    }

    /// Wait for settlement. Every call returns the same result.
    pub async fn wait(&self) -> CommandResult<Option<T>> {
        let mut rx = self.rx.clone();
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| {
            Err(CommandError::Runtime(
                "command pipeline ended before settling".to_string(),
            ))
        })
    }

    /// The settled result, if there is one yet.
    pub fn try_get(&self) -> Option<CommandResult<Option<T>>> {
        self.rx.borrow().clone()
    }

    /// Whether a result has been delivered.
    pub fn is_settled(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

impl<T> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("settled", &self.rx.borrow().is_some())
            .finish()
    }
}

/// A started command.
///
/// Await it (or call [`Invocation::wait`]) to observe the outcome. Dropping
/// the handle does not cancel the pipeline.
pub struct Invocation<T> {
    id: Uuid,
    name: String,
    type_name: &'static str,
    composed: bool,
    argv: Arc<Argv>,
    outcome: Outcome<T>,
    exit: ExitSignal,
}

impl<T: Clone + Send + Sync + 'static> Invocation<T> {
    /// Start `command` with `argv` on the current Tokio runtime.
    pub fn start<C>(command: C, argv: Argv, logging: LogContext) -> Self
    where
        C: Command<Output = T>,
    {
        Self::launch(command, argv, logging, ExitSignal::default(), Ok)
    }

    /// Like [`Invocation::start`], converting the command's output with `map`.
    pub fn start_with<C, F>(command: C, argv: Argv, logging: LogContext, map: F) -> Self
    where
        C: Command,
        F: FnOnce(C::Output) -> CommandResult<T> + Send + 'static,
    {
        Self::launch(command, argv, logging, ExitSignal::default(), map)
    }

    pub(crate) fn launch<C, F>(
        mut command: C,
        argv: Argv,
        logging: LogContext,
        exit: ExitSignal,
        map: F,
    ) -> Self
    where
        C: Command,
        F: FnOnce(C::Output) -> CommandResult<T> + Send + 'static,
    {
        logging.begin();
        match serde_json::to_string(&argv) {
            Ok(json) => logging.silly("argv", json),
            Err(err) => logging.silly("argv", format!("<unserializable: {}>", err)),
        }

        let id = Uuid::new_v4();
        let name = C::name();
        let type_name = std::any::type_name::<C>();
        let composed = argv
            .composed
            .as_deref()
            .map_or(false, |parent| parent != name);

        if !composed {
            let version = argv.cli_version.as_deref().unwrap_or("unknown");
            logging.notice("cli", format!("v{}", version));
        }

        let argv = Arc::new(argv);
        let mut ctx = CommandContext::new(
            id,
            name.clone(),
            type_name,
            composed,
            argv.clone(),
            logging.clone(),
            exit.clone(),
        );

        let outcome = match Handle::try_current() {
            Ok(handle) => {
                let (tx, rx) = watch::channel(None);
                let span = debug_span!("command", name = %name, id = %id, composed);
                handle.spawn(
                    async move {
                        let settled = AssertUnwindSafe(run_pipeline(&mut command, &mut ctx))
                            .catch_unwind()
                            .await;
                        let result = match settled {
                            Ok(result) => result.and_then(|output| output.map(map).transpose()),
                            Err(payload) => Err(CommandError::Runtime(format!(
                                "{} panicked: {}",
                                ctx.name(),
                                panic_message(&*payload)
                            ))),
                        }
                        .map_err(|err| handle_failure(&ctx, err));
                        debug!(ok = result.is_ok(), "Command settled");
                        tx.send_replace(Some(result));
                    }
                    .instrument(span),
                );
                Outcome { rx }
            }
            Err(err) => {
                let err = CommandError::Runtime(err.to_string());
                logging.error("", &err);
                logging.resume();
                Outcome::settled(Err(err))
            }
        };

        Self {
            id,
            name,
            type_name,
            composed,
            argv,
            outcome,
            exit,
        }
    }

    /// Wait for the outcome without consuming the handle.
    pub async fn wait(&self) -> CommandResult<Option<T>> {
        self.outcome.wait().await
    }
}

impl<T> Invocation<T> {
    /// Unique id of this invocation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the command that was started.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full type path of the command that was started.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the command runs on behalf of another.
    pub fn composed(&self) -> bool {
        self.composed
    }

    /// The frozen constructor input.
    pub fn argv(&self) -> &Argv {
        &self.argv
    }

    /// The memoized result cell.
    pub fn outcome(&self) -> &Outcome<T> {
        &self.outcome
    }

    /// Exit code requested by the command or its composed children.
    pub fn exit_code(&self) -> i32 {
        self.exit.get()
    }
}

impl<T> fmt::Debug for Invocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("composed", &self.composed)
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for Invocation<T> {
    type Output = CommandResult<Option<T>>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.outcome.wait().await })
    }
}

async fn run_pipeline<C: Command>(
    command: &mut C,
    ctx: &mut CommandContext,
) -> CommandResult<Option<C::Output>> {
    debug!("configure_environment");
    ctx.environment = command.configure_environment(ctx).await?;

    debug!("configure_options");
    ctx.options = command.configure_options(ctx).await?;

    debug!("configure_properties");
    command.configure_properties(ctx).await?;

    debug!("configure_logging");
    ctx.logger = Some(command.configure_logging(ctx).await?);

    debug!("run_validations");
    command.run_validations(ctx).await?;

    debug!("run_preparations");
    command.run_preparations(ctx).await?;

    debug!("run_command");
    command.run_command(ctx).await
}

fn handle_failure(ctx: &CommandContext, err: CommandError) -> CommandError {
    if !err.is_validation() {
        let anchor = short_type_name(ctx.type_name());
        ctx.logging().error("", clean_failure(&err, anchor));
    }

    // A failure before configure_logging would otherwise stay buffered.
    if ctx.logging().is_paused() {
        ctx.logging().resume();
    }
    err
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
