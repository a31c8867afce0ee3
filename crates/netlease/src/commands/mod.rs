//! Command dispatch: bridges CLI args -> core components -> output formatting.

pub mod config_cmd;
pub mod evaluate;
pub mod policy;
pub mod simulate;
pub mod util;

use crate::Context;
use crate::cli::Command;
use crate::error::CliError;

/// Dispatch a config-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, ctx: &Context) -> Result<(), CliError> {
    match cmd {
        Command::Evaluate(args) => evaluate::handle(&args, ctx),
        Command::Simulate(args) => simulate::handle(&args, ctx).await,
        // Config, Policy and Completions are handled before dispatch
        Command::Config(_) | Command::Policy(_) | Command::Completions(_) => Err(
            CliError::validation("command", "handled before config is loaded"),
        ),
    }
}
