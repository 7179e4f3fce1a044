//! Command-line interface.

mod commands;
mod parser;

pub use commands::{CommandResult, execute};
pub use parser::{Cli, Commands, DropCommands, ManifestCommands, StrategyArg};
