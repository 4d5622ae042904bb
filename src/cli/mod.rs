pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{AssessArgs, CliArgs, Commands, ConfigArgs};
pub use output::{OutputFormat, OutputFormatter};
