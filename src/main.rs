use dentscan::cli::commands::{CliArgs, Commands};
use dentscan::cli::handlers::{handle_assess, handle_config};
use dentscan::util::logging::{init_logging, parse_level, LoggingConfig};
use dentscan::VERSION;

use clap::Parser;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("dentscan v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Assess(assess_args) => handle_assess(assess_args).await,
        Commands::Config(config_args) => handle_config(config_args).await,
    };

    std::process::exit(exit_code);
}

/// `--log-level` wins over `-v`/`-q`, which win over `DENTSCAN_LOG_LEVEL`.
fn init_logging_from_args(args: &CliArgs) {
    let mut config = LoggingConfig::from_env();
    if let Some(level_str) = &args.log_level {
        config.level = parse_level(level_str);
    } else if args.verbose {
        config.level = Level::DEBUG;
    } else if args.quiet {
        config.level = Level::ERROR;
    }
    init_logging(config);
}
