use clap::{Parser, Subcommand, ValueEnum};
use genai::adapter::AdapterKind;
use std::path::PathBuf;

/// Multi-phase vehicle damage assessment over vision LLMs
#[derive(Parser, Debug)]
#[command(
    name = "dentscan",
    about = "Multi-phase vehicle damage assessment over vision LLMs",
    version,
    author,
    long_about = "dentscan identifies the vehicle in a set of photographs, finds the damaged \
                  areas, runs several specialist passes per area and merges their findings \
                  into one canonical damage report with repair estimates."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - only errors are logged"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Assess the damage shown in a directory of photographs",
        long_about = "Runs one assessment job over every image in the directory and writes \
                      the report.\n\n\
                      File names carry image metadata: angle tokens such as front_left or \
                      rear, category tokens such as interior or vin, and closeup.\n\n\
                      Exit codes: 0 completed, 2 partial report, 1 failed.\n\n\
                      Examples:\n  \
                      dentscan assess ./claim-1234\n  \
                      dentscan assess ./photos --format json --out report.json\n  \
                      dentscan assess ./photos --provider ollama --model qwen2.5vl:7b"
    )]
    Assess(AssessArgs),

    #[command(about = "Print the effective configuration")]
    Config(ConfigArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct AssessArgs {
    #[arg(value_name = "IMAGES_DIR", help = "Directory of vehicle photographs")]
    pub images_dir: PathBuf,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write the report to a file instead of stdout"
    )]
    pub out: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(short = 'p', long, value_parser = parse_adapter_kind, help = "Inference provider")]
    pub provider: Option<AdapterKind>,

    #[arg(short = 'm', long, value_name = "MODEL", help = "Vision model name")]
    pub model: Option<String>,

    #[arg(short = 'c', long, value_name = "FILE", help = "TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "LIST",
        value_delimiter = ',',
        help = "Specialist sampling temperatures, e.g. 0.2,0.5,0.8"
    )]
    pub temperatures: Option<Vec<f32>>,

    #[arg(long, value_name = "N", help = "Maximum concurrent inference calls")]
    pub concurrency: Option<usize>,

    #[arg(long, help = "Classify the whole image set in one call")]
    pub no_area_bucketing: bool,

    #[arg(long, value_name = "SECONDS", help = "Job deadline in seconds")]
    pub job_timeout: Option<u64>,
}

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(short = 'c', long, value_name = "FILE", help = "TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

fn parse_adapter_kind(s: &str) -> Result<AdapterKind, String> {
    crate::config::parse_provider(s).map_err(|e| e.to_string())
}
