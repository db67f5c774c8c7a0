use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use seegprep::bipolar::create_bipolar_by_prefix;
use seegprep::config::{load_config, save_config, PipelineConfig, DEFAULT_CHANNEL_PREFIX};
use seegprep::pipeline::Pipeline;
use seegprep::{read_edf, write_recording, SeegError, DEFAULT_BIPOLAR_SEPARATOR};

mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const EXECUTION_ERROR: i32 = 1;
    pub const DATA_ERROR: i32 = 2;
}

#[derive(Parser)]
#[command(
    name = "seegprep",
    version,
    about = "SEEG preprocessing: event alignment, filtering and bipolar montages",
    long_about = "Load an SEEG recording from EDF/EDF+, attach events from a clinical event log,\n\
                  band-pass filter it and derive bipolar channels per anatomical region."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Print a summary of a recording
    Info(InfoArgs),
    /// Run the full pipeline from a YAML configuration
    Run(RunArgs),
    /// Derive bipolar channels from one recording
    Bipolar(BipolarArgs),
    /// Write the default configuration
    InitConfig(InitConfigArgs),
}

#[derive(Args)]
struct InfoArgs {
    /// EDF or EDF+ file
    file: PathBuf,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,

    /// Channel-name prefix to strip before printing
    #[arg(long, default_value = DEFAULT_CHANNEL_PREFIX)]
    strip_prefix: String,
}

#[derive(Args)]
struct RunArgs {
    /// Pipeline configuration (YAML)
    #[arg(long)]
    config: PathBuf,

    /// Emit the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct BipolarArgs {
    /// EDF or EDF+ file
    file: PathBuf,

    /// Electrode shaft prefixes (e.g. TIP BIA)
    #[arg(long = "prefix", required = true, num_args = 1..)]
    prefixes: Vec<String>,

    /// Separator between the two contact names
    #[arg(long, default_value = DEFAULT_BIPOLAR_SEPARATOR)]
    sep: String,

    /// Channel-name prefix to strip before matching
    #[arg(long, default_value = DEFAULT_CHANNEL_PREFIX)]
    strip_prefix: String,

    /// High-pass edge in Hz
    #[arg(long)]
    l_freq: Option<f64>,

    /// Low-pass edge in Hz
    #[arg(long)]
    h_freq: Option<f64>,

    /// Output EDF+ file
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
struct InitConfigArgs {
    /// Where to write the configuration
    path: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Command::Info(args) => info(args),
        Command::Run(args) => run(args),
        Command::Bipolar(args) => bipolar(args),
        Command::InitConfig(args) => init_config(args),
    };

    let exit_code = match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_data_error() {
                exit_codes::DATA_ERROR
            } else {
                exit_codes::EXECUTION_ERROR
            }
        }
    };

    std::process::exit(exit_code);
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, SeegError> {
    serde_json::to_string_pretty(value).map_err(|e| SeegError::InvalidFormat(format!("JSON serialization failed: {}", e)))
}

fn info(args: InfoArgs) -> Result<(), SeegError> {
    let mut recording = read_edf(&args.file)?;
    if !args.strip_prefix.is_empty() {
        recording.strip_channel_prefix(&args.strip_prefix)?;
    }

    let summary = recording.summary();
    if args.json {
        println!("{}", to_json(&summary)?);
    } else {
        println!("{}", summary);
    }
    Ok(())
}

fn run(args: RunArgs) -> Result<(), SeegError> {
    let config = load_config(&args.config)?;
    let report = Pipeline::new(config)?.run()?;

    if args.json {
        println!("{}", to_json(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

fn bipolar(args: BipolarArgs) -> Result<(), SeegError> {
    let mut recording = read_edf(&args.file)?;
    if !args.strip_prefix.is_empty() {
        recording.strip_channel_prefix(&args.strip_prefix)?;
    }

    let source = if args.l_freq.is_some() || args.h_freq.is_some() {
        recording.filter(args.l_freq, args.h_freq)?
    } else {
        recording
    };

    let derived = create_bipolar_by_prefix(&source, &args.prefixes, &args.sep)?;
    write_recording(&derived, &args.out)?;

    println!(
        "Wrote {} bipolar channels to {}",
        derived.n_channels(),
        args.out.display()
    );
    for name in derived.channel_names() {
        println!("  {}", name);
    }
    Ok(())
}

fn init_config(args: InitConfigArgs) -> Result<(), SeegError> {
    save_config(&PipelineConfig::default(), &args.path)?;
    println!("Wrote default configuration to {}", args.path.display());
    Ok(())
}
