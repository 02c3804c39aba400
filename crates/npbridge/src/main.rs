mod cli;
mod host;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, error};
use npbridge_core::kernel::constants::{APP_NAME, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE};
use npbridge_core::kernel::Result;
use npbridge_core::plugin_system::InstanceMode;
use npbridge_core::BridgeConfig;

use crate::cli::RunOptions;

/// npbridge: host legacy plugin modules from the command line
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Log adapter activity (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (JSON, YAML or TOML). Defaults to $NPBRIDGE_CONFIG,
    /// then ./npbridge.toml when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a module and print what it declares
    Inspect {
        /// Path to the module library
        module: PathBuf,
    },
    /// Start a session of a module and serve it content
    Run {
        /// Path to the module library
        module: PathBuf,
        /// MIME type to start the session with (defaults to the module's first)
        #[arg(short = 't', long = "type")]
        mime_type: Option<String>,
        /// Embedding mode
        #[arg(long, value_enum, default_value_t = Mode::Embed)]
        mode: Mode,
        /// Element attribute passed to the module, as NAME=VALUE
        #[arg(short, long = "attr", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,
        /// File delivered to the session as a stream once it has started
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Window size as WIDTHxHEIGHT
        #[arg(short, long, value_parser = parse_window)]
        window: Option<(u32, u32)>,
        /// Directory relative file: URLs are served from
        #[arg(short, long, default_value = ".")]
        base: PathBuf,
        /// Stop serving after this many module requests
        #[arg(long, default_value_t = 256)]
        max_requests: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Embed,
    Full,
}

impl From<Mode> for InstanceMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Embed => InstanceMode::Embed,
            Mode::Full => InstanceMode::Full,
        }
    }
}

fn parse_attribute(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    if name.is_empty() {
        return Err("attribute name is empty".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}

fn parse_window(raw: &str) -> std::result::Result<(u32, u32), String> {
    let (width, height) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", raw))?;
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|e| format!("bad window size '{}': {}", raw, e));
    Ok((parse(width)?, parse(height)?))
}

fn load_config(explicit: Option<&Path>) -> Result<BridgeConfig> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .or_else(|| {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.is_file().then_some(default)
        });
    match path {
        Some(path) => Ok(BridgeConfig::load(&path)?),
        None => {
            debug!("No configuration file, using defaults");
            Ok(BridgeConfig::default())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env = env_logger::Env::default().default_filter_or(default_level);
    if let Err(e) = env_logger::Builder::from_env(env).try_init() {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", APP_NAME, e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = match args.command {
        Commands::Inspect { module } => cli::inspect(&module, config),
        Commands::Run {
            module,
            mime_type,
            mode,
            attributes,
            file,
            window,
            base,
            max_requests,
        } => {
            let options = RunOptions {
                module,
                mime_type,
                mode: mode.into(),
                attributes,
                file,
                window,
                base,
                max_requests,
            };
            cli::run(options, config).await
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}: {}", APP_NAME, e);
            ExitCode::FAILURE
        }
    }
}
