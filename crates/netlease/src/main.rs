mod cli;
mod commands;
mod error;
mod output;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use netlease_config::Config;

use crate::cli::{Cli, ColorMode, Command, GlobalOpts, OutputFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config and policy commands resolve the file themselves, so a broken
        // file can still be located, checked and replaced
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),
        Command::Policy(args) => commands::policy::handle(args, &cli.global),

        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "netlease", &mut std::io::stdout());
            Ok(())
        }

        cmd => {
            let ctx = Context::load(&cli.global)?;
            tracing::debug!(command = ?cmd, config = %ctx.config_path.display(), "dispatching command");
            commands::dispatch(cmd, &ctx).await
        }
    }
}

// ── Context ──────────────────────────────────────────────────────────

/// Loaded configuration plus the resolved global flags.
pub struct Context {
    pub config_path: std::path::PathBuf,
    pub config: Config,
    pub output: OutputFormat,
    pub color: bool,
    pub quiet: bool,
}

impl Context {
    /// Load the config file and resolve output options. Flags win over the
    /// `[defaults]` section.
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let config_path = config_path(global);
        let config = netlease_config::load_config_from(&config_path)?;

        let output = match global.output {
            Some(output) => output,
            None => OutputFormat::from_str(&config.defaults.output, true)
                .map_err(|reason| CliError::InvalidConfig {
                    field: "defaults.output".into(),
                    reason,
                })?,
        };
        let color = match global.color {
            Some(color) => color,
            None => ColorMode::from_str(&config.defaults.color, true).map_err(|reason| {
                CliError::InvalidConfig {
                    field: "defaults.color".into(),
                    reason,
                }
            })?,
        };

        Ok(Self {
            config_path,
            config,
            output,
            color: output == OutputFormat::Table && output::should_color(color),
            quiet: global.quiet,
        })
    }
}

/// `--config` / `NETLEASE_CONFIG`, else the platform default.
pub fn config_path(global: &GlobalOpts) -> std::path::PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(netlease_config::config_path)
}
