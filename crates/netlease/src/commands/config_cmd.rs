//! Config subcommand handlers.

use netlease_config::Config;

use crate::Context;
use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&crate::config_path(global).display().to_string(), global.quiet);
            Ok(())
        }

        // ── Show: effective config after file + environment ─────────
        ConfigCommand::Show => {
            let ctx = Context::load(global)?;
            let rendered = toml::to_string_pretty(&ctx.config)?;
            let out = output::render_single(
                ctx.output,
                &ctx.config,
                |_| rendered.trim_end().to_owned(),
                |_| ctx.config_path.display().to_string(),
            )?;
            output::print_output(&out, ctx.quiet);
            Ok(())
        }

        // ── Init: starter file with the built-in policy ─────────────
        ConfigCommand::Init { force } => {
            let path = crate::config_path(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            netlease_config::save_config_to(&Config::with_builtin_policy(), &path)?;
            tracing::info!(path = %path.display(), "wrote config");
            if !global.quiet {
                eprintln!("✓ Config written to {}", path.display());
            }
            Ok(())
        }
    }
}
