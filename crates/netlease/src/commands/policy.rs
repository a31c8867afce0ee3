//! Policy subcommand handlers.

use std::path::PathBuf;

use serde::Serialize;
use tabled::Tabled;

use netlease_core::{PolicyTable, RequestType};

use crate::Context;
use crate::cli::{GlobalOpts, OutputFormat, PolicyArgs, PolicyCommand};
use crate::error::CliError;
use crate::output;

// ── Show ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct PolicyView {
    request: RequestType,
    high_bandwidth: bool,
    prefer: Vec<String>,
}

#[derive(Tabled)]
struct PolicyRow {
    #[tabled(rename = "Request")]
    request: String,
    #[tabled(rename = "High BW")]
    high_bandwidth: String,
    #[tabled(rename = "Preferences")]
    prefer: String,
}

impl From<&PolicyView> for PolicyRow {
    fn from(v: &PolicyView) -> Self {
        Self {
            request: v.request.to_string(),
            high_bandwidth: if v.high_bandwidth { "yes" } else { "no" }.into(),
            prefer: if v.prefer.is_empty() {
                "(deny)".into()
            } else {
                v.prefer.join(" > ")
            },
        }
    }
}

fn views(table: &PolicyTable) -> Vec<PolicyView> {
    table
        .iter()
        .map(|(request, rule)| PolicyView {
            request: *request,
            high_bandwidth: rule.high_bandwidth,
            prefer: rule.preferences.iter().map(ToString::to_string).collect(),
        })
        .collect()
}

// ── Check ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CheckReport {
    path: PathBuf,
    /// `false` when no file exists and only defaults were checked.
    found: bool,
    request_types: usize,
    high_bandwidth: Vec<RequestType>,
}

fn check_detail(r: &CheckReport) -> String {
    let source = if r.found {
        r.path.display().to_string()
    } else {
        format!("{} (not found, built-in defaults)", r.path.display())
    };
    let high_bandwidth = if r.high_bandwidth.is_empty() {
        "-".to_owned()
    } else {
        r.high_bandwidth
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    [
        format!("✓ configuration is valid: {source}"),
        format!("  Request types:   {}", r.request_types),
        format!("  High bandwidth:  {high_bandwidth}"),
    ]
    .join("\n")
}

/// Check a file without going through the active config, which may be
/// the broken one.
fn check(file: Option<PathBuf>, global: &GlobalOpts) -> Result<(), CliError> {
    let explicit = file.is_some();
    let path = file.unwrap_or_else(|| crate::config_path(global));
    let found = path.exists();
    if explicit && !found {
        return Err(CliError::NotFound {
            resource_type: "config file".into(),
            identifier: path.display().to_string(),
            hint: "Create one with: netlease config init".into(),
        });
    }

    let config = netlease_config::load_config_from(&path)?;
    config.validate()?;
    let table = config.policy_table()?;

    let report = CheckReport {
        found,
        request_types: table.len(),
        high_bandwidth: table
            .iter()
            .filter(|(_, rule)| rule.high_bandwidth)
            .map(|(request, _)| *request)
            .collect(),
        path,
    };
    let out = output::render_single(
        global.output.unwrap_or(OutputFormat::Table),
        &report,
        check_detail,
        |r| r.path.display().to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: PolicyArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        PolicyCommand::Show => {
            let ctx = Context::load(global)?;
            let table = ctx.config.policy_table()?;
            let out = output::render_list(
                ctx.output,
                &views(&table),
                |v| PolicyRow::from(v),
                |v| v.request.to_string(),
            )?;
            output::print_output(&out, ctx.quiet);
            Ok(())
        }
        PolicyCommand::Check { file } => check(file, global),
    }
}
