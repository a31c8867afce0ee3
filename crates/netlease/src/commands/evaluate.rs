//! `evaluate`: explain which interface kinds a request may use.

use serde::Serialize;
use tabled::Tabled;

use netlease_core::{
    CallerIntent, EntryVerdict, NetworkId, NetworkKind, NetworkObserver, RequestType, RulesEngine,
};

use crate::Context;
use crate::cli::EvaluateArgs;
use crate::error::CliError;
use crate::output;

use super::util;

// ── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct EvaluationReport {
    request: RequestType,
    high_bandwidth: bool,
    /// No policy for the request type; plain WiFi was assumed.
    fallback: bool,
    acceptable: Vec<NetworkKind>,
    default_network: Option<NetworkId>,
    preferred_network: Option<NetworkId>,
    entries: Vec<EntryVerdict>,
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "Preference")]
    preference: String,
    #[tabled(rename = "Verdict")]
    verdict: String,
    #[tabled(rename = "Admitted")]
    admitted: String,
}

fn detail(report: &EvaluationReport, color: bool) -> String {
    let name = |id: Option<&NetworkId>| id.map_or_else(|| "-".into(), ToString::to_string);
    let mut lines = vec![
        format!(
            "Request:     {}{}",
            report.request,
            if report.high_bandwidth { " (high bandwidth)" } else { "" }
        ),
        format!("Default:     {}", name(report.default_network.as_ref())),
        format!("Preferred:   {}", name(report.preferred_network.as_ref())),
        format!(
            "Acceptable:  {}",
            output::paint_heading(&util::join_kinds(&report.acceptable), color)
        ),
    ];
    if report.fallback {
        lines.push("No policy for this request type; plain WiFi assumed.".into());
    }

    let rows: Vec<EntryRow> = report
        .entries
        .iter()
        .enumerate()
        .map(|(idx, e)| EntryRow {
            rank: idx + 1,
            preference: e.entry.to_string(),
            verdict: output::paint_verdict(e.verdict, color),
            admitted: if e.admitted.is_empty() {
                "-".into()
            } else {
                e.admitted
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            },
        })
        .collect();
    if !rows.is_empty() {
        lines.push(String::new());
        lines.push(output::render_table(&rows));
    }
    lines.join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: &EvaluateArgs, ctx: &Context) -> Result<(), CliError> {
    let request = util::parse_request(&args.request)?;
    let engine = RulesEngine::new(ctx.config.policy_table()?);

    // Route the interfaces through an observer so the default route is
    // selected the same way a live platform feed would select it.
    let observer = NetworkObserver::new(ctx.config.observer_config()?);
    for (idx, spec) in args.networks.iter().enumerate() {
        observer.apply_added(util::parse_network_spec(spec, idx)?);
    }
    let networks = observer.snapshot();

    let intent = if args.allow_metered {
        CallerIntent::allow_metered()
    } else {
        CallerIntent::default()
    };
    let explanation = engine.explain(request, &networks, &intent);
    tracing::debug!(request = %request, fallback = explanation.fallback, "evaluated request");

    let report = EvaluationReport {
        request,
        high_bandwidth: engine.is_high_bandwidth(request),
        fallback: explanation.fallback,
        acceptable: explanation.kinds(),
        default_network: networks.default_id().cloned(),
        preferred_network: engine
            .preferred_network(request, &networks, &intent)
            .map(|s| s.id.clone()),
        entries: explanation.entries,
    };

    let out = output::render_single(
        ctx.output,
        &report,
        |r| detail(r, ctx.color),
        |r| {
            r.acceptable
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
