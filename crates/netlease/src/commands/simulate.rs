//! `simulate`: replay a scripted scenario against the in-memory platform.
//!
//! A script is TOML with an optional `[platform]` table of per-kind
//! answers and a list of `[[steps]]`, each tagged with an `op`:
//!
//! ```toml
//! [platform]
//! default = "confirm"
//! wifi = "confirm-after:200ms"
//!
//! [[steps]]
//! op = "add"
//! network = "cellular:id=rmnet0"
//!
//! [[steps]]
//! op = "request"
//! name = "download"
//! request = "media-download"
//! wait = "2s"
//! count = 2
//!
//! [[steps]]
//! op = "close"
//! name = "download"
//! ```
//!
//! Steps run in order on a real clock. The observer, mediator, usage
//! ledger and simulated platform are wired exactly as an embedding
//! application would wire them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytesize::ByteSize;
use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use netlease_config::Config;
use netlease_core::{
    Behavior, CallerIntent, Lease, LeaseMediator, LeaseStatus, NetworkId, NetworkKind,
    NetworkObserver, RulesEngine, SimulatedRequester, Status, UsageLedger, UsagePeriod, WaitPolicy,
};

use crate::Context;
use crate::cli::SimulateArgs;
use crate::error::CliError;
use crate::output;

use super::util;

const KINDS: [NetworkKind; 4] = [
    NetworkKind::Wifi,
    NetworkKind::Cellular,
    NetworkKind::Bluetooth,
    NetworkKind::Unknown,
];

// ── Script format ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Script {
    /// Kind name (or `default`) → behavior string.
    #[serde(default)]
    platform: BTreeMap<String, String>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
enum Step {
    /// Report a new interface (network spec syntax).
    Add { network: String },
    /// Replace an interface's reported state (network spec syntax).
    Update { network: String },
    /// Mark an interface lost, keeping its other details.
    Lose { id: String },
    Remove { id: String },
    /// Drop lost interfaces past the grace period.
    Purge,
    /// Change how the platform answers for one kind.
    Platform { kind: String, behavior: String },
    Request {
        name: String,
        request: String,
        /// `fail-fast` (default) or a duration.
        #[serde(default)]
        wait: Option<String>,
        /// Concurrent callers issuing the same request.
        #[serde(default = "one")]
        count: usize,
        #[serde(default)]
        allow_metered: bool,
    },
    Close { name: String },
    Record {
        id: String,
        request: String,
        bytes: ByteAmount,
    },
    Sleep { duration: String },
    Usage,
}

fn one() -> usize {
    1
}

impl Step {
    fn op(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Update { .. } => "update",
            Self::Lose { .. } => "lose",
            Self::Remove { .. } => "remove",
            Self::Purge => "purge",
            Self::Platform { .. } => "platform",
            Self::Request { .. } => "request",
            Self::Close { .. } => "close",
            Self::Record { .. } => "record",
            Self::Sleep { .. } => "sleep",
            Self::Usage => "usage",
        }
    }
}

/// A byte count, either plain or human (`"8 MiB"`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ByteAmount {
    Bytes(u64),
    Human(String),
}

impl ByteAmount {
    fn resolve(&self, field: &str) -> Result<u64, CliError> {
        match self {
            Self::Bytes(n) => Ok(*n),
            Self::Human(raw) => raw
                .trim()
                .parse::<ByteSize>()
                .map(|size| size.as_u64())
                .map_err(|e| CliError::validation(field, format!("'{raw}': {e}"))),
        }
    }
}

/// Parse `confirm`, `deny`, `never`, `confirm-after:<dur>` or
/// `deny-after:<dur>`.
fn parse_behavior(field: &str, raw: &str) -> Result<Behavior, CliError> {
    let normalized = raw.trim().to_ascii_lowercase();
    let (name, arg) = match normalized.split_once(':') {
        Some((name, arg)) => (name.trim(), Some(arg.trim())),
        None => (normalized.as_str(), None),
    };
    match (name, arg) {
        ("confirm", None) => Ok(Behavior::Confirm),
        ("deny", None) => Ok(Behavior::Deny),
        ("never", None) => Ok(Behavior::Never),
        ("confirm-after", Some(d)) => Ok(Behavior::ConfirmAfter(util::parse_duration(field, d)?)),
        ("deny-after", Some(d)) => Ok(Behavior::DenyAfter(util::parse_duration(field, d)?)),
        _ => Err(CliError::validation(
            field,
            format!(
                "'{raw}': expected confirm, deny, never, confirm-after:<duration> \
                 or deny-after:<duration>"
            ),
        )),
    }
}

fn build_platform(section: &BTreeMap<String, String>) -> Result<SimulatedRequester, CliError> {
    let mut platform = SimulatedRequester::new();
    for (key, raw) in section {
        let field = format!("platform.{key}");
        let behavior = parse_behavior(&field, raw)?;
        if key == "default" {
            platform = platform.with_default_behavior(behavior);
        } else {
            let kind = NetworkKind::parse(key).map_err(|e| CliError::validation(&field, e))?;
            platform = platform.with_behavior(kind, behavior);
        }
    }
    Ok(platform)
}

// ── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Event {
    at_ms: u64,
    step: usize,
    op: &'static str,
    detail: String,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "At")]
    at: String,
    #[tabled(rename = "Step")]
    step: usize,
    #[tabled(rename = "Op")]
    op: &'static str,
    #[tabled(rename = "Detail")]
    detail: String,
}

#[derive(Debug, Serialize)]
struct PlatformCount {
    kind: NetworkKind,
    requests: usize,
    clears: usize,
}

#[derive(Debug, Serialize)]
struct Summary {
    /// Lease name → leases still open when the script ended.
    open_leases: BTreeMap<String, usize>,
    active: BTreeSet<NetworkKind>,
    pinned: BTreeSet<NetworkKind>,
    platform: Vec<PlatformCount>,
    usage: UsagePeriod,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    script: PathBuf,
    timeline: Vec<Event>,
    summary: Summary,
}

fn human_bytes(bytes: u64) -> String {
    ByteSize::b(bytes).to_string()
}

fn usage_line(period: &UsagePeriod) -> String {
    let mut parts: Vec<String> = period
        .by_kind
        .iter()
        .map(|(kind, bytes)| format!("{kind} {}", human_bytes(*bytes)))
        .collect();
    parts.push(format!("total {}", human_bytes(period.total())));
    parts.join(", ")
}

fn detail(report: &SimulationReport, color: bool) -> String {
    let rows: Vec<EventRow> = report
        .timeline
        .iter()
        .map(|e| EventRow {
            at: format!("{}ms", e.at_ms),
            step: e.step,
            op: e.op,
            detail: e.detail.clone(),
        })
        .collect();

    let summary = &report.summary;
    let kinds = |set: &BTreeSet<NetworkKind>| util::join_kinds(&set.iter().copied().collect::<Vec<_>>());
    let open = if summary.open_leases.is_empty() {
        "-".to_owned()
    } else {
        summary
            .open_leases
            .iter()
            .map(|(name, n)| format!("{name}={n}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let platform = summary
        .platform
        .iter()
        .map(|p| format!("{} {}/{}", p.kind, p.requests, p.clears))
        .collect::<Vec<_>>();

    [
        output::render_table(&rows),
        String::new(),
        output::paint_heading("Summary", color),
        format!("  Open leases:   {open}"),
        format!("  Active kinds:  {}", kinds(&summary.active)),
        format!("  Pinned:        {}", kinds(&summary.pinned)),
        format!(
            "  Platform:      {} (requested/cleared)",
            if platform.is_empty() {
                "-".to_owned()
            } else {
                platform.join(", ")
            }
        ),
        format!("  Usage:         {}", usage_line(&summary.usage)),
    ]
    .join("\n")
}

// ── Simulation ──────────────────────────────────────────────────────

struct Simulation {
    observer: NetworkObserver,
    engine: RulesEngine,
    platform: SimulatedRequester,
    mediator: LeaseMediator,
    ledger: Arc<UsageLedger>,
    leases: BTreeMap<String, Vec<Lease>>,
    cancel: CancellationToken,
    started: Instant,
    timeline: Vec<Event>,
}

impl Simulation {
    fn new(config: &Config, platform: SimulatedRequester) -> Result<Self, CliError> {
        let observer = NetworkObserver::new(config.observer_config()?);
        let engine = RulesEngine::new(config.policy_table()?);
        let mediator = LeaseMediator::new(config.mediator_config()?, Arc::new(platform.clone()));
        let ledger = Arc::new(
            UsageLedger::new(config.ledger_config()?)?.with_networks(observer.subscribe()),
        );

        let cancel = CancellationToken::new();
        if ledger.spawn_ticker(cancel.clone()).is_some() {
            tracing::debug!("usage ticker running");
        }

        Ok(Self {
            observer,
            engine,
            platform,
            mediator,
            ledger,
            leases: BTreeMap::new(),
            cancel,
            started: Instant::now(),
            timeline: Vec::new(),
        })
    }

    fn log(&mut self, step: usize, op: &'static str, detail: impl Into<String>) {
        let at_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let detail = detail.into();
        tracing::info!(step, op, "{detail}");
        self.timeline.push(Event {
            at_ms,
            step,
            op,
            detail,
        });
    }

    /// Push the current snapshot into the mediator and report leases it
    /// invalidated.
    fn sync_networks(&mut self, step: usize) {
        self.mediator.apply_networks(&self.observer.snapshot());

        let mut invalidated = Vec::new();
        for (name, leases) in &mut self.leases {
            let before = leases.len();
            leases.retain(|lease| lease.status() != LeaseStatus::Invalidated);
            let lost = before - leases.len();
            if lost > 0 {
                invalidated.push(format!("{name}: {lost} lease(s) invalidated"));
            }
        }
        self.leases.retain(|_, leases| !leases.is_empty());
        for message in invalidated {
            self.log(step, "invalidate", message);
        }
    }

    fn describe_default(&self) -> String {
        self.observer
            .snapshot()
            .default_id()
            .map_or_else(|| "none".into(), ToString::to_string)
    }

    fn known(&self, step: usize, id: &str) -> Result<NetworkId, CliError> {
        let id = NetworkId::new(id);
        if self.observer.snapshot().contains(&id) {
            Ok(id)
        } else {
            Err(CliError::NotFound {
                resource_type: "network".into(),
                identifier: id.to_string(),
                hint: format!("steps[{step}] refers to an interface no add step reported"),
            })
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn run_step(&mut self, step: usize, op: Step) -> Result<(), CliError> {
        let field = |name: &str| format!("steps[{step}].{name}");
        let tag = op.op();

        match op {
            Step::Add { network } | Step::Update { network } => {
                let status = util::parse_network_spec(&network, step)?;
                let line = format!("{} ({}) {}", status.id, status.kind(), status.status);
                if tag == "add" {
                    self.observer.apply_added(status);
                } else {
                    self.observer.apply_updated(status);
                }
                let default = self.describe_default();
                self.log(step, tag, format!("{line}; default {default}"));
                self.sync_networks(step);
            }

            Step::Lose { id } => {
                let id = self.known(step, &id)?;
                let snapshot = self.observer.snapshot();
                if let Some(status) = snapshot.get(&id) {
                    self.observer.apply_updated(status.clone().with_status(Status::Lost));
                }
                let default = self.describe_default();
                self.log(step, tag, format!("{id} lost; default {default}"));
                self.sync_networks(step);
            }

            Step::Remove { id } => {
                let id = self.known(step, &id)?;
                self.observer.apply_removed(&id);
                let default = self.describe_default();
                self.log(step, tag, format!("{id} removed; default {default}"));
                self.sync_networks(step);
            }

            Step::Purge => {
                let purged = self.observer.purge_expired();
                self.log(step, tag, format!("{purged} lost interface(s) purged"));
                self.sync_networks(step);
            }

            Step::Platform { kind, behavior } => {
                let parsed_kind =
                    NetworkKind::parse(&kind).map_err(|e| CliError::validation(field("kind"), e))?;
                let parsed = parse_behavior(&field("behavior"), &behavior)?;
                self.platform.set_behavior(parsed_kind, parsed);
                self.log(step, tag, format!("{parsed_kind} now answers {behavior}"));
            }

            Step::Request {
                name,
                request,
                wait,
                count,
                allow_metered,
            } => {
                if count == 0 {
                    return Err(CliError::validation(field("count"), "must be at least 1"));
                }
                let request = util::parse_request(&request)?;
                let intent = if allow_metered {
                    CallerIntent::allow_metered()
                } else {
                    CallerIntent::default()
                };
                let networks = self.observer.snapshot();

                if !self.engine.is_high_bandwidth(request) {
                    let line = match self.engine.preferred_network(request, &networks, &intent) {
                        Some(status) => {
                            format!("{name}: {request} uses {} ({})", status.id, status.kind())
                        }
                        None => format!("{name}: {request} denied, no acceptable network"),
                    };
                    self.log(step, tag, line);
                    return Ok(());
                }

                let wait = match wait.as_deref().map(str::trim) {
                    None | Some("fail-fast") => WaitPolicy::FailFast,
                    Some(raw) => WaitPolicy::WaitUpTo(util::parse_duration(&field("wait"), raw)?),
                };
                let lease_request = self
                    .engine
                    .high_bandwidth_request(request, &networks, &intent, wait);

                let mediator = &self.mediator;
                let attempts =
                    (0..count).map(|_| mediator.request_high_bandwidth_network(&lease_request));
                let granted: Vec<Lease> = join_all(attempts).await.into_iter().flatten().collect();

                let mut kinds: Vec<NetworkKind> = granted.iter().map(Lease::granted_type).collect();
                kinds.dedup();
                let line = format!(
                    "{name}: {request} over [{}]: {} of {count} granted{}",
                    util::join_kinds(&lease_request.acceptable),
                    granted.len(),
                    if kinds.is_empty() {
                        String::new()
                    } else {
                        format!(" on {}", util::join_kinds(&kinds))
                    }
                );
                if !granted.is_empty() {
                    self.leases.entry(name).or_default().extend(granted);
                }
                self.log(step, tag, line);
            }

            Step::Close { name } => {
                let leases = self.leases.remove(&name).ok_or_else(|| CliError::NotFound {
                    resource_type: "lease".into(),
                    identifier: name.clone(),
                    hint: "Leases are named by the request step that obtained them.".into(),
                })?;
                let closed = leases.len();
                let kinds: BTreeSet<NetworkKind> = leases.iter().map(Lease::granted_type).collect();
                for lease in &leases {
                    lease.close();
                }
                let remaining = kinds
                    .iter()
                    .map(|kind| format!("{kind} held by {}", self.mediator.ref_count(*kind)))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.log(step, tag, format!("{name}: {closed} closed; {remaining}"));
            }

            Step::Record { id, request, bytes } => {
                let request = util::parse_request(&request)?;
                let bytes = bytes.resolve(&field("bytes"))?;
                let record = self.ledger.record(id.as_str(), request, bytes, Utc::now());
                self.log(
                    step,
                    tag,
                    format!(
                        "{} on {} ({}) for {request}",
                        human_bytes(bytes),
                        record.network_id,
                        record.network_kind
                    ),
                );
            }

            Step::Sleep { duration } => {
                let duration: Duration = util::parse_duration(&field("duration"), &duration)?;
                tokio::time::sleep(duration).await;
                self.log(step, tag, humantime::format_duration(duration).to_string());
            }

            Step::Usage => {
                let period = self.ledger.current_period_usage();
                self.log(step, tag, usage_line(&period));
            }
        }
        Ok(())
    }

    fn summary(&self) -> Summary {
        Summary {
            open_leases: self
                .leases
                .iter()
                .map(|(name, leases)| (name.clone(), leases.iter().filter(|l| l.is_valid()).count()))
                .collect(),
            active: self.mediator.active_types(),
            pinned: self.mediator.pinned().latest().as_ref().clone(),
            platform: KINDS
                .iter()
                .map(|&kind| PlatformCount {
                    kind,
                    requests: self.platform.request_count(kind),
                    clears: self.platform.clear_count(kind),
                })
                .filter(|p| p.requests > 0 || p.clears > 0)
                .collect(),
            usage: self.ledger.current_period_usage().as_ref().clone(),
        }
    }

    async fn finish(self) -> (Vec<Event>, Summary) {
        let summary = self.summary();
        self.cancel.cancel();
        self.mediator.shutdown().await;
        (self.timeline, summary)
    }
}

// ── Handler ─────────────────────────────────────────────────────────

fn load_script(path: &Path) -> Result<Script, CliError> {
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|source| CliError::Script {
        path: path.display().to_string(),
        source,
    })
}

async fn run(config: &Config, script: Script) -> Result<(Vec<Event>, Summary), CliError> {
    let platform = build_platform(&script.platform)?;
    let mut sim = Simulation::new(config, platform)?;
    for (idx, step) in script.steps.into_iter().enumerate() {
        if let Err(err) = sim.run_step(idx, step).await {
            sim.finish().await;
            return Err(err);
        }
    }
    Ok(sim.finish().await)
}

pub async fn handle(args: &SimulateArgs, ctx: &Context) -> Result<(), CliError> {
    let script = load_script(&args.script)?;
    let (timeline, summary) = run(&ctx.config, script).await?;

    let report = SimulationReport {
        script: args.script.clone(),
        timeline,
        summary,
    };
    let out = output::render_single(
        ctx.output,
        &report,
        |r| detail(r, ctx.color),
        |r| {
            r.timeline
                .iter()
                .map(|e| format!("{} {} {}", e.step, e.op, e.detail))
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
