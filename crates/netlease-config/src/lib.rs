//! Configuration for netlease.
//!
//! One TOML file layered under `NETLEASE_*` environment overrides, and
//! translation into `netlease_core` runtime types: the policy table plus
//! observer, mediator and usage tuning. Durations are written the human
//! way (`500ms`, `24h`) and validated on translation, so errors name the
//! offending key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use netlease_core::{
    LedgerConfig, MediatorConfig, Modifier, NetworkKind, ObserverConfig, PeriodWindow, PolicyEntry,
    PolicyRule, PolicyTable, RequestType,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub observer: ObserverSection,

    #[serde(default)]
    pub mediator: MediatorSection,

    #[serde(default)]
    pub usage: UsageSection,

    /// Per-request-type policy, keyed by request type name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub policy: IndexMap<String, PolicySection>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Start from the built-in conservative policy; `[policy.*]` sections
    /// replace individual request types on top of it.
    #[serde(default = "default_true")]
    pub builtin_policy: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            builtin_policy: true,
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObserverSection {
    /// How long a lost interface stays visible before it is purged.
    #[serde(default = "default_lost_grace")]
    pub lost_grace: String,
}

impl Default for ObserverSection {
    fn default() -> Self {
        Self {
            lost_grace: default_lost_grace(),
        }
    }
}

fn default_lost_grace() -> String {
    "5s".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MediatorSection {
    /// Upper bound on a fail-fast request's wait for the platform.
    #[serde(default = "default_fail_fast_grace")]
    pub fail_fast_grace: String,
}

impl Default for MediatorSection {
    fn default() -> Self {
        Self {
            fail_fast_grace: default_fail_fast_grace(),
        }
    }
}

fn default_fail_fast_grace() -> String {
    "500ms".into()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageMode {
    #[default]
    Rolling,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UsageSection {
    #[serde(default)]
    pub mode: UsageMode,

    #[serde(default = "default_window")]
    pub window: String,

    /// RFC 3339 start of the first fixed period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,

    /// Periodic recomputation interval, or `"off"`.
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,
}

impl Default for UsageSection {
    fn default() -> Self {
        Self {
            mode: UsageMode::default(),
            window: default_window(),
            anchor: None,
            tick_interval: default_tick_interval(),
        }
    }
}

fn default_window() -> String {
    "24h".into()
}
fn default_tick_interval() -> String {
    "1m".into()
}

/// Preferences for one request type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PolicySection {
    #[serde(default)]
    pub high_bandwidth: bool,

    /// Most preferred first.
    #[serde(default)]
    pub prefer: Vec<Preference>,
}

/// A preference: either a bare kind or a kind with modifiers.
///
/// ```toml
/// prefer = ["wifi", { kind = "cellular", modifiers = ["not-roaming"] }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Preference {
    Kind(String),
    Detailed {
        kind: String,
        #[serde(default)]
        modifiers: Vec<String>,
    },
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "netlease", "netlease").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("netlease");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Provider stack for `path`: defaults, then the file, then environment.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NETLEASE_").split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment. A missing file yields
/// the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment_for(path).extract()?;
    Ok(config)
}

/// Load config, returning a default if it can't be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to runtime types ────────────────────────────────────

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|e| invalid(field, format!("'{raw}': {e}")))
}

impl Config {
    /// A config with the built-in policy written out, suitable as a
    /// starting file.
    pub fn with_builtin_policy() -> Self {
        Self {
            policy: policy_sections(&PolicyTable::conservative()),
            ..Self::default()
        }
    }

    /// Check every section, reporting the first invalid key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.observer_config()?;
        self.mediator_config()?;
        self.ledger_config()?;
        self.policy_table()?;
        Ok(())
    }

    pub fn observer_config(&self) -> Result<ObserverConfig, ConfigError> {
        Ok(ObserverConfig {
            lost_grace: parse_duration("observer.lost_grace", &self.observer.lost_grace)?,
        })
    }

    pub fn mediator_config(&self) -> Result<MediatorConfig, ConfigError> {
        Ok(MediatorConfig {
            fail_fast_grace: parse_duration(
                "mediator.fail_fast_grace",
                &self.mediator.fail_fast_grace,
            )?,
        })
    }

    pub fn ledger_config(&self) -> Result<LedgerConfig, ConfigError> {
        let usage = &self.usage;
        let length = parse_duration("usage.window", &usage.window)?;
        if length.is_zero() {
            return Err(invalid("usage.window", "must be greater than zero"));
        }

        let window = match usage.mode {
            UsageMode::Rolling => PeriodWindow::Rolling(length),
            UsageMode::Fixed => {
                let raw = usage
                    .anchor
                    .as_deref()
                    .ok_or_else(|| invalid("usage.anchor", "required when mode = \"fixed\""))?;
                let anchor = DateTime::parse_from_rfc3339(raw.trim())
                    .map_err(|e| invalid("usage.anchor", format!("'{raw}': {e}")))?
                    .with_timezone(&Utc);
                PeriodWindow::Fixed { length, anchor }
            }
        };

        let tick_interval = match usage.tick_interval.trim() {
            "off" | "none" | "" => None,
            raw => {
                let tick = parse_duration("usage.tick_interval", raw)?;
                if tick.is_zero() {
                    return Err(invalid("usage.tick_interval", "use \"off\" to disable"));
                }
                Some(tick)
            }
        };

        Ok(LedgerConfig {
            window,
            tick_interval,
        })
    }

    /// Build the policy table: the built-in table (unless disabled) with
    /// each `[policy.<request-type>]` section replacing its entry.
    pub fn policy_table(&self) -> Result<PolicyTable, ConfigError> {
        let mut table = if self.defaults.builtin_policy {
            PolicyTable::conservative()
        } else {
            PolicyTable::new()
        };

        for (name, section) in &self.policy {
            let field = format!("policy.{name}");
            let request: RequestType = name.parse::<RequestType>().map_err(|e| invalid(&field, e.to_string()))?;
            table.insert(request, section.to_rule(&field)?);
        }
        Ok(table)
    }
}

impl PolicySection {
    fn to_rule(&self, field: &str) -> Result<PolicyRule, ConfigError> {
        let preferences = self
            .prefer
            .iter()
            .enumerate()
            .map(|(idx, pref)| pref.to_entry(&format!("{field}.prefer[{idx}]")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PolicyRule {
            preferences,
            high_bandwidth: self.high_bandwidth,
        })
    }
}

impl Preference {
    fn to_entry(&self, field: &str) -> Result<PolicyEntry, ConfigError> {
        let (kind, modifiers) = match self {
            Self::Kind(kind) => (kind, &[] as &[String]),
            Self::Detailed { kind, modifiers } => (kind, modifiers.as_slice()),
        };

        let kind = NetworkKind::parse(kind).map_err(|e| invalid(field, e.to_string()))?;
        let modifiers = modifiers
            .iter()
            .map(|raw| {
                raw.parse::<Modifier>()
                    .map_err(|e| invalid(format!("{field}.modifiers"), e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PolicyEntry { kind, modifiers })
    }
}

/// Render a policy table back into config sections.
pub fn policy_sections(table: &PolicyTable) -> IndexMap<String, PolicySection> {
    table
        .iter()
        .map(|(request, rule)| {
            let prefer = rule
                .preferences
                .iter()
                .map(|entry| {
                    if entry.modifiers.is_empty() {
                        Preference::Kind(entry.kind.to_string())
                    } else {
                        Preference::Detailed {
                            kind: entry.kind.to_string(),
                            modifiers: entry.modifiers.iter().map(ToString::to_string).collect(),
                        }
                    }
                })
                .collect();
            (
                request.to_string(),
                PolicySection {
                    high_bandwidth: rule.high_bandwidth,
                    prefer,
                },
            )
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn defaults_translate() {
        let cfg = Config::default();
        assert_eq!(cfg.observer_config().unwrap(), ObserverConfig::default());
        assert_eq!(cfg.mediator_config().unwrap(), MediatorConfig::default());
        assert_eq!(cfg.ledger_config().unwrap(), LedgerConfig::default());
        assert_eq!(cfg.policy_table().unwrap(), PolicyTable::conservative());
    }

    #[test]
    fn human_durations_parse() {
        let cfg = parse(
            r#"
            [observer]
            lost_grace = "2s 500ms"
            [mediator]
            fail_fast_grace = "250ms"
            "#,
        );
        assert_eq!(
            cfg.observer_config().unwrap().lost_grace,
            Duration::from_millis(2500)
        );
        assert_eq!(
            cfg.mediator_config().unwrap().fail_fast_grace,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn bad_duration_names_the_field() {
        let cfg = parse("[mediator]\nfail_fast_grace = \"soon\"\n");
        let err = cfg.validate().unwrap_err();
        assert!(
            matches!(&err, ConfigError::Validation { field, .. } if field == "mediator.fail_fast_grace"),
            "{err}"
        );
    }

    #[test]
    fn fixed_usage_requires_anchor() {
        let cfg = parse("[usage]\nmode = \"fixed\"\nwindow = \"30d\"\n");
        let err = cfg.ledger_config().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { field, .. } if field == "usage.anchor"));

        let cfg = parse(
            "[usage]\nmode = \"fixed\"\nwindow = \"30d\"\nanchor = \"2024-01-01T00:00:00Z\"\ntick_interval = \"off\"\n",
        );
        let ledger = cfg.ledger_config().unwrap();
        assert!(matches!(ledger.window, PeriodWindow::Fixed { .. }));
        assert_eq!(ledger.tick_interval, None);
    }

    #[test]
    fn policy_section_overrides_builtin_entry() {
        let cfg = parse(
            r#"
            [policy.logs-upload]
            prefer = ["wifi", { kind = "cellular", modifiers = ["not-roaming", "min-bandwidth:2000"] }]
            "#,
        );
        let table = cfg.policy_table().unwrap();
        let rule = table.get(RequestType::LogsUpload).unwrap();

        assert_eq!(rule.preferences.len(), 2);
        assert_eq!(
            rule.preferences[1].modifiers,
            vec![Modifier::NotRoaming, Modifier::MinBandwidthKbps(2000)]
        );
        // Untouched request types keep the built-in rule.
        assert_eq!(
            table.get(RequestType::Sync),
            PolicyTable::conservative().get(RequestType::Sync)
        );
    }

    #[test]
    fn builtin_policy_can_be_disabled() {
        let cfg = parse(
            r#"
            [defaults]
            builtin_policy = false
            [policy.api]
            prefer = ["bluetooth"]
            "#,
        );
        let table = cfg.policy_table().unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get(RequestType::Sync).is_none());
    }

    #[test]
    fn invalid_policy_reports_path() {
        let cfg = parse("[policy.sync]\nprefer = [{ kind = \"wifi\", modifiers = [\"fast\"] }]\n");
        let err = cfg.policy_table().unwrap_err();
        assert!(
            matches!(&err, ConfigError::Validation { field, .. } if field == "policy.sync.prefer[0].modifiers"),
            "{err}"
        );

        let cfg = parse("[policy.telemetry]\nprefer = [\"wifi\"]\n");
        assert!(matches!(
            cfg.policy_table().unwrap_err(),
            ConfigError::Validation { field, .. } if field == "policy.telemetry"
        ));
    }

    #[test]
    fn builtin_policy_sections_translate_back() {
        let cfg = Config::with_builtin_policy();
        assert_eq!(cfg.policy.len(), RequestType::ALL.len());
        assert_eq!(cfg.policy_table().unwrap(), PolicyTable::conservative());
    }
}
