//! Shared helpers for command handlers.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use netlease_core::{Capabilities, NetworkKind, NetworkStatus, NetworkType, RequestType, Status};

use crate::error::CliError;

/// Parse a request type name.
pub fn parse_request(raw: &str) -> Result<RequestType, CliError> {
    Ok(raw.parse::<RequestType>()?)
}

/// Parse a human duration (`250ms`, `2s`).
pub fn parse_duration(field: &str, raw: &str) -> Result<Duration, CliError> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| CliError::validation(field, format!("'{raw}': {e}")))
}

/// Comma-separated kinds, or `-` when empty.
pub fn join_kinds(kinds: &[NetworkKind]) -> String {
    if kinds.is_empty() {
        return "-".into();
    }
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Network specs ───────────────────────────────────────────────────

#[derive(Default)]
struct SpecFields {
    id: Option<String>,
    status: Option<Status>,
    ssid: Option<String>,
    signal: Option<i32>,
    carrier: Option<String>,
    roaming: bool,
    device: Option<String>,
    metered: bool,
    bandwidth: Option<u64>,
    addresses: BTreeSet<IpAddr>,
}

/// Parse `<kind>[:<key>[=<value>],...]` into an interface status.
///
/// Interfaces without an `id` are named after their kind and `index`
/// (`wifi0`, `cellular1`). Status defaults to available.
pub fn parse_network_spec(raw: &str, index: usize) -> Result<NetworkStatus, CliError> {
    let field = format!("network '{raw}'");
    let (kind_raw, rest) = raw.split_once(':').unwrap_or((raw, ""));
    let kind = NetworkKind::parse(kind_raw).map_err(|e| CliError::validation(&field, e))?;

    let mut spec = SpecFields::default();
    for pair in rest.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (pair, None),
        };
        apply_key(&mut spec, kind, key, value)
            .map_err(|reason| CliError::validation(&field, reason))?;
    }

    let network_type = match kind {
        NetworkKind::Wifi => NetworkType::Wifi {
            ssid: spec.ssid,
            signal_level: spec.signal,
        },
        NetworkKind::Cellular => NetworkType::Cellular {
            carrier: spec.carrier,
            roaming: spec.roaming,
        },
        NetworkKind::Bluetooth => NetworkType::Bluetooth {
            paired_device_id: spec.device,
        },
        NetworkKind::Unknown => NetworkType::Unknown,
    };
    let id = spec.id.unwrap_or_else(|| format!("{kind}{index}"));

    Ok(
        NetworkStatus::new(id, network_type, spec.status.unwrap_or(Status::Available))
            .with_addresses(spec.addresses)
            .with_capabilities(Capabilities {
                metered: spec.metered,
                estimated_bandwidth_kbps: spec.bandwidth,
            }),
    )
}

fn apply_key(
    spec: &mut SpecFields,
    kind: NetworkKind,
    key: &str,
    value: Option<&str>,
) -> Result<(), String> {
    let only_for = |wanted: NetworkKind| {
        if kind == wanted {
            Ok(())
        } else {
            Err(format!("'{key}' only applies to {wanted}"))
        }
    };

    match (key, value) {
        ("id", Some(v)) => spec.id = Some(v.to_owned()),
        ("status", Some(v)) => spec.status = Some(parse_value(key, v)?),
        ("ssid", Some(v)) => {
            only_for(NetworkKind::Wifi)?;
            spec.ssid = Some(v.to_owned());
        }
        ("signal", Some(v)) => {
            only_for(NetworkKind::Wifi)?;
            spec.signal = Some(parse_value(key, v)?);
        }
        ("carrier", Some(v)) => {
            only_for(NetworkKind::Cellular)?;
            spec.carrier = Some(v.to_owned());
        }
        ("roaming", v) => {
            only_for(NetworkKind::Cellular)?;
            spec.roaming = v.map_or(Ok(true), |v| parse_value(key, v))?;
        }
        ("device", Some(v)) => {
            only_for(NetworkKind::Bluetooth)?;
            spec.device = Some(v.to_owned());
        }
        ("metered", v) => spec.metered = v.map_or(Ok(true), |v| parse_value(key, v))?,
        ("bandwidth", Some(v)) => spec.bandwidth = Some(parse_value(key, v)?),
        ("addr", Some(v)) => {
            spec.addresses.insert(parse_value(key, v)?);
        }
        (
            "id" | "status" | "ssid" | "signal" | "carrier" | "device" | "bandwidth" | "addr",
            None,
        ) => return Err(format!("'{key}' needs a value")),
        _ => return Err(format!("unknown key '{key}'")),
    }
    Ok(())
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| format!("{key}: '{raw}': {e}"))
}
