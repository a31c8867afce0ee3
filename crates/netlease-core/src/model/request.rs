// ── Request purpose and high-bandwidth request types ──

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::network::NetworkKind;
use crate::error::CoreError;

/// What a media request is for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MediaRequestKind {
    Download,
    Playback,
    Live,
}

/// Why bandwidth is wanted. Carries no state; used as a policy lookup key.
///
/// Rendered as a kebab-case name (`media-download`, `sync`, ...), which is
/// also its serde representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RequestType {
    Media(MediaRequestKind),
    Sync,
    Image,
    Api,
    LogsUpload,
}

impl RequestType {
    /// Every request type, in display order.
    pub const ALL: [Self; 7] = [
        Self::Media(MediaRequestKind::Download),
        Self::Media(MediaRequestKind::Playback),
        Self::Media(MediaRequestKind::Live),
        Self::Sync,
        Self::Image,
        Self::Api,
        Self::LogsUpload,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Media(MediaRequestKind::Download) => "media-download",
            Self::Media(MediaRequestKind::Playback) => "media-playback",
            Self::Media(MediaRequestKind::Live) => "media-live",
            Self::Sync => "sync",
            Self::Image => "image",
            Self::Api => "api",
            Self::LogsUpload => "logs-upload",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RequestType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        if let Some(media) = normalized.strip_prefix("media-") {
            return media
                .parse::<MediaRequestKind>()
                .map(Self::Media)
                .map_err(|_| CoreError::UnknownRequestType {
                    value: s.to_owned(),
                });
        }
        match normalized.as_str() {
            "sync" => Ok(Self::Sync),
            "image" => Ok(Self::Image),
            "api" => Ok(Self::Api),
            "logs-upload" | "logs" => Ok(Self::LogsUpload),
            _ => Err(CoreError::UnknownRequestType {
                value: s.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for RequestType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RequestType> for String {
    fn from(value: RequestType) -> Self {
        value.name().to_owned()
    }
}

/// Caller-supplied flags consulted by policy modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIntent {
    /// Explicit opt-in to metered interfaces.
    #[serde(default)]
    pub allow_metered: bool,
}

impl CallerIntent {
    pub fn allow_metered() -> Self {
        Self {
            allow_metered: true,
        }
    }
}

/// How long a lease request may wait for the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitPolicy {
    /// Only wait for an interface that answers almost immediately.
    FailFast,
    /// Wait up to the given duration, across all candidates.
    WaitUpTo(Duration),
}

/// An accepted request for a non-default interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighBandwidthRequest {
    /// Acceptable kinds, most preferred first.
    pub acceptable: Vec<NetworkKind>,
    pub wait: WaitPolicy,
}

impl HighBandwidthRequest {
    pub fn new(acceptable: impl IntoIterator<Item = NetworkKind>, wait: WaitPolicy) -> Self {
        Self {
            acceptable: acceptable.into_iter().collect(),
            wait,
        }
    }

    pub fn fail_fast(acceptable: impl IntoIterator<Item = NetworkKind>) -> Self {
        Self::new(acceptable, WaitPolicy::FailFast)
    }

    pub fn wait_up_to(
        acceptable: impl IntoIterator<Item = NetworkKind>,
        timeout: Duration,
    ) -> Self {
        Self::new(acceptable, WaitPolicy::WaitUpTo(timeout))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn request_type_names_round_trip() {
        for request in RequestType::ALL {
            assert_eq!(request.name().parse::<RequestType>().unwrap(), request);
        }
    }

    #[test]
    fn request_type_accepts_loose_spellings() {
        assert_eq!(
            "MEDIA_DOWNLOAD".parse::<RequestType>().unwrap(),
            RequestType::Media(MediaRequestKind::Download)
        );
        assert_eq!("logs".parse::<RequestType>().unwrap(), RequestType::LogsUpload);
    }

    #[test]
    fn request_type_rejects_unknown() {
        assert!(matches!(
            "media-podcast".parse::<RequestType>(),
            Err(CoreError::UnknownRequestType { .. })
        ));
        assert!("telemetry".parse::<RequestType>().is_err());
    }

    #[test]
    fn request_type_serializes_as_name() {
        let json = serde_json::to_string(&RequestType::Media(MediaRequestKind::Live)).unwrap();
        assert_eq!(json, "\"media-live\"");
        let back: RequestType = serde_json::from_str("\"sync\"").unwrap();
        assert_eq!(back, RequestType::Sync);
    }
}
