//! Duration strings as written by yt-dlp (`ss`, `mm:ss`, `hh:mm:ss`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for duration parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("malformed duration '{0}': expected ss, mm:ss or hh:mm:ss")]
    MalformedDuration(String),
}

/// Parses a colon-delimited duration into total seconds.
///
/// Each part must be a plain base-10 unsigned integer: no signs, no
/// fractions, no surrounding whitespace.
pub fn parse_duration(input: &str) -> Result<u64, DurationError> {
    let malformed = || DurationError::MalformedDuration(input.to_string());

    let parts = input
        .split(':')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            part.parse::<u64>().map_err(|_| malformed())
        })
        .collect::<Result<Vec<_>, _>>()?;

    let seconds = match parts.as_slice() {
        [s] => Some(*s),
        [m, s] => m.checked_mul(60).and_then(|m| m.checked_add(*s)),
        [h, m, s] => h
            .checked_mul(3600)
            .and_then(|h| m.checked_mul(60).and_then(|m| h.checked_add(m)))
            .and_then(|hm| hm.checked_add(*s)),
        _ => None,
    };

    seconds.ok_or_else(malformed)
}

/// Total seconds, deserialized from a `duration_string` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "u64")]
pub struct DurationSecs(pub u64);

impl TryFrom<String> for DurationSecs {
    type Error = DurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_duration(&value).map(DurationSecs)
    }
}

impl From<DurationSecs> for u64 {
    fn from(d: DurationSecs) -> Self {
        d.0
    }
}
