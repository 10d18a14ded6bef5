use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker that precedes the numeric item token inside an inspection reference.
const TOKEN_MARKER: char = 'M';

/// Stable key for one inspectable item instance.
///
/// Used both as the result cache key and as the correlation key for
/// coordinator requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for Fingerprint {
    fn from(item_id: u64) -> Self {
        Self(item_id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("reference does not contain an item token")]
    InvalidReference,
}

/// Extracts the fingerprint from an inspection reference.
///
/// The token is the run of ASCII digits directly after the first `M` that is
/// followed by at least one digit (`...%20M12345A678D9` yields `12345`). It is
/// read as a `u64` item id, so `M00042` and `M42` share a fingerprint and the
/// key matches the one built from a coordinator response. Tokens that do not
/// fit a `u64` are rejected.
pub fn extract(reference: &str) -> Result<Fingerprint, ExtractionError> {
    let mut rest = reference.trim();
    while let Some(offset) = rest.find(TOKEN_MARKER) {
        let candidate = &rest[offset + TOKEN_MARKER.len_utf8()..];
        let digits = candidate
            .bytes()
            .take_while(|byte| byte.is_ascii_digit())
            .count();
        if digits > 0 {
            return candidate[..digits]
                .parse::<u64>()
                .map(Fingerprint::from)
                .map_err(|_| ExtractionError::InvalidReference);
        }
        rest = candidate;
    }
    Err(ExtractionError::InvalidReference)
}

/// Builds a canonical inspection reference around `token`.
pub fn embed(token: &str) -> String {
    format!("steam://rungame/730/0/+csgo_econ_action_preview%20{TOKEN_MARKER}{token}A0D0")
}
