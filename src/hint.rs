//! Status hint and reference extraction from the gateway return URL.
//!
//! Gateways send the customer back to `.../{reference}/success`,
//! `.../{reference}/fail`, or a generic result URL with `?reference=...` and
//! a `status` query parameter. A path suffix always beats the query.

use reqwest::Url;
use serde::Serialize;

use crate::error::ResolveError;

const REFERENCE_QUERY_KEYS: &[&str] = &["reference", "ref", "referenceNumber", "reference_number"];
const STATUS_QUERY_KEYS: &[&str] = &["status", "payment_status", "result"];

/// Coarse payment outcome claimed by the redirect, independent of what the
/// backend has stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusHint {
    Paid,
    Failed,
    Pending,
    #[default]
    None,
}

impl StatusHint {
    /// Hint carried by a trailing path segment. Only success and failure
    /// suffixes exist.
    pub fn from_path_suffix(segment: &str) -> Option<Self> {
        match segment.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "paid" => Some(Self::Paid),
            "fail" | "failed" | "failure" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn from_query_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "paid" | "success" | "succeeded" | "completed" => Self::Paid,
            "fail" | "failed" | "failure" | "error" | "declined" | "cancelled" | "canceled" => {
                Self::Failed
            }
            "pending" | "processing" => Self::Pending,
            _ => Self::None,
        }
    }

    /// Combine both sources; the path suffix takes precedence.
    pub fn resolve(path_suffix: Option<&str>, query_status: Option<&str>) -> Self {
        path_suffix
            .and_then(Self::from_path_suffix)
            .or_else(|| query_status.map(Self::from_query_value))
            .unwrap_or_default()
    }
}

/// Reference and hint extracted from one return URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRedirect {
    pub reference: Option<String>,
    pub hint: StatusHint,
}

impl ReturnRedirect {
    pub fn parse(url_raw: &str) -> Result<Self, ResolveError> {
        let url = Url::parse(url_raw.trim())
            .map_err(|e| ResolveError::InvalidRedirect(e.to_string()))?;
        Ok(Self::from_url(&url))
    }

    pub fn from_url(url: &Url) -> Self {
        let segments: Vec<String> = url
            .path_segments()
            .map(|segs| segs.filter(|s| !s.is_empty()).map(percent_decode).collect())
            .unwrap_or_default();

        let suffix_hint = segments
            .last()
            .and_then(|last| StatusHint::from_path_suffix(last));

        let query_reference = first_query_value(url, REFERENCE_QUERY_KEYS);
        let path_reference = if suffix_hint.is_some() && segments.len() >= 2 {
            Some(segments[segments.len() - 2].clone())
        } else {
            None
        };
        let reference = query_reference
            .or(path_reference)
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let query_status = first_query_value(url, STATUS_QUERY_KEYS);
        let hint = StatusHint::resolve(
            segments.last().map(String::as_str),
            query_status.as_deref(),
        );

        Self { reference, hint }
    }
}

fn first_query_value(url: &Url, keys: &[&str]) -> Option<String> {
    for key in keys {
        let found = url
            .query_pairs()
            .find(|(k, v)| k == key && !v.trim().is_empty())
            .map(|(_, v)| v.into_owned());
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Path segments come back percent-encoded; references are plain ASCII in
/// practice but `%2D` and friends do show up from some gateways.
fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(b) = decoded {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
