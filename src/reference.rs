//! Reference number normalisation.
//!
//! Payment gateways echo back whatever reference the checkout handed them,
//! and that reference has been formatted several ways over time:
//! `RES-1001`, `RES1001`, a bare order id like `77`, and QF booking codes
//! that only exist in the reservation store as `RES-QF<digits>`. This module
//! derives every plausible store id from one raw reference without touching
//! any store.

use serde::Serialize;

const RESERVATION_PREFIX: &str = "RES";
const RESERVATION_DASHED_PREFIX: &str = "RES-";
const QF_MARKER: &str = "QF";

/// Which normalisation rule produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateRule {
    Identity,
    DashInserted,
    AddedPrefix,
    QfForm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub rule: CandidateRule,
    pub value: String,
}

/// Ordered candidates derived from one reference.
///
/// Always holds the identity candidate first; the other rules contribute at
/// most one candidate each, in rule order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet {
    raw: String,
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn get(&self, rule: CandidateRule) -> Option<&str> {
        self.candidates
            .iter()
            .find(|c| c.rule == rule)
            .map(|c| c.value.as_str())
    }

    /// Reservation-shaped form of the reference: the dash-inserted candidate
    /// when that rule applied, the raw reference otherwise.
    pub fn reservation_form(&self) -> &str {
        self.get(CandidateRule::DashInserted)
            .unwrap_or_else(|| self.raw())
    }

    pub fn raw_has_reservation_prefix(&self) -> bool {
        self.raw().starts_with(RESERVATION_PREFIX)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}

/// Derive the ordered candidate list for a reference.
///
/// The caller is responsible for rejecting empty references; this function
/// never fails and performs no I/O.
pub fn normalize_reference(reference: &str) -> CandidateSet {
    let raw = reference.trim().to_string();
    let mut candidates = vec![Candidate {
        rule: CandidateRule::Identity,
        value: raw.clone(),
    }];

    let dashed = insert_reservation_dash(&raw);
    if let Some(ref value) = dashed {
        candidates.push(Candidate {
            rule: CandidateRule::DashInserted,
            value: value.clone(),
        });
    }

    if !raw.starts_with(RESERVATION_PREFIX) {
        candidates.push(Candidate {
            rule: CandidateRule::AddedPrefix,
            value: format!("{RESERVATION_DASHED_PREFIX}{raw}"),
        });
    }

    let qf_digits = qf_digit_run(&raw).or_else(|| dashed.as_deref().and_then(qf_digit_run));
    if let Some(digits) = qf_digits {
        candidates.push(Candidate {
            rule: CandidateRule::QfForm,
            value: format!("{RESERVATION_DASHED_PREFIX}{QF_MARKER}{digits}"),
        });
    }

    CandidateSet { raw, candidates }
}

/// `RES1234` -> `RES-1234`. `RES-1234`, bare `RES` and non-RES references
/// yield nothing.
fn insert_reservation_dash(raw: &str) -> Option<String> {
    let rest = raw.strip_prefix(RESERVATION_PREFIX)?;
    if rest.is_empty() || rest.starts_with('-') {
        return None;
    }
    Some(format!("{RESERVATION_DASHED_PREFIX}{rest}"))
}

/// First run of ASCII digits that directly follows a `QF` marker.
fn qf_digit_run(value: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(pos) = value[search_from..].find(QF_MARKER) {
        let digits_start = search_from + pos + QF_MARKER.len();
        let tail = &value[digits_start..];
        let len = tail.bytes().take_while(u8::is_ascii_digit).count();
        if len > 0 {
            return Some(&tail[..len]);
        }
        search_from = digits_start;
    }
    None
}
