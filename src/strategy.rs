//! Ordered lookup chain for a normalised reference.
//!
//! The chain is a fixed table, most specific format first. Each row names a
//! strategy, the candidate it looks up and the store it asks. The first row
//! that finds a record wins and nothing after it runs, so a later, looser
//! format can never shadow an earlier exact match.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::entity::ResolvedEntity;
use crate::reference::{CandidateRule, CandidateSet};
use crate::store::{OrderStore, ReservationStore, StoreKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStrategy {
    ReservationExact,
    OrderExact,
    ReservationWithAddedPrefix,
    ReservationQfSpecialForm,
}

/// One row of the chain. `candidate` returns `None` when the row does not
/// apply to the reference.
pub struct StrategyRow {
    pub strategy: LookupStrategy,
    pub target: StoreKind,
    pub candidate: fn(&CandidateSet) -> Option<&str>,
}

fn reservation_form(set: &CandidateSet) -> Option<&str> {
    Some(set.reservation_form()).filter(|c| c.starts_with("RES-"))
}

fn raw_reference(set: &CandidateSet) -> Option<&str> {
    Some(set.raw())
}

fn added_prefix(set: &CandidateSet) -> Option<&str> {
    if set.raw_has_reservation_prefix() {
        return None;
    }
    set.get(CandidateRule::AddedPrefix)
}

fn qf_form(set: &CandidateSet) -> Option<&str> {
    set.get(CandidateRule::QfForm)
}

pub const STRATEGY_CHAIN: [StrategyRow; 4] = [
    StrategyRow {
        strategy: LookupStrategy::ReservationExact,
        target: StoreKind::Reservation,
        candidate: reservation_form,
    },
    StrategyRow {
        strategy: LookupStrategy::OrderExact,
        target: StoreKind::Order,
        candidate: raw_reference,
    },
    StrategyRow {
        strategy: LookupStrategy::ReservationWithAddedPrefix,
        target: StoreKind::Reservation,
        candidate: added_prefix,
    },
    StrategyRow {
        strategy: LookupStrategy::ReservationQfSpecialForm,
        target: StoreKind::Reservation,
        candidate: qf_form,
    },
];

/// A lookup the chain will perform, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedLookup {
    pub strategy: LookupStrategy,
    pub store: StoreKind,
    pub candidate: String,
}

/// Expand the table against one candidate set.
///
/// Rows that do not apply are dropped, and a row that would repeat a
/// (store, id) pair already planned is dropped too: the store already
/// answered for that id.
pub fn plan(set: &CandidateSet) -> Vec<PlannedLookup> {
    let mut planned: Vec<PlannedLookup> = Vec::with_capacity(STRATEGY_CHAIN.len());
    for row in &STRATEGY_CHAIN {
        let Some(candidate) = (row.candidate)(set) else {
            continue;
        };
        let duplicate = planned
            .iter()
            .any(|p| p.store == row.target && p.candidate == candidate);
        if duplicate {
            continue;
        }
        planned.push(PlannedLookup {
            strategy: row.strategy,
            store: row.target,
            candidate: candidate.to_string(),
        });
    }
    planned
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Matched,
    NotFound,
    Failed { error: String },
}

/// Record of one lookup that actually ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupAttempt {
    pub strategy: LookupStrategy,
    pub store: StoreKind,
    pub candidate: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub entity: ResolvedEntity,
    pub attempts: Vec<LookupAttempt>,
}

impl ChainOutcome {
    pub fn matched_by(&self) -> Option<LookupStrategy> {
        self.attempts
            .iter()
            .find(|a| a.outcome == AttemptOutcome::Matched)
            .map(|a| a.strategy)
    }
}

/// The caller went away while a lookup was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainCancelled;

/// Run the planned lookups one at a time until one matches.
///
/// Not-found and transport failures are both absorbed per attempt; only when
/// every lookup has come back empty is the result `NotFound`. Lookups are
/// raced against `cancel` and an in-flight lookup is dropped when it fires.
pub async fn run_chain(
    set: &CandidateSet,
    orders: &dyn OrderStore,
    reservations: &dyn ReservationStore,
    cancel: &CancellationToken,
) -> Result<ChainOutcome, ChainCancelled> {
    let mut attempts = Vec::new();

    for lookup in plan(set) {
        if cancel.is_cancelled() {
            return Err(ChainCancelled);
        }

        let found = match lookup.store {
            StoreKind::Order => {
                let call = orders.find_order(&lookup.candidate);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ChainCancelled),
                    res = call => res.map(ResolvedEntity::Order),
                }
            }
            StoreKind::Reservation => {
                let call = reservations.find_reservation(&lookup.candidate);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ChainCancelled),
                    res = call => res.map(ResolvedEntity::Reservation),
                }
            }
        };

        match found {
            Ok(entity) => {
                debug!(
                    strategy = ?lookup.strategy,
                    candidate = %lookup.candidate,
                    "Reference matched"
                );
                attempts.push(LookupAttempt {
                    strategy: lookup.strategy,
                    store: lookup.store,
                    candidate: lookup.candidate,
                    outcome: AttemptOutcome::Matched,
                });
                return Ok(ChainOutcome { entity, attempts });
            }
            Err(err) if err.is_not_found() => {
                debug!(
                    strategy = ?lookup.strategy,
                    candidate = %lookup.candidate,
                    "No match, trying next strategy"
                );
                attempts.push(LookupAttempt {
                    strategy: lookup.strategy,
                    store: lookup.store,
                    candidate: lookup.candidate,
                    outcome: AttemptOutcome::NotFound,
                });
            }
            Err(err) => {
                warn!(
                    strategy = ?lookup.strategy,
                    store = lookup.store.as_str(),
                    candidate = %lookup.candidate,
                    error = %err,
                    "Lookup failed, trying next strategy"
                );
                attempts.push(LookupAttempt {
                    strategy: lookup.strategy,
                    store: lookup.store,
                    candidate: lookup.candidate,
                    outcome: AttemptOutcome::Failed {
                        error: err.to_string(),
                    },
                });
            }
        }
    }

    Ok(ChainOutcome {
        entity: ResolvedEntity::NotFound,
        attempts,
    })
}
