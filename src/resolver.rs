//! Page-load orchestration for the payment return page.
//!
//! One call per page load: normalise the reference, walk the strategy chain,
//! reconcile a failed redirect, and hand a single payload to the view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::entity::{EntityKind, ResolvedEntity};
use crate::error::ResolveError;
use crate::hint::{ReturnRedirect, StatusHint};
use crate::reconcile::{reconcile, ReconciliationOutcome};
use crate::reference::normalize_reference;
use crate::store::{OrderStore, ReservationStore};
use crate::strategy::{run_chain, LookupAttempt};

/// Where a page load currently is. Used to report where an abandoned load
/// stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPhase {
    Start,
    Normalizing,
    Resolving,
    Reconciling,
    Done,
}

/// Everything the result view needs from one page load.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub load_id: Uuid,
    pub reference: String,
    pub hint: StatusHint,
    pub entity: ResolvedEntity,
    pub reconciliation: ReconciliationOutcome,
    pub attempts: Vec<LookupAttempt>,
    pub resolved_at: DateTime<Utc>,
}

impl Resolution {
    pub fn kind(&self) -> EntityKind {
        self.entity.kind()
    }

    /// Payload consumed by the result view.
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "kind": self.kind().as_str(),
            "reconciliation": self.reconciliation,
            "referenceNumber": self.reference,
            "statusHint": self.hint,
            "attempts": self.attempts,
            "loadId": self.load_id.to_string(),
            "resolvedAt": self.resolved_at.to_rfc3339(),
        });
        if let Some(entity) = self.entity.to_value() {
            payload["entity"] = entity;
        }
        payload
    }
}

#[derive(Clone)]
pub struct PaymentReturnResolver {
    orders: Arc<dyn OrderStore>,
    reservations: Arc<dyn ReservationStore>,
}

impl PaymentReturnResolver {
    pub fn new(orders: Arc<dyn OrderStore>, reservations: Arc<dyn ReservationStore>) -> Self {
        Self {
            orders,
            reservations,
        }
    }

    /// Resolve straight from the gateway's return URL.
    pub async fn resolve_redirect(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let redirect = ReturnRedirect::parse(url)?;
        self.resolve(redirect.reference.as_deref(), redirect.hint, cancel)
            .await
    }

    /// Resolve a reference and reconcile it against the hint.
    ///
    /// A reference that matches nothing is `Ok` with kind `not_found`; the
    /// only errors are a missing reference, a bad URL and abandonment.
    pub async fn resolve(
        &self,
        reference: Option<&str>,
        hint: StatusHint,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let reference = reference
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or(ResolveError::MissingReference)?;

        let load_id = Uuid::new_v4();
        let span = info_span!(
            "payment_return",
            load_id = %load_id,
            reference = %reference,
            hint = ?hint,
        );
        self.run(load_id, reference, hint, cancel)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        load_id: Uuid,
        reference: &str,
        hint: StatusHint,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let mut phase = ResolutionPhase::Start;
        let abandoned = |phase| ResolveError::Abandoned { phase };

        advance(&mut phase, ResolutionPhase::Normalizing);
        let candidates = normalize_reference(reference);

        advance(&mut phase, ResolutionPhase::Resolving);
        let chain = run_chain(
            &candidates,
            self.orders.as_ref(),
            self.reservations.as_ref(),
            cancel,
        )
        .await
        .map_err(|_| abandoned(phase))?;

        let mut entity = chain.entity;
        let reconciliation = if entity == ResolvedEntity::NotFound {
            ReconciliationOutcome::NoActionNeeded
        } else {
            advance(&mut phase, ResolutionPhase::Reconciling);
            if cancel.is_cancelled() {
                return Err(abandoned(phase));
            }
            let outcome = reconcile(
                &mut entity,
                hint,
                self.orders.as_ref(),
                self.reservations.as_ref(),
            )
            .await;
            if cancel.is_cancelled() {
                return Err(abandoned(phase));
            }
            outcome
        };

        advance(&mut phase, ResolutionPhase::Done);
        info!(
            kind = entity.kind().as_str(),
            id = entity.id().unwrap_or_default(),
            attempts = chain.attempts.len(),
            reconciliation = ?reconciliation,
            "Payment return resolved"
        );

        Ok(Resolution {
            load_id,
            reference: reference.to_string(),
            hint,
            entity,
            reconciliation,
            attempts: chain.attempts,
            resolved_at: Utc::now(),
        })
    }
}

fn advance(phase: &mut ResolutionPhase, next: ResolutionPhase) {
    tracing::debug!(from = ?*phase, to = ?next, "Resolution phase");
    *phase = next;
}
