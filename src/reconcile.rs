//! Failed-payment status correction.
//!
//! When the gateway sends the customer back with a failure but the backend
//! still shows the record as open, the page pushes a single `failed` update.
//! It never promotes anything to `paid`: payment confirmation belongs to the
//! gateway webhook.

use serde::Serialize;
use tracing::{info, warn};

use crate::entity::{OrderStatus, ReservationStatus, ResolvedEntity};
use crate::hint::StatusHint;
use crate::store::{OrderStore, ReservationStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    NoActionNeeded,
    UpdateIssued,
    UpdateFailed { error: String },
}

/// Whether `entity` needs the failed correction for `hint`.
pub fn needs_failed_update(entity: &ResolvedEntity, hint: StatusHint) -> bool {
    if hint != StatusHint::Failed {
        return false;
    }
    match entity {
        ResolvedEntity::Order(order) => !order.status.is_failed_or_cancelled(),
        ResolvedEntity::Reservation(reservation) => !reservation.status.is_failed_or_cancelled(),
        ResolvedEntity::NotFound => false,
    }
}

/// Apply the correction if needed.
///
/// The update is keyed by the resolved record's own id. On success the
/// stored record returned by the store replaces `entity`; on failure
/// `entity` is left as resolved so the page can still show it.
pub async fn reconcile(
    entity: &mut ResolvedEntity,
    hint: StatusHint,
    orders: &dyn OrderStore,
    reservations: &dyn ReservationStore,
) -> ReconciliationOutcome {
    if !needs_failed_update(entity, hint) {
        return ReconciliationOutcome::NoActionNeeded;
    }

    let result = match entity {
        ResolvedEntity::Order(order) => orders
            .update_order_status(&order.id, OrderStatus::Failed)
            .await
            .map(ResolvedEntity::Order),
        ResolvedEntity::Reservation(reservation) => reservations
            .update_reservation_status(&reservation.id, ReservationStatus::Failed)
            .await
            .map(ResolvedEntity::Reservation),
        ResolvedEntity::NotFound => return ReconciliationOutcome::NoActionNeeded,
    };

    match result {
        Ok(updated) => {
            info!(
                kind = updated.kind().as_str(),
                id = updated.id().unwrap_or_default(),
                "Marked as failed after failed payment return"
            );
            *entity = updated;
            ReconciliationOutcome::UpdateIssued
        }
        Err(err) => {
            warn!(
                kind = entity.kind().as_str(),
                id = entity.id().unwrap_or_default(),
                error = %err,
                "Failed-status update rejected, showing stored record"
            );
            ReconciliationOutcome::UpdateFailed {
                error: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Order, Reservation};
    use crate::error::StoreError;
    use crate::store::memory::StoreCall;
    use crate::store::{MemoryStore, StoreKind};

    #[tokio::test]
    async fn test_failed_hint_on_pending_reservation_issues_update() {
        let store = MemoryStore::new()
            .with_reservation(Reservation::new("RES-1001", ReservationStatus::Pending));
        let mut entity =
            ResolvedEntity::Reservation(Reservation::new("RES-1001", ReservationStatus::Pending));

        let outcome = reconcile(&mut entity, StatusHint::Failed, &store, &store).await;

        assert_eq!(outcome, ReconciliationOutcome::UpdateIssued);
        assert_eq!(entity.status(), Some("failed"));
        assert_eq!(
            store.update_calls(),
            vec![StoreCall::UpdateStatus {
                store: StoreKind::Reservation,
                id: "RES-1001".into(),
                status: "failed".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_already_cancelled_order_needs_nothing() {
        let store = MemoryStore::new().with_order(Order::new("9", OrderStatus::Cancelled));
        let mut entity = ResolvedEntity::Order(Order::new("9", OrderStatus::Cancelled));

        let outcome = reconcile(&mut entity, StatusHint::Failed, &store, &store).await;

        assert_eq!(outcome, ReconciliationOutcome::NoActionNeeded);
        assert!(store.calls().is_empty());
        assert_eq!(entity.status(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_non_failed_hints_never_write() {
        let store = MemoryStore::new().with_order(Order::new("9", OrderStatus::Pending));
        for hint in [StatusHint::Paid, StatusHint::Pending, StatusHint::None] {
            let mut entity = ResolvedEntity::Order(Order::new("9", OrderStatus::Pending));
            let outcome = reconcile(&mut entity, hint, &store, &store).await;
            assert_eq!(outcome, ReconciliationOutcome::NoActionNeeded);
        }
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_never_reconciled() {
        let store = MemoryStore::new();
        let mut entity = ResolvedEntity::NotFound;
        let outcome = reconcile(&mut entity, StatusHint::Failed, &store, &store).await;
        assert_eq!(outcome, ReconciliationOutcome::NoActionNeeded);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_failure_keeps_resolved_record() {
        let store = MemoryStore::new().with_order(Order::new("12", OrderStatus::Confirmed));
        store.fail_updates_with(StoreError::Transport("connection reset".into()));
        let mut entity = ResolvedEntity::Order(Order::new("12", OrderStatus::Confirmed));

        let outcome = reconcile(&mut entity, StatusHint::Failed, &store, &store).await;

        assert!(matches!(outcome, ReconciliationOutcome::UpdateFailed { .. }));
        assert_eq!(entity.id(), Some("12"));
        assert_eq!(entity.status(), Some("confirmed"));
    }
}
