//! In-memory order and reservation store.
//!
//! Implements both store traits over plain maps and records every call in
//! order, so tests can assert exactly which lookups ran and that no write
//! happened. Calls can also be held mid-flight to exercise cancellation.
//! Not meant for production: nothing is persisted.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;

use super::{OrderStore, ReservationStore, StoreKind};
use crate::entity::{Order, OrderStatus, Reservation, ReservationStatus};
use crate::error::StoreError;

/// One call made against the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreCall {
    Find { store: StoreKind, id: String },
    UpdateStatus { store: StoreKind, id: String, status: String },
}

#[derive(Debug, Default)]
struct Inner {
    orders: HashMap<String, Order>,
    reservations: HashMap<String, Reservation>,
    calls: Vec<StoreCall>,
    /// Ids whose lookups fail with a transport error instead of answering.
    unreachable: HashSet<(StoreKind, String)>,
    fail_updates: Option<StoreError>,
    held_lookups: HashSet<(StoreKind, String)>,
    hold_updates: bool,
}

/// Parks a held call until `release`.
#[derive(Debug, Default)]
struct Hold {
    entered: Notify,
    released: Notify,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    hold: Hold,
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Database("memory store lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(self, order: Order) -> Self {
        self.insert_order(order);
        self
    }

    pub fn with_reservation(self, reservation: Reservation) -> Self {
        self.insert_reservation(reservation);
        self
    }

    pub fn insert_order(&self, order: Order) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.orders.insert(order.id.clone(), order);
    }

    pub fn insert_reservation(&self, reservation: Reservation) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .reservations
            .insert(reservation.id.clone(), reservation);
    }

    /// Make lookups of `id` in `store` fail as if the backend were down.
    pub fn make_unreachable(&self, store: StoreKind, id: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.unreachable.insert((store, id.into()));
    }

    /// Make every status update fail with `err`.
    pub fn fail_updates_with(&self, err: StoreError) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.fail_updates = Some(err);
    }

    /// Park lookups of `id` in `store` after they are recorded.
    pub fn hold_lookup(&self, store: StoreKind, id: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.held_lookups.insert((store, id.into()));
    }

    /// Park every status update after it is recorded.
    pub fn hold_updates(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.hold_updates = true;
    }

    /// Resolves once a held call is parked.
    pub async fn held(&self) {
        self.hold.entered.notified().await;
    }

    /// Let the parked call run to completion.
    pub fn release(&self) {
        self.hold.released.notify_one();
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.calls.clone()
    }

    pub fn update_calls(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::UpdateStatus { .. }))
            .collect()
    }

    pub fn order(&self, id: &str) -> Option<Order> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.orders.get(id).cloned()
    }

    pub fn reservation(&self, id: &str) -> Option<Reservation> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.reservations.get(id).cloned()
    }
}

impl MemoryStore {
    /// Record `call`; true when it must be parked.
    fn begin(&self, call: StoreCall) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        let held = match &call {
            StoreCall::Find { store, id } => inner.held_lookups.contains(&(*store, id.clone())),
            StoreCall::UpdateStatus { .. } => inner.hold_updates,
        };
        inner.calls.push(call);
        Ok(held)
    }

    async fn park(&self) {
        self.hold.entered.notify_one();
        self.hold.released.notified().await;
    }
}

impl Inner {
    fn check_reachable(&self, store: StoreKind, id: &str) -> Result<(), StoreError> {
        if self.unreachable.contains(&(store, id.to_string())) {
            return Err(StoreError::Transport(format!(
                "{} store unreachable",
                store.as_str()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_order(&self, id: &str) -> Result<Order, StoreError> {
        let held = self.begin(StoreCall::Find {
            store: StoreKind::Order,
            id: id.to_string(),
        })?;
        if held {
            self.park().await;
        }
        let inner = self.inner.lock().map_err(poisoned)?;
        inner.check_reachable(StoreKind::Order, id)?;
        inner
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", id))
    }

    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let held = self.begin(StoreCall::UpdateStatus {
            store: StoreKind::Order,
            id: id.to_string(),
            status: status.as_str().to_string(),
        })?;
        if held {
            self.park().await;
        }
        let mut inner = self.inner.lock().map_err(poisoned)?;
        if let Some(err) = inner.fail_updates.clone() {
            return Err(err);
        }
        let order = inner
            .orders
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("order", id))?;
        order.status = status;
        Ok(order.clone())
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn find_reservation(&self, id: &str) -> Result<Reservation, StoreError> {
        let held = self.begin(StoreCall::Find {
            store: StoreKind::Reservation,
            id: id.to_string(),
        })?;
        if held {
            self.park().await;
        }
        let inner = self.inner.lock().map_err(poisoned)?;
        inner.check_reachable(StoreKind::Reservation, id)?;
        inner
            .reservations
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("reservation", id))
    }

    async fn update_reservation_status(
        &self,
        id: &str,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError> {
        let held = self.begin(StoreCall::UpdateStatus {
            store: StoreKind::Reservation,
            id: id.to_string(),
            status: status.as_str().to_string(),
        })?;
        if held {
            self.park().await;
        }
        let mut inner = self.inner.lock().map_err(poisoned)?;
        if let Some(err) = inner.fail_updates.clone() {
            return Err(err);
        }
        let reservation = inner
            .reservations
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("reservation", id))?;
        reservation.status = status;
        Ok(reservation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookups_are_recorded_in_order() {
        let store = MemoryStore::new().with_order(Order::new("77", OrderStatus::Paid));

        assert!(store.find_order("77").await.is_ok());
        let missing = store.find_reservation("RES-77").await.unwrap_err();
        assert!(missing.is_not_found());

        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Find {
                    store: StoreKind::Order,
                    id: "77".into()
                },
                StoreCall::Find {
                    store: StoreKind::Reservation,
                    id: "RES-77".into()
                },
            ]
        );
        assert!(store.update_calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_changes_stored_status() {
        let store = MemoryStore::new()
            .with_reservation(Reservation::new("RES-1", ReservationStatus::Pending));
        let updated = store
            .update_reservation_status("RES-1", ReservationStatus::Failed)
            .await
            .unwrap();
        assert_eq!(updated.status, ReservationStatus::Failed);
        assert_eq!(
            store.reservation("RES-1").unwrap().status,
            ReservationStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_unreachable_id_reports_transport_error() {
        let store = MemoryStore::new().with_order(Order::new("5", OrderStatus::Pending));
        store.make_unreachable(StoreKind::Order, "5");
        let err = store.find_order("5").await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
    }

    #[tokio::test]
    async fn test_held_update_waits_for_release() {
        let store = MemoryStore::new().with_order(Order::new("5", OrderStatus::Pending));
        store.hold_updates();

        let (updated, ()) = tokio::join!(store.update_order_status("5", OrderStatus::Failed), async {
            store.held().await;
            assert_eq!(store.update_calls().len(), 1);
            assert_eq!(store.order("5").unwrap().status, OrderStatus::Pending);
            store.release();
        });

        assert_eq!(updated.unwrap().status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_injected_update_failure() {
        let store = MemoryStore::new().with_order(Order::new("5", OrderStatus::Pending));
        store.fail_updates_with(StoreError::Status {
            status: 503,
            message: "unavailable".into(),
        });
        assert!(store
            .update_order_status("5", OrderStatus::Failed)
            .await
            .is_err());
        assert_eq!(store.order("5").unwrap().status, OrderStatus::Pending);
        assert_eq!(store.update_calls().len(), 1);
    }
}
