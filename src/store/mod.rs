//! Store seams for orders and reservations.
//!
//! The return page only ever needs four calls: find and update-status for
//! each entity kind. Adapters: the admin dashboard REST API (`crate::api`),
//! the local SQLite mirror (`crate::db`) and an in-memory store for tests.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::entity::{Order, OrderStatus, Reservation, ReservationStatus};
use crate::error::StoreError;

pub use memory::MemoryStore;

/// Which store a lookup or update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Order,
    Reservation,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Reservation => "reservation",
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fetch an order by its exact id. Absence is `StoreError::NotFound`.
    async fn find_order(&self, id: &str) -> Result<Order, StoreError>;

    /// Set the order's status and return the updated record.
    async fn update_order_status(&self, id: &str, status: OrderStatus)
        -> Result<Order, StoreError>;
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn find_reservation(&self, id: &str) -> Result<Reservation, StoreError>;

    async fn update_reservation_status(
        &self,
        id: &str,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError>;
}
