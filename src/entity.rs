//! Order and reservation records as seen by the return page.
//!
//! Only `id` and `status` are interpreted here; everything else the store
//! returns is carried through untouched in `payload` for the result view.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    #[serde(alias = "canceled")]
    Cancelled,
    Paid,
    Failed,
}

impl OrderStatus {
    /// Already in a terminal failure state; a failed redirect needs no
    /// correction.
    pub fn is_failed_or_cancelled(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::Cancelled => "cancelled",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

/// Reservation statuses use the single-l `canceled` spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    #[serde(alias = "cancelled")]
    Canceled,
    Paid,
    Failed,
}

impl ReservationStatus {
    pub fn is_failed_or_cancelled(self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Canceled => "canceled",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Order {
    pub fn new(id: impl Into<String>, status: OrderStatus) -> Self {
        Self {
            id: id.into(),
            status,
            payload: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub status: ReservationStatus,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Reservation {
    pub fn new(id: impl Into<String>, status: ReservationStatus) -> Self {
        Self {
            id: id.into(),
            status,
            payload: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Order,
    Reservation,
    NotFound,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Reservation => "reservation",
            Self::NotFound => "not_found",
        }
    }
}

/// Outcome of the strategy chain: exactly one of these per page load.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedEntity {
    Order(Order),
    Reservation(Reservation),
    NotFound,
}

impl ResolvedEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Order(_) => EntityKind::Order,
            Self::Reservation(_) => EntityKind::Reservation,
            Self::NotFound => EntityKind::NotFound,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Order(order) => Some(&order.id),
            Self::Reservation(reservation) => Some(&reservation.id),
            Self::NotFound => None,
        }
    }

    pub fn status(&self) -> Option<&'static str> {
        match self {
            Self::Order(order) => Some(order.status.as_str()),
            Self::Reservation(reservation) => Some(reservation.status.as_str()),
            Self::NotFound => None,
        }
    }

    /// Serialised record for the result view, `None` when nothing matched.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Order(order) => serde_json::to_value(order).ok(),
            Self::Reservation(reservation) => serde_json::to_value(reservation).ok(),
            Self::NotFound => None,
        }
    }
}
