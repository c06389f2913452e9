//! Order status machine.

use serde::{Deserialize, Serialize};

use super::{OrderError, PaymentType};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Placed ──► OnWay ──► Delivered
///    │          │          │           │
///    └──────────┴──────────┴───────────┴──► Cancelled
/// ```
///
/// Every status carries a numeric [`rank`](OrderStatus::rank) that mirrors the
/// stored ordering, and cancellation is accepted for any rank below
/// `Cancelled`. Delivered orders therefore remain cancellable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Card order awaiting payment confirmation.
    #[default]
    Pending,

    /// Order accepted: cash on delivery, or card payment confirmed.
    Placed,

    /// Order handed to delivery.
    #[serde(rename = "On_Way")]
    OnWay,

    /// Order delivered to the customer.
    Delivered,

    /// Order cancelled (terminal state).
    Cancelled,
}

/// A named move through the status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderTransition {
    /// The payment gateway confirmed the money moved.
    ConfirmPayment,
    /// The order left the warehouse.
    Dispatch,
    /// The order reached the customer.
    Deliver,
    /// The order was cancelled.
    Cancel,
}

impl OrderTransition {
    /// Returns the transition name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderTransition::ConfirmPayment => "confirm payment",
            OrderTransition::Dispatch => "dispatch",
            OrderTransition::Deliver => "deliver",
            OrderTransition::Cancel => "cancel",
        }
    }
}

const TRANSITIONS: &[(OrderStatus, OrderTransition, OrderStatus)] = &[
    (
        OrderStatus::Pending,
        OrderTransition::ConfirmPayment,
        OrderStatus::Placed,
    ),
    (
        OrderStatus::Placed,
        OrderTransition::Dispatch,
        OrderStatus::OnWay,
    ),
    (
        OrderStatus::OnWay,
        OrderTransition::Deliver,
        OrderStatus::Delivered,
    ),
    (
        OrderStatus::Pending,
        OrderTransition::Cancel,
        OrderStatus::Cancelled,
    ),
    (
        OrderStatus::Placed,
        OrderTransition::Cancel,
        OrderStatus::Cancelled,
    ),
    (
        OrderStatus::OnWay,
        OrderTransition::Cancel,
        OrderStatus::Cancelled,
    ),
    (
        OrderStatus::Delivered,
        OrderTransition::Cancel,
        OrderStatus::Cancelled,
    ),
];

impl OrderStatus {
    /// All statuses in rank order.
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Placed,
        OrderStatus::OnWay,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Initial status of a freshly placed order.
    ///
    /// Cash orders are placed immediately; card orders wait for the gateway.
    pub fn initial_for(payment_type: PaymentType) -> Self {
        match payment_type {
            PaymentType::Card => OrderStatus::Pending,
            PaymentType::Cash => OrderStatus::Placed,
        }
    }

    /// Numeric rank used by stored-status comparisons.
    pub fn rank(&self) -> i16 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Placed => 1,
            OrderStatus::OnWay => 2,
            OrderStatus::Delivered => 3,
            OrderStatus::Cancelled => 4,
        }
    }

    /// Inverse of [`rank`](OrderStatus::rank).
    pub fn from_rank(rank: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.rank() == rank)
    }

    /// Returns the status reached by applying `transition`, if the table allows it.
    pub fn next(&self, transition: OrderTransition) -> Option<OrderStatus> {
        TRANSITIONS
            .iter()
            .find(|(from, t, _)| from == self && *t == transition)
            .map(|(_, _, to)| *to)
    }

    /// Like [`next`](OrderStatus::next) but reports a rejected move as an error.
    pub fn apply(&self, transition: OrderTransition) -> Result<OrderStatus, OrderError> {
        self.next(transition)
            .ok_or(OrderError::InvalidStateTransition {
                current_state: *self,
                action: transition.as_str(),
            })
    }

    /// Returns true if the order can still be cancelled.
    pub fn can_cancel(&self) -> bool {
        self.rank() < OrderStatus::Cancelled.rank()
    }

    /// Returns true if a payment confirmation is still expected.
    pub fn awaits_payment(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled)
    }

    /// Returns the stored status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Placed => "Placed",
            OrderStatus::OnWay => "On_Way",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
