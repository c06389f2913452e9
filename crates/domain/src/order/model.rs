//! The persisted order document.

use chrono::{DateTime, Utc};
use common::{CouponId, ExternalOrderId, OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{DiscountFraction, Money, OrderError, OrderLine, OrderStatus, PaymentType};

/// Snapshot of a purchase at the moment of placement.
///
/// `subtotal` always equals `total` with `discount` applied, rounded to the
/// cent; use [`Order::reprice`] rather than assigning either field directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub external_id: ExternalOrderId,
    pub address: String,
    pub phone: String,
    pub note: Option<String>,
    pub lines: Vec<OrderLine>,
    pub coupon: Option<CouponId>,
    pub discount: DiscountFraction,
    pub total: Money,
    pub subtotal: Money,
    pub payment_type: PaymentType,
    pub status: OrderStatus,
    pub cancel_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_intent: Option<String>,
    pub created_by: UserId,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub frozen_at: Option<DateTime<Utc>>,
    pub restored_at: Option<DateTime<Utc>>,
    pub version: i64,
}

/// Everything needed to materialize a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub address: String,
    pub phone: String,
    pub note: Option<String>,
    pub lines: Vec<OrderLine>,
    pub coupon: Option<CouponId>,
    pub discount: DiscountFraction,
    pub payment_type: PaymentType,
    pub created_by: UserId,
}

impl Order {
    /// Materializes a new order with fresh identifiers, totals and initial status.
    pub fn place(new: NewOrder) -> Result<Self, OrderError> {
        if new.lines.is_empty() {
            return Err(OrderError::NoLines);
        }
        if let Some(line) = new.lines.iter().find(|l| l.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: line.product_id,
                quantity: line.quantity,
            });
        }

        let now = Utc::now();
        let total = new.lines.iter().map(|l| l.final_price).sum();
        let mut order = Self {
            id: OrderId::new(),
            external_id: ExternalOrderId::generate(),
            address: new.address,
            phone: new.phone,
            note: new.note,
            lines: new.lines,
            coupon: new.coupon,
            discount: new.discount,
            total: Money::zero(),
            subtotal: Money::zero(),
            payment_type: new.payment_type,
            status: OrderStatus::initial_for(new.payment_type),
            cancel_reason: None,
            paid_at: None,
            payment_intent: None,
            created_by: new.created_by,
            updated_by: None,
            created_at: now,
            updated_at: now,
            frozen_at: None,
            restored_at: None,
            version: 0,
        };
        order.reprice(total, new.discount);
        Ok(order)
    }

    /// Sets total and discount, recomputing the subtotal.
    pub fn reprice(&mut self, total: Money, discount: DiscountFraction) {
        self.total = total;
        self.discount = discount;
        self.subtotal = total.discounted(discount);
    }

    /// Total number of units across all lines.
    pub fn unit_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Returns true if the order is soft-frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }
}
