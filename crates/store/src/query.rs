use chrono::{DateTime, Utc};
use common::{ExternalOrderId, OrderId, UserId};
use domain::{Order, OrderStatus, PaymentType};
use serde::Serialize;

/// Predicate over stored orders.
///
/// Every set field must match. Frozen orders never match unless
/// `include_frozen` is set.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Match by internal ID.
    pub id: Option<OrderId>,

    /// Match by the public order token.
    pub external_id: Option<ExternalOrderId>,

    /// Match by creator.
    pub created_by: Option<UserId>,

    /// Match by payment type.
    pub payment_type: Option<PaymentType>,

    /// Match an exact status.
    pub status: Option<OrderStatus>,

    /// Match any status ranked strictly below this one.
    pub status_below: Option<OrderStatus>,

    /// Also match soft-frozen orders.
    pub include_frozen: bool,
}

impl OrderFilter {
    /// Creates a filter for a specific order.
    pub fn by_id(id: OrderId) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    /// Creates a filter for the order carrying a public token.
    pub fn by_external_id(external_id: ExternalOrderId) -> Self {
        Self {
            external_id: Some(external_id),
            ..Default::default()
        }
    }

    /// Restricts to orders created by `user`.
    pub fn created_by(mut self, user: UserId) -> Self {
        self.created_by = Some(user);
        self
    }

    /// Restricts to a payment type.
    pub fn payment_type(mut self, payment_type: PaymentType) -> Self {
        self.payment_type = Some(payment_type);
        self
    }

    /// Restricts to an exact status.
    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restricts to statuses ranked below `status`.
    pub fn status_below(mut self, status: OrderStatus) -> Self {
        self.status_below = Some(status);
        self
    }

    /// Evaluates the predicate against an order.
    pub fn matches(&self, order: &Order) -> bool {
        if !self.include_frozen && order.is_frozen() {
            return false;
        }
        if let Some(id) = self.id
            && order.id != id
        {
            return false;
        }
        if let Some(ref external_id) = self.external_id
            && &order.external_id != external_id
        {
            return false;
        }
        if let Some(user) = self.created_by
            && order.created_by != user
        {
            return false;
        }
        if let Some(payment_type) = self.payment_type
            && order.payment_type != payment_type
        {
            return false;
        }
        if let Some(status) = self.status
            && order.status != status
        {
            return false;
        }
        if let Some(bound) = self.status_below
            && order.status.rank() >= bound.rank()
        {
            return false;
        }
        true
    }
}

/// Fields written by a conditional order update.
///
/// Unset fields are left untouched. Applying any patch bumps `updated_at`
/// and `version`.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_intent: Option<String>,
    pub updated_by: Option<UserId>,
    pub cancel_reason: Option<String>,
}

impl OrderPatch {
    /// Applies the patch to an in-memory order.
    pub fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(paid_at) = self.paid_at {
            order.paid_at = Some(paid_at);
        }
        if let Some(ref intent) = self.payment_intent {
            order.payment_intent = Some(intent.clone());
        }
        if let Some(user) = self.updated_by {
            order.updated_by = Some(user);
        }
        if let Some(ref reason) = self.cancel_reason {
            order.cancel_reason = Some(reason.clone());
        }
        order.updated_at = Utc::now();
        order.version += 1;
    }
}

/// Page request for order listings.
#[derive(Debug, Clone, Copy)]
pub struct OrderQuery {
    /// 1-based page number.
    pub page: u32,

    /// Page size.
    pub size: u32,

    /// List only soft-frozen orders instead of live ones.
    pub archived: bool,
}

impl OrderQuery {
    /// Largest page size served.
    pub const MAX_SIZE: u32 = 100;

    /// Creates a page request, normalising out-of-range values.
    pub fn new(page: u32, size: u32, archived: bool) -> Self {
        Self {
            page: page.max(1),
            size: size.clamp(1, Self::MAX_SIZE),
            archived,
        }
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.size)
    }
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self::new(1, 20, false)
    }
}

/// A page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub pages: u64,
}

impl<T> Page<T> {
    /// Builds a page, deriving the page count.
    pub fn new(items: Vec<T>, total: u64, query: &OrderQuery) -> Self {
        Self {
            items,
            total,
            page: query.page,
            size: query.size,
            pages: total.div_ceil(u64::from(query.size)),
        }
    }
}
