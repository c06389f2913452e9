//! Value objects for the order domain.

use common::ProductId;
use serde::{Deserialize, Serialize};

/// Money amount represented in minor currency units to avoid floating point drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from minor units.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a Money amount from a major-unit decimal, rounded to the nearest cent.
    pub fn from_major(amount: f64) -> Self {
        Self {
            cents: (amount * 100.0).round() as i64,
        }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in minor units.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the amount as a major-unit decimal.
    pub fn as_major(&self) -> f64 {
        self.cents as f64 / 100.0
    }

    /// Returns the whole major-unit portion.
    pub fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the minor-unit remainder.
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents * i64::from(quantity),
        }
    }

    /// Applies a discount and rounds to the nearest cent.
    pub fn discounted(&self, discount: DiscountFraction) -> Money {
        let remaining = self.cents as f64 * (1.0 - discount.value());
        Money {
            cents: remaining.round() as i64,
        }
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-{}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "{}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.cents += rhs.cents;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// Order-level discount stored as a multiplier in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscountFraction(f64);

impl DiscountFraction {
    /// No discount.
    pub const NONE: DiscountFraction = DiscountFraction(0.0);

    /// Creates a fraction, clamping into `[0, 1]`. Non-finite input yields no discount.
    pub fn new(value: f64) -> Self {
        if value.is_finite() {
            Self(value.clamp(0.0, 1.0))
        } else {
            Self::NONE
        }
    }

    /// Fraction from a percentage magnitude (`10` → `0.10`).
    pub fn from_percent(percent: f64) -> Self {
        Self::new(percent / 100.0)
    }

    /// Fraction equivalent of a fixed amount off this total.
    pub fn from_fixed(amount: Money, total: Money) -> Self {
        if !total.is_positive() {
            return Self::NONE;
        }
        Self::new(amount.cents() as f64 / total.cents() as f64)
    }

    /// Returns the raw multiplier.
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Returns true when no discount applies.
    pub fn is_zero(&self) -> bool {
        self.0 == 0.0
    }

    /// Percentage form rounded to two decimals, as sent to the payment gateway.
    pub fn percent_off(&self) -> f64 {
        (self.0 * 100.0 * 100.0).round() / 100.0
    }
}

/// How an order is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentType {
    /// Paid on delivery.
    #[default]
    Cash,
    /// Paid through the payment gateway.
    Card,
}

impl PaymentType {
    /// Returns the stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Cash => "Cash",
            PaymentType::Card => "Card",
        }
    }

    /// Parses a stored name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Cash" => Some(PaymentType::Cash),
            "Card" => Some(PaymentType::Card),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchased product captured at order placement. Never repriced afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// The purchased product.
    pub product_id: ProductId,

    /// Product name at purchase time.
    pub name: String,

    /// Quantity ordered.
    pub quantity: u32,

    /// Catalog price per unit at purchase time.
    pub unit_price: Money,

    /// `quantity * unit_price`.
    pub final_price: Money,
}

impl OrderLine {
    /// Captures a line, computing its total.
    pub fn new(
        product_id: ProductId,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id,
            name: name.into(),
            quantity,
            unit_price,
            final_price: unit_price.multiply(quantity),
        }
    }
}
