//! Coupon definitions and per-user usage accounting.

use chrono::{DateTime, Utc};
use common::{CouponId, UserId};
use serde::{Deserialize, Serialize};

use crate::order::{DiscountFraction, Money};

/// How a coupon's magnitude is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CouponType {
    /// Magnitude is a percentage off.
    #[default]
    Percent,
    /// Magnitude is a fixed amount off, in major units.
    Fixed,
}

impl CouponType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponType::Percent => "Percent",
            CouponType::Fixed => "Fixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Percent" => Some(CouponType::Percent),
            "Fixed" => Some(CouponType::Fixed),
            _ => None,
        }
    }
}

/// A discount definition with its redemption ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    pub name: String,
    pub slug: String,
    /// Percentage for `Percent`, major-unit amount for `Fixed`.
    pub discount: f64,
    pub kind: CouponType,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Maximum redemptions per user.
    pub duration: u32,
    /// One entry per redemption.
    pub used_by: Vec<UserId>,
}

impl Coupon {
    /// Number of times `user` redeemed this coupon.
    pub fn usage_count(&self, user: UserId) -> u32 {
        self.used_by.iter().filter(|u| **u == user).count() as u32
    }

    /// Returns true once `user` reached the per-user cap.
    pub fn is_exhausted_for(&self, user: UserId) -> bool {
        self.usage_count(user) >= self.duration
    }

    /// Returns true if `now` falls inside the validity window.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now <= self.ends_at
    }

    /// The order-level discount this coupon grants on `total`.
    pub fn discount_fraction(&self, total: Money) -> DiscountFraction {
        match self.kind {
            CouponType::Percent => DiscountFraction::from_percent(self.discount),
            CouponType::Fixed => DiscountFraction::from_fixed(Money::from_major(self.discount), total),
        }
    }
}

/// Lowercase, hyphen-separated form of a coupon name.
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}
