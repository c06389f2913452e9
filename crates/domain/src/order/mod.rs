//! Order document, value objects and status machine.

mod model;
mod pricing;
mod state;
mod value_objects;

pub use model::{NewOrder, Order};
pub use pricing::{PricedCart, price_lines};
pub use state::{OrderStatus, OrderTransition};
pub use value_objects::{DiscountFraction, Money, OrderLine, PaymentType};

pub use crate::error::OrderError;
