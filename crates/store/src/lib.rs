//! Collaborator stores for the order workflow.
//!
//! The workflow only sees the traits in [`store`]; two backends implement all
//! of them: [`InMemoryShopStore`] for tests and local runs, and
//! [`PostgresShopStore`] for deployments. Every state change the workflow
//! depends on is a conditional write evaluated by the backend at write time.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryShopStore;
pub use postgres::PostgresShopStore;
pub use query::{OrderFilter, OrderPatch, OrderQuery, Page};
pub use store::{CartStore, CatalogReader, CouponLedger, OrderRepository, ShopStore};
