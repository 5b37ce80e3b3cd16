//! Persistence for the order fulfillment engine.
//!
//! Four storage contracts, each implemented in memory and on PostgreSQL:
//! - [`InventoryLedger`]: atomic stock reservation and release
//! - [`ProductCatalog`]: product rows used for pricing and snapshots
//! - [`OrderRepository`]: orders with unique order numbers and versioned updates
//! - [`PaymentRepository`]: payment records with unique transaction ids

pub mod error;
pub mod ledger;
pub mod memory;
pub mod orders;
pub mod payments;
pub mod postgres;

pub use domain::Version;
pub use error::{Result, StoreError};
pub use ledger::{InventoryLedger, ProductCatalog, Reservation};
pub use memory::InMemoryStore;
pub use orders::{OrderRepository, OrderRepositoryExt};
pub use payments::PaymentRepository;
pub use postgres::PostgresStore;
