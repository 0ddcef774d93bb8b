pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::{OrderQuery, RefundQuery};
pub use store::{BookingStore, FareStore, InventoryStore, OrderStore, PaymentStore, RefundStore};
