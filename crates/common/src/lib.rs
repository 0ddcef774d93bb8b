//! Identifier and version types shared by every crate in the booking engine.

pub mod types;
pub mod version;

pub use types::{CabinTypeId, HoldToken, OrderId, PaymentId, RefundId, UserId, VoyageId};
pub use version::Version;
