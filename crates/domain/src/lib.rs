//! Booking domain: pure types and transitions.
//!
//! - [`inventory`]: cabin slots and holds
//! - [`pricing`]: fares and creation-time price snapshots
//! - [`order`]: the order state machine
//! - [`payment`] and [`refund`]: money moving in and out
//! - [`events`]: notifications emitted after state changes
//!
//! Nothing here performs I/O; the `booking` crate drives these types against
//! a store and payment providers.

pub mod events;
pub mod inventory;
pub mod money;
pub mod numbering;
pub mod order;
pub mod payment;
pub mod pricing;
pub mod refund;

pub use events::{BookingEvent, OrderEventData, RefundEventData};
pub use inventory::{CabinInventorySlot, Hold, HoldChange, HoldState, InventoryError, SlotKey};
pub use money::Money;
pub use order::{
    CancellationReason, Contact, ContactUpdate, NewOrder, Order, OrderError, OrderItem,
    OrderStatus, Passenger, PassengerType, PaymentStatus,
};
pub use payment::{Payment, PaymentMethod, PaymentState};
pub use pricing::{Fare, ItemRequest, Occupancy, PricedItem, PricingSnapshot};
pub use refund::{RefundError, RefundRequest, RefundStatus, RefundType};
