pub mod inventory;
pub mod orders;
pub mod payments;
pub mod refunds;
pub mod system;
