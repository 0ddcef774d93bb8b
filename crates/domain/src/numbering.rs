//! Human-facing business numbers for orders, payments and refunds.

use chrono::{DateTime, Utc};
use uuid::Uuid;

fn business_number(prefix: &str, now: DateTime<Utc>, random_len: usize) -> String {
    let random = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{prefix}{}{}", now.format("%Y%m%d"), &random[..random_len])
}

/// `ORD20261019A1B2C3D4`
pub fn order_number(now: DateTime<Utc>) -> String {
    business_number("ORD", now, 8)
}

/// `PAY20261019` followed by 12 random characters.
pub fn payment_number(now: DateTime<Utc>) -> String {
    business_number("PAY", now, 12)
}

/// `REF20261019` followed by 12 random characters.
pub fn refund_number(now: DateTime<Utc>) -> String {
    business_number("REF", now, 12)
}
