use common::{OrderId, UserId, VoyageId};
use domain::{Order, OrderStatus, PaymentStatus, RefundRequest, RefundStatus};
use serde::Deserialize;

/// Filter for listing orders. Results are newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderQuery {
    pub user_id: Option<UserId>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    /// Orders with at least one cabin on this voyage.
    pub voyage_id: Option<VoyageId>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl OrderQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn payment_status(mut self, payment_status: PaymentStatus) -> Self {
        self.payment_status = Some(payment_status);
        self
    }

    pub fn voyage(mut self, voyage_id: VoyageId) -> Self {
        self.voyage_id = Some(voyage_id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// In-process version of the filter.
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(ref user_id) = self.user_id
            && order.user_id() != Some(user_id)
        {
            return false;
        }
        if let Some(status) = self.status
            && order.status() != status
        {
            return false;
        }
        if let Some(payment_status) = self.payment_status
            && order.payment_status() != payment_status
        {
            return false;
        }
        if let Some(voyage_id) = self.voyage_id
            && !order.items().iter().any(|item| item.voyage_id == voyage_id)
        {
            return false;
        }
        true
    }
}

/// Filter for listing refund requests. Results are newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefundQuery {
    pub order_id: Option<OrderId>,
    pub user_id: Option<UserId>,
    pub status: Option<RefundStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl RefundQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_order(order_id: OrderId) -> Self {
        Self {
            order_id: Some(order_id),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: RefundStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, refund: &RefundRequest) -> bool {
        if let Some(order_id) = self.order_id
            && refund.order_id != order_id
        {
            return false;
        }
        if let Some(ref user_id) = self.user_id
            && refund.user_id.as_ref() != Some(user_id)
        {
            return false;
        }
        if let Some(status) = self.status
            && refund.status != status
        {
            return false;
        }
        true
    }
}

/// Applies offset and limit to an already sorted list.
pub(crate) fn paginate<T>(items: Vec<T>, offset: Option<usize>, limit: Option<usize>) -> Vec<T> {
    let items = items.into_iter().skip(offset.unwrap_or(0));
    match limit {
        Some(limit) => items.take(limit).collect(),
        None => items.collect(),
    }
}
