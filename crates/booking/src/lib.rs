//! Cruise booking engine.
//!
//! The services here drive the pure `domain` types against a `store`:
//!
//! - [`InventoryLedger`]: the only writer of cabin availability
//! - [`OrderService`]: order creation, cancellation, confirmation and completion
//! - [`PaymentGateway`]: provider intents, callbacks and refunds
//! - [`RefundWorkflow`]: refund review and settlement
//! - [`ReservationExpiry`]: background cancellation of abandoned orders
//! - [`InventoryAlert`]: background warning when a slot is nearly sold out
//!
//! [`BookingEngine`] wires them together over one store, clock and notifier.
//!
//! ```ignore
//! let engine = BookingEngine::builder(InMemoryStore::new())
//!     .hold_ttl(chrono::Duration::minutes(15))
//!     .provider(Arc::new(WalletProvider::new(url, secret)))
//!     .build();
//! let order = engine.orders().create(request).await?;
//! ```

pub mod alert;
pub mod clock;
pub mod error;
pub mod expiry;
pub mod ledger;
pub mod notify;
pub mod orders;
pub mod payment;
pub mod refund;

use std::sync::Arc;
use std::time::Duration;

use store::BookingStore;
use tokio::sync::watch;

pub use alert::{
    AlertReport, AlertSettings, DEFAULT_ALERT_COOLDOWN_SECS, DEFAULT_ALERT_INTERVAL,
    DEFAULT_ALERT_THRESHOLD, InventoryAlert,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{BookingError, Result};
pub use expiry::{ReservationExpiry, SweepReport};
pub use ledger::InventoryLedger;
pub use notify::{ChannelNotifier, Notifier, SharedNotifier, TracingNotifier};
pub use orders::{OrderDetails, OrderService};
pub use payment::{
    CallbackOutcome, CardProvider, InMemoryProvider, PaymentError, PaymentGateway,
    PaymentIntentView, PaymentProvider, ProviderBehavior, WalletProvider,
};
pub use refund::{NewRefund, RefundWorkflow};

pub const DEFAULT_HOLD_TTL_SECS: i64 = 15 * 60;
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// All booking services sharing one store.
#[derive(Clone)]
pub struct BookingEngine<S> {
    store: S,
    clock: SharedClock,
    notifier: SharedNotifier,
    ledger: InventoryLedger<S>,
    orders: OrderService<S>,
    payments: Arc<PaymentGateway<S>>,
    refunds: Arc<RefundWorkflow<S>>,
}

impl<S: BookingStore> BookingEngine<S> {
    pub fn builder(store: S) -> BookingEngineBuilder<S> {
        BookingEngineBuilder::new(store)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn ledger(&self) -> &InventoryLedger<S> {
        &self.ledger
    }

    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    pub fn payments(&self) -> &PaymentGateway<S> {
        &self.payments
    }

    pub fn refunds(&self) -> &RefundWorkflow<S> {
        &self.refunds
    }

    /// Builds the expiry sweep over this engine's orders.
    pub fn expiry(
        &self,
        batch_size: usize,
        interval: Duration,
    ) -> (ReservationExpiry<S>, watch::Sender<bool>) {
        ReservationExpiry::new(
            self.orders.clone(),
            self.store.clone(),
            self.clock.clone(),
            batch_size,
            interval,
        )
    }

    /// Builds the low-inventory check, notifying through this engine's notifier.
    pub fn inventory_alert(
        &self,
        settings: AlertSettings,
    ) -> (InventoryAlert<S>, watch::Sender<bool>) {
        InventoryAlert::new(
            self.store.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            settings,
        )
    }
}

pub struct BookingEngineBuilder<S> {
    store: S,
    clock: SharedClock,
    notifier: SharedNotifier,
    hold_ttl: chrono::Duration,
    provider_timeout: Duration,
    providers: Vec<Arc<dyn PaymentProvider>>,
}

impl<S: BookingStore> BookingEngineBuilder<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(TracingNotifier),
            hold_ttl: chrono::Duration::seconds(DEFAULT_HOLD_TTL_SECS),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            providers: Vec::new(),
        }
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// How long a new order's cabins stay held without payment.
    pub fn hold_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.hold_ttl = ttl;
        self
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> BookingEngine<S> {
        let ledger = InventoryLedger::new(self.store.clone(), self.clock.clone());
        let orders = OrderService::new(
            self.store.clone(),
            ledger.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            self.hold_ttl,
        );
        let payments = Arc::new(self.providers.into_iter().fold(
            PaymentGateway::new(
                self.store.clone(),
                ledger.clone(),
                self.notifier.clone(),
                self.clock.clone(),
                self.provider_timeout,
            ),
            PaymentGateway::with_provider,
        ));
        let refunds = Arc::new(RefundWorkflow::new(
            self.store.clone(),
            orders.clone(),
            payments.clone(),
            self.notifier.clone(),
            self.clock.clone(),
        ));
        BookingEngine {
            store: self.store,
            clock: self.clock,
            notifier: self.notifier,
            ledger,
            orders,
            payments,
            refunds,
        }
    }
}
